use std::{path::PathBuf, time::Duration};

use ::config::{Config, Environment};
use qmon_error::ConfigError;
use serde::{Deserialize, Serialize};

use crate::{
    logging::{LogFormat, LoggingConfig},
    monitor::MonitorConfig,
    network::{ConnectionConfig, ServerConfig},
};

/// Префикс переменных окружения.
pub const ENV_PREFIX: &str = "QMON";

/// Итоговые настройки процесса.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// 0 error, 1 warn, 2 info, 3 debug
    pub log_level: u8,
    /// Порог средней загрузки CPU для оповещения
    pub cpu_load: f64,
    pub tick_interval_ms: u64,
    /// Размер пула потоков; по умолчанию число ядер
    pub workers: Option<usize>,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

/// Значения из командной строки. `None` не переопределяет ничего.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<u8>,
    pub cpu_load: Option<f64>,
    pub tick_interval_ms: Option<u64>,
    pub workers: Option<usize>,
    pub log_format: Option<LogFormat>,
    pub log_dir: Option<PathBuf>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Загружает настройки из окружения процесса и флагов.
    pub fn load(overrides: &SettingsOverrides) -> Result<Self, ConfigError> {
        Self::from_sources(Environment::with_prefix(ENV_PREFIX), overrides)
    }

    /// Собирает настройки из явного источника окружения.
    pub fn from_sources(
        env: Environment,
        overrides: &SettingsOverrides,
    ) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .set_default("host", "0.0.0.0")
            .and_then(|b| b.set_default("port", 5672))
            .and_then(|b| b.set_default("log_level", 2))
            .and_then(|b| b.set_default("cpu_load", 0.9))
            .and_then(|b| b.set_default("tick_interval_ms", 1000))
            .and_then(|b| b.set_default("log_format", "compact"))
            .map(|b| b.add_source(env.try_parsing(true)))
            .and_then(|b| b.set_override_option("host", overrides.host.clone()))
            .and_then(|b| b.set_override_option("port", overrides.port.map(i64::from)))
            .and_then(|b| b.set_override_option("log_level", overrides.log_level.map(i64::from)))
            .and_then(|b| b.set_override_option("cpu_load", overrides.cpu_load))
            .and_then(|b| {
                b.set_override_option(
                    "tick_interval_ms",
                    overrides.tick_interval_ms.map(|v| v.to_string()),
                )
            })
            .and_then(|b| {
                b.set_override_option("workers", overrides.workers.map(|v| v.to_string()))
            })
            .and_then(|b| {
                b.set_override_option("log_format", overrides.log_format.map(|f| f.to_string()))
            })
            .and_then(|b| {
                b.set_override_option(
                    "log_dir",
                    overrides
                        .log_dir
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned()),
                )
            })
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Source(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level > 3 {
            return Err(ConfigError::InvalidLogLevel(self.log_level));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if !self.cpu_load.is_finite() || self.cpu_load < 0.0 {
            return Err(ConfigError::InvalidCpuLoad(self.cpu_load));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval);
        }
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidWorkers);
        }
        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            container_id: format!("qmon-{}", std::process::id()),
            connection: ConnectionConfig::default(),
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level,
            format: self.log_format,
            log_dir: self.log_dir.clone(),
            ..Default::default()
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            tick_interval: self.tick_interval(),
            load_threshold: self.cpu_load,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5672,
            log_level: 2,
            cpu_load: 0.9,
            tick_interval_ms: 1000,
            workers: None,
            log_format: LogFormat::Compact,
            log_dir: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: ::config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    /// Тест проверяет значения по умолчанию без окружения и флагов.
    #[test]
    fn test_defaults() {
        let settings = Settings::from_sources(env(&[]), &SettingsOverrides::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.tick_interval(), Duration::from_secs(1));
    }

    /// Тест проверяет, что окружение переопределяет значения по умолчанию.
    #[test]
    fn test_env_layer() {
        let settings = Settings::from_sources(
            env(&[
                ("QMON_PORT", "6000"),
                ("QMON_CPU_LOAD", "1.5"),
                ("QMON_LOG_FORMAT", "json"),
                ("QMON_WORKERS", "3"),
            ]),
            &SettingsOverrides::default(),
        )
        .unwrap();
        assert_eq!(settings.port, 6000);
        assert_eq!(settings.cpu_load, 1.5);
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.worker_threads(), 3);
    }

    /// Тест проверяет, что флаги важнее окружения.
    #[test]
    fn test_cli_overrides_env() {
        let overrides = SettingsOverrides {
            port: Some(7000),
            log_level: Some(3),
            log_dir: Some(PathBuf::from("/tmp/qmon-logs")),
            ..Default::default()
        };
        let settings =
            Settings::from_sources(env(&[("QMON_PORT", "6000")]), &overrides).unwrap();
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.log_level, 3);
        assert_eq!(settings.log_dir, Some(PathBuf::from("/tmp/qmon-logs")));
        assert_eq!(settings.logging_config().level, 3);
    }

    #[test]
    fn test_validation_errors() {
        let overrides = SettingsOverrides {
            log_level: Some(4),
            ..Default::default()
        };
        assert_eq!(
            Settings::from_sources(env(&[]), &overrides),
            Err(ConfigError::InvalidLogLevel(4))
        );

        let mut settings = Settings::default();
        settings.port = 0;
        assert_eq!(settings.validate(), Err(ConfigError::InvalidPort));

        let mut settings = Settings::default();
        settings.cpu_load = f64::NAN;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidCpuLoad(_))
        ));

        let mut settings = Settings::default();
        settings.workers = Some(0);
        assert_eq!(settings.validate(), Err(ConfigError::InvalidWorkers));
    }

    #[test]
    fn test_unparsable_env_is_source_error() {
        let result = Settings::from_sources(
            env(&[("QMON_PORT", "not-a-port")]),
            &SettingsOverrides::default(),
        );
        assert!(matches!(result, Err(ConfigError::Source(_))));
    }
}
