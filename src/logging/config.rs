use std::{fmt, path::PathBuf, str::FromStr};

use qmon_error::ConfigError;
use serde::{Deserialize, Serialize};

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Подробность: 0 error, 1 warn, 2 info, 3 debug
    pub level: u8,
    pub format: LogFormat,
    pub console_enabled: bool,
    pub with_ansi: bool,
    /// Каталог для файлового лога; `None` отключает файловый вывод
    pub log_dir: Option<PathBuf>,
    /// Префикс имени файла с ежедневной ротацией
    pub file_prefix: String,
}

impl LoggingConfig {
    /// Имя уровня `tracing` для подробности `level`.
    pub fn level_name(&self) -> &'static str {
        match self.level {
            0 => "error",
            1 => "warn",
            2 => "info",
            _ => "debug",
        }
    }

    /// Директива фильтра: свой крейт на выбранном уровне, остальные не
    /// подробнее `warn`.
    pub fn build_filter_directive(&self) -> String {
        let own = self.level_name();
        let others = if self.level == 0 { "error" } else { "warn" };
        format!("{others},qmon={own},qmon_error={own}")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level > 3 {
            return Err(ConfigError::InvalidLogLevel(self.level));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: 2,
            format: LogFormat::default(),
            console_enabled: true,
            with_ansi: true,
            log_dir: None,
            file_prefix: "qmon.log".to_string(),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidLogFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}
