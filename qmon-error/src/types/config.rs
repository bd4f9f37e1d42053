use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки загрузки и проверки настроек.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("log level must be in 0..=3, got {0}")]
    InvalidLogLevel(u8),

    #[error("listen port must not be 0")]
    InvalidPort,

    #[error("cpu load threshold must be a finite non-negative number, got {0}")]
    InvalidCpuLoad(f64),

    #[error("tick interval must be greater than zero")]
    InvalidTickInterval,

    #[error("worker thread count must be greater than zero")]
    InvalidWorkers,

    #[error("unknown log format '{0}'")]
    InvalidLogFormat(String),

    #[error("configuration source error: {0}")]
    Source(String),
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidConfig
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::InvalidLogLevel(7).to_string(),
            "log level must be in 0..=3, got 7"
        );
        assert!(ConfigError::InvalidPort.status_code().is_fatal());
    }
}
