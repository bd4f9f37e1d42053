//! Ошибки qmon.
//!
//! Общие типы с кодами статуса живут в крейте `qmon-error` и
//! переэкспортируются отсюда. Здесь только ошибки, специфичные для бинарного
//! окружения.

use std::{any::Any, io, path::PathBuf};

pub use qmon_error::{
    ConfigError, ErrorExt, ListenerError, LogLevel, ProtocolError, StatusCode,
};
use thiserror::Error;

/// Ошибки инициализации логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create log directory {}: {source}", path.display())]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

impl ErrorExt for LoggingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::InvalidConfig,
            Self::LogDir { .. } => StatusCode::Io,
            Self::AlreadyInitialized(_) => StatusCode::Internal,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
