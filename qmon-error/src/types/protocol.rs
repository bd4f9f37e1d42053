use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки протокольного уровня одного соединения.
///
/// Никогда не фатальны для процесса: соединение получает строку `ERR` и
/// продолжает работу.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown command '{command}'")]
    UnknownCommand { command: String },

    #[error("{command}: missing argument <{argument}>")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("{command}: unexpected trailing arguments")]
    TrailingArguments { command: &'static str },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("frame too long: {len} bytes (max {max})")]
    LineTooLong { len: usize, max: usize },

    #[error("link '{link}' is already attached")]
    DuplicateLink { link: String },

    #[error("unknown link '{link}'")]
    UnknownLink { link: String },

    #[error("unknown session '{session}'")]
    UnknownSession { session: String },
}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyFrame | Self::UnknownCommand { .. } => StatusCode::InvalidCommand,
            Self::MissingArgument { .. } | Self::TrailingArguments { .. } => {
                StatusCode::InvalidFrame
            }
            Self::InvalidUtf8 => StatusCode::InvalidUtf8,
            Self::LineTooLong { .. } => StatusCode::SizeLimit,
            Self::DuplicateLink { .. } => StatusCode::AlreadyExists,
            Self::UnknownLink { .. } | Self::UnknownSession { .. } => StatusCode::NotFound,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
