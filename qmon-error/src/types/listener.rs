use std::{any::Any, io};

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки слушателя. Всегда фатальны для процесса.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener accept failed: {source}")]
    Accept {
        #[source]
        source: io::Error,
    },
}

impl ErrorExt for ListenerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Bind { .. } => StatusCode::BindFailed,
            Self::Accept { .. } => StatusCode::AcceptFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
