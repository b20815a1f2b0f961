use std::path::PathBuf;

use thiserror::Error;

use crate::span::Position;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("module `{name}` was not found at {path}")]
    ModuleNotFound { name: String, path: PathBuf },
    #[error("lex error at {position}: {message}")]
    Lex { position: Position, message: String },
    #[error("parse error at {position} near '{token}': {message}")]
    Parse {
        position: Position,
        token: String,
        message: String,
    },
    #[error("semantic error at {position}: {message}")]
    Semantic { position: Position, message: String },
    /// A configured maximum (arena capacity, stack depth, ...) was exceeded.
    #[error("limit exceeded: {what} (max {limit})")]
    LimitExceeded { what: &'static str, limit: usize },
    #[error("in module `{module}`: {source}")]
    InModule {
        module: String,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    pub fn semantic(position: Position, message: impl Into<String>) -> Self {
        CoreError::Semantic {
            position,
            message: message.into(),
        }
    }

    pub fn limit(what: &'static str, limit: usize) -> Self {
        CoreError::LimitExceeded { what, limit }
    }

    /// Unwraps `InModule` layers down to the error that was actually raised.
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::InModule { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
