//! Error types for Langlink

use serde_json::Value;
use thiserror::Error;

use crate::infra::lsp::protocol::{ResponseError, error_codes};

pub type LinkResult<T> = std::result::Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{0}")]
    Lsp(#[from] LspError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LspError {
    #[error("Cannot reach server: {0}")]
    Transport(String),

    #[error("Server not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("Server initialization failed: {message}")]
    Handshake { message: String, retry: bool },

    #[error("Stale version {version} for {uri} (already sent {last_sent})")]
    StaleVersion {
        uri: String,
        version: i32,
        last_sent: i32,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("{0}")]
    Timeout(String),

    #[error("{server} language server terminated unexpectedly")]
    ServerTerminated { server: String },

    #[error("Handler already registered for '{0}'")]
    DuplicateHandler(String),

    #[error("Connection is already listening")]
    AlreadyListening,

    #[error("Session '{server}' is {state}")]
    InvalidState { server: String, state: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LspError {
    pub fn error_code(&self) -> i32 {
        match self {
            Self::ServerError { code, .. } => *code,
            Self::ServerTerminated { .. } => error_codes::SERVER_TERMINATED,
            Self::Cancelled => error_codes::REQUEST_CANCELLED,
            Self::Protocol(_) | Self::Json(_) => error_codes::INVALID_PARAMS,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
            || matches!(self, Self::ServerError { code, .. } if *code == error_codes::REQUEST_CANCELLED)
    }

    /// Whether the server asked the client to retry a failed `initialize`.
    pub fn is_retryable_handshake(&self) -> bool {
        matches!(self, Self::Handshake { retry: true, .. })
    }

    /// Convert a failed `initialize` round trip into a handshake failure,
    /// honouring the `InitializeError.retry` flag the server may attach.
    pub fn into_handshake(self) -> Self {
        match self {
            Self::ServerError { message, data, .. } => {
                let retry = data
                    .as_ref()
                    .and_then(|d| d.get("retry"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Self::Handshake { message, retry }
            }
            handshake @ Self::Handshake { .. } => handshake,
            other => Self::Handshake {
                message: other.to_string(),
                retry: false,
            },
        }
    }

    /// Error object sent back to the server when a request handler fails.
    pub fn into_response_error(self) -> ResponseError {
        match self {
            Self::ServerError {
                code,
                message,
                data,
            } => ResponseError {
                code,
                message,
                data,
            },
            other => ResponseError {
                code: other.error_code(),
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl From<ResponseError> for LspError {
    fn from(err: ResponseError) -> Self {
        LspError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
