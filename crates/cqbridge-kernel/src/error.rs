use thiserror::Error;

/// Why an action produced a failed envelope.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no such api")]
    UnknownAction,
    #[error("{0}")]
    UnsupportedByHost(&'static str),
    #[error("invalid '{0}'")]
    InvalidParameter(&'static str),
    /// The host answered but had nothing usable (empty list, unknown id).
    #[error("{0}")]
    Failed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ActionError {
    pub fn is_internal(&self) -> bool {
        matches!(self, ActionError::Internal(_))
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine transport failed: {0}")]
    Transport(String),
    #[error("engine rejected call: {0}")]
    Rejected(String),
    #[error("engine returned malformed data: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("media write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("message log backend failed: {0}")]
    Backend(String),
}

impl From<EngineError> for ActionError {
    fn from(err: EngineError) -> Self {
        ActionError::Internal(err.to_string())
    }
}

impl From<LogError> for ActionError {
    fn from(err: LogError) -> Self {
        ActionError::Internal(err.to_string())
    }
}
