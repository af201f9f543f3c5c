use thiserror::Error;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("join error: {0}")]
    Join(String),

    #[error("invalid join source: {0}")]
    InvalidJoinSource(String),

    #[error("invalid join app: expected {expected}, got {actual}")]
    InvalidJoinApp { expected: String, actual: String },

    #[error("node destroyed during bootstrap")]
    DestroyedDuringBootstrap,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RingError>;

impl From<serde_json::Error> for RingError {
    fn from(e: serde_json::Error) -> Self {
        RingError::Serialization(e.to_string())
    }
}
