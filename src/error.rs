use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Shared Store Errors
    #[error("Shared store error: {0}")]
    StoreError(String),

    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    // Transport Errors
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Max reconnect attempts exceeded: {attempts}")]
    MaxReconnectAttemptsExceeded { attempts: u32 },

    // Codec Errors
    #[error("Deserialization failed: {0}")]
    DeserializationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid rate: {0}")]
    InvalidRate(f64),

    #[error("Invalid currency pair: {0}")]
    InvalidPair(String),

    // Leadership Errors
    #[error("Write attempted without a current leadership lease")]
    NotLeader,

    // Persistence Errors
    #[error("Raw tick log error: {0}")]
    RawLogError(String),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task error: {0}")]
    TaskError(String),

    // IO Errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DeserializationError(e.to_string())
    }
}
