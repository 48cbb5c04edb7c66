use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Unknown partition: {0}")]
    UnknownPartition(u32),

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Backend error: {0}")]
    Backend(String),
}
