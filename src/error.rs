//! Error types for bounded async mapping.

use thiserror::Error;

/// The main error type for mapper operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The concurrency limit passed at construction was not a positive integer.
    #[error("concurrency limit must be a positive integer (got {0})")]
    InvalidLimit(usize),

    /// A worker invocation panicked.
    ///
    /// The panic is caught per item and surfaced through the outcome for that
    /// item, so it never unwinds into the driver or the consumer.
    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    /// An item was pushed into a queue whose consuming side is gone.
    #[error("queue closed")]
    QueueClosed,

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` type for mapper operations.
pub type Result<T> = std::result::Result<T, Error>;
