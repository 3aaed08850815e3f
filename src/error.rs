use std::io;

use serde::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    /// A read asked for more bytes than the buffer had left.
    #[error("buffer underrun: needed {needed} byte(s), {remaining} remaining")]
    BufferUnderrun { needed: usize, remaining: usize },

    /// Something required to send was missing or unusable.
    #[error("configuration error: {0}")]
    Configuration(&'static str),

    #[error("target address {0:?} is not a valid address")]
    InvalidAddress(String),

    /// An input record could not be read as a target.
    #[error("invalid target record: {0}")]
    InvalidRecord(String),

    #[error("failed to bind a local port")]
    FailedPortBind(#[source] io::Error),

    #[error("failed to send request")]
    SendError(#[source] io::Error),

    #[error("failed to receive response")]
    ReceiveError(#[source] io::Error),

    /// No terminal reply arrived before the stage deadline.
    #[error("server did not respond in time")]
    Timeout,

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A split response was finalized with a gap.
    #[error("split response {group:#x} is missing fragment {index}")]
    MissingFragment { group: i32, index: u8 },

    #[error("compressed split responses are not supported")]
    UnsupportedCompression,

    #[error("the game {0:?} is not supported")]
    UnsupportedGame(String),

    /// The task running a query panicked or was cancelled.
    #[error("query task failed: {0}")]
    Task(String),
}

impl From<tokio::time::error::Elapsed> for QueryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        QueryError::Timeout
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

/// Serializes a terminal error as its display string.
pub(crate) fn serialize_error<S>(error: &Option<QueryError>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}
