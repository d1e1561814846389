use thiserror::Error;

/// Errors that can occur while talking to the broker or interpreting replies.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid connection parameters.
    ///
    /// Raised at context construction; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Broker unreachable after exhausting the connect attempts.
    #[error("connection error: {0}")]
    Connection(String),

    /// The broker rejected a declare, publish or consume, or the channel
    /// was used before it was connected / bound to a queue.
    ///
    /// Declaration rejections (e.g. insufficient rights) may only surface
    /// on the first consume, because that is where AMQP reports them.
    #[error("broker error: {0}")]
    Broker(String),

    /// No reply arrived within the requested window.
    #[error("timed out waiting for reply")]
    TimedOut,

    /// Reply envelope missing required fields.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The remote side explicitly reported an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A payload codec could not unwrap its transport encoding.
    #[error("codec error: {0}")]
    Codec(String),

    /// Credentials file or certificate I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The blob-upload collaborator failed.
    #[error("upload error: {0}")]
    Upload(String),
}

impl Error {
    /// Whether the operation that produced this error may be retried as-is.
    ///
    /// Only connection failures are retried by the connect loop; timeouts
    /// are left to the caller.
    pub fn is_retryable(&self) -> bool {
        // ---
        matches!(self, Error::Connection(_) | Error::TimedOut)
    }
}

/// Result type alias for messaging operations
pub type Result<T> = std::result::Result<T, Error>;
