//! Error types for the capture engine
//!
//! Failures are contained to the smallest unit that can bear them: a
//! malformed sub-message is a [`DecodeError`] (that one message is dropped),
//! an unparsable frame is an [`EnvelopeError`] (that frame is dropped), a
//! broken socket is a [`ConnectionError`] (one reconnect attempt), and a
//! persistence failure is a [`StoreError`] (one broadcast). None of them may
//! take down a sibling message, broadcast, or the connection as a whole.

use thiserror::Error;

/// Result type alias for the crate's top-level error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire codec error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Whole-envelope decode error
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Relay connection error
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Persistence error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Low-level binary codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Buffer ended before the structure was complete
    #[error("unexpected end of buffer")]
    UnexpectedEof,

    /// A length-prefixed string was not valid UTF-8
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A declared length exceeds the configured maximum
    #[error("declared length {0} exceeds limit {1}")]
    LengthExceeded(usize, usize),
}

/// Per-sub-message decode failure
///
/// Dropping the offending message and continuing with its siblings is the
/// caller's job; this type only says what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload ended before the expected shape was complete
    #[error("truncated payload for tag '{0}'")]
    Truncated(&'static str),

    /// A string field was not valid UTF-8
    #[error("invalid UTF-8 in payload for tag '{0}'")]
    InvalidUtf8(&'static str),

    /// Underlying wire-level failure while reading the payload
    #[error("wire error in payload for tag '{tag}': {source}")]
    Wire {
        /// Tag of the sub-message being decoded
        tag: &'static str,
        /// The codec failure
        source: WireError,
    },
}

/// Whole-frame decode failure
///
/// Raised only when the envelope structure itself cannot be parsed. The
/// frame is dropped and the connection continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The envelope's outer structure was unparsable
    #[error("malformed envelope: {0}")]
    Malformed(#[from] WireError),
}

/// Relay connection errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Socket-level failure
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// No frame arrived within the read timeout
    #[error("read timed out")]
    ReadTimeout,

    /// Connect attempt did not complete within the timeout
    #[error("connect timed out")]
    ConnectTimeout,

    /// The relay closed the connection
    #[error("connection closed by relay")]
    Closed,

    /// A frame exceeded the configured maximum size
    #[error("frame of {0} bytes exceeds limit {1}")]
    FrameTooLarge(usize, usize),

    /// Frame could not be decoded off the stream
    #[error("frame decode failed: {0}")]
    Frame(#[from] WireError),

    /// Reconnect was requested out-of-band (health monitor)
    #[error("reconnect forced")]
    ForcedReconnect,
}

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No broadcast row exists for the given room
    #[error("broadcast not found: {0}")]
    BroadcastNotFound(String),

    /// A broadcast row already exists for the given room
    #[error("broadcast already exists: {0}")]
    BroadcastExists(String),

    /// A stored row does not match the expected shape
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The store rejected the write (e.g. backend unavailable)
    #[error("store unavailable")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_convert_to_top_level() {
        fn wire() -> Result<()> {
            Err(WireError::UnexpectedEof)?
        }
        fn store() -> Result<()> {
            Err(StoreError::Unavailable)?
        }
        fn connection() -> Result<()> {
            Err(ConnectionError::ReadTimeout)?
        }

        assert!(matches!(wire(), Err(Error::Wire(_))));
        assert!(matches!(store(), Err(Error::Store(_))));
        assert!(matches!(connection(), Err(Error::Connection(_))));
    }
}
