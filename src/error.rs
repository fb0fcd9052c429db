//! Error and result types used throughout the crate.

use std::fmt::Display;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Alias for `Result<T, mongowire::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// An error raised by the codec, the wire connection or a cursor.
///
/// The enum is `Clone` so that a fatal error can be latched on a connection
/// or cursor and reported again on every subsequent operation; I/O causes are
/// kept behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A value cannot be encoded to or decoded from BSON at all.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// A document's length prefix disagrees with the bytes that follow it.
    #[error("truncated document")]
    TruncatedDocument,

    /// An element carried a kind byte this codec does not speak.
    #[error("unrecognized element kind 0x{0:02x}")]
    UnrecognizedElementType(u8),

    /// An object id hex string did not describe exactly 12 bytes.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// An unsigned value with the high bit set cannot be carried as Int64.
    #[error("value {0} does not fit in int64")]
    DoesNotFitInInt64(u64),

    /// A string field held bytes that are not valid UTF-8.
    #[error("invalid utf-8 in document")]
    Utf8Encoding,

    /// The server replied with an opcode other than OP_REPLY.
    #[error("unknown response opcode {0}")]
    UnknownOpcode(u32),

    /// A reply frame did not have the shape its flags promised.
    #[error("malformed reply: {0}")]
    FrameShape(String),

    /// The server reported that the requested cursor no longer exists.
    #[error("cursor not found")]
    CursorNotFound,

    /// The server rejected a query; the message is the server's `$err`.
    #[error("query failure: {0}")]
    QueryFailure(String),

    /// A read or write on the socket failed. Fatal for the connection.
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),

    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The cursor has been closed.
    #[error("cursor closed")]
    CursorClosed,

    /// The cursor has delivered its final document. Terminal success, kept
    /// distinct from the failure variants so callers can tell "done" from
    /// "failed".
    #[error("cursor exhausted")]
    CursorExhausted,

    /// A command returned `ok: 0`; the message is the server's `errmsg`.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// getLastError reported a write problem.
    #[error("write error: {message} (code {code})")]
    WriteError {
        message: String,
        code: i32,
        n: i64,
    },

    /// A free-form (de)serialization error.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// True for the terminal-success latch, false for everything else.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::CursorExhausted)
    }

    pub(crate) fn unsupported_type(name: impl Into<String>) -> Error {
        Error::UnsupportedType(name.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(Arc::new(err))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Error {
        Error::Utf8Encoding
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Error {
        Error::Utf8Encoding
    }
}

impl serde::ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Error {
        Error::Message(msg.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T: Display>(msg: T) -> Error {
        Error::Message(msg.to_string())
    }
}
