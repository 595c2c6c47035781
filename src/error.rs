//! The error kinds surfaced by the protocol registry and buffered stream.

use std::io;
use thiserror::Error;

/// An error from the protocol registry, a URL context, or a buffered stream.
#[derive(Error, Debug)]
pub enum Error {
    /// No registered protocol matches the URL's scheme.
    #[error("no protocol registered for scheme {0:?}")]
    ProtocolNotFound(String),
    /// A malformed URL, an unknown seek whence, a parse error in an embedded
    /// option list, or a rewind with no overlap.
    #[error("invalid: {0}")]
    Invalid(String),
    /// The transport does not implement the requested operation.
    #[error("operation not supported by this protocol")]
    Unsupported,
    /// A seek was requested on a stream whose transport has no seek callback.
    #[error("broken pipe: transport is not seekable")]
    BrokenPipe,
    /// A transport-level I/O error, a network init failure, a packet-size
    /// overflow, or a retry deadline exceeded.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// End of file was reached with no bytes delivered.
    #[error("end of file")]
    Eof,
    /// The operation would block and the handle is non-blocking.
    #[error("operation would block")]
    WouldBlock,
    /// The transfer was interrupted (always retried internally; only
    /// observable if it escapes a transport callback outside the retry
    /// wrapper).
    #[error("interrupted")]
    Interrupted,
    /// The user-supplied interrupt callback returned non-zero.
    #[error("cancelled by interrupt callback")]
    Exit,
    /// An allocation failed.
    #[error("out of memory")]
    OutOfMemory,
}

/// The result of an operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classifies a raw transport [`io::Error`] into one of our kinds,
    /// following the mapping the retry loop relies on (`§4.2.4`,
    /// `§7`): `WouldBlock` and `Interrupted` are distinguished from a
    /// generic `Io` failure so the retry wrapper can recognize them, and an
    /// unexpected EOF becomes `Eof` rather than `Io`.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::Interrupted => Error::Interrupted,
            io::ErrorKind::UnexpectedEof => Error::Eof,
            io::ErrorKind::BrokenPipe => Error::BrokenPipe,
            _ => Error::Io(err),
        }
    }

    /// True if this is a transient condition the retry loop already knows
    /// how to recover from.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Error::Interrupted | Error::WouldBlock)
    }
}
