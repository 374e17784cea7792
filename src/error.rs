//! Error taxonomy and I/O error classification
//!
//! Every error here is scoped to a single connection: a failed allocation or a
//! dead socket tears down the worker that owns it and nothing else. Interrupted
//! system calls never surface as errors at all; they are retried at the call
//! site that observed them.

use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Per-connection error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// A field or scratch buffer could not be allocated. Fatal to the
    /// connection that requested it, not to the process.
    #[error("buffer allocation failed")]
    Alloc,

    /// A kernel feature the caller asked for is unavailable on this socket.
    /// Callers downgrade and continue rather than failing the connection.
    #[error("{0} is not supported on this socket")]
    Unsupported(&'static str),

    /// Wire data that does not parse as a message of the expected shape.
    #[error("malformed wire data: {0}")]
    Protocol(String),

    /// The measurement window closed without a single complete message.
    #[error("no messages received within the measurement window")]
    NoTraffic,

    /// An invalid benchmark parameter was passed in from the bootstrap.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Underlying socket I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::Alloc
    }
}

/// Interrupted system call. Always retried at the same call site.
pub fn is_transient(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

/// Non-blocking operation found nothing to do.
pub fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// The peer is gone. Terminates the owning worker's loop; never retried.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_only_eintr() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[test]
    fn disconnect_classification() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::WouldBlock)));
    }

    #[test]
    fn alloc_error_from_reserve_failure() {
        let mut v: Vec<u8> = Vec::new();
        // usize::MAX bytes overflow capacity before touching the allocator
        let err = v.try_reserve_exact(usize::MAX).unwrap_err();
        assert!(matches!(Error::from(err), Error::Alloc));
    }
}
