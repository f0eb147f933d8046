//! Error types shared by every streaming operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error produced by the RPC transport for a peer stream.
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can end a streaming operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The first message of a stream was malformed or missing
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The requested path does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// The request asked for a feature that is not implemented
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    /// The archiver failed
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// The child process could not be started
    #[error("failed to start {path}: {source}")]
    Spawn {
        /// Program that was started
        path: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
    /// The child process ended without a clean exit status
    #[error("process terminated abnormally: {0}")]
    AbnormalExit(String),
    /// The forward target could not be reached
    #[error("dial {kind} {addr}: {source}")]
    Dial {
        /// Network kind that was dialed
        kind: &'static str,
        /// Target address
        addr: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
    /// The peer's inbound stream failed
    #[error("peer stream error: {0}")]
    Transport(TransportError),
    /// The outbound stream is no longer accepting messages
    #[error("outbound stream closed")]
    Closed,
    /// The operation's cancellation scope was triggered
    #[error("operation canceled")]
    Canceled,
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// A worker task panicked or was aborted
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an error raised by the transport while receiving from the peer.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Errors raised by an [`Archiver`](crate::Archiver).
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The byte stream is not a valid archive
    #[error("malformed archive: {0}")]
    Format(#[source] io::Error),
    /// The archive could not be materialized at the destination
    #[error("failed to write {}: {source}", path.display())]
    Destination {
        /// Path that could not be written
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
    /// The source tree could not be read
    #[error("failed to read {}: {source}", path.display())]
    Source {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
    /// The byte sink or source paired with the archiver closed early
    #[error("archive stream closed: {0}")]
    Stream(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_keeps_source() {
        let err = Error::transport(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let Error::Transport(inner) = &err else {
            panic!("expected transport error, got {err:?}");
        };
        assert!(inner.downcast_ref::<io::Error>().is_some());
        assert_eq!(err.to_string(), "peer stream error: reset");
    }

    #[test]
    fn test_archive_error_display() {
        let err: Error = ArchiveError::Destination {
            path: PathBuf::from("/data/out"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(err.to_string(), "failed to write /data/out: denied");
    }
}
