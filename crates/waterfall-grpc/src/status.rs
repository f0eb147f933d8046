//! Mapping of operation errors to gRPC status codes.

use std::io;

use tonic::Status;
use waterfall::{ArchiveError, Error};

/// Convert an operation error into the status returned to the client.
///
/// Errors raised by the peer's own stream are returned unmodified.
pub fn to_status(err: Error) -> Status {
    match err {
        Error::InvalidArgument(msg) => Status::invalid_argument(msg),
        Error::NotFound(path) => Status::not_found(format!("{path}: no such file or directory")),
        Error::Unimplemented(msg) => Status::unimplemented(msg),
        Error::Canceled => Status::cancelled("operation canceled"),
        Error::Transport(inner) => match inner.downcast::<Status>() {
            Ok(status) => *status,
            Err(other) => Status::unavailable(other.to_string()),
        },
        Error::Archive(ArchiveError::Format(e)) => {
            Status::invalid_argument(format!("malformed archive: {e}"))
        }
        Error::Io(ref e) => io_status(e.kind(), err.to_string()),
        Error::Spawn { ref source, .. } | Error::Dial { ref source, .. } => {
            io_status(source.kind(), err.to_string())
        }
        Error::Archive(
            ArchiveError::Source { ref source, .. } | ArchiveError::Destination { ref source, .. },
        ) => io_status(source.kind(), err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

fn io_status(kind: io::ErrorKind, message: String) -> Status {
    match kind {
        io::ErrorKind::NotFound => Status::not_found(message),
        io::ErrorKind::PermissionDenied => Status::permission_denied(message),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::TimedOut => Status::unavailable(message),
        _ => Status::internal(message),
    }
}
