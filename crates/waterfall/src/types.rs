//! Messages exchanged by the streaming operations, independent of wire encoding.

use std::fmt;

use crate::error::{Error, Result};

/// One chunk of an archive transfer.
///
/// Used in both directions. `path` is only meaningful on the first chunk of a
/// push; the terminal `success`/`error` pair is only meaningful on a push
/// response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferChunk {
    /// Destination (push) or source (pull) path
    pub path: String,
    /// Archive bytes
    pub payload: Vec<u8>,
    /// Whether the transfer completed
    pub success: bool,
    /// Failure description for an unsuccessful transfer
    pub error: String,
}

impl TransferChunk {
    /// A chunk carrying archive bytes.
    pub fn data(payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    /// The successful terminal response of a push.
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// The failed terminal response of a push.
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            ..Default::default()
        }
    }
}

/// A command to run on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Program to execute
    pub path: String,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Working directory; empty means the configured default
    pub dir: String,
    /// Stdin redirection (reserved, not supported)
    pub pipe_in: bool,
}

/// Progress of a running command.
#[derive(Clone, PartialEq, Eq)]
pub enum CmdProgress {
    /// Bytes written by the child to its standard output
    Stdout(Vec<u8>),
    /// Bytes written by the child to its standard error
    Stderr(Vec<u8>),
    /// Exit status of the child; always the last message of an exec
    Exit(u32),
}

impl fmt::Debug for CmdProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout(b) => write!(f, "Stdout({} bytes)", b.len()),
            Self::Stderr(b) => write!(f, "Stderr({} bytes)", b.len()),
            Self::Exit(code) => write!(f, "Exit({code})"),
        }
    }
}

/// Network families a forward may dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKind {
    /// TCP stream
    Tcp,
    /// Connected UDP socket
    Udp,
    /// Unix domain stream socket
    Unix,
}

impl NetworkKind {
    /// Name of the network as used in addresses and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Unix => "unix",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire values of the forward kind: 0 is unset, then tcp, udp and unix.
impl TryFrom<i32> for NetworkKind {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1 => Ok(Self::Tcp),
            2 => Ok(Self::Udp),
            3 => Ok(Self::Unix),
            _ => Err(Error::InvalidArgument(
                "unsupported network type".to_string(),
            )),
        }
    }
}

/// Target of a forward, received once at stream start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Network family
    pub kind: NetworkKind,
    /// Address to dial
    pub addr: String,
}

/// One frame of a forwarded byte stream, after the opening request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardFrame {
    /// Bytes to deliver to the other side
    Data(Vec<u8>),
    /// The sender will write no more bytes
    Close,
}
