//! Waterfall: streaming operations for remote device control
//!
//! This crate holds the orchestration behind the waterfall service,
//! independent of any RPC transport:
//!
//! - **push / pull**: move a filesystem subtree over a stream of archive
//!   chunks ([`transfer`])
//! - **exec**: run a command and stream its stdout/stderr followed by exactly
//!   one exit code ([`Execution`])
//! - **forward**: copy bytes between a stream and a TCP, UDP or unix socket
//!   ([`OpenForward`])
//!
//! Each operation fans out into a small [`WorkerGroup`] that shares one
//! cancellation scope: the first worker to fail cancels its siblings, and
//! its error becomes the operation's result. A transport adapts its streams
//! to [`MessageSource`] and [`MessageSink`].

mod archive;
mod config;
mod error;
mod exec;
mod forward;
mod group;
mod mux;
mod process;
mod stream;
mod types;

pub mod transfer;

pub use archive::{Archiver, TarArchiver};
pub use config::{DEFAULT_CHUNK_SIZE, ServiceConfig};
pub use error::{ArchiveError, Error, Result, TransportError};
pub use exec::Execution;
pub use forward::{Connection, Dialer, NetDialer, OpenForward, UdpConnection};
pub use group::WorkerGroup;
pub use mux::{ChannelWriter, copy_to_channel, multiplex};
pub use process::ChildProcess;
pub use stream::{MessageSink, MessageSource};
pub use types::{CmdProgress, Command, ForwardFrame, ForwardRequest, NetworkKind, TransferChunk};

/// Re-exported so transports can create per-call cancellation scopes.
pub use tokio_util::sync::CancellationToken;
