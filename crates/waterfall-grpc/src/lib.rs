//! Waterfall gRPC Server
//!
//! Exposes the streaming operations of the [`waterfall`] crate over a
//! bidirectional gRPC transport: `Echo`, `Push`, `Pull`, `Exec`, `Forward`
//! and `Version`.
//!
//! # Architecture
//!
//! Each handler validates the opening message before returning its response
//! stream, so rejected calls fail with an immediate status. Accepted calls
//! run on their own task with a cancellation scope that fires when the
//! client goes away.
//!
//! # Example Flow
//!
//! ```text
//! Client                                    Server
//! │                                           │
//! │  CmdMsg{cmd: "sh -c 'echo hi'"}           │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │       CmdProgress{stdout: "hi\n"}         │
//! │<───────────────────────────────────────── │
//! │                                           │
//! │       CmdProgress{exit_code: 0}           │
//! │<───────────────────────────────────────── │
//! ```

pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::doc_markdown)]
    tonic::include_proto!("waterfall.v1");
}

pub mod client;
mod convert;
mod server;
mod sink;
mod status;

pub use server::{VERSION, WaterfallServer, WaterfallService};
pub use status::to_status;

// Re-export proto types for convenience
pub use proto::{
    CmdMsg, CmdProgress, ForwardMessage, Transfer, waterfall_client::WaterfallClient,
    waterfall_server::WaterfallServer as WaterfallGrpcServer,
};
