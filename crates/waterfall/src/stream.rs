//! The narrow seam between the operations and an RPC transport.
//!
//! Operations read the peer's messages from a [`MessageSource`] and write
//! their own messages to a [`MessageSink`]. The transport adapts its stream
//! types to these traits; tests use plain channels.

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Outbound half of an RPC stream.
#[async_trait]
pub trait MessageSink<T: Send + 'static>: Send + Sync + 'static {
    /// Send one message to the peer, waiting for queue space.
    async fn send(&self, msg: T) -> Result<()>;
}

#[async_trait]
impl<T: Send + 'static> MessageSink<T> for mpsc::Sender<T> {
    async fn send(&self, msg: T) -> Result<()> {
        mpsc::Sender::send(self, msg)
            .await
            .map_err(|_| Error::Closed)
    }
}

/// Inbound half of an RPC stream.
pub trait MessageSource<T>: Stream<Item = Result<T>> + Send + Unpin + 'static {}

impl<T, S> MessageSource<T> for S where S: Stream<Item = Result<T>> + Send + Unpin + 'static {}
