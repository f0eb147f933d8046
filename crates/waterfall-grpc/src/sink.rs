//! Adapters from tonic stream types to the core message seams.

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tonic::{Status, Streaming};
use waterfall::{Error, MessageSink, MessageSource};

/// Outbound half of a server-streaming response.
///
/// Converts each core message into its wire form.
#[derive(Debug)]
pub(crate) struct StatusSink<P> {
    tx: mpsc::Sender<Result<P, Status>>,
}

impl<P> StatusSink<P> {
    pub(crate) fn new(tx: mpsc::Sender<Result<P, Status>>) -> Self {
        Self { tx }
    }
}

#[tonic::async_trait]
impl<T, P> MessageSink<T> for StatusSink<P>
where
    T: Send + 'static,
    P: From<T> + Send + 'static,
{
    async fn send(&self, msg: T) -> waterfall::Result<()> {
        self.tx
            .send(Ok(P::from(msg)))
            .await
            .map_err(|_| Error::Closed)
    }
}

/// View a tonic inbound stream as a source of core messages.
///
/// Errors from the peer are carried as [`Error::Transport`] so they can be
/// returned to it unmodified.
pub(crate) fn inbound<P, T>(stream: Streaming<P>) -> impl MessageSource<T>
where
    P: Send + 'static,
    T: From<P> + Send + 'static,
{
    stream.map(|item| item.map(T::from).map_err(Error::transport))
}
