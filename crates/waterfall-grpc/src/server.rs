//! gRPC server implementation for the Waterfall service.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming};

use waterfall::transfer::{self, PullTransfer};
use waterfall::{
    Archiver, CancellationToken, Dialer, Error, Execution, ForwardFrame, NetDialer, OpenForward,
    ServiceConfig, TarArchiver, TransferChunk,
};

use crate::convert::forward_frame;
use crate::proto::{
    self, CmdMsg, CmdProgress, Empty, ForwardMessage, Message, Transfer, VersionMessage,
};
use crate::sink::{StatusSink, inbound};
use crate::status::to_status;

/// Version reported by the `Version` RPC.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The Waterfall gRPC service implementation.
#[derive(Clone, Debug)]
pub struct WaterfallService {
    config: Arc<ServiceConfig>,
    archiver: Arc<dyn Archiver>,
    dialer: Arc<dyn Dialer>,
}

impl WaterfallService {
    /// Create a service that archives with tar and dials the host network.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            archiver: Arc::new(TarArchiver),
            dialer: Arc::new(NetDialer),
        }
    }

    /// Replace the dialer used by forward.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    fn capacity(&self) -> usize {
        self.config.channel_capacity.max(1)
    }
}

impl Default for WaterfallService {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

type ResponseStream<P> = Pin<Box<dyn Stream<Item = Result<P, Status>> + Send>>;

/// Run `work` as the body of a server-streaming call.
///
/// The call's cancellation scope fires when the client goes away or `work`
/// returns. An error from `work` is sent as the final status of the stream.
fn spawn_streaming<P, F, Fut>(capacity: usize, rpc: &'static str, work: F) -> ResponseStream<P>
where
    P: Send + 'static,
    F: FnOnce(StatusSink<P>, CancellationToken) -> Fut,
    Fut: Future<Output = waterfall::Result<()>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();

    let watch_tx = tx.clone();
    let watch = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = watch_tx.closed() => {
                tracing::debug!(rpc, "client went away");
                watch.cancel();
            }
            _ = watch.cancelled() => {}
        }
    });

    let body = work(StatusSink::new(tx.clone()), cancel.clone());
    tokio::spawn(async move {
        match body.await {
            Ok(()) => tracing::debug!(rpc, "call finished"),
            Err(Error::Canceled) => tracing::debug!(rpc, "call canceled"),
            Err(e) => {
                tracing::warn!(rpc, error = %e, "call failed");
                let _ = tx.send(Err(to_status(e))).await;
            }
        }
        cancel.cancel();
    });

    Box::pin(ReceiverStream::new(rx))
}

#[tonic::async_trait]
impl proto::waterfall_server::Waterfall for WaterfallService {
    type EchoStream = ResponseStream<Message>;
    type PullStream = ResponseStream<Transfer>;
    type ExecStream = ResponseStream<CmdProgress>;
    type ForwardStream = ResponseStream<ForwardMessage>;

    async fn echo(
        &self,
        request: Request<Streaming<Message>>,
    ) -> Result<Response<Self::EchoStream>, Status> {
        tracing::debug!("echo started");
        Ok(Response::new(Box::pin(request.into_inner())))
    }

    async fn push(
        &self,
        request: Request<Streaming<Transfer>>,
    ) -> Result<Response<Transfer>, Status> {
        let mut stream = request.into_inner();
        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("stream closed before the first transfer"))?;

        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let response = transfer::push(
            first.into(),
            inbound::<_, TransferChunk>(stream),
            Arc::clone(&self.archiver),
            &cancel,
            &self.config,
        )
        .await
        .map_err(to_status)?;

        Ok(Response::new(response.into()))
    }

    async fn pull(
        &self,
        request: Request<Transfer>,
    ) -> Result<Response<Self::PullStream>, Status> {
        let req = request.into_inner();
        let pull = PullTransfer::open(&req.path).await.map_err(to_status)?;

        let archiver = Arc::clone(&self.archiver);
        let config = Arc::clone(&self.config);
        let stream = spawn_streaming::<Transfer, _, _>(
            self.capacity(),
            "pull",
            move |sink, cancel| async move { pull.run(sink, archiver, &cancel, &config).await },
        );
        Ok(Response::new(stream))
    }

    async fn exec(
        &self,
        request: Request<Streaming<CmdMsg>>,
    ) -> Result<Response<Self::ExecStream>, Status> {
        let mut requests = request.into_inner();
        let first = requests
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("stream closed before the command"))?;
        let cmd = first
            .cmd
            .ok_or_else(|| Status::invalid_argument("first message must carry a command"))?;

        let exec = Execution::start(cmd.into(), &self.config).map_err(to_status)?;

        let config = Arc::clone(&self.config);
        let stream = spawn_streaming::<CmdProgress, _, _>(
            self.capacity(),
            "exec",
            move |sink, cancel| async move {
                // Later messages would carry stdin; the request stays open unread.
                let _stdin = requests;
                exec.run(sink, &cancel, &config).await.map(|_| ())
            },
        );
        Ok(Response::new(stream))
    }

    async fn forward(
        &self,
        request: Request<Streaming<ForwardMessage>>,
    ) -> Result<Response<Self::ForwardStream>, Status> {
        let mut requests = request.into_inner();
        let open = requests
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("stream closed before the forward target"))?;

        let leading = (!open.payload.is_empty()).then_some(Ok(ForwardFrame::Data(open.payload)));
        let forward = OpenForward::open(open.kind, open.addr, self.dialer.as_ref())
            .await
            .map_err(to_status)?;

        let frames = tokio_stream::iter(leading).chain(
            requests.map(|item| item.map(forward_frame).map_err(Error::transport)),
        );
        let config = Arc::clone(&self.config);
        let stream = spawn_streaming::<ForwardMessage, _, _>(
            self.capacity(),
            "forward",
            move |sink, cancel| async move { forward.run(frames, sink, &cancel, &config).await },
        );
        Ok(Response::new(stream))
    }

    async fn version(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<VersionMessage>, Status> {
        Ok(Response::new(VersionMessage {
            version: VERSION.to_string(),
        }))
    }
}

/// Server configuration and runner.
#[derive(Debug)]
pub struct WaterfallServer {
    addr: SocketAddr,
    config: ServiceConfig,
}

impl WaterfallServer {
    /// Create a new server bound to the given address.
    pub fn new(addr: SocketAddr, config: ServiceConfig) -> Self {
        Self { addr, config }
    }

    /// Run the server until shutdown signal.
    pub async fn run(self) -> Result<(), tonic::transport::Error> {
        let service = WaterfallService::new(self.config);

        tracing::info!(addr = %self.addr, "starting waterfall server");

        tonic::transport::Server::builder()
            .add_service(proto::waterfall_server::WaterfallServer::new(service))
            .serve_with_shutdown(self.addr, shutdown_signal())
            .await?;

        tracing::info!("waterfall server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
