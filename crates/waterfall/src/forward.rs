//! Bridge between one RPC stream and one network connection.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::group::WorkerGroup;
use crate::stream::{MessageSink, MessageSource};
use crate::types::{ForwardFrame, ForwardRequest, NetworkKind};

/// Largest datagram a UDP socket can carry.
const MAX_DATAGRAM: usize = 65_535;

/// A byte-oriented connection a forward can copy to and from.
pub trait Connection: AsyncRead + AsyncWrite + fmt::Debug + Send + Unpin {
    /// Whether the write side can be closed while reads continue.
    fn supports_half_close(&self) -> bool {
        true
    }
}

impl Connection for TcpStream {}

#[cfg(unix)]
impl Connection for tokio::net::UnixStream {}

impl Connection for tokio::io::DuplexStream {}

/// Opens connections to forward targets.
#[async_trait]
pub trait Dialer: fmt::Debug + Send + Sync + 'static {
    /// Connect to `addr` over `kind`.
    async fn dial(&self, kind: NetworkKind, addr: &str) -> io::Result<Box<dyn Connection>>;
}

/// Dialer for the host's network stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetDialer;

#[async_trait]
impl Dialer for NetDialer {
    async fn dial(&self, kind: NetworkKind, addr: &str) -> io::Result<Box<dyn Connection>> {
        match kind {
            NetworkKind::Tcp => Ok(Box::new(TcpStream::connect(addr).await?)),
            NetworkKind::Udp => Ok(Box::new(UdpConnection::connect(addr).await?)),
            #[cfg(unix)]
            NetworkKind::Unix => Ok(Box::new(tokio::net::UnixStream::connect(addr).await?)),
            #[cfg(not(unix))]
            NetworkKind::Unix => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }
}

/// A connected UDP socket. Each write sends one datagram; each read
/// receives one.
#[derive(Debug)]
pub struct UdpConnection {
    socket: UdpSocket,
}

impl UdpConnection {
    /// Bind an ephemeral local port and connect it to `addr`.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let target = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no address for {addr}"))
        })?;
        let local = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        Ok(Self { socket })
    }
}

impl AsyncRead for UdpConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Connection for UdpConnection {
    fn supports_half_close(&self) -> bool {
        false
    }
}

/// A forward whose target connection is open.
#[derive(Debug)]
pub struct OpenForward {
    request: ForwardRequest,
    conn: Box<dyn Connection>,
}

impl OpenForward {
    /// Validate the wire `kind` and dial `addr`.
    ///
    /// An unsupported kind fails before the dialer is touched.
    pub async fn open(kind: i32, addr: String, dialer: &dyn Dialer) -> Result<Self> {
        let kind = NetworkKind::try_from(kind)?;
        Self::dial(ForwardRequest { kind, addr }, dialer).await
    }

    /// Dial the target of `request`.
    pub async fn dial(request: ForwardRequest, dialer: &dyn Dialer) -> Result<Self> {
        tracing::info!(kind = %request.kind, addr = %request.addr, "dialing forward target");
        let conn = dialer
            .dial(request.kind, &request.addr)
            .await
            .map_err(|source| Error::Dial {
                kind: request.kind.as_str(),
                addr: request.addr.clone(),
                source,
            })?;
        Ok(Self { request, conn })
    }

    /// Copy bytes in both directions until the forward ends.
    ///
    /// The connection reaching end-of-stream ends the forward. The end of
    /// `inbound` (or a [`ForwardFrame::Close`]) half-closes the connection
    /// and keeps reading; for connections without half-close it ends the
    /// forward.
    pub async fn run<S, K>(
        self,
        inbound: S,
        sink: K,
        cancel: &CancellationToken,
        config: &ServiceConfig,
    ) -> Result<()>
    where
        S: MessageSource<ForwardFrame>,
        K: MessageSink<ForwardFrame>,
    {
        let Self { request, conn } = self;
        let half_close = conn.supports_half_close();
        let (reader, writer) = tokio::io::split(conn);
        // Each read of a datagram connection returns one whole datagram.
        let read_size = if half_close {
            config.chunk_size()
        } else {
            config.chunk_size().max(MAX_DATAGRAM)
        };

        // Ends the forward without failing it.
        let done = CancellationToken::new();
        let mut group = WorkerGroup::new(cancel);

        let upstream_done = done.clone();
        group.spawn("upstream", async move {
            tokio::select! {
                _ = upstream_done.cancelled() => Ok(()),
                result = upstream(inbound, writer, half_close) => {
                    if !half_close {
                        upstream_done.cancel();
                    }
                    result
                }
            }
        });

        let downstream_done = done.clone();
        group.spawn("downstream", async move {
            tokio::select! {
                _ = downstream_done.cancelled() => Ok(()),
                result = downstream(reader, sink, read_size) => {
                    downstream_done.cancel();
                    result
                }
            }
        });

        let result = group.wait().await;
        tracing::info!(kind = %request.kind, addr = %request.addr, ok = result.is_ok(), "forward finished");
        result
    }
}

async fn upstream<S>(
    mut inbound: S,
    mut writer: WriteHalf<Box<dyn Connection>>,
    half_close: bool,
) -> Result<()>
where
    S: MessageSource<ForwardFrame>,
{
    while let Some(frame) = inbound.next().await {
        match frame? {
            ForwardFrame::Data(bytes) => writer.write_all(&bytes).await?,
            ForwardFrame::Close => break,
        }
    }
    if half_close {
        writer.shutdown().await?;
    }
    Ok(())
}

async fn downstream<K>(
    mut reader: ReadHalf<Box<dyn Connection>>,
    sink: K,
    read_size: usize,
) -> Result<()>
where
    K: MessageSink<ForwardFrame>,
{
    let mut buf = vec![0u8; read_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.send(ForwardFrame::Data(buf[..n].to_vec())).await?;
    }
}
