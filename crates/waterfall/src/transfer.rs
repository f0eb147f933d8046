//! Chunk bridge between an archiver and a stream of [`TransferChunk`]s.
//!
//! Push feeds inbound chunks into the archiver's write side; pull drains the
//! archiver's read side into outbound chunks. Each direction runs as two
//! workers joined by a bounded in-memory pipe, so a slow peer applies
//! backpressure to the archiver instead of buffering a whole archive.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_stream::StreamExt;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;

use crate::archive::Archiver;
use crate::config::ServiceConfig;
use crate::error::{ArchiveError, Error, Result};
use crate::group::WorkerGroup;
use crate::stream::{MessageSink, MessageSource};
use crate::types::TransferChunk;

/// Materialize a pushed archive.
///
/// `first` is the opening message of the stream and names the destination;
/// any payload it carries is the start of the archive. Returns the single
/// response to send back: a success, or a failure describing a local write
/// problem. Malformed archives and peer errors are returned as errors.
pub async fn push<S>(
    first: TransferChunk,
    inbound: S,
    archiver: Arc<dyn Archiver>,
    cancel: &CancellationToken,
    config: &ServiceConfig,
) -> Result<TransferChunk>
where
    S: MessageSource<TransferChunk>,
{
    if first.path.is_empty() {
        return Err(Error::InvalidArgument(
            "push requires a destination path".to_string(),
        ));
    }

    let dest = PathBuf::from(&first.path);
    tracing::info!(path = %dest.display(), "push started");
    let response = receive_archive(dest, first.payload, inbound, archiver, cancel, config).await;

    match &response {
        Ok(r) if r.success => tracing::info!(path = %first.path, "push complete"),
        Ok(r) => tracing::warn!(path = %first.path, error = %r.error, "push rejected"),
        Err(e) => tracing::warn!(path = %first.path, error = %e, "push failed"),
    }
    response
}

/// Unpack the archive carried by `inbound` beneath `dest`.
///
/// `leading` holds archive bytes that arrived before `inbound`, typically the
/// payload of an already-consumed first message. When the local write side
/// fails, the rest of `inbound` is left unread.
pub async fn receive_archive<S>(
    dest: PathBuf,
    leading: Vec<u8>,
    inbound: S,
    archiver: Arc<dyn Archiver>,
    cancel: &CancellationToken,
    config: &ServiceConfig,
) -> Result<TransferChunk>
where
    S: MessageSource<TransferChunk>,
{
    let (mut writer, reader) = tokio::io::duplex(config.chunk_size());
    let mut group = WorkerGroup::new(cancel);

    let mut source = SyncIoBridge::new(reader);
    group.spawn_blocking("unpack", move || {
        archiver.unpack(&mut source, &dest)?;
        Ok(())
    });

    let (failure_tx, mut failure_rx) = oneshot::channel::<io::Error>();
    group.spawn("receive", async move {
        let mut inbound = inbound;
        let mut pending = Some(leading);
        loop {
            let payload = match pending.take() {
                Some(payload) => payload,
                None => match inbound.next().await {
                    Some(chunk) => chunk?.payload,
                    None => break,
                },
            };
            if let Err(e) = writer.write_all(&payload).await {
                let _ = failure_tx.send(e);
                return Ok(());
            }
        }
        writer.shutdown().await?;
        Ok(())
    });

    let result = group.wait().await;
    let local_failure = failure_rx.try_recv().ok();

    match result {
        Ok(()) => Ok(match local_failure {
            Some(e) => TransferChunk::failed(e),
            None => TransferChunk::succeeded(),
        }),
        Err(Error::Archive(
            e @ (ArchiveError::Destination { .. } | ArchiveError::Stream(_)),
        )) => Ok(TransferChunk::failed(e)),
        Err(e) => Err(e),
    }
}

/// A pull whose source has been checked to exist.
#[derive(Debug, Clone)]
pub struct PullTransfer {
    path: PathBuf,
}

impl PullTransfer {
    /// Validate the requested path before any worker starts.
    pub async fn open(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::InvalidArgument(
                "pull requires a source path".to_string(),
            ));
        }
        match tokio::fs::metadata(path).await {
            Ok(_) => Ok(Self {
                path: PathBuf::from(path),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(path.to_string())),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Stream the archive of the source path to `sink`. The end of the
    /// stream marks the end of the archive.
    pub async fn run<K>(
        self,
        sink: K,
        archiver: Arc<dyn Archiver>,
        cancel: &CancellationToken,
        config: &ServiceConfig,
    ) -> Result<()>
    where
        K: MessageSink<TransferChunk>,
    {
        tracing::info!(path = %self.path.display(), "pull started");
        send_archive(self.path, None, sink, archiver, cancel, config).await
    }
}

/// Pack `src` and send the archive to `sink` in chunks of at most
/// `chunk_size` bytes. `first_path`, when set, is attached to the first
/// chunk only.
pub async fn send_archive<K>(
    src: PathBuf,
    first_path: Option<String>,
    sink: K,
    archiver: Arc<dyn Archiver>,
    cancel: &CancellationToken,
    config: &ServiceConfig,
) -> Result<()>
where
    K: MessageSink<TransferChunk>,
{
    let chunk_size = config.chunk_size();
    let (mut reader, writer) = tokio::io::duplex(chunk_size);
    let mut group = WorkerGroup::new(cancel);

    let mut target = SyncIoBridge::new(writer);
    group.spawn_blocking("pack", move || {
        archiver.pack(&mut target, &src)?;
        target.flush()?;
        target.shutdown()?;
        Ok(())
    });

    group.spawn("send", async move {
        let mut buf = vec![0u8; chunk_size];
        let mut path = first_path;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            let mut chunk = TransferChunk::data(buf[..n].to_vec());
            if let Some(path) = path.take() {
                chunk.path = path;
            }
            sink.send(chunk).await?;
        }
    });

    group.wait().await
}
