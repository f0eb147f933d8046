//! Client-side helpers that drive the streaming RPCs end to end.
//!
//! These reuse the same archive bridge as the server, so a push from the
//! client is the mirror image of a pull on the server and vice versa.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tonic::transport::Channel;

use waterfall::transfer::{receive_archive, send_archive};
use waterfall::{
    Archiver, CancellationToken, CmdProgress, Command, Error, Result, ServiceConfig,
    TransferChunk,
};

use crate::proto::{self, waterfall_client::WaterfallClient};
use crate::sink::inbound;

/// A connected Waterfall client.
pub type Client = WaterfallClient<Channel>;

/// Archive the local `src` and materialize it at `dest` on the server.
///
/// Returns the server's terminal response, which reports local write
/// failures on the server side as `success == false`.
pub async fn push(
    client: &mut Client,
    src: &Path,
    dest: &str,
    archiver: Arc<dyn Archiver>,
    config: &ServiceConfig,
) -> Result<TransferChunk> {
    if let Err(e) = tokio::fs::metadata(src).await {
        return Err(match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(src.display().to_string()),
            _ => Error::Io(e),
        });
    }

    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outbound = ReceiverStream::new(rx).map(proto::Transfer::from);
    let sending = send_archive(
        src.to_path_buf(),
        Some(dest.to_string()),
        tx,
        archiver,
        &cancel,
        config,
    );
    let call = async {
        let response = client.push(outbound).await;
        // An early response means the server stopped reading.
        cancel.cancel();
        response
    };
    let (sent, response) = tokio::join!(sending, call);

    match (sent, response) {
        (Err(e), _) if !matches!(e, Error::Closed | Error::Canceled) => Err(e),
        (_, Err(status)) => Err(Error::transport(status)),
        (_, Ok(response)) => Ok(response.into_inner().into()),
    }
}

/// Fetch the server's `src` and materialize it beneath the local `dest`.
pub async fn pull(
    client: &mut Client,
    src: &str,
    dest: &Path,
    archiver: Arc<dyn Archiver>,
    config: &ServiceConfig,
) -> Result<()> {
    let request = proto::Transfer {
        path: src.to_string(),
        ..Default::default()
    };
    let stream = client
        .pull(request)
        .await
        .map_err(Error::transport)?
        .into_inner();

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let response = receive_archive(
        dest.to_path_buf(),
        Vec::new(),
        inbound::<_, TransferChunk>(stream),
        archiver,
        &cancel,
        config,
    )
    .await?;

    if response.success {
        Ok(())
    } else {
        Err(Error::Io(std::io::Error::other(response.error)))
    }
}

/// Run `command` on the server, copying its output to `stdout` and `stderr`.
///
/// Returns the remote exit code.
pub async fn exec<O, E>(
    client: &mut Client,
    command: Command,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<u32>
where
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let (tx, rx) = mpsc::channel(1);
    tx.send(proto::CmdMsg {
        cmd: Some(command.into()),
        stdin: Vec::new(),
    })
    .await
    .map_err(|_| Error::Closed)?;

    let mut progress = client
        .exec(ReceiverStream::new(rx))
        .await
        .map_err(Error::transport)?
        .into_inner();

    while let Some(msg) = progress.message().await.map_err(Error::transport)? {
        match CmdProgress::try_from(msg)? {
            CmdProgress::Stdout(b) => stdout.write_all(&b).await?,
            CmdProgress::Stderr(b) => stderr.write_all(&b).await?,
            CmdProgress::Exit(code) => {
                stdout.flush().await?;
                stderr.flush().await?;
                drop(tx);
                return Ok(code);
            }
        }
    }
    Err(Error::Internal(
        "exec stream ended without an exit code".to_string(),
    ))
}

/// Ask the server for its version.
pub async fn version(client: &mut Client) -> Result<String> {
    let response = client
        .version(proto::Empty {})
        .await
        .map_err(Error::transport)?;
    Ok(response.into_inner().version)
}
