//! Merging of a child's stdout and stderr into one progress stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use crate::error::Result;
use crate::stream::MessageSink;
use crate::types::CmdProgress;

/// Byte sink that hands every write off to a bounded channel.
///
/// Each write is copied into a fresh buffer before it is queued: callers such
/// as [`tokio::io::copy_buf`] reuse their buffer for the next read.
#[derive(Debug)]
pub struct ChannelWriter {
    tx: PollSender<Vec<u8>>,
}

impl ChannelWriter {
    /// Wrap the sending side of a hand-off channel.
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            tx: PollSender::new(tx),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "hand-off channel closed")
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(self.tx.poll_reserve(cx)).map_err(|_| closed())?;
        self.tx.send_item(buf.to_vec()).map_err(|_| closed())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}

/// Copy `reader` into `tx` in reads of up to `chunk_size` bytes, closing the
/// channel at end of stream. Returns the number of bytes copied.
pub async fn copy_to_channel<R>(
    reader: R,
    tx: mpsc::Sender<Vec<u8>>,
    chunk_size: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(chunk_size, reader);
    let mut writer = ChannelWriter::new(tx);
    let copied = tokio::io::copy_buf(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(copied)
}

/// Forward chunks from both channels to `sink`, tagged by origin, until both
/// channels are closed.
///
/// The select is fair; no ordering between stdout and stderr is implied.
pub async fn multiplex<K>(
    mut stdout: mpsc::Receiver<Vec<u8>>,
    mut stderr: mpsc::Receiver<Vec<u8>>,
    sink: &K,
) -> Result<()>
where
    K: MessageSink<CmdProgress> + ?Sized,
{
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let progress = tokio::select! {
            chunk = stdout.recv(), if stdout_open => match chunk {
                Some(bytes) => CmdProgress::Stdout(bytes),
                None => {
                    stdout_open = false;
                    continue;
                }
            },
            chunk = stderr.recv(), if stderr_open => match chunk {
                Some(bytes) => CmdProgress::Stderr(bytes),
                None => {
                    stderr_open = false;
                    continue;
                }
            },
        };
        sink.send(progress).await?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reused_buffer_is_not_aliased() {
        const WRITES: usize = 2_000;
        const LEN: usize = 4096;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);
        let producer = tokio::spawn(async move {
            let mut writer = ChannelWriter::new(tx);
            let mut buf = vec![0u8; LEN];
            for i in 0..WRITES {
                buf.fill((i % 251) as u8);
                writer.write_all(&buf).await.unwrap();
            }
            writer.shutdown().await.unwrap();
            WRITES * LEN
        });

        let mut total = 0;
        let mut index = 0;
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.len(), LEN);
            let expected = (index % 251) as u8;
            assert!(chunk.iter().all(|b| *b == expected), "chunk {index} corrupted");
            total += chunk.len();
            index += 1;
            if index % 97 == 0 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(total, producer.await.unwrap());
    }

    #[tokio::test]
    async fn test_write_after_receiver_drop_fails() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(1);
        drop(rx);
        let mut writer = ChannelWriter::new(tx);

        let err = writer.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_copy_to_channel_chunks_large_input() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
        let (tx, mut rx) = mpsc::channel(1);

        let copier = tokio::spawn({
            let data = data.clone();
            async move { copy_to_channel(&data[..], tx, 32 * 1024).await.unwrap() }
        });

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            assert!(chunk.len() <= 32 * 1024);
            received.extend_from_slice(&chunk);
        }
        assert_eq!(copier.await.unwrap(), data.len() as u64);
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_multiplex_tags_and_drains_both() {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);
        let (sink, mut progress) = mpsc::channel(64);

        tokio::spawn(async move {
            for i in 0..10u8 {
                out_tx.send(vec![b'o', i]).await.unwrap();
            }
        });
        tokio::spawn(async move {
            for i in 0..5u8 {
                err_tx.send(vec![b'e', i]).await.unwrap();
            }
        });

        multiplex(out_rx, err_rx, &sink).await.unwrap();
        drop(sink);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(msg) = progress.recv().await {
            match msg {
                CmdProgress::Stdout(b) => stdout.push(b),
                CmdProgress::Stderr(b) => stderr.push(b),
                CmdProgress::Exit(_) => panic!("multiplexer must not emit exit codes"),
            }
        }
        assert_eq!(stdout, (0..10u8).map(|i| vec![b'o', i]).collect::<Vec<_>>());
        assert_eq!(stderr, (0..5u8).map(|i| vec![b'e', i]).collect::<Vec<_>>());
    }
}
