//! Chunked file transfer with live progress.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info};

use super::active::ActiveGuard;
use crate::downloader::{ActiveStatus, Phase};

pub const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub bytes_sent: u64,
    pub total: u64,
    /// False when the peer went away before the last byte
    pub completed: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Copy `path` to `writer` one chunk at a time, flushing after each chunk.
///
/// A failed write means the client is gone: the transfer stops and reports
/// `completed: false` instead of an error. Read errors on the file are
/// returned as errors.
pub async fn stream_file<W>(
    path: &Path,
    total: u64,
    guard: &ActiveGuard,
    writer: &mut W,
) -> io::Result<TransferReport>
where
    W: AsyncWrite + Unpin,
{
    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let started = Instant::now();
    let mut bytes_sent: u64 = 0;

    guard.update(|s| {
        s.status = ActiveStatus::Transferring;
        s.phase = Phase::Transfer;
        s.progress = 0.0;
        s.bytes_sent = 0;
        s.file_size = Some(total);
        s.progress_text = "Sending to client...".to_string();
    });

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let written = match writer.write_all(&buf[..n]).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            info!(
                video_id = guard.video_id(),
                bytes_sent,
                total,
                error = %e,
                "Client disconnected during transfer"
            );
            return Ok(TransferReport {
                bytes_sent,
                total,
                completed: false,
                elapsed: started.elapsed(),
            });
        }

        bytes_sent += n as u64;
        let elapsed = started.elapsed();
        guard.update(|s| {
            s.bytes_sent = bytes_sent;
            s.progress = percent(bytes_sent, total);
            s.progress_text = transfer_text(bytes_sent, total, elapsed);
        });
    }

    let _ = writer.shutdown().await;

    let elapsed = started.elapsed();
    debug!(video_id = guard.video_id(), bytes_sent, "Transfer finished");
    Ok(TransferReport {
        bytes_sent,
        total,
        completed: true,
        elapsed,
    })
}

fn percent(sent: u64, total: u64) -> f32 {
    if total == 0 {
        return 100.0;
    }
    ((sent as f64 / total as f64) * 100.0).min(100.0) as f32
}

fn transfer_text(sent: u64, total: u64, elapsed: Duration) -> String {
    let sent_mb = sent as f64 / 1_048_576.0;
    let total_mb = total as f64 / 1_048_576.0;
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { sent_mb / secs } else { 0.0 };
    format!(
        "Sending: {:.1}/{:.1} MB ({:.1} MB/s)",
        sent_mb, total_mb, speed
    )
}
