//! Worker pool: read one payload per connection, decode it, and forward the
//! updates one by one in payload order.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tally_core::error::{Result, TallyError};
use tally_core::protocol::{decode_payload, payload_complete};
use tally_core::MetricUpdate;

use super::{PipelineSettings, PipelineStats};

const READ_CHUNK: usize = 4096;

pub async fn run(
    id: usize,
    conns: flume::Receiver<UnixStream>,
    updates: flume::Sender<MetricUpdate>,
    settings: PipelineSettings,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = conns.recv_async() => match next {
                Ok(stream) => stream,
                Err(_) => break,
            },
        };

        let batch = match timeout(
            settings.read_timeout,
            read_payload(stream, settings.max_payload_bytes),
        )
        .await
        {
            Ok(Ok(buf)) => decode_payload(&buf),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TallyError::Transport(format!(
                "no complete payload within {:?}",
                settings.read_timeout
            ))),
        };

        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                stats.inc_dropped();
                tracing::warn!(worker = id, error = %e, "dropping connection");
                continue;
            }
        };
        stats.add_decoded(batch.len() as u64);

        for update in batch {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                sent = updates.send_async(update) => {
                    if sent.is_err() {
                        tracing::error!(worker = id, "update queue closed");
                        return;
                    }
                }
            }
        }
    }
    tracing::debug!(worker = id, "worker stopped");
}

/// Read until one complete JSON value is buffered or the peer closes.
///
/// Clients may either close their write half or keep the connection open
/// after writing; both end the read once the value is complete.
pub async fn read_payload<R>(mut r: R, max_bytes: usize) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK.min(max_bytes));
    loop {
        buf.reserve(READ_CHUNK);
        let n = r
            .read_buf(&mut buf)
            .await
            .map_err(|e| TallyError::Transport(format!("read failed: {e}")))?;
        if buf.len() > max_bytes {
            return Err(TallyError::Transport(format!(
                "payload exceeds {max_bytes} bytes"
            )));
        }
        if n == 0 {
            if buf.iter().all(u8::is_ascii_whitespace) {
                return Err(TallyError::Transport("empty payload".into()));
            }
            if !payload_complete(&buf)? {
                return Err(TallyError::Transport("truncated payload".into()));
            }
            return Ok(buf);
        }
        if payload_complete(&buf)? {
            return Ok(buf);
        }
    }
}
