//! Unix-socket accept loop.
//!
//! The socket is world-writable: any local process may push metrics, and
//! trust stops at the host boundary.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use tally_core::error::{Result, TallyError};

use super::PipelineStats;

/// Pause after a failed accept so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Bind the ingestion socket, replacing a stale socket file.
pub fn bind(path: &Path) -> Result<UnixListener> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => remove_socket(path)?,
        Ok(_) => {
            return Err(TallyError::Internal(format!(
                "{} exists and is not a socket",
                path.display()
            )))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let listener = UnixListener::bind(path).map_err(|e| {
        TallyError::Internal(format!("bind socket {} failed: {e}", path.display()))
    })?;
    open_to_all(listener, path, |p| {
        fs::set_permissions(p, fs::Permissions::from_mode(0o777))
    })
}

// A socket whose mode cannot be set is removed again.
fn open_to_all<F>(listener: UnixListener, path: &Path, set_mode: F) -> Result<UnixListener>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    if let Err(e) = set_mode(path) {
        drop(listener);
        remove_socket(path)?;
        return Err(TallyError::Internal(format!(
            "set mode on socket {} failed: {e}",
            path.display()
        )));
    }
    tracing::info!(socket = %path.display(), "listening for metric updates");
    Ok(listener)
}

/// Remove the socket file; a missing file is not an error.
pub fn remove_socket(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TallyError::Internal(format!(
            "remove socket {} failed: {e}",
            path.display()
        ))),
    }
}

pub async fn run(
    listener: UnixListener,
    conns: flume::Sender<UnixStream>,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        stats.inc_accepted();

        // hand-off blocks until a worker is free
        tokio::select! {
            _ = shutdown.cancelled() => break,
            sent = conns.send_async(stream) => {
                if sent.is_err() {
                    tracing::error!("worker pool is gone, stopping accept loop");
                    break;
                }
            }
        }
    }
    tracing::debug!("accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_chmod_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let denied = |_: &Path| -> io::Result<()> {
            Err(io::Error::new(ErrorKind::PermissionDenied, "denied"))
        };
        let err = open_to_all(listener, &path, denied).unwrap_err();
        assert_eq!(err.class().as_str(), "FATAL");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn bound_socket_is_world_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.sock");
        let _listener = bind(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }
}
