//! Log output: stdout, or an append-mode file that can be reopened after an
//! external rotation (SIGHUP).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use tally_core::error::{Result, TallyError};

enum Target {
    Stdout,
    File { path: PathBuf, file: Mutex<File> },
}

/// Cloneable log destination, shared by the subscriber and the daemon.
#[derive(Clone)]
pub struct LogHandle {
    target: Arc<Target>,
}

impl LogHandle {
    pub fn stdout() -> Self {
        Self {
            target: Arc::new(Target::Stdout),
        }
    }

    pub fn file(path: &Path) -> Result<Self> {
        let file = open_append(path)?;
        Ok(Self {
            target: Arc::new(Target::File {
                path: path.to_path_buf(),
                file: Mutex::new(file),
            }),
        })
    }

    pub fn from_config(log: Option<&Path>) -> Result<Self> {
        match log {
            Some(path) => Self::file(path),
            None => Ok(Self::stdout()),
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(*self.target, Target::Stdout)
    }

    /// Reopen the log file by path. No-op for stdout.
    pub fn reopen(&self) -> Result<()> {
        if let Target::File { path, file } = &*self.target {
            let fresh = open_append(path)?;
            let mut guard = lock(file);
            let _ = guard.flush();
            *guard = fresh;
        }
        Ok(())
    }
}

fn lock(file: &Mutex<File>) -> MutexGuard<'_, File> {
    file.lock().unwrap_or_else(PoisonError::into_inner)
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| TallyError::Config(format!("open log file {} failed: {e}", path.display())))
}

/// Writer handed to the fmt layer for one event.
pub struct LogWriter {
    target: Arc<Target>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &*self.target {
            Target::Stdout => io::stdout().write(buf),
            Target::File { file, .. } => lock(file).write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &*self.target {
            Target::Stdout => io::stdout().flush(),
            Target::File { file, .. } => lock(file).flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogHandle {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            target: Arc::clone(&self.target),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
pub fn init(handle: &LogHandle) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_ansi(handle.is_stdout())
        .with_writer(handle.clone())
        .init();
}
