// SPDX-License-Identifier: MIT

//! Diagnostic logging: size-rotated files, quiet standard streams.
//!
//! `logs/server-combined.log` receives everything the filter passes,
//! `logs/server-error.log` WARN and up. Files rotate at ~10 MB keeping at
//! most 5 generations. When the process is attached to the tool protocol
//! (stdout is the wire), nothing is written to the standard streams.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Rotation threshold.
const MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Generations kept beyond the live file: `x.log.1` .. `x.log.4`.
const MAX_GENERATIONS: usize = 5;

struct RotatingInner {
    file: File,
    written: u64,
}

/// Size-rotating log file writer.
///
/// On overflow the live file shifts to `.1`, `.1` to `.2`, and so on; the
/// oldest generation falls off.
#[derive(Clone)]
pub struct RotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    inner: Arc<Mutex<RotatingInner>>,
}

impl RotatingWriter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Self::with_max_bytes(path, MAX_BYTES)
    }

    pub fn with_max_bytes(path: &Path, max_bytes: u64) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            inner: Arc::new(Mutex::new(RotatingInner { file, written })),
        })
    }

    fn rotate(&self, inner: &mut RotatingInner) -> std::io::Result<()> {
        // Shift generations up, dropping the oldest.
        let gen_path = |n: usize| PathBuf::from(format!("{}.{n}", self.path.display()));
        let _ = std::fs::remove_file(gen_path(MAX_GENERATIONS - 1));
        for n in (1..MAX_GENERATIONS - 1).rev() {
            let _ = std::fs::rename(gen_path(n), gen_path(n + 1));
        }
        let _ = std::fs::rename(&self.path, gen_path(1));

        inner.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        inner.written = 0;
        Ok(())
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.inner.lock();
        if inner.written + buf.len() as u64 > self.max_bytes {
            self.rotate(&mut inner)?;
        }
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().file.flush()
    }
}

/// Keep these alive for the process lifetime; dropping them stops the
/// non-blocking writer threads.
pub struct LogGuards {
    _combined: tracing_appender::non_blocking::WorkerGuard,
    _error: tracing_appender::non_blocking::WorkerGuard,
}

/// Install the global subscriber. `stderr_echo` adds a human-readable
/// stderr layer — only when the process is not attached to the protocol.
pub fn init(logs_dir: &Path, level: &str, stderr_echo: bool) -> std::io::Result<LogGuards> {
    let combined = RotatingWriter::create(&logs_dir.join("server-combined.log"))?;
    let errors = RotatingWriter::create(&logs_dir.join("server-error.log"))?;

    let (combined_nb, combined_guard) = tracing_appender::non_blocking(combined);
    let (error_nb, error_guard) = tracing_appender::non_blocking(errors);

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let combined_layer = tracing_subscriber::fmt::layer()
        .with_writer(combined_nb)
        .with_ansi(false)
        .with_target(true);
    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_nb)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(combined_layer)
        .with(error_layer);

    if stderr_echo {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init();
    } else {
        registry.init();
    }

    Ok(LogGuards { _combined: combined_guard, _error: error_guard })
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
