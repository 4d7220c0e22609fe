use std::{
    fs::{File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

#[cfg(test)]
use mockall::automock;
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt::MakeWriter};

/// Files larger than this are truncated before the next write.
pub const MAX_LOG_FILE_SIZE: u64 = 128 * 1024;

/// Where resolution reports problems it recovers from.
///
/// Components receive the sink explicitly instead of reaching for a global,
/// which keeps them testable in isolation.
#[cfg_attr(test, automock)]
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);
}

/// Forwards diagnostics to whatever `tracing` subscriber is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!("{message}"),
            Level::WARN => tracing::warn!("{message}"),
            Level::INFO => tracing::info!("{message}"),
            Level::DEBUG => tracing::debug!("{message}"),
            _ => tracing::trace!("{message}"),
        }
    }
}

/// A log file shared by every thread. Writes are serialized by a mutex and the
/// file is emptied once it grows past its size limit.
#[derive(Debug)]
pub struct RotatingWriter {
    file: Mutex<File>,
    max_size: u64,
}

impl RotatingWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(RotatingWriter {
            file: Mutex::new(file),
            max_size: MAX_LOG_FILE_SIZE,
        })
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

pub struct RotatingGuard<'a> {
    file: MutexGuard<'a, File>,
    max_size: u64,
}

impl RotatingGuard<'_> {
    fn try_rotate(&mut self) {
        let Ok(metadata) = self.file.metadata() else {
            return;
        };
        if metadata.len() < self.max_size {
            return;
        }
        if self.file.set_len(0).is_ok() {
            let _ = self.file.seek(SeekFrom::Start(0));
        }
    }
}

impl Write for RotatingGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.try_rotate();
        self.file.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.try_rotate();
        self.file.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingGuard {
            file: self.file.lock().unwrap_or_else(PoisonError::into_inner),
            max_size: self.max_size,
        }
    }
}

/// Debug output is on when asked for or when `DEBUG` is set to anything.
pub fn level_filter(debug: bool) -> LevelFilter {
    let from_env = std::env::var_os("DEBUG").is_some_and(|v| !v.is_empty());
    if debug || from_env {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Installs the global subscriber, writing to stdout or to a rotating file.
pub fn init(debug: bool, log_file: Option<&Path>) -> io::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level_filter(debug))
        .with_target(false);
    match log_file {
        Some(path) => builder
            .with_ansi(false)
            .with_writer(RotatingWriter::open(path)?)
            .init(),
        None => builder.with_ansi(!cfg!(windows)).init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn contents(path: &Path) -> String {
        let mut out = String::new();
        File::open(path).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn appends_below_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow.log");
        let writer = RotatingWriter::open(&path).unwrap();
        writer.make_writer().write_all(b"first\n").unwrap();
        writer.make_writer().write_all(b"second\n").unwrap();
        assert_eq!(contents(&path), "first\nsecond\n");
    }

    #[test]
    fn truncates_once_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow.log");
        let writer = RotatingWriter::open(&path).unwrap().with_max_size(8);
        writer.make_writer().write_all(b"0123456789\n").unwrap();
        writer.make_writer().write_all(b"fresh\n").unwrap();
        assert_eq!(contents(&path), "fresh\n");
    }

    #[test]
    fn reopening_keeps_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow.log");
        std::fs::write(&path, "old\n").unwrap();
        let writer = RotatingWriter::open(&path).unwrap();
        writer.make_writer().write_all(b"new\n").unwrap();
        assert_eq!(contents(&path), "old\nnew\n");
    }

    #[test]
    fn tracing_sink_accepts_every_level() {
        let sink = TracingSink;
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            sink.emit(level, "message");
        }
    }
}
