//! Log sink plumbing.
//!
//! The host process does not own its stderr, so log output is routed
//! through a swappable sink: a per-action `exec-log` file when one is
//! configured, stderr otherwise. The sink is consulted on every write,
//! which lets the override change between actions without rebuilding the
//! subscriber.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to the current log destination.
#[derive(Clone, Default)]
pub struct LogSink {
    target: Arc<Mutex<Option<PathBuf>>>,
}

impl LogSink {
    /// Point the sink at a file, or back at stderr with `None`.
    pub fn set_file(&self, path: Option<PathBuf>) {
        let mut target = self.target.lock().unwrap_or_else(|e| e.into_inner());
        *target = path;
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.target
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Log files can hold prompts and usernames, keep them private.
fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

pub enum SinkWriter {
    File(File),
    Stderr(io::Stderr),
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.write(buf),
            Self::Stderr(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(f) => f.flush(),
            Self::Stderr(s) => s.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let target = self.target.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = target.as_ref() {
            // An unwritable log file must not take the bridge down.
            if let Ok(file) = open_append(path) {
                return SinkWriter::File(file);
            }
        }
        SinkWriter::Stderr(io::stderr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_defaults_to_stderr() {
        let sink = LogSink::default();
        assert!(sink.current_file().is_none());
        assert!(matches!(sink.make_writer(), SinkWriter::Stderr(_)));
    }

    #[test]
    fn sink_appends_to_the_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.log");

        let sink = LogSink::default();
        sink.set_file(Some(path.clone()));

        let mut writer = sink.make_writer();
        writer.write_all(b"first\n").unwrap();
        drop(writer);
        let mut writer = sink.make_writer();
        writer.write_all(b"second\n").unwrap();
        drop(writer);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");

        sink.set_file(None);
        assert!(matches!(sink.make_writer(), SinkWriter::Stderr(_)));
    }

    #[cfg(unix)]
    #[test]
    fn log_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.log");

        let sink = LogSink::default();
        sink.set_file(Some(path.clone()));
        sink.make_writer().write_all(b"x").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn unwritable_file_falls_back_to_stderr() {
        let sink = LogSink::default();
        sink.set_file(Some(PathBuf::from("/nonexistent/dir/bridge.log")));
        assert!(matches!(sink.make_writer(), SinkWriter::Stderr(_)));
    }
}
