//! Tracing writer for the log file layer.
//!
//! The terminal layer writes to stderr directly; stdout is reserved for the
//! run summary.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

/// [`MakeWriter`](tracing_subscriber::fmt::MakeWriter) appending to the log
/// file. The layer should use `.with_ansi(false)`.
#[derive(Clone)]
pub struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

impl FileMakeWriter {
    pub fn new(file: Arc<Mutex<File>>) -> Self {
        Self { file }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            file: Arc::clone(&self.file),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Per-event writer. Runner threads log concurrently, so each event is
/// buffered and appended in one locked write on [`Drop`].
pub struct FileWriter {
    file: Arc<Mutex<File>>,
    buf: Vec<u8>,
}

impl Write for FileWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let mut file = self.file.lock();
        let _ = file.write_all(&self.buf);
        let _ = file.flush();
    }
}

/// Opens `path` for appending, creating parent directories.
pub fn open_log_file(path: &Path) -> io::Result<Arc<Mutex<File>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(Arc::new(Mutex::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn events_appended_whole() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("coupler.log");
        let make = FileMakeWriter::new(open_log_file(&path).expect("opens"));

        {
            let mut w = make.make_writer();
            w.write_all(b"first ").expect("buffered");
            w.write_all(b"event\n").expect("buffered");
        }
        {
            let mut w = make.make_writer();
            w.write_all(b"second event\n").expect("buffered");
        }

        let text = std::fs::read_to_string(&path).expect("log written");
        assert_eq!(text, "first event\nsecond event\n");
    }
}
