//! Script source providers
//!
//! The core treats scripts as opaque bytes and never interprets the locator.

use parking_lot::RwLock;
use std::io;
use std::path::{Path, PathBuf};

pub trait ScriptSource: Send + Sync {
    /// Read the full script. Called again on every context (re)build.
    fn read_script(&self) -> io::Result<Vec<u8>>;

    /// Human-readable location, used in errors and log lines.
    fn locator(&self) -> String;
}

/// Script stored on disk, re-read on every call.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScriptSource for FileSource {
    fn read_script(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    fn locator(&self) -> String {
        self.path.display().to_string()
    }
}

/// Replaceable in-memory script.
#[derive(Debug, Default)]
pub struct MemorySource {
    name: String,
    text: RwLock<String>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: RwLock::new(text.into()),
        }
    }

    /// Takes effect on the next read (i.e. the next swap).
    pub fn replace(&self, text: impl Into<String>) {
        *self.text.write() = text.into();
    }
}

impl ScriptSource for MemorySource {
    fn read_script(&self) -> io::Result<Vec<u8>> {
        Ok(self.text.read().clone().into_bytes())
    }

    fn locator(&self) -> String {
        format!("memory:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_source_rereads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "var a = 1;").unwrap();
        let source = FileSource::new(file.path());
        assert_eq!(source.read_script().unwrap(), b"var a = 1;");

        std::fs::write(file.path(), "var a = 2;").unwrap();
        assert_eq!(source.read_script().unwrap(), b"var a = 2;");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("missing.js"));
        assert_eq!(
            source.read_script().unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_memory_source_replace() {
        let source = MemorySource::new("demo", "one");
        assert_eq!(source.locator(), "memory:demo");
        source.replace("two");
        assert_eq!(source.read_script().unwrap(), b"two");
    }
}
