// Local filesystem adapter - Raw byte streams for paths and file:// URIs

use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

/// Stream opener over the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLocalAdapter;

impl FsLocalAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a source to a readable local path
    pub fn resolve(source: &MediaSource) -> Result<PathBuf, DomainError> {
        source.local_path().ok_or_else(|| {
            DomainError::FileNotFound(format!("{} is not a local file", source))
        })
    }
}

impl StreamOpener for FsLocalAdapter {
    fn open_read(&self, source: &MediaSource) -> Result<Box<dyn Read + Send>, DomainError> {
        let path = Self::resolve(source)?;
        let file = fs::File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DomainError::FileNotFound(path.display().to_string()),
            _ => DomainError::FsFail(format!("Failed to open {}: {}", path.display(), e)),
        })?;
        debug!("opened {} for reading", path.display());
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn Write + Send>, DomainError> {
        let file = fs::File::create(path)
            .map_err(|e| DomainError::FsFail(format!("Failed to create {}: {}", path.display(), e)))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_file_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.bin");
        fs::write(&path, b"abcdef").unwrap();

        let adapter = FsLocalAdapter::new();
        let uri = url::Url::from_file_path(&path).unwrap().to_string();
        let mut content = Vec::new();
        adapter
            .open_read(&MediaSource::parse(&uri))
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"abcdef");

        let out = dir.path().join("out.bin");
        let mut writer = adapter.open_write(&out).unwrap();
        writer.write_all(&content).unwrap();
        writer.flush().unwrap();
        drop(writer);
        assert_eq!(fs::read(out).unwrap(), b"abcdef");
    }

    #[test]
    fn test_remote_uri_and_missing_file() {
        let adapter = FsLocalAdapter::new();
        assert!(matches!(
            adapter.open_read(&MediaSource::parse("content://media/external/video/42")),
            Err(DomainError::FileNotFound(_))
        ));
        assert!(matches!(
            adapter.open_read(&MediaSource::File("/definitely/not/here.mp4".into())),
            Err(DomainError::FileNotFound(_))
        ));
    }
}
