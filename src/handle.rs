//! Container handles: where a container's bytes live

use crate::error::Result;
use crate::fs::{FileSystem, LocalFileSystem, ReadSeek};
use encoding_rs::Encoding;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory container bytes shared between a handle and its clones
///
/// Rewrites build a complete new buffer and swap it in, so readers holding a
/// snapshot keep seeing the old container until they take a new one.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    inner: Arc<RwLock<Arc<[u8]>>>,
}

impl SharedBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(bytes.into())),
        }
    }

    pub fn snapshot(&self) -> Arc<[u8]> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace(&self, bytes: Vec<u8>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = bytes.into();
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub enum ContainerSource {
    File(PathBuf),
    Memory(SharedBuffer),
}

/// A byte source plus the knobs needed to interpret it
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    source: ContainerSource,
    charset: Option<&'static Encoding>,
    fs: Arc<dyn FileSystem>,
}

impl ContainerHandle {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            source: ContainerSource::File(path.as_ref().to_path_buf()),
            charset: None,
            fs: Arc::new(LocalFileSystem),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::from_buffer(SharedBuffer::new(bytes))
    }

    pub fn from_buffer(buffer: SharedBuffer) -> Self {
        Self {
            source: ContainerSource::Memory(buffer),
            charset: None,
            fs: Arc::new(LocalFileSystem),
        }
    }

    /// Decode entry names without the UTF-8 flag using `charset`
    pub fn with_charset(mut self, charset: &'static Encoding) -> Self {
        self.charset = Some(charset);
        self
    }

    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn source(&self) -> &ContainerSource {
        &self.source
    }

    pub fn charset(&self) -> Option<&'static Encoding> {
        self.charset
    }

    pub fn filesystem(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ContainerSource::File(path) => Some(path),
            ContainerSource::Memory(_) => None,
        }
    }

    /// Lower-cased file extension, if the handle points at a file
    pub fn extension(&self) -> Option<String> {
        self.path()?
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }

    /// Current bytes of an in-memory container
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match &self.source {
            ContainerSource::Memory(buffer) => Some(buffer.snapshot().to_vec()),
            ContainerSource::File(_) => None,
        }
    }

    /// Whether the container exists yet (in-memory containers always do)
    pub(crate) fn exists(&self) -> bool {
        match &self.source {
            ContainerSource::File(path) => self.fs.exists(path),
            ContainerSource::Memory(_) => true,
        }
    }

    pub(crate) fn len(&self) -> Result<u64> {
        match &self.source {
            ContainerSource::File(path) => Ok(self.fs.len(path)?),
            ContainerSource::Memory(buffer) => Ok(buffer.len() as u64),
        }
    }

    pub(crate) fn open(&self) -> Result<Box<dyn ReadSeek>> {
        match &self.source {
            ContainerSource::File(path) => Ok(self.fs.open_read(path)?),
            ContainerSource::Memory(buffer) => Ok(Box::new(Cursor::new(buffer.snapshot()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn snapshot_survives_replace() {
        let buffer = SharedBuffer::new(b"old".to_vec());
        let handle = ContainerHandle::from_buffer(buffer.clone());
        let mut reader = handle.open().unwrap();

        buffer.replace(b"new!".to_vec());

        let mut seen = Vec::new();
        reader.read_to_end(&mut seen).unwrap();
        assert_eq!(seen, b"old");
        assert_eq!(handle.to_bytes().unwrap(), b"new!");
    }

    #[test]
    fn extension_is_lowercased() {
        let handle = ContainerHandle::from_path("/books/Comic.CBZ");
        assert_eq!(handle.extension().as_deref(), Some("cbz"));
        assert_eq!(ContainerHandle::from_bytes(vec![]).extension(), None);
    }
}
