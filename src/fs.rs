//! Filesystem seam used for reading containers and for the temp-file swap
//! that makes rewrites atomic.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

pub trait WriteSeek: Write + Seek + Send {}
impl<T: Write + Seek + Send> WriteSeek for T {}

/// Operations the engine needs from the filesystem
pub trait FileSystem: Send + Sync + fmt::Debug {
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>>;

    fn exists(&self, path: &Path) -> bool;

    fn len(&self, path: &Path) -> io::Result<u64>;

    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Replace `to` with `from` in one step
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create a fresh, uniquely named file inside `dir`
    fn create_temp(&self, dir: &Path) -> io::Result<(PathBuf, Box<dyn WriteSeek>)>;
}

/// The local disk
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn len(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn create_temp(&self, dir: &Path) -> io::Result<(PathBuf, Box<dyn WriteSeek>)> {
        let (file, path) = tempfile::Builder::new()
            .prefix(".libris-")
            .suffix(".tmp")
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)?;
        let writer: Box<dyn WriteSeek> = Box::new(BufWriter::new(file));
        Ok((path, writer))
    }
}

/// Directory a temp file for `target` should live in (same filesystem, so the
/// final rename stays atomic)
pub(crate) fn temp_dir_for(target: &Path) -> &Path {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn temp_file_lands_next_to_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("book.epub");
        let fs = LocalFileSystem;

        let (tmp, mut out) = fs.create_temp(temp_dir_for(&target)).unwrap();
        out.write_all(b"payload").unwrap();
        out.flush().unwrap();
        drop(out);

        assert_eq!(tmp.parent(), Some(dir.path()));
        fs.rename(&tmp, &target).unwrap();
        assert!(!fs.exists(&tmp));
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn bare_file_name_uses_current_dir() {
        assert_eq!(temp_dir_for(Path::new("a.zip")), Path::new("."));
    }
}
