use super::ArchiveBackend;
use crate::config::EngineConfig;
use crate::entry::{ContainerEntry, Filter};
use crate::error::{ArchiveError, Result};
use crate::handle::ContainerHandle;
use crate::mutate::{MutationOutcome, MutationRequest};
use std::path::PathBuf;

/// Read-only backend for solid archives (RAR, CBR)
///
/// Solid archives can only be walked front to back, so every call reopens
/// the archive and scans it in order. Mutations are refused before any IO.
#[derive(Debug)]
pub struct SolidBackend {
    path: PathBuf,
    config: EngineConfig,
}

impl SolidBackend {
    pub fn new(handle: ContainerHandle, config: EngineConfig) -> Result<Self> {
        let path = handle.path().map(|p| p.to_path_buf()).ok_or_else(|| {
            ArchiveError::UnsupportedOperation(
                "solid archives can only be opened from a file".to_string(),
            )
        })?;
        Ok(Self { path, config })
    }

    fn require_file(&self) -> Result<()> {
        if !self.path.exists() {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", self.path.display()),
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "rar")]
fn rar_error(context: &str, err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::corrupt(format!("{}: {}", context, err))
}

#[cfg(feature = "rar")]
fn normalize(name: &std::path::Path) -> String {
    name.to_string_lossy().replace('\\', "/")
}

#[cfg(feature = "rar")]
impl ArchiveBackend for SolidBackend {
    fn list(&self, filter: Option<&Filter>) -> Result<Vec<ContainerEntry>> {
        self.require_file()?;
        let archive = unrar::Archive::new(&self.path)
            .open_for_listing()
            .map_err(|e| rar_error("failed to open RAR", e))?;

        let mut entries = Vec::new();
        for header in archive {
            let header = header.map_err(|e| rar_error("failed to read RAR entry", e))?;
            let mut path = normalize(&header.filename);
            let is_directory = header.is_directory();
            if is_directory && !path.ends_with('/') {
                path.push('/');
            }

            let mut entry = ContainerEntry::new(path.clone(), path.into_bytes());
            entry.is_directory = is_directory;
            entry.declared_size = header.unpacked_size as u64;
            entry.crc32 = header.file_crc;
            if entry.matches(filter) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn extract_one(&self, path: &str) -> Result<Vec<u8>> {
        self.require_file()?;
        let mut cursor = unrar::Archive::new(&self.path)
            .open_for_processing()
            .map_err(|e| rar_error("failed to open RAR", e))?;

        while let Some(header) = cursor
            .read_header()
            .map_err(|e| rar_error("failed to read RAR header", e))?
        {
            let entry = header.entry();
            if entry.is_file() && normalize(&entry.filename) == path {
                let (data, _rest) = header
                    .read()
                    .map_err(|e| rar_error("failed to extract RAR entry", e))?;
                return Ok(data);
            }
            cursor = header
                .skip()
                .map_err(|e| rar_error("failed to skip RAR entry", e))?;
        }
        Err(ArchiveError::NotFound(path.to_string()))
    }

    fn extract_many(
        &self,
        filter: Option<&Filter>,
        max_entries: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        self.require_file()?;
        let mut cursor = unrar::Archive::new(&self.path)
            .open_for_processing()
            .map_err(|e| rar_error("failed to open RAR", e))?;

        let mut results = Vec::new();
        while let Some(header) = cursor
            .read_header()
            .map_err(|e| rar_error("failed to read RAR header", e))?
        {
            if max_entries.is_some_and(|max| results.len() >= max) {
                break;
            }
            let name = normalize(&header.entry().filename);
            let wanted = header.entry().is_file() && filter.map_or(true, |f| f(&name));
            if !wanted {
                cursor = header
                    .skip()
                    .map_err(|e| rar_error("failed to skip RAR entry", e))?;
                continue;
            }

            match header.read() {
                Ok((data, rest)) => {
                    results.push((name, data));
                    cursor = rest;
                }
                // a failed read consumes the archive, so the scan cannot continue
                Err(e) if !self.config.strict => {
                    log::warn!("skipping entry {} and the rest of the archive: {}", name, e);
                    break;
                }
                Err(e) => return Err(rar_error("failed to extract RAR entry", e)),
            }
        }
        Ok(results)
    }

    fn add_or_replace(&self, request: &MutationRequest) -> Result<MutationOutcome> {
        Err(ArchiveError::UnsupportedOperation(format!(
            "cannot write {} into read-only archive {}",
            request.path,
            self.path.display()
        )))
    }
}

#[cfg(not(feature = "rar"))]
impl ArchiveBackend for SolidBackend {
    fn list(&self, _filter: Option<&Filter>) -> Result<Vec<ContainerEntry>> {
        self.require_file()?;
        Err(unsupported())
    }

    fn extract_one(&self, _path: &str) -> Result<Vec<u8>> {
        self.require_file()?;
        Err(unsupported())
    }

    fn extract_many(
        &self,
        _filter: Option<&Filter>,
        _max_entries: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        self.require_file()?;
        Err(unsupported())
    }

    fn add_or_replace(&self, request: &MutationRequest) -> Result<MutationOutcome> {
        Err(ArchiveError::UnsupportedOperation(format!(
            "cannot write {} into read-only archive {}",
            request.path,
            self.path.display()
        )))
    }
}

#[cfg(not(feature = "rar"))]
fn unsupported() -> ArchiveError {
    ArchiveError::UnsupportedOperation("built without RAR support".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_handles_rejected() {
        let handle = ContainerHandle::from_bytes(b"Rar!\x1a\x07\x00".to_vec());
        let err = SolidBackend::new(handle, EngineConfig::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedOperation(_)));
    }

    #[test]
    fn writes_refused_without_touching_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comic.cbr");
        let original = b"Rar!\x1a\x07\x00 not really a rar".to_vec();
        std::fs::write(&path, &original).unwrap();

        let backend =
            SolidBackend::new(ContainerHandle::from_path(&path), EngineConfig::default()).unwrap();
        let err = backend
            .add_or_replace(&MutationRequest::new("page.jpg", b"x".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedOperation(_)));
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn missing_file_is_io_failure() {
        let backend = SolidBackend::new(
            ContainerHandle::from_path("/nonexistent/comic.cbr"),
            EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(
            backend.extract_one("page.jpg").unwrap_err().kind(),
            crate::error::ErrorKind::IoFailure
        );
    }
}
