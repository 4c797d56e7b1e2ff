//! Archive backends
//!
//! Every archive technology implements the same four operations. The factory
//! picks the implementation once, from the detected format, and hands out a
//! trait object; nothing above this layer knows which backend it talks to.

mod mounted;
mod solid;
mod stream;

pub use mounted::{MountedArchive, MountedBackend};
pub use solid::SolidBackend;
pub use stream::StreamBackend;

use crate::config::EngineConfig;
use crate::entry::{ContainerEntry, Filter};
use crate::error::{ArchiveError, Result};
use crate::handle::ContainerHandle;
use crate::mutate::{MutationOutcome, MutationRequest};
use std::io::Read;
use std::sync::Arc;

/// Capability surface shared by all archive technologies
pub trait ArchiveBackend: Send + Sync {
    /// Entries accepted by `filter`, in physical order
    fn list(&self, filter: Option<&Filter>) -> Result<Vec<ContainerEntry>>;

    /// Bytes of the file entry at `path`
    fn extract_one(&self, path: &str) -> Result<Vec<u8>>;

    /// File entries accepted by `filter`, in physical order, at most `max_entries`
    fn extract_many(
        &self,
        filter: Option<&Filter>,
        max_entries: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>>;

    /// Add or replace one entry by rewriting the container
    fn add_or_replace(&self, request: &MutationRequest) -> Result<MutationOutcome>;
}

/// Container technology, as detected from magic bytes or extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// ZIP family: ZIP, EPUB, CBZ
    Zip,
    /// Solid, read-only archives: RAR, CBR
    Solid,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const EMPTY_ZIP_MAGIC: &[u8] = b"PK\x05\x06";
const RAR_MAGIC: &[u8] = b"Rar!\x1a\x07";

impl ArchiveFormat {
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(ZIP_MAGIC) || header.starts_with(EMPTY_ZIP_MAGIC) {
            Some(ArchiveFormat::Zip)
        } else if header.starts_with(RAR_MAGIC) {
            Some(ArchiveFormat::Solid)
        } else {
            None
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "zip" | "epub" | "cbz" => Some(ArchiveFormat::Zip),
            "rar" | "cbr" => Some(ArchiveFormat::Solid),
            _ => None,
        }
    }
}

/// Detect the format of the container behind `handle`
///
/// Magic bytes win over the extension. An empty or not-yet-existing container
/// is ZIP unless its extension says otherwise.
pub fn detect_format(handle: &ContainerHandle) -> Result<ArchiveFormat> {
    let by_extension = handle
        .extension()
        .and_then(|ext| ArchiveFormat::from_extension(&ext));

    if !handle.exists() || handle.len()? == 0 {
        return Ok(by_extension.unwrap_or(ArchiveFormat::Zip));
    }

    let mut header = Vec::with_capacity(8);
    handle.open()?.take(8).read_to_end(&mut header)?;

    ArchiveFormat::from_magic(&header)
        .or(by_extension)
        .ok_or_else(|| ArchiveError::corrupt("unrecognized container format"))
}

/// Open the backend matching the container behind `handle`
pub fn open_backend(
    handle: ContainerHandle,
    config: EngineConfig,
) -> Result<Arc<dyn ArchiveBackend>> {
    let format = detect_format(&handle)?;
    log::debug!("opening {:?} container {:?}", format, handle.source());

    let backend: Arc<dyn ArchiveBackend> = match format {
        ArchiveFormat::Zip if config.mount_file_archives && handle.path().is_some() => {
            Arc::new(MountedBackend::new(handle, config))
        }
        ArchiveFormat::Zip => Arc::new(StreamBackend::new(handle, config)),
        ArchiveFormat::Solid => Arc::new(SolidBackend::new(handle, config)?),
    };
    Ok(backend)
}
