//! Add-or-replace by full container rewrite
//!
//! Every mutation streams the whole container into a new one: unaffected
//! entries are copied verbatim in physical order, the target entry gets the
//! new bytes in place, and a target that was not found is appended once at the
//! end. The cost is O(container size) per call. There is no in-place patching.
//!
//! Output always goes to a temporary location first. File-backed containers
//! are swapped in with a rename only after the new container is complete;
//! in-memory containers swap their buffer. On any failure the original is left
//! byte-for-byte untouched.

use crate::config::EngineConfig;
use crate::entry::CompressionMethod;
use crate::error::{ArchiveError, Result};
use crate::fs::{temp_dir_for, FileSystem};
use crate::handle::{ContainerHandle, ContainerSource};
use crate::index::open_reader;
use crate::reader::ZipReader;
use crate::writer::ZipWriter;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

/// Compression hint supplied with a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionPolicy {
    /// STORE for already-compressed payloads or large containers, DEFLATE otherwise
    #[default]
    Auto,
    Store,
    Deflate,
}

/// One entry to add or replace
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub path: String,
    pub content: Vec<u8>,
    pub policy: CompressionPolicy,
}

impl MutationRequest {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            policy: CompressionPolicy::Auto,
        }
    }

    pub fn with_policy(mut self, policy: CompressionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// What a successful mutation did to the entry count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Entry count grew by one
    Added,
    /// Entry count unchanged
    Replaced,
}

/// A write whose compression method is already decided
pub(crate) struct PlannedWrite<'a> {
    pub path: &'a str,
    pub content: &'a [u8],
    pub method: CompressionMethod,
}

const PRECOMPRESSED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "jxl", "heic", "mp3", "mp4", "m4a", "m4b",
    "ogg", "opus", "zip", "cbz", "epub", "gz", "bz2", "xz", "7z", "rar", "cbr", "woff", "woff2",
];

/// Whether a payload is already compressed, judged by extension or magic bytes
pub fn is_precompressed(path: &str, content: &[u8]) -> bool {
    let by_extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| PRECOMPRESSED_EXTENSIONS.contains(&ext.as_str()));
    if by_extension {
        return true;
    }

    content.starts_with(&[0xFF, 0xD8, 0xFF]) // JPEG
        || content.starts_with(b"\x89PNG")
        || content.starts_with(b"GIF8")
        || (content.starts_with(b"RIFF") && content.get(8..12) == Some(b"WEBP".as_slice()))
        || content.starts_with(b"PK\x03\x04")
        || content.starts_with(&[0x1F, 0x8B]) // gzip
}

/// Pick STORE or DEFLATE for `request` going into a container of `container_len` bytes
pub fn choose_method(
    request: &MutationRequest,
    container_len: u64,
    config: &EngineConfig,
) -> CompressionMethod {
    match request.policy {
        CompressionPolicy::Store => CompressionMethod::Stored,
        CompressionPolicy::Deflate => CompressionMethod::Deflate,
        CompressionPolicy::Auto => {
            if is_precompressed(&request.path, &request.content)
                || container_len > config.store_threshold
            {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflate
            }
        }
    }
}

pub(crate) fn validate_entry_path(path: &str) -> Result<()> {
    if path.is_empty() || path.ends_with('/') {
        return Err(ArchiveError::UnsupportedOperation(format!(
            "cannot write {:?}: not a file entry name",
            path
        )));
    }
    Ok(())
}

/// Add or replace one entry of the container behind `handle`
///
/// A file path that does not exist yet is treated as an empty container.
pub fn add_or_replace(
    handle: &ContainerHandle,
    request: &MutationRequest,
    config: &EngineConfig,
) -> Result<MutationOutcome> {
    validate_entry_path(&request.path)?;

    let container_len = if handle.exists() { handle.len()? } else { 0 };
    let write = PlannedWrite {
        path: &request.path,
        content: &request.content,
        method: choose_method(request, container_len, config),
    };

    let outcomes = commit(handle, &[write], config)?;
    Ok(outcomes[0])
}

/// Rewrite the container behind `handle` with `writes` applied, then swap it in
pub(crate) fn commit(
    handle: &ContainerHandle,
    writes: &[PlannedWrite<'_>],
    config: &EngineConfig,
) -> Result<Vec<MutationOutcome>> {
    match handle.source() {
        ContainerSource::Memory(buffer) => {
            let mut source = open_reader(handle, &config.charsets)?;
            let output = Cursor::new(Vec::with_capacity(buffer.len()));
            let (output, outcomes) =
                rewrite_into(Some(&mut source), output, writes, config.compression_level)?;
            buffer.replace(output.into_inner());
            Ok(outcomes)
        }
        ContainerSource::File(path) => commit_file(handle, path, writes, config),
    }
}

fn commit_file(
    handle: &ContainerHandle,
    path: &Path,
    writes: &[PlannedWrite<'_>],
    config: &EngineConfig,
) -> Result<Vec<MutationOutcome>> {
    let fs = handle.filesystem();
    let mut source = if fs.exists(path) {
        Some(open_reader(handle, &config.charsets)?)
    } else {
        None
    };

    let (tmp_path, output) = fs.create_temp(temp_dir_for(path))?;
    let written = rewrite_into(source.as_mut(), output, writes, config.compression_level);
    // release the original before replacing it
    drop(source);

    let result = written.and_then(|(output, outcomes)| {
        drop(output);
        fs.rename(&tmp_path, path)?;
        Ok(outcomes)
    });

    match result {
        Ok(outcomes) => {
            log::debug!(
                "rewrote {} with {} change(s)",
                path.display(),
                outcomes.len()
            );
            Ok(outcomes)
        }
        Err(err) => {
            log::warn!("rewrite of {} failed, original kept: {}", path.display(), err);
            discard_temp(fs, &tmp_path);
            Err(err)
        }
    }
}

fn discard_temp(fs: &dyn FileSystem, tmp_path: &Path) {
    if !fs.exists(tmp_path) {
        return;
    }
    if let Err(e) = fs.delete(tmp_path) {
        log::warn!(
            "failed to discard partial output {}: {}",
            tmp_path.display(),
            e
        );
    }
}

fn rewrite_into<R, W>(
    source: Option<&mut ZipReader<R>>,
    output: W,
    writes: &[PlannedWrite<'_>],
    compression_level: u32,
) -> Result<(W, Vec<MutationOutcome>)>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut writer = ZipWriter::new(output, compression_level);
    let outcomes = rewrite(source, &mut writer, writes)?;
    Ok((writer.finish()?, outcomes))
}

/// Copy `source` into `writer` entry by entry, substituting or appending `writes`
pub(crate) fn rewrite<R, W>(
    source: Option<&mut ZipReader<R>>,
    writer: &mut ZipWriter<W>,
    writes: &[PlannedWrite<'_>],
) -> Result<Vec<MutationOutcome>>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut outcomes = vec![MutationOutcome::Added; writes.len()];
    let mut matched = vec![false; writes.len()];

    if let Some(reader) = source {
        let entries = reader.entries().to_vec();
        for entry in &entries {
            let target =
                (0..writes.len()).find(|&i| !matched[i] && writes[i].path == entry.path);

            match target {
                Some(i) => {
                    let write = &writes[i];
                    writer.write_with_method(write.path, write.content, write.method)?;
                    matched[i] = true;
                    outcomes[i] = MutationOutcome::Replaced;
                }
                None => {
                    let mut payload = reader.open_raw(entry)?;
                    writer.copy_raw_from(entry, &mut payload)?;
                }
            }
        }
    }

    for (write, _) in writes.iter().zip(&matched).filter(|(_, done)| !**done) {
        writer.write_with_method(write.path, write.content, write.method)?;
    }
    Ok(outcomes)
}
