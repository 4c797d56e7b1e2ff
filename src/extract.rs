//! Entry extraction
//!
//! Extraction always walks entries in physical order and never yields
//! directory entries, whatever the filter says.

use crate::entry::{ContainerEntry, Filter};
use crate::error::{ArchiveError, Result};
use crate::reader::ZipReader;
use std::io::{Read, Seek};

/// Bytes of the file entry at `path`
pub fn extract_one<R: Read + Seek>(reader: &mut ZipReader<R>, path: &str) -> Result<Vec<u8>> {
    let entry = reader
        .entries()
        .iter()
        .find(|e| e.path == path && !e.is_directory)
        .cloned()
        .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;
    reader.read_entry(&entry)
}

/// Extract file entries accepted by `filter`
///
/// The scan stops once `max_entries` results have been collected (`None` means
/// no limit). A corrupt entry is logged and skipped unless `strict` is set, in
/// which case it aborts the whole call. Skipped entries do not count toward
/// the limit.
pub fn extract_many<R: Read + Seek>(
    reader: &mut ZipReader<R>,
    filter: Option<&Filter>,
    max_entries: Option<usize>,
    strict: bool,
) -> Result<Vec<(String, Vec<u8>)>> {
    let entries = reader.entries().to_vec();
    collect_entries(&entries, filter, max_entries, strict, |entry| {
        reader.read_entry(entry)
    })
}

/// Bulk-extraction loop shared by every backend that reads entries one by one
pub(crate) fn collect_entries<F>(
    entries: &[ContainerEntry],
    filter: Option<&Filter>,
    max_entries: Option<usize>,
    strict: bool,
    mut read: F,
) -> Result<Vec<(String, Vec<u8>)>>
where
    F: FnMut(&ContainerEntry) -> Result<Vec<u8>>,
{
    let mut results = Vec::new();
    for entry in entries.iter().filter(|e| !e.is_directory) {
        if max_entries.is_some_and(|max| results.len() >= max) {
            break;
        }
        if !entry.matches(filter) {
            continue;
        }
        match read(entry) {
            Ok(data) => results.push((entry.path.clone(), data)),
            Err(err) if !strict && err.is_entry_local() => {
                log::warn!("skipping entry {}: {}", entry.path, err);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(results)
}
