use super::ArchiveBackend;
use crate::config::EngineConfig;
use crate::entry::{CompressionMethod, ContainerEntry, Filter};
use crate::error::{ArchiveError, Result};
use crate::extract::collect_entries;
use crate::fs::ReadSeek;
use crate::handle::ContainerHandle;
use crate::index::open_reader;
use crate::mutate::{
    choose_method, commit, validate_entry_path, MutationOutcome, MutationRequest, PlannedWrite,
};
use crate::reader::ZipReader;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

struct MountedEntry {
    entry: ContainerEntry,
    /// New content and method, not yet written back
    pending: Option<(Vec<u8>, CompressionMethod)>,
}

/// A ZIP file mounted as a mutable table of entries
///
/// Writes are buffered in the table and reach the file on [`sync`](Self::sync)
/// or [`unmount`](Self::unmount). A mounted archive belongs to the thread that
/// last wrote to it (or mounted it, before any write): unmounting from any
/// other thread panics.
pub struct MountedArchive {
    handle: ContainerHandle,
    config: EngineConfig,
    table: Vec<MountedEntry>,
    reader: Option<ZipReader<Box<dyn ReadSeek>>>,
    /// Thread allowed to unmount
    owner: ThreadId,
    dirty: bool,
}

impl MountedArchive {
    /// Mount the container behind `handle`; a missing file mounts as empty
    pub fn mount(handle: ContainerHandle, config: EngineConfig) -> Result<Self> {
        let mut archive = Self {
            handle,
            config,
            table: Vec::new(),
            reader: None,
            owner: thread::current().id(),
            dirty: false,
        };
        archive.load_table()?;
        Ok(archive)
    }

    fn open_existing(&self) -> Result<Option<ZipReader<Box<dyn ReadSeek>>>> {
        if !self.handle.exists() {
            return Ok(None);
        }
        open_reader(&self.handle, &self.config.charsets).map(Some)
    }

    fn load_table(&mut self) -> Result<()> {
        self.reader = None;
        self.table.clear();
        let Some(reader) = self.open_existing()? else {
            return Ok(());
        };
        self.table = reader
            .entries()
            .iter()
            .map(|entry| MountedEntry {
                entry: entry.clone(),
                pending: None,
            })
            .collect();
        self.reader = Some(reader);
        Ok(())
    }

    /// Current entries, pending writes included, in physical order
    ///
    /// A pending entry reports the size and CRC32 of its new content. Its
    /// compressed size is only known for STORE; a pending DEFLATE entry
    /// reports 0 until synced.
    pub fn entries(&self) -> Vec<ContainerEntry> {
        self.list(None)
    }

    /// Entries accepted by `filter`, tested slot by slot
    pub fn list(&self, filter: Option<&Filter>) -> Vec<ContainerEntry> {
        self.table
            .iter()
            .filter(|slot| slot.entry.matches(filter))
            .map(|slot| slot.entry.clone())
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Bytes of the file entry at `path`, pending content first
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let slot = self
            .table
            .iter()
            .find(|slot| slot.entry.path == path && !slot.entry.is_directory)
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;

        if let Some((content, _)) = &slot.pending {
            return Ok(content.clone());
        }
        let entry = slot.entry.clone();
        match self.reader.as_mut() {
            Some(reader) => reader.read_entry(&entry),
            None => Err(ArchiveError::NotFound(path.to_string())),
        }
    }

    /// Buffer an add or replace; nothing touches the file until sync
    pub fn write(&mut self, request: &MutationRequest) -> Result<MutationOutcome> {
        validate_entry_path(&request.path)?;

        let container_len = if self.handle.exists() { self.handle.len()? } else { 0 };
        let method = choose_method(request, container_len, &self.config);
        let pending = Some((request.content.clone(), method));

        let existing = self.table.iter().position(|s| s.entry.path == request.path);
        let outcome = match existing {
            Some(index) => {
                let slot = &mut self.table[index];
                describe_pending(&mut slot.entry, &request.content, method);
                slot.pending = pending;
                MutationOutcome::Replaced
            }
            None => {
                let mut entry =
                    ContainerEntry::new(request.path.clone(), request.path.as_bytes().to_vec());
                describe_pending(&mut entry, &request.content, method);
                self.table.push(MountedEntry { entry, pending });
                MutationOutcome::Added
            }
        };
        self.dirty = true;
        self.owner = thread::current().id();
        Ok(outcome)
    }

    /// Write buffered changes back with one full rewrite
    ///
    /// On failure the file is unchanged, the writes stay pending and the
    /// archive remains readable.
    pub fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        // the rewrite replaces the file under the reader
        self.reader = None;

        let committed = {
            let writes: Vec<PlannedWrite<'_>> = self
                .table
                .iter()
                .filter_map(|slot| {
                    slot.pending.as_ref().map(|(content, method)| PlannedWrite {
                        path: &slot.entry.path,
                        content,
                        method: *method,
                    })
                })
                .collect();
            commit(&self.handle, &writes, &self.config)
        };

        match committed {
            Ok(outcomes) => {
                log::debug!("synced {} pending write(s)", outcomes.len());
                self.dirty = false;
                self.load_table()
            }
            Err(err) => {
                match self.open_existing() {
                    Ok(reader) => self.reader = reader,
                    Err(reopen) => log::warn!(
                        "could not reopen {:?} after failed sync: {}",
                        self.handle.source(),
                        reopen
                    ),
                }
                Err(err)
            }
        }
    }

    /// Flush pending writes and release the archive
    ///
    /// # Panics
    ///
    /// Panics when called on a thread other than the one that last wrote to it.
    pub fn unmount(mut self) -> Result<()> {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "mounted archive must be unmounted on the thread that wrote to it"
        );
        self.sync()
    }
}

/// Metadata of an entry whose new content has not been written yet
fn describe_pending(entry: &mut ContainerEntry, content: &[u8], method: CompressionMethod) {
    entry.declared_size = content.len() as u64;
    entry.crc32 = crc32fast::hash(content);
    entry.compression_method = method;
    entry.compressed_size = match method {
        CompressionMethod::Stored => entry.declared_size,
        _ => 0,
    };
}

impl Drop for MountedArchive {
    fn drop(&mut self) {
        if self.dirty {
            log::warn!(
                "mounted archive {:?} dropped with unsynced writes",
                self.handle.source()
            );
        }
    }
}

/// File-backed ZIP served through short-lived mounts
///
/// Every operation mounts, works and unmounts on the calling thread, under a
/// per-backend lock so mounts of the same file never overlap.
#[derive(Debug)]
pub struct MountedBackend {
    handle: ContainerHandle,
    config: EngineConfig,
    mount_lock: Mutex<()>,
}

impl MountedBackend {
    pub fn new(handle: ContainerHandle, config: EngineConfig) -> Self {
        Self {
            handle,
            config,
            mount_lock: Mutex::new(()),
        }
    }

    fn with_mount<T>(&self, op: impl FnOnce(&mut MountedArchive) -> Result<T>) -> Result<T> {
        let _guard = self
            .mount_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut archive = MountedArchive::mount(self.handle.clone(), self.config.clone())?;
        let value = op(&mut archive)?;
        archive.unmount()?;
        Ok(value)
    }

    /// Reads of a missing file fail the same way the stream backend does
    fn require_file(&self) -> Result<()> {
        if !self.handle.exists() {
            self.handle.open()?;
        }
        Ok(())
    }
}

impl ArchiveBackend for MountedBackend {
    fn list(&self, filter: Option<&Filter>) -> Result<Vec<ContainerEntry>> {
        self.require_file()?;
        self.with_mount(|archive| Ok(archive.list(filter)))
    }

    fn extract_one(&self, path: &str) -> Result<Vec<u8>> {
        self.require_file()?;
        self.with_mount(|archive| archive.read(path))
    }

    fn extract_many(
        &self,
        filter: Option<&Filter>,
        max_entries: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        self.require_file()?;
        let strict = self.config.strict;
        self.with_mount(|archive| {
            let entries = archive.list(filter);
            collect_entries(&entries, filter, max_entries, strict, |entry| {
                archive.read(&entry.path)
            })
        })
    }

    fn add_or_replace(&self, request: &MutationRequest) -> Result<MutationOutcome> {
        self.with_mount(|archive| archive.write(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutate::CompressionPolicy;
    use crate::writer::ZipWriter;
    use std::fs::File;

    fn seed(path: &std::path::Path) {
        let mut writer = ZipWriter::new(File::create(path).unwrap(), 6);
        writer.write_deflated("a.txt", b"alpha").unwrap();
        writer.write_stored("b.jpg", b"\xff\xd8\xffjpeg").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn writes_are_buffered_until_unmount() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");
        seed(&path);
        let before = std::fs::read(&path).unwrap();

        let handle = ContainerHandle::from_path(&path);
        let mut archive = MountedArchive::mount(handle.clone(), EngineConfig::default()).unwrap();
        assert_eq!(
            archive.write(&MutationRequest::new("a.txt", b"ALPHA".to_vec())).unwrap(),
            MutationOutcome::Replaced
        );
        assert_eq!(
            archive.write(&MutationRequest::new("c.txt", b"gamma".to_vec())).unwrap(),
            MutationOutcome::Added
        );
        assert!(archive.is_dirty());
        assert_eq!(archive.read("a.txt").unwrap(), b"ALPHA");
        assert_eq!(std::fs::read(&path).unwrap(), before);

        archive.unmount().unwrap();

        let mut remounted = MountedArchive::mount(handle, EngineConfig::default()).unwrap();
        let names: Vec<_> = remounted.entries().into_iter().map(|e| e.path).collect();
        assert_eq!(names, ["a.txt", "b.jpg", "c.txt"]);
        assert_eq!(remounted.read("a.txt").unwrap(), b"ALPHA");
        assert_eq!(remounted.read("b.jpg").unwrap(), b"\xff\xd8\xffjpeg");
        assert!(!remounted.is_dirty());
    }

    #[test]
    fn pending_entries_describe_new_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");
        seed(&path);

        let mut archive =
            MountedArchive::mount(ContainerHandle::from_path(&path), EngineConfig::default())
                .unwrap();
        let content = b"sixteen bytes!!!".to_vec();
        archive
            .write(&MutationRequest::new("a.txt", content.clone()).with_policy(CompressionPolicy::Store))
            .unwrap();
        archive
            .write(&MutationRequest::new("c.txt", b"gamma".to_vec()))
            .unwrap();

        for entry in archive.entries() {
            let data = archive.read(&entry.path).unwrap();
            assert_eq!(entry.declared_size, data.len() as u64, "{}", entry.path);
            assert_eq!(entry.crc32, crc32fast::hash(&data), "{}", entry.path);
        }
        let replaced = &archive.entries()[0];
        assert_eq!(replaced.compression_method, CompressionMethod::Stored);
        assert_eq!(replaced.compressed_size, content.len() as u64);
        archive.unmount().unwrap();
    }

    #[test]
    fn list_filters_pending_and_loaded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");
        seed(&path);

        let mut archive =
            MountedArchive::mount(ContainerHandle::from_path(&path), EngineConfig::default())
                .unwrap();
        archive
            .write(&MutationRequest::new("c.txt", b"gamma".to_vec()))
            .unwrap();
        let text: &Filter = &|name: &str| name.ends_with(".txt");
        let names: Vec<_> = archive.list(Some(text)).into_iter().map(|e| e.path).collect();
        assert_eq!(names, ["a.txt", "c.txt"]);
        archive.unmount().unwrap();
    }

    #[test]
    fn missing_file_mounts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.epub");
        let mut archive =
            MountedArchive::mount(ContainerHandle::from_path(&path), EngineConfig::default())
                .unwrap();
        assert!(archive.entries().is_empty());
        archive
            .write(&MutationRequest::new("mimetype", b"application/epub+zip".to_vec()))
            .unwrap();
        archive.unmount().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unmount_on_foreign_thread_panics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");
        seed(&path);

        let archive =
            MountedArchive::mount(ContainerHandle::from_path(&path), EngineConfig::default())
                .unwrap();
        let joined = thread::spawn(move || archive.unmount()).join();
        assert!(joined.is_err());
    }
}
