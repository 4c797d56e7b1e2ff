//! Deferred loading of single entries
//!
//! A [`LazyResource`] remembers where its bytes live and extracts them on first
//! use. The cache is owned by the resource and dropped explicitly with
//! [`LazyResource::dispose`]; the next access extracts again from the same
//! backend, never from anywhere else.

use crate::backend::ArchiveBackend;
use crate::error::Result;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Load state of a [`LazyResource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Unloaded,
    Loaded,
}

/// One entry's bytes, loaded on first access and cached until disposed
pub struct LazyResource {
    reference: String,
    path: String,
    /// `None` for resources built from resident bytes
    backing: Option<Arc<dyn ArchiveBackend>>,
    cache: Mutex<Option<Arc<[u8]>>>,
}

impl LazyResource {
    /// A resource for the entry at `path`, extracted through `backend` when needed
    pub fn new(
        reference: impl Into<String>,
        path: impl Into<String>,
        backend: Arc<dyn ArchiveBackend>,
    ) -> Self {
        Self {
            reference: reference.into(),
            path: path.into(),
            backing: Some(backend),
            cache: Mutex::new(None),
        }
    }

    /// A resource over bytes that are already in memory
    pub fn from_bytes(reference: impl Into<String>, bytes: Vec<u8>) -> Self {
        let reference = reference.into();
        Self {
            path: reference.clone(),
            reference,
            backing: None,
            cache: Mutex::new(Some(bytes.into())),
        }
    }

    /// The name the owner declared for this resource (e.g. a manifest href)
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Entry path inside the backing container
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> ResourceState {
        match *self.lock() {
            Some(_) => ResourceState::Loaded,
            None => ResourceState::Unloaded,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<[u8]>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The entry's bytes, extracting them if not loaded yet
    ///
    /// Concurrent first calls on the same resource wait for a single
    /// extraction. A failed extraction leaves the resource unloaded, so the
    /// call can be retried.
    pub fn get_bytes(&self) -> Result<Arc<[u8]>> {
        let mut cache = self.lock();
        if let Some(bytes) = cache.as_ref() {
            return Ok(Arc::clone(bytes));
        }

        let bytes: Arc<[u8]> = match &self.backing {
            Some(backend) => backend.extract_one(&self.path)?.into(),
            // resident resources are never unloaded
            None => Arc::from(Vec::new()),
        };
        *cache = Some(Arc::clone(&bytes));
        Ok(bytes)
    }

    /// A restartable reader over the entry's bytes
    ///
    /// Nothing is extracted until the first read or seek.
    pub fn get_stream(&self) -> LazyStream<'_> {
        LazyStream {
            resource: self,
            data: None,
            position: 0,
        }
    }

    /// Drop the cached bytes; resident resources ignore this
    pub fn dispose(&self) {
        if self.backing.is_some() {
            *self.lock() = None;
        }
    }
}

impl std::fmt::Debug for LazyResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyResource")
            .field("reference", &self.reference)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Reader returned by [`LazyResource::get_stream`]
pub struct LazyStream<'a> {
    resource: &'a LazyResource,
    data: Option<Arc<[u8]>>,
    position: u64,
}

impl LazyStream<'_> {
    fn data(&mut self) -> io::Result<&[u8]> {
        if self.data.is_none() {
            let bytes = self
                .resource
                .get_bytes()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            self.data = Some(bytes);
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }

    /// Back to the start of the cached bytes, without extracting again
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

impl Read for LazyStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.position;
        let data = self.data()?;
        let start = usize::try_from(position).map_or(data.len(), |p| p.min(data.len()));
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for LazyStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data()?.len() as u64;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of resource",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ContainerEntry, Filter};
    use crate::error::ArchiveError;
    use crate::mutate::{MutationOutcome, MutationRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    /// Serves one entry and counts extractions
    struct CountingBackend {
        extractions: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl CountingBackend {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                extractions: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            })
        }

        fn extractions(&self) -> usize {
            self.extractions.load(Ordering::SeqCst)
        }
    }

    impl ArchiveBackend for CountingBackend {
        fn list(&self, _filter: Option<&Filter>) -> Result<Vec<ContainerEntry>> {
            Ok(Vec::new())
        }

        fn extract_one(&self, path: &str) -> Result<Vec<u8>> {
            self.extractions.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ArchiveError::corrupt("injected failure"));
            }
            // widen the race window for concurrent first access
            thread::sleep(std::time::Duration::from_millis(20));
            Ok(format!("bytes of {}", path).into_bytes())
        }

        fn extract_many(
            &self,
            _filter: Option<&Filter>,
            _max_entries: Option<usize>,
        ) -> Result<Vec<(String, Vec<u8>)>> {
            Ok(Vec::new())
        }

        fn add_or_replace(&self, _request: &MutationRequest) -> Result<MutationOutcome> {
            Err(ArchiveError::UnsupportedOperation("read-only".into()))
        }
    }

    #[test]
    fn extracts_once_until_disposed() {
        let backend = CountingBackend::new(0);
        let resource = LazyResource::new("ch1.xhtml", "OEBPS/ch1.xhtml", backend.clone());
        assert_eq!(resource.state(), ResourceState::Unloaded);
        assert_eq!(backend.extractions(), 0);

        let first = resource.get_bytes().unwrap();
        let second = resource.get_bytes().unwrap();
        assert_eq!(&*first, b"bytes of OEBPS/ch1.xhtml");
        assert_eq!(first, second);
        assert_eq!(backend.extractions(), 1);
        assert_eq!(resource.state(), ResourceState::Loaded);

        resource.dispose();
        assert_eq!(resource.state(), ResourceState::Unloaded);
        resource.get_bytes().unwrap();
        assert_eq!(backend.extractions(), 2);
    }

    #[test]
    fn concurrent_first_access_extracts_once() {
        let backend = CountingBackend::new(0);
        let resource = LazyResource::new("p1", "pages/001.jpg", backend.clone());
        let barrier = Barrier::new(8);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    assert_eq!(&*resource.get_bytes().unwrap(), b"bytes of pages/001.jpg");
                });
            }
        });
        assert_eq!(backend.extractions(), 1);
    }

    #[test]
    fn failed_load_can_be_retried() {
        let backend = CountingBackend::new(1);
        let resource = LazyResource::new("a", "a.txt", backend.clone());

        assert!(resource.get_bytes().is_err());
        assert_eq!(resource.state(), ResourceState::Unloaded);
        assert_eq!(&*resource.get_bytes().unwrap(), b"bytes of a.txt");
        assert_eq!(backend.extractions(), 2);
    }

    #[test]
    fn resident_bytes_survive_dispose() {
        let resource = LazyResource::from_bytes("cover.jpg", b"jpeg".to_vec());
        resource.dispose();
        assert_eq!(resource.state(), ResourceState::Loaded);
        assert_eq!(&*resource.get_bytes().unwrap(), b"jpeg");
    }

    #[test]
    fn stream_rewinds_without_reloading() {
        let backend = CountingBackend::new(0);
        let resource = LazyResource::new("c", "c.txt", backend.clone());
        let mut stream = resource.get_stream();
        assert_eq!(backend.extractions(), 0);

        let mut first = String::new();
        stream.read_to_string(&mut first).unwrap();
        stream.reset();
        let mut second = String::new();
        stream.read_to_string(&mut second).unwrap();

        assert_eq!(first, "bytes of c.txt");
        assert_eq!(first, second);
        assert_eq!(backend.extractions(), 1);

        stream.seek(SeekFrom::End(-3)).unwrap();
        let mut tail = String::new();
        stream.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "txt");
    }
}
