//! The caller-facing container API
//!
//! A [`Container`] wraps whichever backend the factory picked and exposes the
//! same operations for every archive technology.

use crate::backend::{open_backend, ArchiveBackend};
use crate::config::EngineConfig;
use crate::entry::{ContainerEntry, Filter};
use crate::error::Result;
use crate::handle::ContainerHandle;
use crate::lazy::LazyResource;
use crate::mutate::{CompressionPolicy, MutationOutcome, MutationRequest};
use crate::names::{CharsetRegistry, NameReconciler};
use std::sync::Arc;

/// An opened container
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct Container {
    backend: Arc<dyn ArchiveBackend>,
    charsets: CharsetRegistry,
}

impl Container {
    /// Detect the format behind `handle` and open the matching backend
    pub fn open(handle: ContainerHandle, config: EngineConfig) -> Result<Self> {
        let charsets = config.charsets.clone();
        Ok(Self {
            backend: open_backend(handle, config)?,
            charsets,
        })
    }

    /// Wrap a backend built elsewhere
    pub fn from_backend(backend: Arc<dyn ArchiveBackend>, charsets: CharsetRegistry) -> Self {
        Self { backend, charsets }
    }

    pub fn backend(&self) -> &Arc<dyn ArchiveBackend> {
        &self.backend
    }

    /// Entry names accepted by `filter`, in physical order
    pub fn list_entries(&self, filter: Option<&Filter>) -> Result<Vec<String>> {
        Ok(self
            .entries(filter)?
            .into_iter()
            .map(|entry| entry.path)
            .collect())
    }

    /// Full entry metadata accepted by `filter`, in physical order
    pub fn entries(&self, filter: Option<&Filter>) -> Result<Vec<ContainerEntry>> {
        self.backend.list(filter)
    }

    pub fn extract(&self, name: &str) -> Result<Vec<u8>> {
        self.backend.extract_one(name)
    }

    pub fn extract_all(
        &self,
        filter: Option<&Filter>,
        max_entries: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        self.backend.extract_many(filter, max_entries)
    }

    pub fn add_or_replace(
        &self,
        name: &str,
        bytes: impl Into<Vec<u8>>,
        policy: CompressionPolicy,
    ) -> Result<MutationOutcome> {
        let request = MutationRequest::new(name, bytes).with_policy(policy);
        self.backend.add_or_replace(&request)
    }

    /// A resource that extracts `name` on first access
    pub fn open_lazy_resource(&self, name: &str) -> LazyResource {
        LazyResource::new(name, name, Arc::clone(&self.backend))
    }

    /// Entry path a declared reference (e.g. a manifest href) points at
    ///
    /// Entry names written in a legacy charset are matched by trying every
    /// charset of the registry in order; the first match wins.
    pub fn resolve_reference(&self, reference: &str) -> Result<String> {
        let entries = self.backend.list(None)?;
        let entry = NameReconciler::new(&self.charsets).resolve(reference, &entries)?;
        Ok(entry.path.clone())
    }

    /// Every entry path `reference` could point at, in resolution order
    pub fn reference_candidates(&self, reference: &str) -> Result<Vec<String>> {
        let entries = self.backend.list(None)?;
        Ok(NameReconciler::new(&self.charsets)
            .candidates(reference, &entries)
            .into_iter()
            .map(|entry| entry.path.clone())
            .collect())
    }

    pub fn extract_reference(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self.resolve_reference(reference)?;
        self.backend.extract_one(&path)
    }

    /// A lazy resource for a declared reference, resolved now and loaded later
    pub fn open_lazy_reference(&self, reference: &str) -> Result<LazyResource> {
        let path = self.resolve_reference(reference)?;
        Ok(LazyResource::new(reference, path, Arc::clone(&self.backend)))
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("charsets", &self.charsets)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArchiveError;
    use crate::writer::ZipWriter;
    use std::io::Cursor;

    fn legacy_epub() -> Container {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()), 6);
        writer.write_stored("mimetype", b"application/epub+zip").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let container =
            Container::open(ContainerHandle::from_bytes(bytes), EngineConfig::default()).unwrap();
        container
            .add_or_replace("OEBPS/Text/chapter one.xhtml", b"<p/>".to_vec(), CompressionPolicy::Auto)
            .unwrap();
        container
    }

    #[test]
    fn percent_encoded_reference_resolves() {
        let container = legacy_epub();
        assert_eq!(
            container.resolve_reference("OEBPS/Text/chapter%20one.xhtml").unwrap(),
            "OEBPS/Text/chapter one.xhtml"
        );
        assert_eq!(
            container.extract_reference("OEBPS/Text/chapter%20one.xhtml").unwrap(),
            b"<p/>"
        );
    }

    #[test]
    fn unknown_reference_is_ambiguous_not_missing() {
        let container = legacy_epub();
        let err = container.resolve_reference("OEBPS/missing.xhtml").unwrap_err();
        assert!(matches!(err, ArchiveError::EncodingAmbiguous { .. }));
        assert!(container.reference_candidates("OEBPS/missing.xhtml").unwrap().is_empty());
    }

    #[test]
    fn lazy_reference_loads_resolved_path() {
        let container = legacy_epub();
        let resource = container
            .open_lazy_reference("OEBPS/Text/chapter%20one.xhtml")
            .unwrap();
        assert_eq!(resource.reference(), "OEBPS/Text/chapter%20one.xhtml");
        assert_eq!(resource.path(), "OEBPS/Text/chapter one.xhtml");
        assert_eq!(&*resource.get_bytes().unwrap(), b"<p/>");
    }
}
