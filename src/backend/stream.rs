use super::ArchiveBackend;
use crate::config::EngineConfig;
use crate::entry::{ContainerEntry, Filter};
use crate::error::Result;
use crate::extract;
use crate::handle::ContainerHandle;
use crate::index;
use crate::mutate::{self, MutationOutcome, MutationRequest};
use std::sync::{Mutex, PoisonError};

/// Plain ZIP over a file or an in-memory buffer, full read/write
///
/// Reads open a fresh reader per call, so concurrent readers never share
/// state. Writes are serialized per backend so two rewrites of the same
/// container cannot interleave.
#[derive(Debug)]
pub struct StreamBackend {
    handle: ContainerHandle,
    config: EngineConfig,
    write_lock: Mutex<()>,
}

impl StreamBackend {
    pub fn new(handle: ContainerHandle, config: EngineConfig) -> Self {
        Self {
            handle,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }
}

impl ArchiveBackend for StreamBackend {
    fn list(&self, filter: Option<&Filter>) -> Result<Vec<ContainerEntry>> {
        index::scan(&self.handle, &self.config.charsets, filter)
    }

    fn extract_one(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = index::open_reader(&self.handle, &self.config.charsets)?;
        extract::extract_one(&mut reader, path)
    }

    fn extract_many(
        &self,
        filter: Option<&Filter>,
        max_entries: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let mut reader = index::open_reader(&self.handle, &self.config.charsets)?;
        extract::extract_many(&mut reader, filter, max_entries, self.config.strict)
    }

    fn add_or_replace(&self, request: &MutationRequest) -> Result<MutationOutcome> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        mutate::add_or_replace(&self.handle, request, &self.config)
    }
}
