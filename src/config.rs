//! Engine configuration

use crate::names::CharsetRegistry;

/// Tunables shared by every backend opened through the factory
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Containers larger than this get STORE under the automatic policy (default: 64 MiB)
    pub store_threshold: u64,
    /// DEFLATE level 0-9 (default: 6)
    pub compression_level: u32,
    /// Abort bulk extraction on the first corrupt entry instead of skipping it
    pub strict: bool,
    /// Hand out the mounted backend for file-backed ZIP containers
    pub mount_file_archives: bool,
    /// Charsets tried, in order, when reconciling entry names
    pub charsets: CharsetRegistry,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_threshold: 64 * 1024 * 1024,
            compression_level: 6,
            strict: false,
            mount_file_archives: false,
            charsets: CharsetRegistry::default(),
        }
    }
}

impl EngineConfig {
    /// Fail bulk scans on the first bad entry
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Store everything added to containers above 8 MiB
    pub fn append_friendly() -> Self {
        Self {
            store_threshold: 8 * 1024 * 1024,
            ..Self::default()
        }
    }

    pub fn with_store_threshold(mut self, bytes: u64) -> Self {
        self.store_threshold = bytes;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        assert!(level <= 9, "compression_level must be between 0 and 9");
        self.compression_level = level;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_mounted_files(mut self, mounted: bool) -> Self {
        self.mount_file_archives = mounted;
        self
    }

    pub fn with_charsets(mut self, charsets: CharsetRegistry) -> Self {
        self.charsets = charsets;
        self
    }
}
