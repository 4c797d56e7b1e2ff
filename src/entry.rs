//! Entry metadata shared by every backend

/// Predicate over entry names, evaluated while a scan is in progress
pub type Filter = dyn Fn(&str) -> bool + Sync;

/// Compression method of a container entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression (method 0)
    Stored,
    /// DEFLATE compression (method 8)
    Deflate,
    /// Anything else; listed but never extracted
    Other(u16),
}

impl CompressionMethod {
    pub fn from_zip_method(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Other(other),
        }
    }

    pub fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Other(v) => v,
        }
    }
}

/// One entry as seen during a listing or extraction pass
///
/// Values are produced per pass and are not kept in sync with the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    /// Decoded entry name, unique within the container
    pub path: String,
    /// Name bytes exactly as stored in the container
    pub raw_name: Vec<u8>,
    /// Uncompressed length
    pub declared_size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
    pub is_directory: bool,
    pub compression_method: CompressionMethod,
    /// Local header offset (ZIP only)
    pub(crate) header_offset: u64,
    /// General purpose bit flags (ZIP only)
    pub(crate) flags: u16,
    /// DOS time in the low half, DOS date in the high half (ZIP only)
    pub(crate) dos_datetime: u32,
}

impl ContainerEntry {
    pub(crate) fn new(path: String, raw_name: Vec<u8>) -> Self {
        let is_directory = path.ends_with('/');
        Self {
            path,
            raw_name,
            declared_size: 0,
            compressed_size: 0,
            crc32: 0,
            is_directory,
            compression_method: CompressionMethod::Stored,
            header_offset: 0,
            flags: 0,
            dos_datetime: 0,
        }
    }

    pub(crate) fn matches(&self, filter: Option<&Filter>) -> bool {
        filter.map_or(true, |f| f(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_codes() {
        assert_eq!(CompressionMethod::from_zip_method(0), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_zip_method(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::from_zip_method(93).to_zip_method(), 93);
    }

    #[test]
    fn trailing_slash_is_directory() {
        assert!(ContainerEntry::new("OEBPS/".into(), b"OEBPS/".to_vec()).is_directory);
        assert!(!ContainerEntry::new("OEBPS/a.html".into(), vec![]).is_directory);
    }
}
