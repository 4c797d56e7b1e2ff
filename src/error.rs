//! Error types for libris-archive

use std::io;

/// Result type for container operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while listing, extracting or rewriting a container
#[derive(Debug)]
pub enum ArchiveError {
    /// I/O error from the underlying byte source or filesystem
    Io(io::Error),
    /// Malformed container structure or CRC/length mismatch
    Corrupt(String),
    /// Entry not present in the container
    NotFound(String),
    /// Operation not supported by this backend (e.g. writing a solid archive)
    UnsupportedOperation(String),
    /// Entry uses a compression method other than STORE or DEFLATE
    UnsupportedCompression(u16),
    /// Entry payload is encrypted
    Encrypted(String),
    /// A declared reference could not be matched to exactly one entry
    EncodingAmbiguous {
        reference: String,
        candidates: Vec<String>,
    },
}

/// Coarse error taxonomy shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Corrupt,
    IoFailure,
    UnsupportedOperation,
    EncodingAmbiguous,
}

impl ArchiveError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        ArchiveError::Corrupt(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Io(_) => ErrorKind::IoFailure,
            ArchiveError::Corrupt(_) | ArchiveError::UnsupportedCompression(_) => {
                ErrorKind::Corrupt
            }
            ArchiveError::NotFound(_) => ErrorKind::NotFound,
            ArchiveError::UnsupportedOperation(_) | ArchiveError::Encrypted(_) => {
                ErrorKind::UnsupportedOperation
            }
            ArchiveError::EncodingAmbiguous { .. } => ErrorKind::EncodingAmbiguous,
        }
    }

    /// Whether a bulk scan may skip the offending entry and keep going
    ///
    /// True for failures confined to one entry's payload. I/O failures and
    /// everything else concern the container as a whole.
    pub(crate) fn is_entry_local(&self) -> bool {
        matches!(
            self,
            ArchiveError::Corrupt(_)
                | ArchiveError::UnsupportedCompression(_)
                | ArchiveError::Encrypted(_)
        )
    }
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Io(e) => write!(f, "I/O error: {}", e),
            ArchiveError::Corrupt(msg) => write!(f, "Corrupt container: {}", msg),
            ArchiveError::NotFound(name) => write!(f, "Entry not found: {}", name),
            ArchiveError::UnsupportedOperation(msg) => {
                write!(f, "Unsupported operation: {}", msg)
            }
            ArchiveError::UnsupportedCompression(method) => {
                write!(f, "Unsupported compression method: {}", method)
            }
            ArchiveError::Encrypted(name) => write!(f, "Entry is encrypted: {}", name),
            ArchiveError::EncodingAmbiguous {
                reference,
                candidates,
            } => {
                if candidates.is_empty() {
                    write!(f, "No entry matches reference {:?} under any charset", reference)
                } else {
                    write!(
                        f,
                        "Reference {:?} matches several entries: {}",
                        reference,
                        candidates.join(", ")
                    )
                }
            }
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io(err)
    }
}
