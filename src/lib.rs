//! # libris-archive: Archive-Backed Container Engine
//!
//! `libris-archive` lists, extracts, lazily loads and rewrites the ZIP-family
//! containers behind ebook and comic libraries: EPUB and CBZ read/write, CBR
//! (RAR) read-only.
//!
//! ## Features
//!
//! - **One interface, several backends**: stream ZIP, mounted ZIP and solid
//!   RAR archives all answer the same four operations
//! - **Safe rewrites**: add-or-replace streams the container into a temp file and
//!   swaps it in atomically; unaffected entries are copied byte for byte
//! - **Legacy names**: entry names written in non-UTF-8 charsets are matched
//!   against manifest references by brute force over a fixed charset registry
//! - **Lazy resources**: entry bytes are extracted on first use and can be
//!   dropped and reloaded explicitly
//!
//! ## Quick Start
//!
//! ### Reading a container
//!
//! ```no_run
//! use libris_archive::{Container, ContainerHandle, EngineConfig};
//!
//! let book = Container::open(ContainerHandle::from_path("book.epub"), EngineConfig::default())?;
//!
//! for name in book.list_entries(None)? {
//!     println!("{}", name);
//! }
//!
//! // A manifest href, percent-encoded and possibly in another charset
//! let chapter = book.extract_reference("OEBPS/Text/caf%C3%A9.xhtml")?;
//! # Ok::<(), libris_archive::ArchiveError>(())
//! ```
//!
//! ### Adding or replacing an entry
//!
//! ```no_run
//! use libris_archive::{CompressionPolicy, Container, ContainerHandle, EngineConfig};
//!
//! let comic = Container::open(ContainerHandle::from_path("comic.cbz"), EngineConfig::default())?;
//! comic.add_or_replace("ComicInfo.xml", b"<ComicInfo/>".to_vec(), CompressionPolicy::Auto)?;
//! # Ok::<(), libris_archive::ArchiveError>(())
//! ```
//!
//! ### Loading pages lazily
//!
//! ```no_run
//! use libris_archive::{Container, ContainerHandle, EngineConfig};
//!
//! let comic = Container::open(ContainerHandle::from_path("comic.cbr"), EngineConfig::default())?;
//! let page = comic.open_lazy_resource("pages/001.jpg");
//!
//! let bytes = page.get_bytes()?; // extracted here
//! let again = page.get_bytes()?; // served from cache
//! page.dispose(); // next access extracts again
//! # Ok::<(), libris_archive::ArchiveError>(())
//! ```

pub mod backend;
pub mod config;
pub mod container;
pub mod entry;
pub mod error;
pub mod extract;
pub mod fs;
pub mod handle;
pub mod index;
pub mod lazy;
pub mod mutate;
pub mod names;
pub mod pool;
pub mod reader;
pub mod writer;

pub use backend::{detect_format, open_backend, ArchiveBackend, ArchiveFormat, MountedArchive};
pub use config::EngineConfig;
pub use container::Container;
pub use entry::{CompressionMethod, ContainerEntry, Filter};
pub use error::{ArchiveError, ErrorKind, Result};
pub use fs::{FileSystem, LocalFileSystem};
pub use handle::{ContainerHandle, ContainerSource, SharedBuffer};
pub use lazy::{LazyResource, LazyStream, ResourceState};
pub use mutate::{CompressionPolicy, MutationOutcome, MutationRequest};
pub use names::{CharsetRegistry, NameReconciler};
pub use pool::{PoolConfig, WorkerPool};
pub use reader::ZipReader;
pub use writer::ZipWriter;
