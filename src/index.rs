//! Container listing

use crate::entry::{ContainerEntry, Filter};
use crate::error::Result;
use crate::fs::ReadSeek;
use crate::handle::ContainerHandle;
use crate::names::CharsetRegistry;
use crate::reader::{read_central_directory, ZipReader};

/// Entries of the container behind `handle` accepted by `filter`, in physical order
pub fn scan(
    handle: &ContainerHandle,
    registry: &CharsetRegistry,
    filter: Option<&Filter>,
) -> Result<Vec<ContainerEntry>> {
    let mut source = handle.open()?;
    read_central_directory(&mut source, handle.charset(), registry, filter)
}

/// Names of the entries accepted by `filter`, in physical order
///
/// Directory entries are included; callers filter them out if they want to.
pub fn list(
    handle: &ContainerHandle,
    registry: &CharsetRegistry,
    filter: Option<&Filter>,
) -> Result<Vec<String>> {
    Ok(scan(handle, registry, filter)?
        .into_iter()
        .map(|entry| entry.path)
        .collect())
}

pub(crate) fn open_reader(
    handle: &ContainerHandle,
    registry: &CharsetRegistry,
) -> Result<ZipReader<Box<dyn ReadSeek>>> {
    ZipReader::new(handle.open()?, handle.charset(), registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ZipWriter;
    use std::io::Cursor;

    #[test]
    fn lists_in_physical_order_with_directories() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()), 6);
        writer.write_stored("mimetype", b"application/epub+zip").unwrap();
        writer.write_stored("OEBPS/", b"").unwrap();
        writer.write_deflated("OEBPS/content.opf", b"<package/>").unwrap();
        let handle = ContainerHandle::from_bytes(writer.finish().unwrap().into_inner());

        let names = list(&handle, &CharsetRegistry::default(), None).unwrap();
        assert_eq!(names, ["mimetype", "OEBPS/", "OEBPS/content.opf"]);

        let files: &Filter = &|name: &str| !name.ends_with('/');
        let names = list(&handle, &CharsetRegistry::default(), Some(files)).unwrap();
        assert_eq!(names, ["mimetype", "OEBPS/content.opf"]);
    }

    #[test]
    fn missing_file_is_io_failure() {
        let handle = ContainerHandle::from_path("/nonexistent/dir/book.epub");
        let err = list(&handle, &CharsetRegistry::default(), None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IoFailure);
    }
}
