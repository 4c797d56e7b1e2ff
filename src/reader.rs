//! ZIP container reader
//!
//! Entry metadata comes from the central directory; payloads are read from the
//! local headers on demand, so opening a container never touches entry data.
//! Entries are reported in physical order (ascending local header offset),
//! which is also the order every scan, extraction and rewrite follows.

use crate::entry::{CompressionMethod, ContainerEntry, Filter};
use crate::error::{ArchiveError, Result};
use crate::names::{decode_entry_name, CharsetRegistry};
use crc32fast::Hasher as Crc32;
use encoding_rs::Encoding;
use flate2::read::DeflateDecoder;
use std::io::{self, Read, Seek, SeekFrom};

/// ZIP local file header signature
pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP central directory signature
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// ZIP64 end of central directory record signature
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;

/// EOCD (22 bytes) plus the longest possible archive comment
const EOCD_SEARCH_WINDOW: u64 = 65557;

pub(crate) const FLAG_ENCRYPTED: u16 = 0x0001;
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub(crate) const FLAG_UTF8: u16 = 0x0800;

/// Cap on up-front allocation driven by a declared size
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Random-access reader over one ZIP container
pub struct ZipReader<R> {
    source: R,
    entries: Vec<ContainerEntry>,
}

impl<R: Read + Seek> ZipReader<R> {
    /// Read the central directory of `source`
    ///
    /// A zero-length source is an empty container.
    pub fn new(
        mut source: R,
        charset: Option<&'static Encoding>,
        registry: &CharsetRegistry,
    ) -> Result<Self> {
        let entries = read_central_directory(&mut source, charset, registry, None)?;
        Ok(ZipReader { source, entries })
    }

    /// All entries in physical order
    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    /// First entry with exactly this path
    pub fn find_entry(&self, path: &str) -> Option<&ContainerEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Raw (still compressed) payload of an entry, bounded by its compressed size
    pub fn open_raw(&mut self, entry: &ContainerEntry) -> Result<io::Take<&mut R>> {
        self.seek_to_payload(entry)?;
        Ok((&mut self.source).take(entry.compressed_size))
    }

    /// Streaming, decompressing reader for one entry
    ///
    /// The stream fails with `InvalidData` at end of input if the length or
    /// CRC32 of the produced bytes does not match the directory record.
    pub fn open_entry(&mut self, entry: &ContainerEntry) -> Result<Box<dyn Read + '_>> {
        if entry.flags & FLAG_ENCRYPTED != 0 {
            return Err(ArchiveError::Encrypted(entry.path.clone()));
        }
        let method = entry.compression_method;
        if let CompressionMethod::Other(code) = method {
            return Err(ArchiveError::UnsupportedCompression(code));
        }

        self.seek_to_payload(entry)?;
        let limited = (&mut self.source).take(entry.compressed_size);

        let payload: Box<dyn Read + '_> = match method {
            CompressionMethod::Deflate => Box::new(DeflateDecoder::new(limited)),
            _ => Box::new(limited),
        };
        Ok(Box::new(CheckedReader::new(
            payload,
            entry.declared_size,
            entry.crc32,
        )))
    }

    /// Decompressed, CRC-verified bytes of an entry
    pub fn read_entry(&mut self, entry: &ContainerEntry) -> Result<Vec<u8>> {
        let capacity = entry.declared_size.min(MAX_PREALLOC) as usize;
        let mut reader = self.open_entry(entry)?;
        let mut data = Vec::with_capacity(capacity);
        reader.read_to_end(&mut data).map_err(payload_error)?;
        Ok(data)
    }

    fn seek_to_payload(&mut self, entry: &ContainerEntry) -> Result<()> {
        self.source.seek(SeekFrom::Start(entry.header_offset))?;

        let mut header = [0u8; 30];
        self.source
            .read_exact(&mut header)
            .map_err(|e| structure_error(e, "local file header"))?;
        if le32(&header, 0) != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ArchiveError::corrupt(format!(
                "invalid local file header signature for {}",
                entry.path
            )));
        }

        let filename_len = le16(&header, 26) as i64;
        let extra_len = le16(&header, 28) as i64;
        self.source
            .seek(SeekFrom::Current(filename_len + extra_len))?;
        Ok(())
    }
}

/// Scan the central directory, keeping only entries accepted by `filter`
///
/// The filter runs against each record as it is parsed.
pub(crate) fn read_central_directory<R: Read + Seek>(
    source: &mut R,
    charset: Option<&'static Encoding>,
    registry: &CharsetRegistry,
    filter: Option<&Filter>,
) -> Result<Vec<ContainerEntry>> {
    let file_size = source.seek(SeekFrom::End(0))?;
    if file_size == 0 {
        return Ok(Vec::new());
    }

    let eocd_offset = find_eocd(source, file_size)?;
    source.seek(SeekFrom::Start(eocd_offset))?;

    let mut eocd = [0u8; 22];
    source
        .read_exact(&mut eocd)
        .map_err(|e| structure_error(e, "end of central directory"))?;

    // These values may be placeholder 0xFFFF/0xFFFFFFFF when ZIP64 is used
    let total_entries_16 = le16(&eocd, 10);
    let cd_size_32 = le32(&eocd, 12);
    let cd_offset_32 = le32(&eocd, 16);

    let mut total_entries = total_entries_16 as u64;
    let mut cd_offset = cd_offset_32 as u64;

    if total_entries_16 == 0xFFFF || cd_size_32 == 0xFFFFFFFF || cd_offset_32 == 0xFFFFFFFF {
        let (zip64_total_entries, zip64_cd_offset) = read_zip64_eocd(source, eocd_offset)?;
        total_entries = zip64_total_entries;
        cd_offset = zip64_cd_offset;
    }

    if cd_offset > eocd_offset {
        return Err(ArchiveError::corrupt(format!(
            "central directory offset {} lies past the end record at {}",
            cd_offset, eocd_offset
        )));
    }

    source.seek(SeekFrom::Start(cd_offset))?;

    let mut entries = Vec::new();
    for index in 0..total_entries {
        let mut record = [0u8; 46];
        source
            .read_exact(&mut record)
            .map_err(|e| structure_error(e, "central directory record"))?;
        if le32(&record, 0) != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(ArchiveError::corrupt(format!(
                "invalid central directory signature at record {}",
                index
            )));
        }

        let flags = le16(&record, 8);
        let compression_method = le16(&record, 10);
        let dos_datetime = le32(&record, 12);
        let crc32 = le32(&record, 16);
        let compressed_size_32 = le32(&record, 20);
        let uncompressed_size_32 = le32(&record, 24);
        let filename_len = le16(&record, 28) as usize;
        let extra_len = le16(&record, 30) as usize;
        let comment_len = le16(&record, 32) as i64;
        let offset_32 = le32(&record, 42);

        let mut raw_name = vec![0u8; filename_len];
        source
            .read_exact(&mut raw_name)
            .map_err(|e| structure_error(e, "entry name"))?;

        let mut extra = vec![0u8; extra_len];
        source
            .read_exact(&mut extra)
            .map_err(|e| structure_error(e, "extra field"))?;

        if comment_len > 0 {
            source.seek(SeekFrom::Current(comment_len))?;
        }

        let path = decode_entry_name(&raw_name, flags & FLAG_UTF8 != 0, charset, registry);
        let mut entry = ContainerEntry::new(path, raw_name);
        if !entry.matches(filter) {
            continue;
        }

        let (uncompressed_size, compressed_size, offset) = apply_zip64_extra(
            &extra,
            uncompressed_size_32,
            compressed_size_32,
            offset_32,
        );

        entry.declared_size = uncompressed_size;
        entry.compressed_size = compressed_size;
        entry.crc32 = crc32;
        entry.compression_method = CompressionMethod::from_zip_method(compression_method);
        entry.header_offset = offset;
        entry.flags = flags;
        entry.dos_datetime = dos_datetime;
        entries.push(entry);
    }

    entries.sort_by_key(|e| e.header_offset);
    Ok(entries)
}

/// Resolve 0xFFFFFFFF placeholders through the ZIP64 extended information
/// extra field (0x0001), which lists only the values that overflowed, in the
/// order: uncompressed size, compressed size, header offset.
fn apply_zip64_extra(extra: &[u8], uncompressed: u32, compressed: u32, offset: u32) -> (u64, u64, u64) {
    let mut uncompressed_size = uncompressed as u64;
    let mut compressed_size = compressed as u64;
    let mut header_offset = offset as u64;

    if uncompressed != 0xFFFFFFFF && compressed != 0xFFFFFFFF && offset != 0xFFFFFFFF {
        return (uncompressed_size, compressed_size, header_offset);
    }

    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let id = le16(extra, i);
        let data_len = le16(extra, i + 2) as usize;
        i += 4;
        if i + data_len > extra.len() {
            break;
        }
        if id == 0x0001 {
            let field = &extra[i..i + data_len];
            let mut cursor = 0usize;
            if uncompressed == 0xFFFFFFFF && cursor + 8 <= field.len() {
                uncompressed_size = le64(field, cursor);
                cursor += 8;
            }
            if compressed == 0xFFFFFFFF && cursor + 8 <= field.len() {
                compressed_size = le64(field, cursor);
                cursor += 8;
            }
            if offset == 0xFFFFFFFF && cursor + 8 <= field.len() {
                header_offset = le64(field, cursor);
            }
            break;
        }
        i += data_len;
    }

    (uncompressed_size, compressed_size, header_offset)
}

/// When the EOCD indicates ZIP64 usage, find and read the ZIP64 EOCD locator
/// and record. Returns (total entries, central directory offset).
fn read_zip64_eocd<R: Read + Seek>(source: &mut R, eocd_offset: u64) -> Result<(u64, u64)> {
    let search_start = eocd_offset.saturating_sub(EOCD_SEARCH_WINDOW);
    source.seek(SeekFrom::Start(search_start))?;
    let mut buffer = vec![0u8; (eocd_offset - search_start) as usize];
    source.read_exact(&mut buffer)?;

    let locator_pos = rfind_signature(&buffer, [0x50, 0x4b, 0x06, 0x07])
        .filter(|pos| pos + 20 <= buffer.len())
        .ok_or_else(|| ArchiveError::corrupt("ZIP64 EOCD locator not found"))?;

    // locator: signature(4), disk(4), relative offset of the zip64 eocd(8), total disks(4)
    let zip64_eocd_offset = le64(&buffer, locator_pos + 8);

    source.seek(SeekFrom::Start(zip64_eocd_offset))?;
    let mut record = [0u8; 56];
    source
        .read_exact(&mut record)
        .map_err(|e| structure_error(e, "ZIP64 end of central directory"))?;

    let sig = le32(&record, 0);
    if sig != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ArchiveError::corrupt(format!(
            "invalid ZIP64 EOCD signature: 0x{:08x}",
            sig
        )));
    }

    // signature(4) size(8) versions(4) disks(8) entries on disk(8) total entries(8) cd size(8) cd offset(8)
    let total_entries = le64(&record, 32);
    let cd_offset = le64(&record, 48);
    Ok((total_entries, cd_offset))
}

/// Find the end of central directory record by scanning from the end of the source
fn find_eocd<R: Read + Seek>(source: &mut R, file_size: u64) -> Result<u64> {
    let search_start = file_size.saturating_sub(EOCD_SEARCH_WINDOW);
    source.seek(SeekFrom::Start(search_start))?;

    let mut buffer = Vec::new();
    source.read_to_end(&mut buffer)?;

    rfind_signature(&buffer, [0x50, 0x4b, 0x05, 0x06])
        .filter(|pos| pos + 22 <= buffer.len())
        .map(|pos| search_start + pos as u64)
        .ok_or_else(|| ArchiveError::corrupt("end of central directory not found"))
}

fn rfind_signature(buffer: &[u8], signature: [u8; 4]) -> Option<usize> {
    buffer.windows(4).rposition(|w| *w == signature)
}

/// Verifies length and CRC32 of a decompressed stream when it reaches EOF
struct CheckedReader<R> {
    inner: R,
    crc: Crc32,
    produced: u64,
    expected_len: u64,
    expected_crc: u32,
}

impl<R: Read> CheckedReader<R> {
    fn new(inner: R, expected_len: u64, expected_crc: u32) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
            produced: 0,
            expected_len,
            expected_crc,
        }
    }
}

impl<R: Read> Read for CheckedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        self.produced += n as u64;

        if self.produced > self.expected_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "entry longer than its declared size of {} bytes",
                    self.expected_len
                ),
            ));
        }
        if n == 0 && !buf.is_empty() {
            if self.produced != self.expected_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "entry produced {} bytes, expected {}",
                        self.produced, self.expected_len
                    ),
                ));
            }
            let actual = self.crc.clone().finalize();
            if actual != self.expected_crc {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "CRC32 mismatch: expected 0x{:08x}, got 0x{:08x}",
                        self.expected_crc, actual
                    ),
                ));
            }
        }
        Ok(n)
    }
}

/// Classify an error raised while producing entry bytes
pub(crate) fn payload_error(err: io::Error) -> ArchiveError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            ArchiveError::Corrupt(err.to_string())
        }
        _ => ArchiveError::Io(err),
    }
}

fn structure_error(err: io::Error, what: &str) -> ArchiveError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ArchiveError::corrupt(format!("truncated {}", what))
    } else {
        ArchiveError::Io(err)
    }
}

fn le16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ZipWriter;
    use std::io::Cursor;

    fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()), 6);
        for (name, data) in entries {
            writer.write_deflated(name, data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn open(bytes: Vec<u8>) -> ZipReader<Cursor<Vec<u8>>> {
        ZipReader::new(Cursor::new(bytes), None, &CharsetRegistry::default()).unwrap()
    }

    #[test]
    fn empty_source_has_no_entries() {
        let reader = open(Vec::new());
        assert!(reader.entries().is_empty());
    }

    #[test]
    fn reads_back_sizes_and_crc() {
        let mut reader = open(build(&[("a.txt", b"hello"), ("b.txt", b"world!")]));
        let entry = reader.find_entry("b.txt").unwrap().clone();
        assert_eq!(entry.declared_size, 6);
        assert_eq!(entry.crc32, crc32fast::hash(b"world!"));
        assert_eq!(reader.read_entry(&entry).unwrap(), b"world!");
    }

    #[test]
    fn crc_mismatch_is_corrupt() {
        let mut reader = open(build(&[("a.txt", b"hello")]));
        let mut entry = reader.entries()[0].clone();
        entry.crc32 ^= 0xdead_beef;
        let err = reader.read_entry(&entry).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt(_)), "{err}");
    }

    #[test]
    fn missing_end_record_is_corrupt() {
        let err = ZipReader::new(
            Cursor::new(b"definitely not a zip".to_vec()),
            None,
            &CharsetRegistry::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ArchiveError::Corrupt(_)));
    }

    #[test]
    fn truncated_central_directory_is_corrupt() {
        let mut bytes = build(&[("a.txt", b"hello")]);
        // Point the end record's directory offset at the end record itself
        let eocd = bytes.len() - 22;
        bytes[eocd + 16..eocd + 20].copy_from_slice(&(eocd as u32).to_le_bytes());
        let err = ZipReader::new(Cursor::new(bytes), None, &CharsetRegistry::default())
            .err()
            .unwrap();
        assert!(matches!(err, ArchiveError::Corrupt(_)));
    }

    #[test]
    fn filter_applies_during_scan() {
        let bytes = build(&[("a.txt", b"1"), ("b.jpg", b"2"), ("c.txt", b"3")]);
        let only_txt: &Filter = &|name: &str| name.ends_with(".txt");
        let entries = read_central_directory(
            &mut Cursor::new(bytes),
            None,
            &CharsetRegistry::default(),
            Some(only_txt),
        )
        .unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, ["a.txt", "c.txt"]);
    }

    #[test]
    fn zip64_extra_overrides_placeholders() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&0x0001u16.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&5_000_000_000u64.to_le_bytes());
        extra.extend_from_slice(&77u64.to_le_bytes());
        let (uncompressed, compressed, offset) = apply_zip64_extra(&extra, 0xFFFFFFFF, 10, 0xFFFFFFFF);
        assert_eq!(uncompressed, 5_000_000_000);
        assert_eq!(compressed, 10);
        assert_eq!(offset, 77);
    }
}
