//! ZIP container writer
//!
//! Three ways to emit an entry:
//! - streamed DEFLATE (`start_entry` + `write_data`), sizes and CRC follow the
//!   payload in a data descriptor
//! - STORE (`write_stored`), CRC and size computed before the local header is
//!   written, so the header carries the real values and no descriptor
//! - verbatim copy (`copy_raw_from`) of an entry read from another container,
//!   keeping its name bytes, flags, timestamp and compressed payload

use crate::entry::{CompressionMethod, ContainerEntry};
use crate::error::{ArchiveError, Result};
use crate::reader::{FLAG_DATA_DESCRIPTOR, FLAG_UTF8};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Seek, Write};

/// 1980-01-01 00:00:00 in MS-DOS format (time in the low half, date in the high half)
const DOS_EPOCH: u32 = 0x0021_0000;

/// Flush compressed output to the container once this much is buffered
const FLUSH_THRESHOLD: usize = 2 * 1024 * 1024;

/// Entry already written, remembered for the central directory
struct WrittenEntry {
    raw_name: Vec<u8>,
    flags: u16,
    compression_method: u16,
    dos_datetime: u32,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
}

impl WrittenEntry {
    fn needs_zip64(&self) -> bool {
        self.uncompressed_size > u32::MAX as u64
            || self.compressed_size > u32::MAX as u64
            || self.local_header_offset > u32::MAX as u64
    }
}

/// Entry being streamed through the DEFLATE encoder
struct CurrentEntry {
    raw_name: Vec<u8>,
    flags: u16,
    local_header_offset: u64,
    encoder: DeflateEncoder<Vec<u8>>,
    counter: CrcCounter,
}

/// Metadata tracker for CRC and byte counts
struct CrcCounter {
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl CrcCounter {
    fn new() -> Self {
        Self {
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }

    fn update_uncompressed(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.uncompressed_count += data.len() as u64;
    }

    fn add_compressed(&mut self, count: u64) {
        self.compressed_count += count;
    }

    fn finalize(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

/// Writes a ZIP container to any `Write + Seek` sink
pub struct ZipWriter<W: Write + Seek> {
    output: W,
    entries: Vec<WrittenEntry>,
    current_entry: Option<CurrentEntry>,
    compression_level: u32,
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Create a writer using DEFLATE `compression_level` (0-9) for streamed entries
    pub fn new(output: W, compression_level: u32) -> Self {
        Self {
            output,
            entries: Vec::new(),
            current_entry: None,
            compression_level,
        }
    }

    /// Number of entries written so far (including one still being streamed)
    pub fn entry_count(&self) -> usize {
        self.entries.len() + usize::from(self.current_entry.is_some())
    }

    /// Start a new DEFLATE entry; data follows through `write_data`
    pub fn start_entry(&mut self, name: &str) -> Result<()> {
        self.finish_current_entry()?;

        let local_header_offset = self.output.stream_position()?;
        let flags = FLAG_DATA_DESCRIPTOR | utf8_flag(name);
        let raw_name = name.as_bytes().to_vec();

        // crc and sizes follow in the data descriptor
        self.write_local_header(&raw_name, flags, 8, DOS_EPOCH, 0, 0, 0)?;

        self.current_entry = Some(CurrentEntry {
            raw_name,
            flags,
            local_header_offset,
            encoder: DeflateEncoder::new(Vec::new(), Compression::new(self.compression_level)),
            counter: CrcCounter::new(),
        });
        Ok(())
    }

    /// Write uncompressed data to the current entry (compressed on-the-fly)
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let entry = self
            .current_entry
            .as_mut()
            .ok_or_else(|| ArchiveError::UnsupportedOperation("No entry started".to_string()))?;

        entry.counter.update_uncompressed(data);
        entry.encoder.write_all(data)?;

        if entry.encoder.get_ref().len() >= FLUSH_THRESHOLD {
            let compressed = std::mem::take(entry.encoder.get_mut());
            self.output.write_all(&compressed)?;
            entry.counter.add_compressed(compressed.len() as u64);
        }
        Ok(())
    }

    /// Add a complete DEFLATE entry
    pub fn write_deflated(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.start_entry(name)?;
        self.write_data(data)?;
        self.finish_current_entry()
    }

    /// Add a complete STORE entry; header carries the final CRC and sizes
    pub fn write_stored(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.finish_current_entry()?;

        let local_header_offset = self.output.stream_position()?;
        let crc32 = crc32fast::hash(data);
        let size = data.len() as u64;
        let flags = utf8_flag(name);
        let raw_name = name.as_bytes().to_vec();

        self.write_local_header(&raw_name, flags, 0, DOS_EPOCH, crc32, size, size)?;
        self.output.write_all(data)?;

        self.entries.push(WrittenEntry {
            raw_name,
            flags,
            compression_method: 0,
            dos_datetime: DOS_EPOCH,
            crc32,
            compressed_size: size,
            uncompressed_size: size,
            local_header_offset,
        });
        Ok(())
    }

    /// Add an entry using a method picked elsewhere
    pub fn write_with_method(
        &mut self,
        name: &str,
        data: &[u8],
        method: CompressionMethod,
    ) -> Result<()> {
        match method {
            CompressionMethod::Stored => self.write_stored(name, data),
            CompressionMethod::Deflate => self.write_deflated(name, data),
            CompressionMethod::Other(code) => Err(ArchiveError::UnsupportedCompression(code)),
        }
    }

    /// Copy an entry from another container without recompressing it
    ///
    /// `payload` yields the entry's raw compressed bytes and is streamed into
    /// the output; at most `compressed_size` bytes are taken from it. The data
    /// descriptor bit is cleared because the local header now carries the
    /// final values.
    pub fn copy_raw_from<P: Read>(
        &mut self,
        entry: &ContainerEntry,
        payload: &mut P,
    ) -> Result<()> {
        self.finish_current_entry()?;

        let local_header_offset = self.output.stream_position()?;
        let flags = entry.flags & !FLAG_DATA_DESCRIPTOR;
        let method = entry.compression_method.to_zip_method();

        self.write_local_header(
            &entry.raw_name,
            flags,
            method,
            entry.dos_datetime,
            entry.crc32,
            entry.compressed_size,
            entry.declared_size,
        )?;
        let copied = io::copy(&mut payload.take(entry.compressed_size), &mut self.output)?;
        if copied != entry.compressed_size {
            return Err(ArchiveError::corrupt(format!(
                "payload of {} is {} bytes, directory says {}",
                entry.path, copied, entry.compressed_size
            )));
        }

        self.entries.push(WrittenEntry {
            raw_name: entry.raw_name.clone(),
            flags,
            compression_method: method,
            dos_datetime: entry.dos_datetime,
            crc32: entry.crc32,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.declared_size,
            local_header_offset,
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_local_header(
        &mut self,
        raw_name: &[u8],
        flags: u16,
        method: u16,
        dos_datetime: u32,
        crc32: u32,
        compressed_size: u64,
        uncompressed_size: u64,
    ) -> Result<()> {
        if raw_name.len() > u16::MAX as usize {
            return Err(ArchiveError::UnsupportedOperation(format!(
                "entry name of {} bytes is too long",
                raw_name.len()
            )));
        }

        let zip64 = compressed_size > u32::MAX as u64 || uncompressed_size > u32::MAX as u64;
        let mut extra_field: Vec<u8> = Vec::new();
        if zip64 {
            extra_field.extend_from_slice(&0x0001u16.to_le_bytes());
            extra_field.extend_from_slice(&16u16.to_le_bytes());
            extra_field.extend_from_slice(&uncompressed_size.to_le_bytes());
            extra_field.extend_from_slice(&compressed_size.to_le_bytes());
        }

        self.output.write_all(&[0x50, 0x4b, 0x03, 0x04])?; // signature
        self.output.write_all(&version_needed(zip64).to_le_bytes())?;
        self.output.write_all(&flags.to_le_bytes())?;
        self.output.write_all(&method.to_le_bytes())?;
        self.output.write_all(&dos_datetime.to_le_bytes())?; // mod time/date
        self.output.write_all(&crc32.to_le_bytes())?;
        if zip64 {
            self.output.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
            self.output.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
        } else {
            self.output.write_all(&(compressed_size as u32).to_le_bytes())?;
            self.output.write_all(&(uncompressed_size as u32).to_le_bytes())?;
        }
        self.output.write_all(&(raw_name.len() as u16).to_le_bytes())?;
        self.output.write_all(&(extra_field.len() as u16).to_le_bytes())?;
        self.output.write_all(raw_name)?;
        self.output.write_all(&extra_field)?;
        Ok(())
    }

    /// Finish the streamed entry and write its data descriptor
    fn finish_current_entry(&mut self) -> Result<()> {
        if let Some(mut entry) = self.current_entry.take() {
            let remaining = entry.encoder.finish()?;
            if !remaining.is_empty() {
                self.output.write_all(&remaining)?;
                entry.counter.add_compressed(remaining.len() as u64);
            }

            let crc = entry.counter.finalize();
            let compressed_size = entry.counter.compressed_count;
            let uncompressed_size = entry.counter.uncompressed_count;

            self.output.write_all(&[0x50, 0x4b, 0x07, 0x08])?;
            self.output.write_all(&crc.to_le_bytes())?;
            // If sizes exceed 32-bit, write 64-bit sizes (ZIP64 data descriptor)
            if compressed_size > u32::MAX as u64 || uncompressed_size > u32::MAX as u64 {
                self.output.write_all(&compressed_size.to_le_bytes())?;
                self.output.write_all(&uncompressed_size.to_le_bytes())?;
            } else {
                self.output
                    .write_all(&(compressed_size as u32).to_le_bytes())?;
                self.output
                    .write_all(&(uncompressed_size as u32).to_le_bytes())?;
            }

            self.entries.push(WrittenEntry {
                raw_name: entry.raw_name,
                flags: entry.flags,
                compression_method: 8,
                dos_datetime: DOS_EPOCH,
                crc32: crc,
                compressed_size,
                uncompressed_size,
                local_header_offset: entry.local_header_offset,
            });
        }
        Ok(())
    }

    /// Finish the container (write central directory and return the sink)
    pub fn finish(mut self) -> Result<W> {
        self.finish_current_entry()?;

        let central_dir_offset = self.output.stream_position()?;

        for entry in &self.entries {
            let zip64 = entry.needs_zip64();

            self.output.write_all(&[0x50, 0x4b, 0x01, 0x02])?; // central dir sig
            self.output.write_all(&version_needed(zip64).to_le_bytes())?; // version made by
            self.output.write_all(&version_needed(zip64).to_le_bytes())?; // version needed
            self.output.write_all(&entry.flags.to_le_bytes())?;
            self.output
                .write_all(&entry.compression_method.to_le_bytes())?;
            self.output.write_all(&entry.dos_datetime.to_le_bytes())?;
            self.output.write_all(&entry.crc32.to_le_bytes())?;

            // Write sizes (32-bit placeholders or actual values)
            self.output
                .write_all(&clamp32(entry.compressed_size).to_le_bytes())?;
            self.output
                .write_all(&clamp32(entry.uncompressed_size).to_le_bytes())?;

            self.output
                .write_all(&(entry.raw_name.len() as u16).to_le_bytes())?;

            // Values that overflowed go into the ZIP64 extra field, in fixed order
            let mut extra_field: Vec<u8> = Vec::new();
            if zip64 {
                let mut data: Vec<u8> = Vec::new();
                if entry.uncompressed_size > u32::MAX as u64 {
                    data.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
                }
                if entry.compressed_size > u32::MAX as u64 {
                    data.extend_from_slice(&entry.compressed_size.to_le_bytes());
                }
                if entry.local_header_offset > u32::MAX as u64 {
                    data.extend_from_slice(&entry.local_header_offset.to_le_bytes());
                }
                extra_field.extend_from_slice(&0x0001u16.to_le_bytes());
                extra_field.extend_from_slice(&(data.len() as u16).to_le_bytes());
                extra_field.extend_from_slice(&data);
            }

            self.output
                .write_all(&(extra_field.len() as u16).to_le_bytes())?; // extra len
            self.output.write_all(&0u16.to_le_bytes())?; // file comment len
            self.output.write_all(&0u16.to_le_bytes())?; // disk number start
            self.output.write_all(&0u16.to_le_bytes())?; // internal attrs
            self.output.write_all(&0u32.to_le_bytes())?; // external attrs
            self.output
                .write_all(&clamp32(entry.local_header_offset).to_le_bytes())?;

            self.output.write_all(&entry.raw_name)?;
            self.output.write_all(&extra_field)?;
        }

        let central_dir_size = self.output.stream_position()? - central_dir_offset;

        let need_zip64 = self.entries.len() >= u16::MAX as usize
            || central_dir_size > u32::MAX as u64
            || central_dir_offset > u32::MAX as u64;

        if need_zip64 {
            let zip64_eocd_pos = self.output.stream_position()?;

            // ZIP64 End of Central Directory Record
            self.output.write_all(&[0x50, 0x4b, 0x06, 0x06])?;
            // size of the remaining fields
            self.output.write_all(&44u64.to_le_bytes())?;
            self.output.write_all(&[45, 0])?; // version made by
            self.output.write_all(&[45, 0])?; // version needed
            self.output.write_all(&0u32.to_le_bytes())?; // disk number
            self.output.write_all(&0u32.to_le_bytes())?; // disk where central dir starts
            self.output
                .write_all(&(self.entries.len() as u64).to_le_bytes())?;
            self.output
                .write_all(&(self.entries.len() as u64).to_le_bytes())?;
            self.output.write_all(&central_dir_size.to_le_bytes())?;
            self.output.write_all(&central_dir_offset.to_le_bytes())?;

            // ZIP64 EOCD locator
            self.output.write_all(&[0x50, 0x4b, 0x06, 0x07])?;
            self.output.write_all(&0u32.to_le_bytes())?; // disk with ZIP64 EOCD
            self.output.write_all(&zip64_eocd_pos.to_le_bytes())?;
            self.output.write_all(&1u32.to_le_bytes())?; // total number of disks
        }

        // End of central directory (classic)
        self.output.write_all(&[0x50, 0x4b, 0x05, 0x06])?;
        self.output.write_all(&0u16.to_le_bytes())?; // disk number
        self.output.write_all(&0u16.to_le_bytes())?; // disk with central dir

        let count = if self.entries.len() >= u16::MAX as usize {
            0xFFFF
        } else {
            self.entries.len() as u16
        };
        self.output.write_all(&count.to_le_bytes())?; // entries on this disk
        self.output.write_all(&count.to_le_bytes())?; // total entries
        self.output
            .write_all(&clamp32(central_dir_size).to_le_bytes())?;
        self.output
            .write_all(&clamp32(central_dir_offset).to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // comment len

        self.output.flush()?;
        Ok(self.output)
    }
}

fn utf8_flag(name: &str) -> u16 {
    if name.is_ascii() {
        0
    } else {
        FLAG_UTF8
    }
}

fn version_needed(zip64: bool) -> u16 {
    if zip64 {
        45
    } else {
        20
    }
}

fn clamp32(value: u64) -> u32 {
    if value > u32::MAX as u64 {
        0xFFFFFFFF
    } else {
        value as u32
    }
}
