//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Every offset is relative to the reader, so an archive embedded in a
//! larger file is parsed through an [`OffsetReader`](crate::io::OffsetReader)
//! exactly like a standalone one.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser.
///
/// Generic over the reader so the same code serves standalone archives and
/// archives embedded at an offset.
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Positioned read that treats running off the end of the stream as
    /// archive corruption rather than an I/O failure.
    async fn read_structure(&self, what: &str, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset.checked_add(buf.len() as u64);
        if end.is_none_or(|end| end > self.size) {
            return Err(Error::corrupt(format!(
                "{} at offset {} (+{} bytes) lies outside the {}-byte archive",
                what,
                offset,
                buf.len(),
                self.size
            )));
        }
        self.reader.read_exact_at(offset, buf).await
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Handles both the simple case (no comment) and archives with comments
    /// by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let min = EndOfCentralDirectory::SIZE as u64;
        if self.size < min {
            return Err(Error::corrupt(format!(
                "{} bytes is too small to hold an end of central directory record",
                self.size
            )));
        }

        // Common case first: no archive comment.
        let offset = self.size - min;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.read_structure("end of central directory", offset, &mut buf)
            .await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // The EOCD sits earlier when the archive carries a comment.
        let search_size = (MAX_COMMENT_SIZE + min).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.read_structure("archive tail", search_start, &mut buf)
            .await?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length must account for exactly the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(Error::corrupt("no end of central directory record found"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::corrupt("ZIP64 locator would start before the archive"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_structure("ZIP64 locator", locator_offset, &mut locator_buf)
            .await?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.read_structure("ZIP64 end of central directory", locator.eocd64_offset, &mut eocd64_buf)
            .await?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// List all entries in the archive, in central directory order.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptArchive`] for any malformed or truncated structure;
    /// nothing is returned for a partially readable directory.
    pub async fn list_entries(&self) -> Result<Vec<ZipEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        // Each header is at least 46 bytes; reject counts the directory cannot hold
        // before allocating for them.
        if total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size {
            return Err(Error::corrupt(format!(
                "{} entries cannot fit in a {}-byte central directory",
                total_entries, cd_size
            )));
        }

        if cd_offset.checked_add(cd_size).is_none_or(|end| end > self.size) {
            return Err(Error::corrupt(format!(
                "central directory at offset {} (+{} bytes) lies outside the {}-byte archive",
                cd_offset, cd_size, self.size
            )));
        }

        // One positioned read for the whole directory.
        let mut cd_data = vec![0u8; cd_size as usize];
        self.read_structure("central directory", cd_offset, &mut cd_data)
            .await?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for index in 0..total_entries {
            let entry = parse_cdfh(&mut cursor).map_err(|e| {
                Error::corrupt(format!(
                    "central directory entry {} at offset {}: {}",
                    index,
                    cd_offset + cursor.position(),
                    e
                ))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Offset of an entry's data, found by reading its local file header.
    ///
    /// The local header's name and extra field lengths may differ from the
    /// central directory's, so they have to be read here.
    pub async fn get_data_offset(&self, entry: &ZipEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.read_structure("local file header", entry.lfh_offset, &mut lfh_buf)
            .await?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::corrupt(format!(
                "invalid local file header for '{}' at offset {}",
                entry.path, entry.lfh_offset
            )));
        }

        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(26); // Offset to filename length field

        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        // Data starts after: LFH (30 bytes) + filename + extra field
        let data_offset =
            entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length;

        if data_offset.saturating_add(entry.compressed_size) > self.size {
            return Err(Error::corrupt(format!(
                "data for '{}' ({} bytes at offset {}) runs past the end of the archive",
                entry.path, entry.compressed_size, data_offset
            )));
        }

        Ok(data_offset)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Parse one Central Directory File Header.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> std::io::Result<ZipEntry> {
    use std::io::{Error as IoError, ErrorKind};

    // Signature PK\x01\x02
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(IoError::new(ErrorKind::InvalidData, "bad header signature"));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    // Non-UTF8 names are kept readable rather than rejected
    let path = String::from_utf8_lossy(&file_name_bytes).to_string();

    let is_directory = path.ends_with('/');

    let extra_field_end = cursor.position() + extra_field_length as u64;
    let data_len = cursor.get_ref().len() as u64;
    if extra_field_end > data_len {
        return Err(IoError::new(ErrorKind::UnexpectedEof, "extra field truncated"));
    }

    while cursor.position() + 4 <= extra_field_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()?;

        if header_id == 0x0001 {
            // ZIP64 extended information: values present only for saturated header fields
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                lfh_offset = cursor.read_u64::<LittleEndian>()?;
            }
            cursor.set_position(extra_field_end);
        } else {
            cursor.set_position(cursor.position() + field_size as u64);
        }
    }

    cursor.set_position(extra_field_end);

    let comment_end = extra_field_end + file_comment_length as u64;
    if comment_end > data_len {
        return Err(IoError::new(ErrorKind::UnexpectedEof, "file comment truncated"));
    }
    cursor.set_position(comment_end);

    Ok(ZipEntry {
        path,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        is_directory,
    })
}
