use std::io::Read;
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use tracing::trace;

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipEntry};

/// Reads member contents out of an archive.
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// Offset of the entry's (possibly compressed) data within the archive.
    pub async fn data_offset(&self, entry: &ZipEntry) -> Result<u64> {
        self.parser.get_data_offset(entry).await
    }

    /// Positioned read of a STORED entry's bytes starting at `offset`,
    /// clamped to the entry's size.
    pub async fn read_stored(
        &self,
        entry: &ZipEntry,
        data_offset: u64,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        if offset >= entry.uncompressed_size {
            return Ok(0);
        }
        let want = (entry.uncompressed_size - offset).min(buf.len() as u64) as usize;
        self.parser
            .reader()
            .read_exact_at(data_offset + offset, &mut buf[..want])
            .await?;
        Ok(want)
    }

    /// Fully decode an entry into memory and verify its CRC32.
    ///
    /// Decompression and hashing run on the blocking pool so a large member
    /// does not hold up other requests on the runtime.
    pub async fn extract_to_memory(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        if entry.is_directory {
            return Err(Error::IsADirectory);
        }
        if entry.uncompressed_size > isize::MAX as u64 {
            return Err(Error::corrupt(format!(
                "'{}' claims {} uncompressed bytes",
                entry.path, entry.uncompressed_size
            )));
        }

        // Bounded by the archive size once the data offset is known.
        let data_offset = self.data_offset(entry).await?;
        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.parser
            .reader()
            .read_exact_at(data_offset, &mut raw)
            .await?;

        let entry = entry.clone();
        tokio::task::spawn_blocking(move || decode(&entry, raw))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

/// Largest expansion DEFLATE can achieve per input byte.
const MAX_DEFLATE_RATIO: u64 = 1032;

/// Turn an entry's raw data into its contents and verify them.
fn decode(entry: &ZipEntry, raw: Vec<u8>) -> Result<Vec<u8>> {
    let data = match entry.compression_method {
        CompressionMethod::Deflate => {
            let hint = entry
                .uncompressed_size
                .min((raw.len() as u64).saturating_mul(MAX_DEFLATE_RATIO));
            let mut out = Vec::with_capacity(hint as usize);
            DeflateDecoder::new(raw.as_slice())
                .take(entry.uncompressed_size.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|e| Error::corrupt(format!("inflating '{}' failed: {}", entry.path, e)))?;
            out
        }
        CompressionMethod::Stored => raw,
        CompressionMethod::Unknown(method) => {
            return Err(Error::Unsupported(format!(
                "compression method {} for '{}'",
                method, entry.path
            )));
        }
    };
    trace!(
        path = %entry.path,
        method = entry.compression_method.as_u16(),
        len = data.len(),
        "decoded entry"
    );

    verify(entry, &data)?;
    Ok(data)
}

/// Check decoded bytes against the size and CRC32 recorded in the central directory.
pub fn verify(entry: &ZipEntry, data: &[u8]) -> Result<()> {
    if data.len() as u64 != entry.uncompressed_size {
        return Err(Error::corrupt(format!(
            "'{}' decoded to {} bytes, expected {}",
            entry.path,
            data.len(),
            entry.uncompressed_size
        )));
    }
    let crc = crc32fast::hash(data);
    if crc != entry.crc32 {
        return Err(Error::corrupt(format!(
            "CRC32 mismatch for '{}': expected {:08x}, computed {:08x}",
            entry.path, entry.crc32, crc
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalFileReader;
    use std::io::{Cursor, Write};

    fn archive(method: zip::CompressionMethod, name: &str, data: &[u8]) -> tempfile::NamedTempFile {
        let mut out = Cursor::new(Vec::new());
        {
            let mut w = zip::ZipWriter::new(&mut out);
            let opts = zip::write::SimpleFileOptions::default().compression_method(method);
            w.start_file(name, opts).unwrap();
            w.write_all(data).unwrap();
            w.finish().unwrap();
        }
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&out.into_inner()).unwrap();
        tmp
    }

    async fn open(tmp: &tempfile::NamedTempFile) -> (ZipExtractor<LocalFileReader>, Vec<ZipEntry>) {
        let reader = Arc::new(LocalFileReader::new(tmp.path()).unwrap());
        let entries = ZipParser::new(reader.clone()).list_entries().await.unwrap();
        (ZipExtractor::new(reader), entries)
    }

    #[tokio::test]
    async fn inflates_deflated_entry() {
        let text = "salutations\n".repeat(200);
        let tmp = archive(zip::CompressionMethod::Deflated, "big.txt", text.as_bytes());
        let (ex, entries) = open(&tmp).await;
        assert_eq!(entries[0].compression_method, CompressionMethod::Deflate);
        assert!(entries[0].compressed_size < entries[0].uncompressed_size);
        assert_eq!(ex.extract_to_memory(&entries[0]).await.unwrap(), text.as_bytes());
    }

    #[tokio::test]
    async fn stored_reads_are_positioned_and_clamped() {
        let tmp = archive(zip::CompressionMethod::Stored, "hello", b"salutations\n");
        let (ex, mut entries) = open(&tmp).await;
        let entry = entries.remove(0);
        let off = ex.data_offset(&entry).await.unwrap();

        let mut buf = [0u8; 64];
        let n = ex.read_stored(&entry, off, 5, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ations\n");
        assert_eq!(ex.read_stored(&entry, off, 12, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn crc_mismatch_is_corrupt() {
        let tmp = archive(zip::CompressionMethod::Stored, "hello", b"salutations\n");
        let (ex, mut entries) = open(&tmp).await;
        let mut entry = entries.remove(0);
        entry.crc32 ^= 1;
        let err = ex.extract_to_memory(&entry).await.unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)));
    }

    #[tokio::test]
    async fn absurd_uncompressed_size_is_corrupt() {
        let tmp = archive(zip::CompressionMethod::Deflated, "big.txt", "salutations\n".repeat(50).as_bytes());
        let (ex, mut entries) = open(&tmp).await;
        let mut entry = entries.remove(0);
        entry.uncompressed_size = u64::MAX;
        let err = ex.extract_to_memory(&entry).await.unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)), "{err}");
    }

    #[tokio::test]
    async fn overstated_uncompressed_size_fails_verification() {
        let tmp = archive(zip::CompressionMethod::Deflated, "big.txt", "salutations\n".repeat(50).as_bytes());
        let (ex, mut entries) = open(&tmp).await;
        let mut entry = entries.remove(0);
        entry.uncompressed_size = 1 << 40;
        let err = ex.extract_to_memory(&entry).await.unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)), "{err}");
    }

    #[tokio::test]
    async fn unknown_method_is_unsupported() {
        let tmp = archive(zip::CompressionMethod::Stored, "hello", b"salutations\n");
        let (ex, mut entries) = open(&tmp).await;
        let mut entry = entries.remove(0);
        entry.compression_method = CompressionMethod::Unknown(14);
        let err = ex.extract_to_memory(&entry).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
