use std::sync::Arc;

use async_trait::async_trait;

use super::ReadAt;
use crate::error::Result;

/// A window `[base, base + len)` of another source, presented as a zero-based file.
///
/// Reads that run past `len` are clamped, so bytes outside the window are
/// never exposed even when the underlying source continues.
pub struct OffsetReader<R: ReadAt> {
    inner: Arc<R>,
    base: u64,
    len: u64,
}

impl<R: ReadAt> OffsetReader<R> {
    /// Window over `[base, base + len)` of `inner`.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidInput` I/O error if the window extends past the end
    /// of `inner`.
    pub fn new(inner: Arc<R>, base: u64, len: u64) -> Result<Self> {
        let end = base.checked_add(len);
        if end.is_none_or(|end| end > inner.size()) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "window [{}, {}+{}) exceeds source size {}",
                    base,
                    base,
                    len,
                    inner.size()
                ),
            )
            .into());
        }
        Ok(Self { inner, base, len })
    }

    /// Window covering the whole of `inner`.
    pub fn whole(inner: Arc<R>) -> Self {
        let len = inner.size();
        Self {
            inner,
            base: 0,
            len,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }
}

#[async_trait]
impl<R: ReadAt> ReadAt for OffsetReader<R> {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let avail = (self.len - offset).min(buf.len() as u64) as usize;
        self.inner
            .read_at(self.base + offset, &mut buf[..avail])
            .await
    }

    fn size(&self) -> u64 {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalFileReader;
    use std::io::Write;

    fn source(bytes: &[u8]) -> (tempfile::NamedTempFile, Arc<LocalFileReader>) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        let reader = Arc::new(LocalFileReader::new(tmp.path()).unwrap());
        (tmp, reader)
    }

    #[tokio::test]
    async fn maps_virtual_offsets_into_window() {
        let (_tmp, file) = source(b"HEADERpayloadTRAILER");
        let window = OffsetReader::new(file, 6, 7).unwrap();
        assert_eq!(window.size(), 7);

        let mut buf = [0u8; 4];
        window.read_exact_at(3, &mut buf).await.unwrap();
        assert_eq!(&buf, b"load");
    }

    #[tokio::test]
    async fn clamps_reads_at_window_end() {
        let (_tmp, file) = source(b"HEADERpayloadTRAILER");
        let window = OffsetReader::new(file, 6, 7).unwrap();

        let mut buf = [0u8; 16];
        let n = window.read_at(4, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"oad");
        assert_eq!(window.read_at(7, &mut buf).await.unwrap(), 0);
        assert_eq!(window.read_at(1000, &mut buf).await.unwrap(), 0);
    }

    #[test]
    fn rejects_window_past_source_end() {
        let (_tmp, file) = source(b"tiny");
        assert!(OffsetReader::new(file.clone(), 2, 3).is_err());
        assert!(OffsetReader::new(file.clone(), u64::MAX, 2).is_err());
        assert!(OffsetReader::new(file, 0, 4).is_ok());
    }

    #[test]
    fn whole_covers_entire_source() {
        let (_tmp, file) = source(b"abcdef");
        let window = OffsetReader::whole(file);
        assert_eq!(window.base(), 0);
        assert_eq!(window.size(), 6);
    }
}
