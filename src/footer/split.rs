use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use blake2::{Blake2b512, Digest};
use tracing::{debug, info};

use super::codec::{CHECKSUM_LEN, Footer, hex};
use super::validate::read_footer;
use crate::error::{Error, Result};

/// Paths involved in combining or splitting a combined file.
///
/// `split` selects the direction: [`split`] requires it set, [`combine`]
/// requires it clear.
#[derive(Debug, Clone, Default)]
pub struct CombinerConfig {
    pub output_path: PathBuf,
    pub executable_path: PathBuf,
    pub zipfile_path: PathBuf,
    pub split: bool,
}

/// Writer adapter that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Blake2b512,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Blake2b512::new(),
        }
    }

    fn finish(self) -> (W, [u8; CHECKSUM_LEN]) {
        let mut sum = [0u8; CHECKSUM_LEN];
        sum.copy_from_slice(&self.hasher.finalize());
        (self.inner, sum)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy exactly `len` bytes, failing with `UnexpectedEof` on a short source.
fn copy_exact<R: Read, W: Write>(src: &mut R, dst: &mut W, len: u64) -> Result<()> {
    let copied = io::copy(&mut src.take(len), dst)?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, source ended after {}", len, copied),
        )
        .into());
    }
    Ok(())
}

/// BLAKE2b-512 of a file's full contents.
pub fn file_checksum(path: &Path) -> Result<[u8; CHECKSUM_LEN]> {
    let mut hasher = HashingWriter::new(io::sink());
    io::copy(&mut BufReader::new(File::open(path)?), &mut hasher)?;
    Ok(hasher.finish().1)
}

fn verify(component: &'static str, path: &Path, expected: &[u8; CHECKSUM_LEN]) -> Result<()> {
    let actual = file_checksum(path)?;
    if &actual != expected {
        return Err(Error::ChecksumMismatch {
            component,
            path: path.to_path_buf(),
            expected: hex(expected),
            actual: hex(&actual),
        });
    }
    debug!(component, path = %path.display(), "checksum verified");
    Ok(())
}

/// Recover the executable and zipfile from the combined file at
/// `cfg.output_path`.
///
/// Both components are streamed sequentially from one handle, then re-hashed
/// from disk and compared against the footer. Outputs are left in place when
/// verification fails so they can be inspected.
pub fn split(cfg: &CombinerConfig) -> Result<Footer> {
    if !cfg.split {
        return Err(Error::InvalidConfig(format!(
            "split requested without the split flag set (config: {:?})",
            cfg
        )));
    }

    let (_, footer, mut combined) = read_footer(&cfg.output_path)?;
    combined.seek(SeekFrom::Start(0))?;
    let mut combined = BufReader::new(combined);

    let mut exe = BufWriter::new(File::create(&cfg.executable_path)?);
    copy_exact(&mut combined, &mut exe, footer.executable_len)?;
    exe.flush()?;
    drop(exe);

    let mut zip = BufWriter::new(File::create(&cfg.zipfile_path)?);
    copy_exact(&mut combined, &mut zip, footer.zipfile_len)?;
    zip.flush()?;
    drop(zip);

    verify("executable", &cfg.executable_path, &footer.executable_checksum)?;
    verify("zipfile", &cfg.zipfile_path, &footer.zipfile_checksum)?;

    info!(
        combined = %cfg.output_path.display(),
        executable_len = footer.executable_len,
        zipfile_len = footer.zipfile_len,
        "split combined file"
    );
    Ok(footer)
}

/// Concatenate `cfg.executable_path` and `cfg.zipfile_path` into
/// `cfg.output_path` and append a sealed footer describing them.
pub fn combine(cfg: &CombinerConfig) -> Result<Footer> {
    if cfg.split {
        return Err(Error::InvalidConfig(format!(
            "combine requested with the split flag set (config: {:?})",
            cfg
        )));
    }

    let mut out = BufWriter::new(File::create(&cfg.output_path)?);

    let mut w = HashingWriter::new(&mut out);
    let executable_len = io::copy(&mut BufReader::new(File::open(&cfg.executable_path)?), &mut w)?;
    let (_, executable_checksum) = w.finish();

    let mut w = HashingWriter::new(&mut out);
    let zipfile_len = io::copy(&mut BufReader::new(File::open(&cfg.zipfile_path)?), &mut w)?;
    let (_, zipfile_checksum) = w.finish();

    let footer = Footer::new(
        executable_len,
        zipfile_len,
        executable_checksum,
        zipfile_checksum,
    );
    out.write_all(&footer.to_bytes())?;
    out.flush()?;

    info!(
        output = %cfg.output_path.display(),
        executable_len,
        zipfile_len,
        "wrote combined file"
    );
    Ok(footer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footer::codec::{FOOTER_LEN, digest};

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, bytes).unwrap();
        p
    }

    #[test]
    fn combine_then_split_recovers_components() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write(dir.path(), "app", b"\x7fELF fake executable");
        let zip = write(dir.path(), "data.zip", b"PK not really a zip");
        let combined = dir.path().join("combined");

        let footer = combine(&CombinerConfig {
            output_path: combined.clone(),
            executable_path: exe.clone(),
            zipfile_path: zip.clone(),
            split: false,
        })
        .unwrap();
        assert_eq!(footer.executable_checksum, digest(b"\x7fELF fake executable"));
        let total = std::fs::metadata(&combined).unwrap().len();
        assert_eq!(total, footer.executable_len + footer.zipfile_len + FOOTER_LEN as u64);

        let cfg = CombinerConfig {
            output_path: combined,
            executable_path: dir.path().join("app.out"),
            zipfile_path: dir.path().join("data.out.zip"),
            split: true,
        };
        split(&cfg).unwrap();
        assert_eq!(std::fs::read(&cfg.executable_path).unwrap(), std::fs::read(exe).unwrap());
        assert_eq!(std::fs::read(&cfg.zipfile_path).unwrap(), std::fs::read(zip).unwrap());
    }

    #[test]
    fn split_flag_is_required() {
        let err = split(&CombinerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = combine(&CombinerConfig {
            split: true,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn component_corruption_is_reported_and_outputs_kept() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write(dir.path(), "app", b"executable body");
        let zip = write(dir.path(), "z.zip", b"zip body");
        let combined = dir.path().join("combined");
        combine(&CombinerConfig {
            output_path: combined.clone(),
            executable_path: exe,
            zipfile_path: zip,
            split: false,
        })
        .unwrap();

        // Corrupt a byte of the zip component; the footer stays intact.
        let mut bytes = std::fs::read(&combined).unwrap();
        bytes[16] ^= 0xff;
        std::fs::write(&combined, &bytes).unwrap();

        let cfg = CombinerConfig {
            output_path: combined,
            executable_path: dir.path().join("app.out"),
            zipfile_path: dir.path().join("z.out"),
            split: true,
        };
        let err = split(&cfg).unwrap_err();
        assert!(matches!(
            err,
            Error::ChecksumMismatch {
                component: "zipfile",
                ..
            }
        ));
        assert!(cfg.executable_path.exists());
        assert!(cfg.zipfile_path.exists());
    }
}
