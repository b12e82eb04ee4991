use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use super::codec::{FOOTER_LEN, FOOTER_MAGIC_LEADING, FOOTER_MAGIC_TRAILING, Footer, hex};
use crate::error::{Error, FooterCheck, Result};

/// Read and validate the trailer of a combined file.
///
/// Returns the offset at which the footer starts, the decoded footer and the
/// open file. The handle's position is unspecified; callers must seek before
/// reading from it.
///
/// # Errors
///
/// * [`Error::Io`] if the file cannot be opened, stat'd or read.
/// * [`Error::TooSmall`] if the file is shorter than the footer.
/// * [`Error::CorruptFooter`] naming the first check that failed.
pub fn read_footer(path: impl AsRef<Path>) -> Result<(u64, Footer, File)> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size < FOOTER_LEN as u64 {
        return Err(Error::TooSmall {
            path: path.to_path_buf(),
            size,
            footer_len: FOOTER_LEN,
        });
    }

    let footer_start = file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
    let mut bytes = [0u8; FOOTER_LEN];
    file.read_exact(&mut bytes)?;
    debug!(path = %path.display(), footer_start, "read footer candidate");

    let footer = validate_footer_bytes(&bytes, path, footer_start)?;
    Ok((footer_start, footer, file))
}

/// Decode `bytes` and run the footer checks in order: leading magic,
/// trailing magic, checksum, length arithmetic.
pub fn validate_footer_bytes(
    bytes: &[u8; FOOTER_LEN],
    path: &Path,
    footer_start: u64,
) -> Result<Footer> {
    let footer = Footer::from_bytes(bytes);
    let corrupt = |check, expected: String, actual: String| Error::CorruptFooter {
        path: path.to_path_buf(),
        offset: footer_start,
        check,
        expected,
        actual,
    };

    let leading = &footer.magic_leading[..FOOTER_MAGIC_LEADING.len()];
    if leading != FOOTER_MAGIC_LEADING {
        return Err(corrupt(
            FooterCheck::LeadingMagic,
            hex(FOOTER_MAGIC_LEADING),
            hex(leading),
        ));
    }

    let trailing = &footer.magic_trailing[..FOOTER_MAGIC_TRAILING.len()];
    if trailing != FOOTER_MAGIC_TRAILING {
        return Err(corrupt(
            FooterCheck::TrailingMagic,
            hex(FOOTER_MAGIC_TRAILING),
            hex(trailing),
        ));
    }

    let computed = footer.compute_checksum();
    if computed != footer.footer_checksum {
        return Err(corrupt(
            FooterCheck::Checksum,
            hex(&computed),
            hex(&footer.footer_checksum),
        ));
    }

    let sum = footer.executable_len.checked_add(footer.zipfile_len);
    if sum != Some(footer_start) {
        return Err(corrupt(
            FooterCheck::LengthSum,
            footer_start.to_string(),
            format!(
                "{} + {}",
                footer.executable_len, footer.zipfile_len
            ),
        ));
    }

    Ok(footer)
}
