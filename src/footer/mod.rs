//! Combined-file trailer: codec, validation, splitting and combining.
//!
//! A combined file is an executable followed by a zip archive followed by a
//! fixed 256-byte [`Footer`]. The footer records both component lengths, so
//! the zip can be mounted in place at offset `executable_len` or split back
//! out into standalone files.

mod codec;
mod split;
mod validate;

pub use codec::{
    CHECKSUM_LEN, FOOTER_LEN, FOOTER_MAGIC_LEADING, FOOTER_MAGIC_TRAILING, Footer, digest, hex,
};
pub use split::{CombinerConfig, combine, file_checksum, split};
pub use validate::{read_footer, validate_footer_bytes};
