//! ZIP archive parsing, indexing and member extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`extractor`]: Reading member contents, with DEFLATE decoding and CRC checks
//! - [`index`]: The immutable entry list and directory tree built at mount time
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The EOCD is read first, then the Central Directory, so listing never
//! touches member data.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED (no compression) method
//! - DEFLATE compression method
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod extractor;
mod index;
mod parser;
mod structures;

pub use extractor::{ZipExtractor, verify};
pub use index::{DuplicatePolicy, Node, NodeId, NodeKind, ROOT, ZipEntryIndex};
pub use parser::ZipParser;
pub use structures::*;
