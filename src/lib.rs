//! # zipfs
//!
//! Mount zip archives as read-only FUSE filesystems.
//!
//! The archive may be a standalone `.zip` or sit at an arbitrary offset
//! inside a larger file, typically an executable with a zip appended and a
//! 256-byte [`Footer`] describing the layout. The footer subsystem reads,
//! validates, splits and produces such combined files; the mount engine
//! serves the zip found inside them.
//!
//! ## Features
//!
//! - Standalone and offset-embedded archives through one [`OffsetReader`]
//! - ZIP64 archives, STORED and DEFLATE members with CRC32 verification
//! - Concurrent reads, one runtime task per in-flight request
//! - BLAKE2b-checksummed combined-file footer with split and combine
//!
//! ## Example
//!
//! ```no_run
//! use zipfs::{Mount, read_footer};
//!
//! #[tokio::main]
//! async fn main() -> zipfs::Result<()> {
//!     let (_, footer, _file) = read_footer("app.combined")?;
//!     let mut mount = Mount::with_range(
//!         "app.combined",
//!         "/mnt/app",
//!         footer.executable_len,
//!         footer.zipfile_len,
//!     );
//!     mount.start().await?;
//!     // ... serve until done ...
//!     mount.stop().await
//! }
//! ```

pub mod cli;
pub mod error;
pub mod footer;
pub mod fs;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, FooterCheck, Result};
pub use footer::{CombinerConfig, FOOTER_LEN, Footer, combine, read_footer, split};
pub use fs::{Mount, MountOptions, MountState};
pub use io::{LocalFileReader, OffsetReader, ReadAt};
pub use zip::{DuplicatePolicy, ZipEntry, ZipEntryIndex};
