//! Read-only FUSE filesystem over a zip archive.
//!
//! - [`inode`]: stable inode numbers for index nodes
//! - [`archive`]: request semantics (lookup, getattr, readdir, open, read)
//! - [`server`]: the `fuser::Filesystem` adapter and request accounting
//! - [`mount`]: mount lifecycle

mod archive;
mod inode;
mod mount;
mod server;

pub use archive::{ArchiveFs, DirEntry, OpenFile, Owner};
pub use inode::{InodeTable, ROOT_INODE};
pub use mount::{LocalArchive, Mount, MountOptions, MountState, load_archive};
pub use server::{InFlight, InFlightGuard, ZipFs};
