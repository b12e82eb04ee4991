//! Request-level view of a mounted archive.
//!
//! Everything here is built once before the filesystem is mounted and is
//! never mutated afterwards, so metadata requests need no locking. The only
//! mutable state is the decoded content cached inside each [`OpenFile`].

use std::sync::Arc;
use std::time::SystemTime;

use fuser::{FileAttr, FileType};
use tokio::sync::OnceCell;
use tracing::trace;

use super::inode::InodeTable;
use crate::error::{Error, Result};
use crate::io::ReadAt;
use crate::zip::{CompressionMethod, NodeId, ZipEntryIndex, ZipExtractor};

const BLOCK_SIZE: u32 = 512;

/// Ownership and timestamp applied to nodes without their own metadata.
#[derive(Debug, Clone, Copy)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
    /// Used for the root and synthesized directories.
    pub mtime: SystemTime,
}

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: FileType,
    pub name: String,
}

enum Content {
    /// Uncompressed bytes served straight from the archive.
    Stored { data_offset: u64 },
    /// Decoded once on first read, CRC-verified.
    Inflated(Vec<u8>),
}

/// Per-open state for a regular file.
pub struct OpenFile {
    node: NodeId,
    content: OnceCell<Content>,
}

impl OpenFile {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

pub struct ArchiveFs<R: ReadAt> {
    index: ZipEntryIndex,
    inodes: InodeTable,
    extractor: ZipExtractor<R>,
    owner: Owner,
}

impl<R: ReadAt> ArchiveFs<R> {
    pub fn new(index: ZipEntryIndex, reader: Arc<R>, owner: Owner) -> Self {
        let inodes = InodeTable::new(&index);
        Self {
            index,
            inodes,
            extractor: ZipExtractor::new(reader),
            owner,
        }
    }

    pub fn index(&self) -> &ZipEntryIndex {
        &self.index
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn node_of(&self, ino: u64) -> Result<NodeId> {
        self.inodes.node_of(ino).ok_or(Error::NotFound)
    }

    fn attr(&self, id: NodeId) -> FileAttr {
        let node = &self.index.nodes()[id];
        let entry = self.index.entry_of(id);
        let mtime = entry.map_or(self.owner.mtime, |e| e.modified());
        let (kind, perm, nlink, size) = if node.is_dir() {
            (FileType::Directory, 0o555, 2, 0)
        } else {
            let size = entry.map_or(0, |e| e.uncompressed_size);
            (FileType::RegularFile, 0o444, 1, size)
        };
        FileAttr {
            ino: InodeTable::inode_of(id),
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm,
            nlink,
            uid: self.owner.uid,
            gid: self.owner.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    pub fn lookup(&self, parent: u64, name: &str) -> Result<FileAttr> {
        let ino = self.inodes.lookup(parent, name).ok_or(Error::NotFound)?;
        self.getattr(ino)
    }

    pub fn getattr(&self, ino: u64) -> Result<FileAttr> {
        Ok(self.attr(self.node_of(ino)?))
    }

    /// `.`, `..`, then children in archive order.
    pub fn readdir(&self, ino: u64) -> Result<Vec<DirEntry>> {
        let id = self.node_of(ino)?;
        let children = self.index.children(id).ok_or(Error::NotADirectory)?;
        let parent = InodeTable::inode_of(self.index.nodes()[id].parent);

        let mut out = Vec::with_capacity(children.len() + 2);
        out.push(DirEntry {
            ino,
            kind: FileType::Directory,
            name: ".".into(),
        });
        out.push(DirEntry {
            ino: parent,
            kind: FileType::Directory,
            name: "..".into(),
        });
        for &child in children {
            let node = &self.index.nodes()[child];
            out.push(DirEntry {
                ino: InodeTable::inode_of(child),
                kind: if node.is_dir() {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                },
                name: node.name.clone(),
            });
        }
        Ok(out)
    }

    /// Open a regular file for reading.
    ///
    /// Directories fail with `IsADirectory`, any write access with
    /// `ReadOnlyFilesystem`. No archive data is touched until the first read.
    pub fn open(&self, ino: u64, flags: i32) -> Result<OpenFile> {
        let id = self.node_of(ino)?;
        if self.index.nodes()[id].is_dir() {
            return Err(Error::IsADirectory);
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_TRUNC != 0 {
            return Err(Error::ReadOnlyFilesystem);
        }
        Ok(OpenFile {
            node: id,
            content: OnceCell::new(),
        })
    }

    async fn content<'a>(&self, file: &'a OpenFile) -> Result<&'a Content> {
        let entry = self.index.entry_of(file.node).ok_or(Error::NotFound)?;
        file.content
            .get_or_try_init(|| async {
                let content = match entry.compression_method {
                    CompressionMethod::Stored => Content::Stored {
                        data_offset: self.extractor.data_offset(entry).await?,
                    },
                    _ => Content::Inflated(self.extractor.extract_to_memory(entry).await?),
                };
                Ok::<_, Error>(content)
            })
            .await
    }

    /// Up to `size` bytes of the file starting at `offset`.
    pub async fn read(&self, file: &OpenFile, offset: u64, size: u32) -> Result<Vec<u8>> {
        let entry = self.index.entry_of(file.node).ok_or(Error::NotFound)?;
        trace!(path = %entry.path, offset, size, "read");
        match self.content(file).await? {
            Content::Stored { data_offset } => {
                let mut buf = vec![0u8; size as usize];
                let n = self
                    .extractor
                    .read_stored(entry, *data_offset, offset, &mut buf)
                    .await?;
                buf.truncate(n);
                Ok(buf)
            }
            Content::Inflated(data) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
        }
    }

    /// Totals reported by `statfs`: (blocks, files, block size).
    pub fn usage(&self) -> (u64, u64, u32) {
        let bytes: u64 = self
            .index
            .entries()
            .iter()
            .map(|e| e.uncompressed_size)
            .sum();
        (
            bytes.div_ceil(BLOCK_SIZE as u64),
            self.inodes.len() as u64,
            BLOCK_SIZE,
        )
    }
}
