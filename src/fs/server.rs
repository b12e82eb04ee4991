//! `fuser::Filesystem` adapter over [`ArchiveFs`].
//!
//! fuser drives every callback from its single session thread. Metadata
//! requests are answered right there from the immutable index; reads are
//! handed to the tokio runtime as one task per request, so a slow
//! decompression never stalls lookups or other reads.

use std::collections::HashMap;
use std::ffi::{OsStr, c_int};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use fuser::{
    Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use super::archive::{ArchiveFs, OpenFile};
use crate::error::Error;
use crate::io::ReadAt;

/// Counts requests currently being served and gates new ones once closed.
#[derive(Debug)]
pub struct InFlight {
    count: AtomicUsize,
    accepting: AtomicBool,
    idle: Notify,
}

impl Default for InFlight {
    fn default() -> Self {
        Self {
            count: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            idle: Notify::new(),
        }
    }
}

/// Held for the duration of one request.
pub struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl InFlight {
    /// Register a request, or `None` once the server stopped accepting.
    pub fn enter(self: &Arc<Self>) -> Option<InFlightGuard> {
        self.count.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(self.clone());
        self.accepting.load(Ordering::Acquire).then_some(guard)
    }

    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolves once no request is in flight.
    pub async fn drained(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            idle.await;
        }
    }
}

pub struct ZipFs<R: ReadAt + 'static> {
    archive: Arc<ArchiveFs<R>>,
    runtime: Handle,
    inflight: Arc<InFlight>,
    handles: HashMap<u64, Arc<OpenFile>>,
    next_fh: u64,
    ttl: Duration,
}

impl<R: ReadAt + 'static> ZipFs<R> {
    pub fn new(
        archive: Arc<ArchiveFs<R>>,
        runtime: Handle,
        inflight: Arc<InFlight>,
        ttl: Duration,
    ) -> Self {
        Self {
            archive,
            runtime,
            inflight,
            handles: HashMap::new(),
            next_fh: 1,
            ttl,
        }
    }
}

fn reject(op: &str, err: Error) -> c_int {
    match err {
        Error::NotFound => trace!(op, "not found"),
        ref e => debug!(op, error = %e, "request failed"),
    }
    err.errno()
}

impl<R: ReadAt + 'static> Filesystem for ZipFs<R> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(
            nodes = self.archive.inodes().len(),
            entries = self.archive.index().entries().len(),
            "zip filesystem ready"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        self.handles.clear();
        info!("zip filesystem unmounted");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, ?name, "lookup");
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.archive.lookup(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(reject("lookup", e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        match self.archive.getattr(ino) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(reject("getattr", e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");
        if !self.inflight.is_accepting() {
            reply.error(libc::EIO);
            return;
        }
        match self.archive.open(ino, flags) {
            Ok(file) => {
                let fh = self.next_fh;
                self.next_fh += 1;
                self.handles.insert(fh, Arc::new(file));
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(reject("open", e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(file) = self.handles.get(&fh).cloned() else {
            reply.error(libc::EBADF);
            return;
        };
        let Some(guard) = self.inflight.enter() else {
            reply.error(libc::EIO);
            return;
        };
        let archive = self.archive.clone();
        self.runtime.spawn(async move {
            let _guard = guard;
            match archive.read(&file, offset, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    let path = archive.index().path_of(file.node());
                    warn!(%path, ino, fh, offset, size, error = %e, "read failed");
                    reply.error(e.errno());
                }
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        // An in-flight read may still hold the buffer; it is freed when that finishes.
        self.handles.remove(&fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.archive.getattr(ino) {
            Ok(attr) if attr.kind == fuser::FileType::Directory => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(reject("opendir", e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(ino, offset, "readdir");
        let entries = match self.archive.readdir(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(reject("readdir", e));
                return;
            }
        };
        for (i, entry) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            // true means the reply buffer is full
            if reply.add(entry.ino, (i + 1) as i64, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let (blocks, files, bsize) = self.archive.usage();
        reply.statfs(blocks, 0, 0, files, 0, bsize, 255, bsize);
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        if let Err(e) = self.archive.getattr(ino) {
            reply.error(reject("access", e));
        } else if mask & libc::W_OK != 0 {
            reply.error(libc::EROFS);
        } else {
            reply.ok();
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(Error::ReadOnlyFilesystem.errno());
    }
}
