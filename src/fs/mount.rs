use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{BackgroundSession, MountOption};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::archive::{ArchiveFs, Owner};
use super::server::{InFlight, ZipFs};
use crate::error::{Error, Result};
use crate::footer::read_footer;
use crate::io::{LocalFileReader, OffsetReader, ReadAt};
use crate::zip::{DuplicatePolicy, ZipEntryIndex};

/// Archive view backed by a local file window.
pub type LocalArchive = ArchiveFs<OffsetReader<LocalFileReader>>;

#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Source name shown in the mount table
    pub fsname: String,
    pub allow_other: bool,
    /// How long `stop` waits for in-flight requests, and then for the unmount
    pub drain_timeout: Duration,
    /// Attribute and entry cache lifetime handed to the kernel
    pub ttl: Duration,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            fsname: "zipfs".to_string(),
            allow_other: false,
            drain_timeout: Duration::from_secs(5),
            ttl: Duration::from_secs(1),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Created,
    Mounted,
    Unmounted,
}

/// Open `path`, window it to `range` (or the whole file), and index the zip inside.
pub async fn load_archive(
    path: &Path,
    range: Option<(u64, u64)>,
    policy: DuplicatePolicy,
) -> Result<LocalArchive> {
    let file = Arc::new(LocalFileReader::new(path)?);
    let window = Arc::new(match range {
        Some((base, len)) => OffsetReader::new(file, base, len)?,
        None => OffsetReader::whole(file),
    });
    debug!(path = %path.display(), base = window.base(), len = window.size(), "archive window");

    let meta = std::fs::metadata(path)?;
    let owner = Owner {
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    };

    let index = ZipEntryIndex::load(window.clone(), policy).await?;
    Ok(ArchiveFs::new(index, window, owner))
}

/// A zip archive served at a mount point.
///
/// Lifecycle is Created → Mounted → Unmounted; each instance starts at most once.
pub struct Mount {
    archive_path: PathBuf,
    mount_point: PathBuf,
    range: Option<(u64, u64)>,
    options: MountOptions,
    state: MountState,
    archive: Option<Arc<LocalArchive>>,
    inflight: Arc<InFlight>,
    session: Option<BackgroundSession>,
}

impl Mount {
    /// Mount a standalone zip file.
    pub fn new(archive_path: impl Into<PathBuf>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            mount_point: mount_point.into(),
            range: None,
            options: MountOptions::default(),
            state: MountState::Created,
            archive: None,
            inflight: Arc::new(InFlight::default()),
            session: None,
        }
    }

    /// Mount the zip occupying `[base, base + len)` of a larger file.
    pub fn with_range(
        archive_path: impl Into<PathBuf>,
        mount_point: impl Into<PathBuf>,
        base: u64,
        len: u64,
    ) -> Self {
        let mut mount = Self::new(archive_path, mount_point);
        mount.range = Some((base, len));
        mount
    }

    /// Mount the zip embedded in a combined file, located through its footer.
    pub fn from_combined(
        combined_path: impl Into<PathBuf>,
        mount_point: impl Into<PathBuf>,
    ) -> Result<Self> {
        let combined_path = combined_path.into();
        let (_, footer, _file) = read_footer(&combined_path)?;
        Ok(Self::with_range(
            combined_path,
            mount_point,
            footer.executable_len,
            footer.zipfile_len,
        ))
    }

    pub fn with_options(mut self, options: MountOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// The indexed archive, available once started.
    pub fn archive(&self) -> Option<&Arc<LocalArchive>> {
        self.archive.as_ref()
    }

    /// Requests currently being served.
    pub fn in_flight(&self) -> usize {
        self.inflight.count()
    }

    fn mount_error(&self, reason: impl Into<String>) -> Error {
        Error::Mount {
            mount_point: self.mount_point.clone(),
            reason: reason.into(),
        }
    }

    fn check_mount_point(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.mount_point)
            .map_err(|e| self.mount_error(format!("mount point unavailable: {}", e)))?;
        if !meta.is_dir() {
            return Err(self.mount_error("mount point is not a directory"));
        }
        // A directory on a different device than its parent is already a mount point.
        let canonical = self
            .mount_point
            .canonicalize()
            .map_err(|e| self.mount_error(format!("cannot resolve mount point: {}", e)))?;
        if let Some(parent) = canonical.parent()
            && let Ok(parent_meta) = std::fs::metadata(parent)
            && parent_meta.dev() != meta.dev()
        {
            return Err(self.mount_error("target is already a mount point"));
        }
        Ok(())
    }

    /// Index the archive and mount it.
    ///
    /// Returns once the kernel mount exists; the index is complete before
    /// that. On any error the instance stays in `Created`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != MountState::Created {
            return Err(self.mount_error(format!("cannot start from state {:?}", self.state)));
        }
        self.check_mount_point()?;

        let archive = Arc::new(
            load_archive(&self.archive_path, self.range, self.options.duplicate_policy).await?,
        );
        let fs = ZipFs::new(
            archive.clone(),
            Handle::current(),
            self.inflight.clone(),
            self.options.ttl,
        );

        let mut opts = vec![
            MountOption::RO,
            MountOption::FSName(self.options.fsname.clone()),
            MountOption::Subtype("zipfs".to_string()),
        ];
        if self.options.allow_other {
            opts.push(MountOption::AllowOther);
        }

        let mount_point = self.mount_point.clone();
        let session = tokio::task::spawn_blocking(move || {
            fuser::spawn_mount2(fs, &mount_point, &opts)
        })
        .await
        .map_err(|e| self.mount_error(e.to_string()))?
        .map_err(|e| self.mount_error(e.to_string()))?;

        info!(
            archive = %self.archive_path.display(),
            mount_point = %self.mount_point.display(),
            range = ?self.range,
            "mounted"
        );
        self.session = Some(session);
        self.archive = Some(archive);
        self.state = MountState::Mounted;
        Ok(())
    }

    /// Stop accepting requests, drain, and unmount.
    ///
    /// Safe in any state. When requests do not drain in time the unmount is
    /// still attempted and `Unmount` is returned.
    pub async fn stop(&mut self) -> Result<()> {
        self.inflight.close();
        let Some(session) = self.session.take() else {
            debug!(state = ?self.state, "stop without live session");
            self.state = MountState::Unmounted;
            return Ok(());
        };

        let timeout = self.options.drain_timeout;
        let drained = tokio::time::timeout(timeout, self.inflight.drained())
            .await
            .is_ok();
        if !drained {
            warn!(
                in_flight = self.inflight.count(),
                ?timeout,
                "requests still running, unmounting anyway"
            );
        }

        let joined = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || session.join()),
        )
        .await;
        self.state = MountState::Unmounted;

        let unmount_error = |reason: String| Error::Unmount {
            mount_point: self.mount_point.clone(),
            reason,
        };
        match joined {
            Err(_) => Err(unmount_error(format!(
                "session did not exit within {:?}",
                timeout
            ))),
            Ok(Err(e)) => Err(unmount_error(format!("session ended abnormally: {}", e))),
            Ok(Ok(())) if !drained => Err(unmount_error(format!(
                "{} requests did not finish within {:?}",
                self.inflight.count(),
                timeout
            ))),
            Ok(Ok(())) => {
                info!(mount_point = %self.mount_point.display(), "unmounted");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let mut mount = Mount::new("missing.zip", "/nonexistent");
        assert_eq!(mount.in_flight(), 0);
        mount.stop().await.unwrap();
        assert_eq!(mount.state(), MountState::Unmounted);
        mount.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_mount_point_fails_and_stays_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut mount = Mount::new(dir.path().join("a.zip"), dir.path().join("absent"));
        let err = mount.start().await.unwrap_err();
        assert!(matches!(err, Error::Mount { .. }));
        assert_eq!(mount.state(), MountState::Created);
    }

    #[tokio::test]
    async fn corrupt_archive_fails_before_mounting() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("bad.zip");
        std::fs::write(&zip, b"definitely not a zip archive").unwrap();
        let mp = dir.path().join("mnt");
        std::fs::create_dir(&mp).unwrap();

        let mut mount = Mount::new(&zip, &mp);
        let err = mount.start().await.unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)));
        assert_eq!(mount.state(), MountState::Created);
        assert!(mount.archive().is_none());
    }

    #[tokio::test]
    async fn window_past_file_end_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("small");
        std::fs::write(&zip, [0u8; 16]).unwrap();
        let err = load_archive(&zip, Some((8, 64)), DuplicatePolicy::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Io(_)));
    }
}
