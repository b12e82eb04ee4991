//! Error taxonomy shared by the footer subsystem and the mount engine.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Which footer check rejected a trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FooterCheck {
    LeadingMagic,
    TrailingMagic,
    Checksum,
    LengthSum,
}

impl fmt::Display for FooterCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FooterCheck::LeadingMagic => "leading magic",
            FooterCheck::TrailingMagic => "trailing magic",
            FooterCheck::Checksum => "footer checksum",
            FooterCheck::LengthSum => "component length sum",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{path}' is {size} bytes, smaller than the {footer_len}-byte footer")]
    TooSmall {
        path: PathBuf,
        size: u64,
        footer_len: usize,
    },

    #[error(
        "corrupt footer in '{path}' at offset {offset}: {check} mismatch (expected {expected}, found {actual})"
    )]
    CorruptFooter {
        path: PathBuf,
        offset: u64,
        check: FooterCheck,
        expected: String,
        actual: String,
    },

    #[error("corrupt zip archive: {0}")]
    CorruptArchive(String),

    #[error("checksum mismatch for {component} '{path}': expected {expected}, computed {actual}")]
    ChecksumMismatch {
        component: &'static str,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("cannot mount at '{mount_point}': {reason}")]
    Mount { mount_point: PathBuf, reason: String },

    #[error("cannot unmount '{mount_point}': {reason}")]
    Unmount { mount_point: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no such entry")]
    NotFound,

    #[error("is a directory")]
    IsADirectory,

    #[error("not a directory")]
    NotADirectory,

    #[error("read-only filesystem")]
    ReadOnlyFilesystem,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptArchive(msg.into())
    }

    /// The errno reported to filesystem clients for a failed request.
    pub fn errno(&self) -> libc::c_int {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::IsADirectory => libc::EISDIR,
            Error::NotADirectory => libc::ENOTDIR,
            Error::ReadOnlyFilesystem => libc::EROFS,
            Error::Unsupported(_) => libc::ENOTSUP,
            Error::InvalidConfig(_) => libc::EINVAL,
            _ => libc::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_map_to_errno() {
        assert_eq!(Error::NotFound.errno(), libc::ENOENT);
        assert_eq!(Error::IsADirectory.errno(), libc::EISDIR);
        assert_eq!(Error::ReadOnlyFilesystem.errno(), libc::EROFS);
        assert_eq!(Error::corrupt("bad").errno(), libc::EIO);
        let io = Error::from(std::io::Error::other("disk"));
        assert_eq!(io.errno(), libc::EIO);
    }

    #[test]
    fn corrupt_footer_message_names_check() {
        let err = Error::CorruptFooter {
            path: PathBuf::from("combined.bin"),
            offset: 1024,
            check: FooterCheck::LengthSum,
            expected: "1024".into(),
            actual: "1000".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("component length sum"));
        assert!(msg.contains("combined.bin"));
        assert!(msg.contains("1024"));
    }
}
