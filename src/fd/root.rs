//! The process-scoped document-root directory descriptor.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;

/// Document root: an absolute path plus a directory fd opened once and kept
/// for the life of the process. All per-request opens happen relative to
/// this fd via `openat`, so the root is never re-resolved from a string.
#[derive(Debug)]
pub struct RootDir {
    fd: OwnedFd,
    /// Absolute, canonicalized path. Used only for the byte-prefix check in
    /// the path resolver; never reopened.
    path: PathBuf,
}

impl RootDir {
    /// Opens `path` as the document root.
    ///
    /// # Errors
    ///
    /// Returns the underlying `nix::Error` if `path` cannot be opened as a
    /// directory, or if it cannot be canonicalized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, nix::Error> {
        let path = path.as_ref();
        let canonical = path.canonicalize().map_err(|_| nix::Error::ENOENT)?;
        let fd = open(
            &canonical,
            OFlag::O_DIRECTORY | OFlag::O_RDONLY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )?;
        Ok(Self {
            fd,
            path: canonical,
        })
    }

    /// Borrowed fd usable with `openat`/`fstatat`-family calls.
    #[must_use]
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Raw fd, for epoll registration bookkeeping and diagnostics only.
    #[must_use]
    pub fn as_raw_fd(&self) -> i32 {
        self.fd.as_raw_fd()
    }

    /// The canonical absolute root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = RootDir::open(dir.path()).unwrap();
        assert_eq!(root.path(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn rejects_missing_directory() {
        let result = RootDir::open("/this/path/does/not/exist/hopefully");
        assert!(result.is_err());
    }
}
