//! Path Resolver (§4.4): traversal-safe canonicalization against the root fd.
//!
//! This is the slow, safe path. The common case (§4.8) opens files directly
//! against the root fd and trusts the kernel's own `..`/symlink resolution;
//! this module exists for the retry the handler takes (§4.6 step 3) when a
//! direct lookup misses and the request key contains `/../` — a cheap signal
//! that someone is probing for traversal. It canonicalizes the full absolute
//! path and requires the document root to be a strict byte-prefix of it.

use std::path::{Path, PathBuf};

use nix::fcntl::{OFlag, openat};
use nix::sys::stat::{Mode, SFlag};

use crate::error::ServeError;
use crate::fd::RootDir;

/// Outcome of resolving a request key against the document root.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A regular file exists at this root-relative path.
    File {
        /// Path relative to the root, usable with `openat`/`fstatat`.
        relative_path: String,
    },
    /// The key names a directory with no index file inside it; render a
    /// directory listing instead of serving a file.
    Directory {
        /// The root-relative directory path (may be empty for the root itself).
        relative_path: String,
    },
}

/// Resolves `key` (already stripped of leading `/`) against `root`,
/// following symlinks and collapsing `..` before checking that the result
/// lies strictly inside the root. This is the slow, safe path (§4.4): full
/// `/proc/self/fd` canonicalization plus a strict byte-prefix check.
///
/// # Errors
///
/// Returns [`ServeError::NotFound`] on a missing path, a permission error
/// reading metadata, or a canonical path that escapes the root.
pub fn resolve(root: &RootDir, key: &str, index_html: &str) -> Result<Resolved, ServeError> {
    resolve_inner(root, key, index_html, true)
}

/// The fast path (§4.4, §4.8): opens directly against the root fd and trusts
/// the kernel's own `..`/symlink resolution, without canonicalizing. Callers
/// fall back to [`resolve`] only on an `ENOENT` miss whose key contains
/// `/../`, a cheap signal worth the extra syscalls.
///
/// # Errors
///
/// Returns [`ServeError::NotFound`] on a missing path or a permission error
/// reading metadata.
pub fn resolve_fast(root: &RootDir, key: &str, index_html: &str) -> Result<Resolved, ServeError> {
    resolve_inner(root, key, index_html, false)
}

fn resolve_inner(
    root: &RootDir,
    key: &str,
    index_html: &str,
    verify: bool,
) -> Result<Resolved, ServeError> {
    let initial = if key.is_empty() { "." } else { key };

    let path_fd = open_path_fd(root, initial).map_err(|_| ServeError::not_found(key))?;
    let is_dir = nix::sys::stat::fstat(&path_fd)
        .map(|st| SFlag::from_bits_truncate(st.st_mode).contains(SFlag::S_IFDIR))
        .map_err(|_| ServeError::not_found(key))?;

    if !is_dir {
        if verify {
            let canonical =
                canonicalize_via_proc(&path_fd).map_err(|_| ServeError::not_found(key))?;
            check_prefix(root.path(), &canonical, key)?;
        }
        return Ok(Resolved::File {
            relative_path: initial.to_string(),
        });
    }

    let index_rel = if initial == "." {
        index_html.to_string()
    } else {
        format!("{initial}/{index_html}")
    };

    match open_path_fd(root, &index_rel) {
        Ok(index_fd) => {
            if verify {
                let canonical =
                    canonicalize_via_proc(&index_fd).map_err(|_| ServeError::not_found(key))?;
                check_prefix(root.path(), &canonical, key)?;
            }
            Ok(Resolved::File {
                relative_path: index_rel,
            })
        }
        Err(nix::Error::ENOENT) => {
            if verify {
                let canonical =
                    canonicalize_via_proc(&path_fd).map_err(|_| ServeError::not_found(key))?;
                check_prefix(root.path(), &canonical, key)?;
            }
            Ok(Resolved::Directory {
                relative_path: if initial == "." {
                    String::new()
                } else {
                    initial.to_string()
                },
            })
        }
        Err(_) => Err(ServeError::not_found(key)),
    }
}

fn open_path_fd(root: &RootDir, rel: &str) -> Result<std::os::fd::OwnedFd, nix::Error> {
    openat(
        root.as_fd(),
        rel,
        OFlag::O_PATH | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
}

/// Reads the kernel-canonical path of an open fd via `/proc/self/fd/<n>`,
/// the same trick `realpathat`-style helpers use to canonicalize without a
/// second, racy, string-based lookup.
fn canonicalize_via_proc(fd: &std::os::fd::OwnedFd) -> std::io::Result<PathBuf> {
    use std::os::fd::AsRawFd;
    std::fs::read_link(format!("/proc/self/fd/{}", fd.as_raw_fd()))
}

fn check_prefix(root: &Path, candidate: &Path, key: &str) -> Result<(), ServeError> {
    let root_bytes = root.as_os_str().as_encoded_bytes();
    let candidate_bytes = candidate.as_os_str().as_encoded_bytes();

    let strictly_inside = candidate_bytes.starts_with(root_bytes)
        && candidate_bytes
            .get(root_bytes.len())
            .is_some_and(|&b| b == b'/');

    if strictly_inside {
        Ok(())
    } else {
        Err(ServeError::not_found(key))
    }
}

/// Strips leading `/` characters from a request URL, per §4.4/§4.6 step 1.
#[must_use]
pub fn strip_leading_slashes(url: &str) -> &str {
    url.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn doc_root() -> (tempfile::TempDir, RootDir) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), b"hello\n").unwrap();
        fs::write(dir.path().join("index.html"), b"<h>root</h>").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let root = RootDir::open(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn resolves_plain_file() {
        let (_dir, root) = doc_root();
        match resolve(&root, "hello.txt", "index.html").unwrap() {
            Resolved::File { relative_path } => assert_eq!(relative_path, "hello.txt"),
            other => panic!("expected File, got {other:?}"),
        }
    }

    #[test]
    fn empty_key_resolves_to_index() {
        let (_dir, root) = doc_root();
        match resolve(&root, "", "index.html").unwrap() {
            Resolved::File { relative_path } => assert_eq!(relative_path, "index.html"),
            other => panic!("expected File, got {other:?}"),
        }
    }

    #[test]
    fn directory_without_index_yields_listing() {
        let (_dir, root) = doc_root();
        match resolve(&root, "sub", "index.html").unwrap() {
            Resolved::Directory { relative_path } => assert_eq!(relative_path, "sub"),
            other => panic!("expected Directory, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_dir, root) = doc_root();
        assert!(resolve(&root, "nope.txt", "index.html").is_err());
    }

    #[test]
    fn traversal_above_root_is_rejected() {
        let (_dir, root) = doc_root();
        // Escapes above the temp dir into its parent; must never resolve inside root.
        let result = resolve(&root, "../../../../../../etc/passwd", "index.html");
        assert!(result.is_err());
    }

    #[test]
    fn fast_path_skips_canonicalization_but_still_finds_files() {
        let (_dir, root) = doc_root();
        match resolve_fast(&root, "hello.txt", "index.html").unwrap() {
            Resolved::File { relative_path } => assert_eq!(relative_path, "hello.txt"),
            other => panic!("expected File, got {other:?}"),
        }
    }

    #[test]
    fn strips_all_leading_slashes() {
        assert_eq!(strip_leading_slashes("///a/b"), "a/b");
        assert_eq!(strip_leading_slashes(""), "");
    }
}
