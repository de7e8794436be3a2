//! Cache Entry Variants (§3, §4.8): the three transmission strategies.

use std::num::NonZeroUsize;
use std::os::fd::AsFd;

use nix::sys::mman::{MapFlags, MmapAdvise, ProtFlags, madvise, mmap, munmap};
use nix::sys::stat::FileStat;
use tracing::warn;

use crate::error::ServeError;
use crate::fd::{OpenModeFlags, RootDir, open_bounded};

/// Bytes below which a file is served from an in-memory copy rather than
/// kernel zero-copy (§4.8).
pub const IN_MEMORY_THRESHOLD: u64 = 16_384;

/// Wire cost of the `Content-Encoding: deflate` header; a compressed body is
/// only worth sending if it beats the uncompressed one by more than this.
pub const DEFLATE_HEADER_COST: usize = "Content-Encoding: deflate".len();

/// One of the three immutable, stable-for-lifetime transmission strategies.
#[derive(Debug)]
pub enum CacheEntryKind {
    /// Small file, held fully in memory with an optional pre-compressed copy.
    InMemory {
        /// Raw file bytes.
        uncompressed: Vec<u8>,
        /// Deflate-compressed bytes, kept only when it strictly wins (§3 invariant).
        compressed: Option<Vec<u8>>,
    },
    /// Large file, served via kernel zero-copy; the fd is opened per-serve.
    ZeroCopy {
        /// Path relative to the document root, reopened on each serve.
        relative_path: String,
        /// File size in bytes at entry-construction time.
        size: u64,
    },
    /// Pre-rendered directory listing.
    DirectoryListing {
        /// Rendered HTML body.
        rendered: Vec<u8>,
    },
}

/// A cache entry: immutable after construction (§3).
#[derive(Debug)]
pub struct CacheEntry {
    /// Request-relative key this entry was constructed for.
    pub key: String,
    /// `Last-Modified` as both its RFC-formatted string and epoch seconds.
    pub last_modified: (String, i64),
    /// MIME type for the `Content-Type` header.
    pub mime_type: String,
    /// The selected strategy and its payload.
    pub kind: CacheEntryKind,
    /// Total content size in bytes (body length for a full GET).
    pub size: u64,
    /// True for entries constructed on the fast-fallback path and never
    /// entered into the cache index (§3, §4.5).
    pub floating: bool,
}

impl CacheEntry {
    /// Constructs an entry by stat-ing `relative_path` and selecting the
    /// strategy per §4.8. `is_directory_listing_target` selects the
    /// directory-listing branch directly, for when the caller (the handler
    /// or the path resolver) has already determined an index file is absent.
    pub fn construct(
        root: &RootDir,
        key: &str,
        relative_path: &str,
        is_directory_listing_target: bool,
        mime_hint: impl FnOnce(&str) -> String,
        render_listing: impl FnOnce(&RootDir, &str, &str) -> Result<Vec<u8>, ServeError>,
    ) -> Result<Self, ServeError> {
        if is_directory_listing_target {
            let rendered = render_listing(root, relative_path, key)?;
            let last_modified = now_as_last_modified();
            return Ok(Self {
                key: key.to_string(),
                last_modified,
                mime_type: "text/html".to_string(),
                size: rendered.len() as u64,
                kind: CacheEntryKind::DirectoryListing { rendered },
                floating: false,
            });
        }

        let stat = fstatat_rel(root, relative_path).map_err(|_| ServeError::not_found(key))?;
        let size = stat.st_size.max(0) as u64;
        let last_modified = (
            crate::serve::headers::format_rfc_date(stat.st_mtime),
            stat.st_mtime,
        );
        let mime_type = mime_hint(relative_path);

        let kind = if size < IN_MEMORY_THRESHOLD {
            Self::build_in_memory(root, relative_path, size)?
        } else {
            CacheEntryKind::ZeroCopy {
                relative_path: relative_path.to_string(),
                size,
            }
        };

        Ok(Self {
            key: key.to_string(),
            last_modified,
            mime_type,
            size,
            kind,
            floating: false,
        })
    }

    /// Builds a stat-only zero-copy entry for the task-bound floating
    /// fallback path (§4.6 step 2): never in-memory, regardless of size.
    pub fn construct_floating_zero_copy(
        root: &RootDir,
        key: &str,
        relative_path: &str,
        mime_hint: impl FnOnce(&str) -> String,
    ) -> Result<Self, ServeError> {
        let stat = fstatat_rel(root, relative_path).map_err(|_| ServeError::not_found(key))?;
        let size = stat.st_size.max(0) as u64;
        Ok(Self {
            key: key.to_string(),
            last_modified: (
                crate::serve::headers::format_rfc_date(stat.st_mtime),
                stat.st_mtime,
            ),
            mime_type: mime_hint(relative_path),
            size,
            kind: CacheEntryKind::ZeroCopy {
                relative_path: relative_path.to_string(),
                size,
            },
            floating: true,
        })
    }

    fn build_in_memory(
        root: &RootDir,
        relative_path: &str,
        size: u64,
    ) -> Result<CacheEntryKind, ServeError> {
        let uncompressed = read_via_mmap(root, relative_path, size)
            .map_err(|e| ServeError::forbidden(relative_path, e))?;
        let compressed = compress_if_worthwhile(&uncompressed);
        Ok(CacheEntryKind::InMemory {
            uncompressed,
            compressed,
        })
    }
}

fn fstatat_rel(root: &RootDir, relative_path: &str) -> Result<FileStat, nix::Error> {
    nix::sys::stat::fstatat(
        root.as_fd(),
        relative_path,
        nix::fcntl::AtFlags::empty(),
    )
}

/// Opens, mmaps, advises, and copies a small file's contents into an owned
/// buffer (§4.8: "maps it read-only shared, advises the kernel the pages
/// will be needed, copies size"). The mapping is torn down immediately after
/// the copy; nothing retains it.
fn read_via_mmap(root: &RootDir, relative_path: &str, size: u64) -> std::io::Result<Vec<u8>> {
    if size == 0 {
        // mmap rejects zero-length mappings; an empty file has no content to copy.
        return Ok(Vec::new());
    }

    let fd = block_on_open(root, relative_path)?;

    let Some(len) = NonZeroUsize::new(size as usize) else {
        // size == 0 already returned above; a nonsensical size here is a stat/mmap mismatch.
        return Err(std::io::Error::other("zero-length mapping"));
    };
    // SAFETY: `fd` is a valid, open, readable fd for the duration of the mapping below.
    let ptr = unsafe {
        mmap(
            None,
            len,
            ProtFlags::PROT_READ,
            MapFlags::MAP_SHARED,
            fd.as_fd(),
            0,
        )
    }
    .map_err(std::io::Error::from)?;

    // SAFETY: `ptr`/`len` describe the mapping created above.
    if let Err(e) = unsafe { madvise(ptr, len.get(), MmapAdvise::MADV_WILLNEED) } {
        warn!(error = %e, path = relative_path, "madvise failed, continuing without hint");
    }

    // SAFETY: the mapping is readable for `size` bytes and outlives this slice.
    let data = unsafe { std::slice::from_raw_parts(ptr.as_ptr().cast::<u8>(), size as usize) }
        .to_vec();

    // SAFETY: `ptr`/`len` are exactly what `mmap` returned above.
    unsafe { munmap(ptr, len.get()) }.map_err(std::io::Error::from)?;

    Ok(data)
}

/// The fd-bounded open helper is async (it can yield on `EMFILE`); entry
/// construction runs synchronously inside task code that has already
/// suspended once if needed, so a tiny inline block-on is sufficient here —
/// this never races the event loop because it only resumes when the open
/// future itself resolves, which happens on the polling thread.
fn block_on_open(
    root: &RootDir,
    relative_path: &str,
) -> std::io::Result<std::os::fd::OwnedFd> {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    fn noop(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    let raw = RawWaker::new(std::ptr::null(), &VTABLE);
    let waker = unsafe { Waker::from_raw(raw) };
    let mut cx = Context::from_waker(&waker);

    let mut fut = open_bounded(root, relative_path, OpenModeFlags::new(true));
    loop {
        match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(result) => return result.map_err(std::io::Error::from),
            Poll::Pending => crate::fd::wake_parked_opens(),
        }
    }
}

fn compress_if_worthwhile(uncompressed: &[u8]) -> Option<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(uncompressed).ok()?;
    let compressed = encoder.finish().ok()?;

    if compressed.len() + DEFLATE_HEADER_COST < uncompressed.len() {
        Some(compressed)
    } else {
        None
    }
}

fn now_as_last_modified() -> (String, i64) {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (crate::serve::headers::format_rfc_date(epoch), epoch)
}
