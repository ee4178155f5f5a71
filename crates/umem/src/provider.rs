//! Sources of the zero-initialized byte region backing an arena.
//!
//! The allocator asks its provider for memory exactly once per arena
//! lifetime and never gives it back before the arena is discarded.

use snafu::{ResultExt as _, Snafu};
use snafu_utils::{Locate, Location};

/// Errors reported by a [`MemoryProvider`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReserveError {
    #[snafu(display("could not reserve {size} zeroed bytes on the heap"))]
    HeapExhausted {
        size: usize,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: std::collections::TryReserveError,
    },
    #[cfg(unix)]
    #[snafu(display("anonymous mapping of {size} bytes failed"))]
    Map {
        size: usize,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: std::io::Error,
    },
}

impl Locate for ReserveError {
    fn location(&self) -> Option<Location> {
        match self {
            Self::HeapExhausted { location, .. } => Some(*location),
            #[cfg(unix)]
            Self::Map { location, .. } => Some(*location),
        }
    }
}

/// Supplier of the single memory region an arena manages.
pub trait MemoryProvider {
    /// Region handed out by [`reserve`](Self::reserve).
    type Region: AsRef<[u8]> + AsMut<[u8]>;

    /// Reserves `len` zero-initialized bytes.
    fn reserve(&mut self, len: usize) -> Result<Self::Region, ReserveError>;
}

/// Provider backed by the global Rust allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapProvider;

impl MemoryProvider for HeapProvider {
    type Region = Box<[u8]>;

    fn reserve(&mut self, len: usize) -> Result<Self::Region, ReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .context(HeapExhaustedSnafu { size: len })?;
        buf.resize(len, 0);
        Ok(buf.into_boxed_slice())
    }
}

#[cfg(unix)]
pub use self::mmap::{MmapProvider, MmapRegion};

#[cfg(unix)]
mod mmap {
    use core::ptr::{self, NonNull};

    use snafu::IntoError as _;

    use super::{MapSnafu, MemoryProvider, ReserveError};

    /// Provider mapping private anonymous pages, the user-space equivalent
    /// of mapping `/dev/zero`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct MmapProvider;

    /// A private anonymous mapping, unmapped on drop.
    #[derive(Debug)]
    pub struct MmapRegion {
        ptr: NonNull<u8>,
        len: usize,
    }

    impl MemoryProvider for MmapProvider {
        type Region = MmapRegion;

        fn reserve(&mut self, len: usize) -> Result<Self::Region, ReserveError> {
            if len == 0 {
                return Ok(MmapRegion {
                    ptr: NonNull::dangling(),
                    len: 0,
                });
            }

            // SAFETY: a fresh anonymous mapping aliases no existing memory.
            let addr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            let ptr = if addr == libc::MAP_FAILED {
                None
            } else {
                NonNull::new(addr.cast::<u8>())
            };
            let Some(ptr) = ptr else {
                return Err(MapSnafu { size: len }.into_error(std::io::Error::last_os_error()));
            };
            log::debug!("mapped {len} bytes at {ptr:p}");
            Ok(MmapRegion { ptr, len })
        }
    }

    impl AsRef<[u8]> for MmapRegion {
        fn as_ref(&self) -> &[u8] {
            // SAFETY: the mapping is readable for `len` bytes until drop.
            unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
        }
    }

    impl AsMut<[u8]> for MmapRegion {
        fn as_mut(&mut self) -> &mut [u8] {
            // SAFETY: the mapping is writable, exclusively owned and lives
            // for `len` bytes until drop.
            unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
        }
    }

    impl Drop for MmapRegion {
        fn drop(&mut self) {
            if self.len == 0 {
                return;
            }
            // SAFETY: `ptr..ptr + len` is the mapping created in `reserve`.
            let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
            if rc != 0 {
                log::warn!(
                    "munmap({:p}, {}) failed: {}",
                    self.ptr,
                    self.len,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}
