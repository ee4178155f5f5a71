//! Block geometry shared by every part of the allocator.
//!
//! Every block starts with a 16-byte header slot made of two little-endian
//! 64-bit words:
//!
//! ```text
//! Allocated block:                       Free block:
//! ┌──────────┬──────────┬─────────────┐  ┌──────────┬──────────┬──────────┐
//! │ size     │ tag      │ payload ... │  │ size     │ next     │ unused   │
//! └──────────┴──────────┴─────────────┘  └──────────┴──────────┴──────────┘
//!  0          8          16               0          8          16
//! ```
//!
//! `size` always counts the whole block, header included.

/// Granularity of every request and every block boundary.
pub const ALIGNMENT: usize = 8;

/// Bytes reserved in front of each allocated payload.
pub const HEADER_SIZE: usize = 16;

/// Smallest block that can be linked into the free list.
pub const FREE_NODE_SIZE: usize = 16;

/// Validity marker stored in the second header word of allocated blocks.
///
/// The value is odd, so it can never collide with a free-list link, which is
/// either an aligned offset or [`NO_LINK`].
pub const BLOCK_TAG: u64 = 0x0BAD_CAFE_F00D_D00D;

/// Encoding of the end of the free list in a free node's link word.
pub(crate) const NO_LINK: u64 = u64::MAX;

const _: () = assert!(BLOCK_TAG % 2 == 1);
const _: () = assert!(HEADER_SIZE.is_multiple_of(ALIGNMENT));
const _: () = assert!(FREE_NODE_SIZE.is_multiple_of(ALIGNMENT));

/// Rounds `n` up to the next multiple of [`ALIGNMENT`].
///
/// Returns `None` on overflow.
#[must_use]
pub const fn align_up(n: usize) -> Option<usize> {
    n.checked_next_multiple_of(ALIGNMENT)
}

/// Total block size (header included) needed to serve a `request`-byte
/// payload.
///
/// Returns `None` if the computation overflows.
#[must_use]
pub const fn block_size(request: usize) -> Option<usize> {
    match align_up(request) {
        Some(aligned) => aligned.checked_add(HEADER_SIZE),
        None => None,
    }
}
