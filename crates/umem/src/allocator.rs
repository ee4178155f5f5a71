//! The allocation, release and resize engines.

use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    arena::Arena,
    block::{BlockHeader, BlockInfo, BlockState, Handle},
    error::{
        ArenaTooSmallSnafu, CorruptionSnafu, DoubleReleaseSnafu, InconsistentSnafu,
        InvalidHandleSnafu, NotInitializedSnafu, ReleasedSnafu, ReserveSnafu, UmemError,
    },
    fragmentation::fragmentation_pct,
    free_list::{FreeBlock, FreeList},
    layout::{ALIGNMENT, FREE_NODE_SIZE, HEADER_SIZE, block_size},
    policy::Policy,
    provider::{HeapProvider, MemoryProvider},
    stats::AllocatorStats,
};

/// A single-arena allocator with a configurable placement policy.
///
/// The allocator is inert until [`initialize`](Self::initialize) reserves
/// its arena from the [`MemoryProvider`]. From then on the arena never grows
/// and is only given back by [`reset`](Self::reset) or drop.
///
/// # Examples
///
/// ```
/// use umem::{Allocator, Policy};
///
/// let mut allocator = Allocator::default();
/// allocator.initialize(4096, Policy::BestFit)?;
///
/// let handle = allocator.allocate(100);
/// assert!(handle.is_some());
/// allocator.payload_mut(handle.unwrap())?[..5].copy_from_slice(b"hello");
///
/// let handle = allocator.resize(handle, 400)?;
/// assert_eq!(&allocator.payload(handle.unwrap())?[..5], b"hello");
///
/// allocator.release(handle)?;
/// assert_eq!(allocator.stats().bytes_free, 4096);
/// # Ok::<(), umem::UmemError>(())
/// ```
///
/// # Thread Safety
///
/// The allocator has no internal synchronization. Wrap it in a mutex to
/// share it between threads.
pub struct Allocator<P = HeapProvider>
where
    P: MemoryProvider,
{
    provider: P,
    state: Option<State<P::Region>>,
}

/// Everything that exists only while an arena is installed.
struct State<R> {
    arena: Arena<R>,
    free_list: FreeList,
    policy: Policy,
    cursor: Option<usize>,
    stats: AllocatorStats,
}

/// What a handle is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
enum Access {
    #[display("release")]
    Release,
    #[display("resize")]
    Resize,
    #[display("payload")]
    Payload,
}

impl Default for Allocator<HeapProvider> {
    fn default() -> Self {
        Self::new(HeapProvider)
    }
}

impl<P> Allocator<P>
where
    P: MemoryProvider,
{
    /// Creates an allocator that will take its arena from `provider`.
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self {
            provider,
            state: None,
        }
    }

    /// Reserves an arena of `size` bytes and installs it as one free block.
    ///
    /// Calling this on an initialized allocator does nothing and succeeds,
    /// whatever the arguments.
    pub fn initialize(&mut self, size: usize, policy: Policy) -> Result<(), UmemError> {
        if self.state.is_some() {
            log::debug!("initialize({size}, {policy}): already initialized");
            return Ok(());
        }
        ensure!(
            size >= FREE_NODE_SIZE,
            ArenaTooSmallSnafu {
                size,
                minimum: FREE_NODE_SIZE,
            }
        );

        let region = self.provider.reserve(size).context(ReserveSnafu)?;
        let mut arena = Arena::new(region);
        let len = arena.len();
        ensure!(
            len == size,
            InconsistentSnafu {
                reason: format!("provider returned {len} bytes instead of {size}"),
            }
        );
        let free_list = FreeList::with_block(&mut arena, 0, len);

        self.state = Some(State {
            arena,
            free_list,
            policy,
            cursor: None,
            stats: AllocatorStats {
                bytes_free: len,
                ..AllocatorStats::default()
            },
        });
        log::debug!("initialized a {len}-byte arena using {policy}");
        Ok(())
    }

    /// Drops the arena and clears every counter.
    ///
    /// Handles obtained before the reset must not be used afterwards.
    pub fn reset(&mut self) {
        if self.state.take().is_some() {
            log::debug!("arena discarded");
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Returns the placement policy chosen at initialization.
    #[must_use]
    pub fn policy(&self) -> Option<Policy> {
        self.state.as_ref().map(|s| s.policy)
    }

    /// Returns the arena length in bytes.
    #[must_use]
    pub fn arena_len(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.arena.len())
    }

    /// Allocates a block with room for at least `size` payload bytes.
    ///
    /// Returns `None` when `size` is zero, when no free block is large
    /// enough, or when the allocator is not initialized. A failed request
    /// leaves the arena untouched.
    pub fn allocate(&mut self, size: usize) -> Option<Handle> {
        if size == 0 {
            return None;
        }
        let Some(state) = self.state.as_mut() else {
            log::debug!("allocate({size}): allocator is not initialized");
            return None;
        };
        state.allocate(size)
    }

    /// Returns the block behind `handle` to the free list.
    ///
    /// Releasing `None` does nothing. Releasing a handle whose block is
    /// already free fails with [`UmemError::DoubleRelease`]; a handle whose
    /// header was overwritten fails with [`UmemError::Corruption`]. No state
    /// changes when an error is returned.
    pub fn release(&mut self, handle: Option<Handle>) -> Result<(), UmemError> {
        let Some(handle) = handle else {
            return Ok(());
        };
        let state = self.state.as_mut().context(NotInitializedSnafu)?;
        state.release(handle)
    }

    /// Changes the payload size of the block behind `handle`.
    ///
    /// - `None` handle: behaves as [`allocate`](Self::allocate).
    /// - `new_size == 0`: behaves as [`release`](Self::release) and returns
    ///   `None`.
    /// - Shrinking keeps the handle and returns the tail to the free list
    ///   when it is large enough to stand alone.
    /// - Growing releases the block first, then allocates `new_size` bytes
    ///   and copies the old payload over. If that fails the old payload size
    ///   is allocated again and the data restored there. If even that fails,
    ///   the data is lost and `None` is returned.
    pub fn resize(
        &mut self,
        handle: Option<Handle>,
        new_size: usize,
    ) -> Result<Option<Handle>, UmemError> {
        let Some(handle) = handle else {
            return Ok(self.allocate(new_size));
        };
        if new_size == 0 {
            self.release(Some(handle))?;
            return Ok(None);
        }
        let state = self.state.as_mut().context(NotInitializedSnafu)?;
        state.resize(handle, new_size)
    }

    /// Returns the payload bytes of a live block.
    pub fn payload(&self, handle: Handle) -> Result<&[u8], UmemError> {
        let state = self.state.as_ref().context(NotInitializedSnafu)?;
        let (offset, header) = state.locate(handle, Access::Payload)?;
        Ok(state.arena.bytes(offset + HEADER_SIZE..offset + header.size))
    }

    /// Returns the payload bytes of a live block for writing.
    pub fn payload_mut(&mut self, handle: Handle) -> Result<&mut [u8], UmemError> {
        let state = self.state.as_mut().context(NotInitializedSnafu)?;
        let (offset, header) = state.locate(handle, Access::Payload)?;
        Ok(state.arena.bytes_mut(offset + HEADER_SIZE..offset + header.size))
    }

    /// Returns the current counters. All zero before initialization.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        self.state.as_ref().map(|s| s.stats).unwrap_or_default()
    }

    /// Returns the sizes of the free blocks in address order.
    #[must_use]
    pub fn dump_free_list(&self) -> Vec<usize> {
        self.free_blocks().into_iter().map(|b| b.size).collect()
    }

    /// Returns the free blocks in address order.
    #[must_use]
    pub fn free_blocks(&self) -> Vec<FreeBlock> {
        self.state
            .as_ref()
            .map(|s| s.free_list.iter(&s.arena).collect())
            .unwrap_or_default()
    }

    /// Walks the arena from start to end, listing every block.
    pub fn blocks(&self) -> Result<Vec<BlockInfo>, UmemError> {
        self.state.as_ref().map_or_else(|| Ok(Vec::new()), State::walk)
    }

    /// Checks every structural invariant of the arena.
    ///
    /// - allocated and free blocks tile the arena exactly;
    /// - every allocated block carries a valid tag;
    /// - the free list is sorted and holds no adjacent or undersized blocks;
    /// - the byte counters add up to the arena length.
    pub fn validate(&self) -> Result<(), UmemError> {
        self.state.as_ref().map_or(Ok(()), State::validate)
    }
}

impl<R> State<R>
where
    R: AsRef<[u8]> + AsMut<[u8]>,
{
    fn allocate(&mut self, size: usize) -> Option<Handle> {
        let Some(needed) = block_size(size) else {
            log::debug!("allocate({size}): request size overflows");
            return None;
        };
        self.allocate_block(needed)
    }

    /// Carves a block of at least `needed` bytes, header included.
    fn allocate_block(&mut self, needed: usize) -> Option<Handle> {
        let Some(block) = self
            .policy
            .find(self.free_list.iter(&self.arena), needed, &mut self.cursor)
        else {
            log::debug!(
                "no free block of {needed} bytes ({}, {} bytes free)",
                self.policy,
                self.stats.bytes_free
            );
            return None;
        };

        let granted = self.free_list.split(&mut self.arena, block, needed);
        BlockHeader::allocated(granted).write(&mut self.arena, block.offset);
        self.stats.alloc_count += 1;
        self.stats.bytes_allocated += granted;
        self.stats.bytes_free -= granted;

        let handle = Handle::for_block(block.offset);
        log::trace!(
            "{handle}: {granted}-byte block at {:#x} chosen by {}",
            block.offset,
            self.policy
        );
        Some(handle)
    }

    fn release(&mut self, handle: Handle) -> Result<(), UmemError> {
        let (offset, header) = self.locate(handle, Access::Release)?;
        self.release_block(offset, header.size);
        log::trace!("release({handle}): freed {} bytes", header.size);
        Ok(())
    }

    fn release_block(&mut self, offset: usize, size: usize) {
        self.stats.release_count += 1;
        self.stats.bytes_allocated -= size;
        self.stats.bytes_free += size;
        let merged = self.free_list.insert_and_merge(&mut self.arena, offset, size);
        if merged.size != size {
            log::trace!(
                "block at {offset:#x} coalesced into {} bytes at {:#x}",
                merged.size,
                merged.offset
            );
        }
        self.refresh_fragmentation();
    }

    fn resize(&mut self, handle: Handle, new_size: usize) -> Result<Option<Handle>, UmemError> {
        let (offset, header) = self.locate(handle, Access::Resize)?;
        let old_size = header.size;
        // An unrepresentable size can only fail to grow.
        let needed = block_size(new_size).unwrap_or(usize::MAX);

        if needed <= old_size {
            let remainder = old_size - needed;
            if remainder >= FREE_NODE_SIZE {
                BlockHeader::allocated(needed).write(&mut self.arena, offset);
                self.stats.bytes_allocated -= remainder;
                self.stats.bytes_free += remainder;
                self.free_list
                    .insert_and_merge(&mut self.arena, offset + needed, remainder);
                log::trace!("resize({handle}, {new_size}): shrunk by {remainder} bytes");
            }
            self.refresh_fragmentation();
            return Ok(Some(handle));
        }

        let snapshot = self
            .arena
            .bytes(offset + HEADER_SIZE..offset + old_size)
            .to_vec();
        self.release_block(offset, old_size);

        // Restore by block size: an odd-sized arena tail has no payload size
        // that rounds back to it.
        let moved = self.allocate(new_size).or_else(|| {
            log::warn!("resize({handle}, {new_size}): cannot grow, restoring the old payload");
            self.allocate_block(old_size)
        });
        let Some(moved) = moved else {
            log::warn!(
                "resize({handle}, {new_size}): restore failed, {} bytes lost",
                snapshot.len()
            );
            return Ok(None);
        };
        let start = moved.offset();
        self.arena
            .bytes_mut(start..start + snapshot.len())
            .copy_from_slice(&snapshot);
        log::trace!("resize({handle}, {new_size}) -> {moved}");
        Ok(Some(moved))
    }

    /// Resolves `handle` to its block, rejecting anything that is not a live
    /// allocated block. Never mutates state.
    fn locate(&self, handle: Handle, access: Access) -> Result<(usize, BlockHeader), UmemError> {
        let arena_len = self.arena.len();
        let offset = handle
            .block_offset()
            .filter(|&o| o.is_multiple_of(ALIGNMENT) && o + HEADER_SIZE <= arena_len)
            .context(InvalidHandleSnafu {
                offset: handle.offset(),
                arena_len,
            })?;

        if let Some(free) = self.free_list.containing(&self.arena, offset) {
            log::error!(
                "{access}({handle}): block lies in free block {:#x}+{}",
                free.offset,
                free.size
            );
            return match access {
                Access::Release => DoubleReleaseSnafu { offset }.fail(),
                Access::Resize | Access::Payload => ReleasedSnafu { offset }.fail(),
            };
        }

        let header = BlockHeader::read(&self.arena, offset);
        if !header.is_valid() {
            log::error!(
                "{access}({handle}): invalid tag {:#018x} at {offset:#x}",
                header.tag
            );
            return CorruptionSnafu {
                offset,
                found: header.tag,
            }
            .fail();
        }
        ensure!(
            header.size >= HEADER_SIZE && header.size <= arena_len - offset,
            InconsistentSnafu {
                reason: format!("block {offset:#x} claims {} bytes", header.size),
            }
        );
        Ok((offset, header))
    }

    fn refresh_fragmentation(&mut self) {
        self.stats.fragmentation_pct =
            fragmentation_pct(self.free_list.iter(&self.arena).map(|b| b.size));
    }

    fn walk(&self) -> Result<Vec<BlockInfo>, UmemError> {
        let len = self.arena.len();
        let mut free = self.free_list.iter(&self.arena).peekable();
        let mut blocks = Vec::new();
        let mut offset = 0;
        while offset < len {
            if let Some(block) = free.next_if(|b| b.offset == offset) {
                ensure!(
                    block.size >= FREE_NODE_SIZE && block.size <= len - offset,
                    InconsistentSnafu {
                        reason: format!("free block {offset:#x} has bad size {}", block.size),
                    }
                );
                blocks.push(BlockInfo {
                    offset,
                    size: block.size,
                    state: BlockState::Free,
                });
                offset += block.size;
                continue;
            }

            ensure!(
                offset + HEADER_SIZE <= len,
                InconsistentSnafu {
                    reason: format!("{} trailing bytes at {offset:#x} form no block", len - offset),
                }
            );
            let header = BlockHeader::read(&self.arena, offset);
            ensure!(
                header.is_valid(),
                CorruptionSnafu {
                    offset,
                    found: header.tag,
                }
            );
            ensure!(
                header.size >= HEADER_SIZE && header.size <= len - offset,
                InconsistentSnafu {
                    reason: format!("block {offset:#x} claims {} bytes", header.size),
                }
            );
            blocks.push(BlockInfo {
                offset,
                size: header.size,
                state: BlockState::Allocated,
            });
            offset += header.size;
        }

        if let Some(stray) = free.next() {
            return InconsistentSnafu {
                reason: format!("free block {:#x} is not on a block boundary", stray.offset),
            }
            .fail();
        }
        Ok(blocks)
    }

    fn validate(&self) -> Result<(), UmemError> {
        let blocks = self.walk()?;

        let free: Vec<_> = self.free_list.iter(&self.arena).collect();
        for pair in free.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            ensure!(
                left.end() < right.offset,
                InconsistentSnafu {
                    reason: format!(
                        "free blocks {:#x}+{} and {:#x}+{} are out of order or unmerged",
                        left.offset, left.size, right.offset, right.size
                    ),
                }
            );
        }

        let free_bytes: usize = free.iter().map(|b| b.size).sum();
        let allocated_bytes: usize = blocks
            .iter()
            .filter(|b| b.state.is_allocated())
            .map(|b| b.size)
            .sum();
        let stats = &self.stats;
        ensure!(
            stats.bytes_free == free_bytes
                && stats.bytes_allocated == allocated_bytes
                && stats.bytes_allocated + stats.bytes_free == self.arena.len(),
            InconsistentSnafu {
                reason: format!(
                    "counters say {} allocated + {} free, arena has {allocated_bytes} + {free_bytes}",
                    stats.bytes_allocated, stats.bytes_free
                ),
            }
        );
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    /// Wraps an allocator, filling payloads with a pattern on allocation and
    /// checking it on release, and validating after every call.
    struct TestAllocator {
        allocator: Allocator,
    }

    impl TestAllocator {
        fn allocate(&mut self, size: usize) -> Option<Handle> {
            let handle = self.allocator.allocate(size)?;
            self.allocator.payload_mut(handle).unwrap()[..size].fill(0x33);
            self.allocator.validate().unwrap();
            Some(handle)
        }

        fn release(&mut self, handle: Handle, size: usize) {
            let payload = self.allocator.payload_mut(handle).unwrap();
            assert!(payload[..size].iter().all(|&b| b == 0x33));
            payload.fill(0x55);
            self.allocator.release(Some(handle)).unwrap();
            self.allocator.validate().unwrap();
        }

        fn free_list(&self) -> Vec<usize> {
            self.allocator.dump_free_list()
        }
    }

    fn with_test_allocator<F>(size: usize, policy: Policy, test_fn: F)
    where
        F: FnOnce(&mut TestAllocator),
    {
        let mut allocator = Allocator::default();
        allocator.initialize(size, policy).unwrap();
        test_fn(&mut TestAllocator { allocator });
    }

    #[test]
    fn test_initialize() {
        let mut allocator = Allocator::default();
        assert!(!allocator.is_initialized());
        allocator.initialize(4096, Policy::FirstFit).unwrap();
        assert!(allocator.is_initialized());
        assert_eq!(allocator.arena_len(), Some(4096));
        assert_eq!(allocator.policy(), Some(Policy::FirstFit));
        assert_eq!(allocator.dump_free_list(), [4096]);
        let stats = allocator.stats();
        assert_eq!(stats.bytes_free, 4096);
        assert_eq!(stats.bytes_allocated, 0);
        assert_eq!(stats.alloc_count, 0);
        assert!(stats.fragmentation_pct.abs() < f64::EPSILON);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut allocator = Allocator::default();
        allocator.initialize(4096, Policy::FirstFit).unwrap();
        let handle = allocator.allocate(100).unwrap();
        let before = allocator.stats();

        allocator.initialize(128, Policy::WorstFit).unwrap();
        assert_eq!(allocator.stats(), before);
        assert_eq!(allocator.arena_len(), Some(4096));
        assert_eq!(allocator.policy(), Some(Policy::FirstFit));
        allocator.release(Some(handle)).unwrap();
    }

    #[test]
    fn test_initialize_rejects_tiny_arena() {
        let mut allocator = Allocator::default();
        let err = allocator.initialize(8, Policy::FirstFit).unwrap_err();
        assert!(matches!(err, UmemError::ArenaTooSmall { size: 8, .. }));
        assert!(!allocator.is_initialized());
    }

    #[test]
    fn test_initialize_propagates_provider_failure() {
        let mut allocator = Allocator::default();
        let err = allocator.initialize(usize::MAX, Policy::FirstFit).unwrap_err();
        assert!(matches!(err, UmemError::Reserve { .. }));
        assert!(!err.is_fatal());
        assert!(!allocator.is_initialized());
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut allocator = Allocator::default();
        allocator.initialize(1024, Policy::BestFit).unwrap();
        allocator.allocate(64).unwrap();
        allocator.reset();
        assert!(!allocator.is_initialized());
        assert_eq!(allocator.stats(), AllocatorStats::default());
        assert!(allocator.dump_free_list().is_empty());

        allocator.initialize(512, Policy::NextFit).unwrap();
        assert_eq!(allocator.arena_len(), Some(512));
        assert_eq!(allocator.policy(), Some(Policy::NextFit));
    }

    #[test]
    fn test_uninitialized_allocator() {
        let mut allocator = Allocator::default();
        assert_eq!(allocator.allocate(16), None);
        allocator.release(None).unwrap();
        let handle = Handle::for_block(0);
        assert!(matches!(
            allocator.release(Some(handle)),
            Err(UmemError::NotInitialized { .. })
        ));
        allocator.validate().unwrap();
        assert!(allocator.blocks().unwrap().is_empty());
    }

    #[test]
    fn test_basic_allocation() {
        with_test_allocator(4096, Policy::FirstFit, |a| {
            let ptr1 = a.allocate(512).unwrap();
            let ptr2 = a.allocate(1024).unwrap();
            let ptr3 = a.allocate(256).unwrap();
            assert!(ptr1 < ptr2 && ptr2 < ptr3);
            assert_eq!(ptr1.offset(), HEADER_SIZE);
            assert_eq!(a.free_list(), [4096 - 528 - 1040 - 272]);

            a.release(ptr1, 512);
            a.release(ptr2, 1024);
            a.release(ptr3, 256);
            assert_eq!(a.free_list(), [4096]);

            a.allocate(128).unwrap();
            a.allocate(256).unwrap();
            assert_eq!(a.allocator.stats().bytes_allocated, 144 + 272);
        });
    }

    #[test]
    fn test_zero_size_allocation() {
        with_test_allocator(1024, Policy::FirstFit, |a| {
            let before = a.allocator.stats();
            assert_eq!(a.allocate(0), None);
            assert_eq!(a.allocator.stats(), before);
        });
    }

    #[test]
    fn test_allocate_entire_arena() {
        with_test_allocator(1024, Policy::FirstFit, |a| {
            let ptr = a.allocate(1024 - HEADER_SIZE).unwrap();
            assert!(a.free_list().is_empty());
            assert_eq!(a.allocate(1), None);
            a.release(ptr, 1024 - HEADER_SIZE);
            assert_eq!(a.free_list(), [1024]);
        });
    }

    #[test]
    fn test_out_of_memory_leaves_state_alone() {
        with_test_allocator(128, Policy::BestFit, |a| {
            let before = a.allocator.stats();
            assert_eq!(a.allocate(256), None);
            assert_eq!(a.allocate(usize::MAX), None);
            assert_eq!(a.allocator.stats(), before);
            assert_eq!(a.free_list(), [128]);
        });
    }

    #[test]
    fn test_small_remainder_is_handed_out() {
        with_test_allocator(64, Policy::FirstFit, |a| {
            // 40-byte block leaves 24 bytes, enough for a free node.
            let ptr1 = a.allocate(24).unwrap();
            assert_eq!(a.free_list(), [24]);
            // 24 bytes needed out of 24: nothing left.
            let ptr2 = a.allocate(8).unwrap();
            assert!(a.free_list().is_empty());
            a.release(ptr2, 8);
            a.release(ptr1, 24);

            // 40 + 16 header leaves 8 bytes, too few to stay free.
            let ptr = a.allocate(40).unwrap();
            assert_eq!(a.allocator.payload(ptr).unwrap().len(), 64 - HEADER_SIZE);
            assert!(a.free_list().is_empty());
            assert_eq!(a.allocator.stats().bytes_allocated, 64);
        });
    }

    #[test]
    fn test_coalescing_in_either_order() {
        for reversed in [false, true] {
            with_test_allocator(256, Policy::FirstFit, |a| {
                let ptrs: Vec<_> = (0..4).map(|_| a.allocate(48).unwrap()).collect();
                assert!(a.free_list().is_empty());
                let (x, y) = if reversed {
                    (ptrs[2], ptrs[1])
                } else {
                    (ptrs[1], ptrs[2])
                };
                a.release(x, 48);
                a.release(y, 48);
                assert_eq!(a.free_list(), [128]);
                assert!(a.allocate(112).is_some());
            });
        }
    }

    #[test]
    fn test_fragmentation_and_allocation_failure() {
        with_test_allocator(256, Policy::FirstFit, |a| {
            let ptrs: Vec<_> = (0..4).map(|_| a.allocate(48).unwrap()).collect();
            a.release(ptrs[1], 48);
            a.release(ptrs[3], 48);
            assert_eq!(a.free_list(), [64, 64]);
            assert_eq!(a.allocate(112), None);
            a.release(ptrs[0], 48);
            a.release(ptrs[2], 48);
            assert_eq!(a.free_list(), [256]);
        });
    }

    #[test]
    fn test_double_release() {
        with_test_allocator(4096, Policy::FirstFit, |a| {
            let ptr = a.allocate(20).unwrap();
            a.allocator.release(Some(ptr)).unwrap();
            let before = a.allocator.stats();
            let err = a.allocator.release(Some(ptr)).unwrap_err();
            assert!(matches!(err, UmemError::DoubleRelease { offset: 0, .. }));
            assert!(err.is_fatal());
            assert_eq!(a.allocator.stats(), before);
            a.allocator.validate().unwrap();
        });
    }

    #[test]
    fn test_double_release_after_merge() {
        with_test_allocator(4096, Policy::FirstFit, |a| {
            let ptr1 = a.allocate(64).unwrap();
            let ptr2 = a.allocate(64).unwrap();
            a.release(ptr1, 64);
            a.release(ptr2, 64);
            // ptr2's block is now in the middle of a merged free block.
            let err = a.allocator.release(Some(ptr2)).unwrap_err();
            assert!(matches!(err, UmemError::DoubleRelease { .. }));
        });
    }

    #[test]
    fn test_corruption_is_detected() {
        with_test_allocator(1024, Policy::FirstFit, |a| {
            let ptr = a.allocate(64).unwrap();
            a.allocator.payload_mut(ptr).unwrap().fill(0);
            // A handle into the zero-filled payload finds no valid header.
            let bogus = Handle::from_offset(ptr.offset() + 24).unwrap();
            let before = a.allocator.stats();
            let err = a.allocator.release(Some(bogus)).unwrap_err();
            assert!(matches!(err, UmemError::Corruption { found: 0, .. }));
            assert!(err.is_fatal());
            assert!(matches!(
                a.allocator.resize(Some(bogus), 8),
                Err(UmemError::Corruption { .. })
            ));
            assert_eq!(a.allocator.stats(), before);
        });
    }

    #[test]
    fn test_overwritten_tag_is_detected() {
        with_test_allocator(1024, Policy::FirstFit, |a| {
            let ptr1 = a.allocate(64).unwrap();
            let ptr2 = a.allocate(64).unwrap();
            // Simulate a buffer overrun from ptr1 into ptr2's header.
            let state = a.allocator.state.as_mut().unwrap();
            let header = ptr2.block_offset().unwrap();
            state.arena.write_word(header + 8, 0xDEAD_BEEF);
            let err = a.allocator.release(Some(ptr2)).unwrap_err();
            assert!(matches!(err, UmemError::Corruption { found: 0xDEAD_BEEF, .. }));
            assert!(matches!(a.allocator.validate(), Err(UmemError::Corruption { .. })));
            a.allocator.release(Some(ptr1)).unwrap();
        });
    }

    #[test]
    fn test_invalid_handles() {
        with_test_allocator(256, Policy::FirstFit, |a| {
            let outside = Handle::from_offset(4096).unwrap();
            assert!(matches!(
                a.allocator.release(Some(outside)),
                Err(UmemError::InvalidHandle { .. })
            ));
            let unaligned = Handle::from_offset(HEADER_SIZE + 3).unwrap();
            assert!(matches!(
                a.allocator.payload(unaligned),
                Err(UmemError::InvalidHandle { .. })
            ));
            let before_header = Handle::from_offset(8).unwrap();
            assert!(matches!(
                a.allocator.release(Some(before_header)),
                Err(UmemError::InvalidHandle { .. })
            ));
        });
    }

    #[test]
    fn test_released_payload_is_rejected() {
        with_test_allocator(256, Policy::FirstFit, |a| {
            let ptr = a.allocate(32).unwrap();
            a.release(ptr, 32);
            assert!(matches!(
                a.allocator.payload(ptr),
                Err(UmemError::Released { .. })
            ));
            let err = a.allocator.resize(Some(ptr), 64).unwrap_err();
            assert!(matches!(err, UmemError::Released { .. }));
            assert!(err.is_fatal());
            assert!(a.allocator.payload(ptr).unwrap_err().is_fatal());
        });
    }

    #[test]
    fn test_resize_null_and_zero() {
        with_test_allocator(1024, Policy::BestFit, |a| {
            let ptr = a.allocator.resize(None, 100).unwrap().unwrap();
            assert_eq!(a.allocator.stats().alloc_count, 1);
            assert_eq!(a.allocator.resize(Some(ptr), 0).unwrap(), None);
            assert_eq!(a.allocator.stats().release_count, 1);
            assert_eq!(a.free_list(), [1024]);
            assert_eq!(a.allocator.resize(None, 0).unwrap(), None);
        });
    }

    #[test]
    fn test_shrink_keeps_handle() {
        with_test_allocator(1024, Policy::FirstFit, |a| {
            let ptr = a.allocate(200).unwrap();
            let guard = a.allocate(8).unwrap();
            a.allocator.payload_mut(ptr).unwrap()[..4].copy_from_slice(b"umem");

            // 200 + 16 = 216 -> 64 + 16 = 80: 136 bytes come back.
            let shrunk = a.allocator.resize(Some(ptr), 64).unwrap();
            assert_eq!(shrunk, Some(ptr));
            assert_eq!(&a.allocator.payload(ptr).unwrap()[..4], b"umem");
            assert_eq!(a.free_list(), [136, 1024 - 216 - 24]);
            a.allocator.validate().unwrap();

            // Shrinking by less than a free node is a no-op.
            assert_eq!(a.allocator.resize(Some(ptr), 60).unwrap(), Some(ptr));
            assert_eq!(a.allocator.payload(ptr).unwrap().len(), 64);
            a.release(guard, 8);
        });
    }

    #[test]
    fn test_shrink_merges_with_free_neighbor() {
        with_test_allocator(1024, Policy::FirstFit, |a| {
            let ptr = a.allocate(200).unwrap();
            let shrunk = a.allocator.resize(Some(ptr), 8).unwrap();
            assert_eq!(shrunk, Some(ptr));
            assert_eq!(a.free_list(), [1024 - 24]);
            a.allocator.validate().unwrap();
        });
    }

    #[test]
    fn test_grow_in_place_after_release() {
        with_test_allocator(1024, Policy::FirstFit, |a| {
            let ptr = a.allocate(100).unwrap();
            a.allocator.payload_mut(ptr).unwrap()[..100]
                .iter_mut()
                .zip(0_u8..)
                .for_each(|(b, v)| *b = v);

            let grown = a.allocator.resize(Some(ptr), 500).unwrap().unwrap();
            assert_eq!(grown, ptr);
            let payload = a.allocator.payload(grown).unwrap();
            assert!(payload.len() >= 500);
            assert!(payload[..100].iter().copied().eq(0_u8..100));
            let stats = a.allocator.stats();
            assert_eq!(stats.alloc_count, 2);
            assert_eq!(stats.release_count, 1);
        });
    }

    #[test]
    fn test_grow_moves_block() {
        with_test_allocator(1024, Policy::FirstFit, |a| {
            let ptr = a.allocate(64).unwrap();
            let guard = a.allocate(8).unwrap();
            a.allocator.payload_mut(ptr).unwrap().fill(0xAB);

            let grown = a.allocator.resize(Some(ptr), 256).unwrap().unwrap();
            assert_ne!(grown, ptr);
            let payload = a.allocator.payload(grown).unwrap();
            assert!(payload[..64].iter().all(|&b| b == 0xAB));
            assert_eq!(a.free_list()[0], 80);
            a.release(guard, 8);
        });
    }

    #[test]
    fn test_failed_grow_restores_payload() {
        with_test_allocator(256, Policy::FirstFit, |a| {
            let ptr = a.allocate(64).unwrap();
            let guard = a.allocate(8).unwrap();
            a.allocator.payload_mut(ptr).unwrap().copy_from_slice(&[7; 64]);

            let restored = a.allocator.resize(Some(ptr), 1000).unwrap().unwrap();
            assert_eq!(a.allocator.payload(restored).unwrap(), &[7; 64]);
            a.allocator.validate().unwrap();
            a.release(guard, 8);
        });
    }

    #[test]
    fn test_failed_grow_restores_odd_sized_tail() {
        with_test_allocator(65, Policy::FirstFit, |a| {
            // the 9 byte remainder is too small to split off
            let ptr = a.allocate(40).unwrap();
            assert_eq!(a.allocator.payload(ptr).unwrap().len(), 49);
            let pattern: Vec<u8> = (0..49).collect();
            a.allocator.payload_mut(ptr).unwrap().copy_from_slice(&pattern);

            let restored = a.allocator.resize(Some(ptr), 100).unwrap().unwrap();
            assert_eq!(restored, ptr);
            assert_eq!(a.allocator.payload(restored).unwrap(), pattern.as_slice());
            assert!(a.allocator.free_blocks().is_empty());
            a.allocator.validate().unwrap();
        });
    }

    #[test]
    fn test_blocks_walk() {
        with_test_allocator(512, Policy::FirstFit, |a| {
            let ptr1 = a.allocate(48).unwrap();
            let _ptr2 = a.allocate(16).unwrap();
            a.release(ptr1, 48);
            let blocks = a.allocator.blocks().unwrap();
            assert_eq!(
                blocks,
                [
                    BlockInfo {
                        offset: 0,
                        size: 64,
                        state: BlockState::Free
                    },
                    BlockInfo {
                        offset: 64,
                        size: 32,
                        state: BlockState::Allocated
                    },
                    BlockInfo {
                        offset: 96,
                        size: 416,
                        state: BlockState::Free
                    },
                ]
            );
        });
    }
}
