/// Counters describing the state of an allocator.
///
/// `bytes_allocated + bytes_free` always equals the arena length, headers
/// and internal fragmentation included.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AllocatorStats {
    /// Successful allocations, including those made by `resize`.
    pub alloc_count: usize,
    /// Successful releases, including those made by `resize`.
    pub release_count: usize,
    /// Bytes held by allocated blocks.
    pub bytes_allocated: usize,
    /// Bytes held by free blocks.
    pub bytes_free: usize,
    /// Fragmentation metric as of the last release or shrink.
    pub fragmentation_pct: f64,
}
