//! External fragmentation heuristic over the free list.

/// Share of free memory held in "small" free blocks, in percent.
///
/// A free block is small when it is less than half the size of the largest
/// free block. The result is `0.0` when there is no free memory at all. The
/// value is purely diagnostic; allocation decisions never consult it.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn fragmentation_pct<I>(sizes: I) -> f64
where
    I: Iterator<Item = usize> + Clone,
{
    let largest = sizes.clone().max().unwrap_or(0);
    let threshold = largest / 2;
    let (small, total) = sizes.fold((0_usize, 0_usize), |(small, total), size| {
        let small = if size < threshold { small + size } else { small };
        (small, total + size)
    });
    if total == 0 {
        return 0.0;
    }
    100.0 * small as f64 / total as f64
}
