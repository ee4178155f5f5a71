use core::ops::Range;

/// The byte region managed by one allocator instance.
///
/// All positions are byte offsets from the start of the region. Block
/// metadata is stored in place as little-endian 64-bit words.
pub(crate) struct Arena<R> {
    region: R,
}

impl<R> Arena<R>
where
    R: AsRef<[u8]> + AsMut<[u8]>,
{
    pub(crate) fn new(region: R) -> Self {
        Self { region }
    }

    pub(crate) fn len(&self) -> usize {
        self.region.as_ref().len()
    }

    pub(crate) fn read_word(&self, offset: usize) -> u64 {
        let mut word = [0; 8];
        word.copy_from_slice(&self.region.as_ref()[offset..offset + 8]);
        u64::from_le_bytes(word)
    }

    pub(crate) fn write_word(&mut self, offset: usize, value: u64) {
        self.region.as_mut()[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.region.as_ref()[range]
    }

    pub(crate) fn bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.region.as_mut()[range]
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_are_little_endian() {
        let mut arena = Arena::new(vec![0_u8; 32]);
        arena.write_word(8, 0x0102_0304_0506_0708);
        assert_eq!(arena.bytes(8..10), &[0x08, 0x07]);
        assert_eq!(arena.read_word(8), 0x0102_0304_0506_0708);
        assert_eq!(arena.read_word(0), 0);
        assert_eq!(arena.len(), 32);
    }

    #[test]
    fn test_bytes_mut() {
        let mut arena = Arena::new(vec![0_u8; 16]);
        arena.bytes_mut(4..8).fill(0xEE);
        assert_eq!(arena.bytes(0..8), &[0, 0, 0, 0, 0xEE, 0xEE, 0xEE, 0xEE]);
    }
}
