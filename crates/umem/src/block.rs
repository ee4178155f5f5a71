//! Views over the header slot at the start of every block.

use core::{fmt, num::NonZeroUsize};

use crate::{
    arena::Arena,
    layout::{BLOCK_TAG, HEADER_SIZE, NO_LINK},
};

/// Reference to the payload of an allocated block.
///
/// A handle is the payload's byte offset inside the arena. It is never
/// zero, so `Option<Handle>` plays the role of a nullable pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(NonZeroUsize);

const HEADER_SIZE_NZ: NonZeroUsize = match NonZeroUsize::new(HEADER_SIZE) {
    Some(n) => n,
    None => panic!("header size must not be zero"),
};

impl Handle {
    pub(crate) fn for_block(block_offset: usize) -> Self {
        Self(HEADER_SIZE_NZ.saturating_add(block_offset))
    }

    /// Rebuilds a handle from a raw payload offset, e.g. one obtained from
    /// [`Handle::offset`].
    #[must_use]
    pub fn from_offset(offset: usize) -> Option<Self> {
        NonZeroUsize::new(offset).map(Self)
    }

    /// Returns the payload offset inside the arena.
    #[must_use]
    pub fn offset(self) -> usize {
        self.0.get()
    }

    /// Returns the offset of the block header, if the handle can have one.
    pub(crate) fn block_offset(self) -> Option<usize> {
        self.0.get().checked_sub(HEADER_SIZE)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Whether a block is handed out or linked in the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant, derive_more::Display)]
pub enum BlockState {
    #[display("allocated")]
    Allocated,
    #[display("free")]
    Free,
}

/// One block found while walking the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: usize,
    pub size: usize,
    pub state: BlockState,
}

/// Header of an allocated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub(crate) size: usize,
    pub(crate) tag: u64,
}

impl BlockHeader {
    pub(crate) fn allocated(size: usize) -> Self {
        Self {
            size,
            tag: BLOCK_TAG,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.tag == BLOCK_TAG
    }

    pub(crate) fn read<R>(arena: &Arena<R>, offset: usize) -> Self
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        Self {
            size: word_to_usize(arena.read_word(offset)),
            tag: arena.read_word(offset + 8),
        }
    }

    pub(crate) fn write<R>(self, arena: &mut Arena<R>, offset: usize)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        arena.write_word(offset, usize_to_word(self.size));
        arena.write_word(offset + 8, self.tag);
    }
}

/// Header of a free block, reusing the allocated header's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeNode {
    pub(crate) size: usize,
    pub(crate) next: Option<usize>,
}

impl FreeNode {
    pub(crate) fn read<R>(arena: &Arena<R>, offset: usize) -> Self
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let next = match arena.read_word(offset + 8) {
            NO_LINK => None,
            link => Some(word_to_usize(link)),
        };
        Self {
            size: word_to_usize(arena.read_word(offset)),
            next,
        }
    }

    pub(crate) fn write<R>(self, arena: &mut Arena<R>, offset: usize)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        arena.write_word(offset, usize_to_word(self.size));
        arena.write_word(offset + 8, self.next.map_or(NO_LINK, usize_to_word));
    }
}

fn word_to_usize(word: u64) -> usize {
    usize::try_from(word).unwrap_or(usize::MAX)
}

fn usize_to_word(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
