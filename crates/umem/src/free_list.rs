//! Address-ordered singly linked list of free blocks.
//!
//! The list is intrusive: each free block's header slot holds a
//! [`FreeNode`] whose link is the offset of the next free block. Blocks are
//! kept sorted by offset and no two listed blocks are ever adjacent, so
//! every release can restore a maximal coalescing with a single scan.
//!
//! ```text
//! head ──▶ ┌────────┐        ┌────────┐        ┌────────┐
//!          │ 0x000  │──────▶ │ 0x180  │──────▶ │ 0x400  │──▶ ∅
//!          │ size   │        │ size   │        │ size   │
//!          └────────┘        └────────┘        └────────┘
//! ```
//!
//! Every operation is O(n) in the number of free blocks.

use core::iter::FusedIterator;

use crate::{
    arena::Arena,
    block::FreeNode,
    layout::FREE_NODE_SIZE,
};

/// A free block as seen through the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// Offset of the block header inside the arena.
    pub offset: usize,
    /// Size of the whole block in bytes.
    pub size: usize,
}

impl FreeBlock {
    /// Returns the offset one past the last byte of the block.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Returns `true` if `offset` lies inside the block.
    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        (self.offset..self.end()).contains(&offset)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeList {
    head: Option<usize>,
}

impl FreeList {
    /// Creates a list holding the single free block `offset..offset + size`.
    pub(crate) fn with_block<R>(arena: &mut Arena<R>, offset: usize, size: usize) -> Self
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        assert!(size >= FREE_NODE_SIZE, "free block too small for a node");
        FreeNode { size, next: None }.write(arena, offset);
        Self { head: Some(offset) }
    }

    /// Iterates over the free blocks in address order.
    pub(crate) fn iter<'a, R>(&self, arena: &'a Arena<R>) -> Iter<'a, R>
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        Iter {
            arena,
            next: self.head,
            // A well-formed list can never be longer than this.
            budget: arena.len() / FREE_NODE_SIZE + 1,
        }
    }

    /// Returns the free block covering `offset`, if any.
    pub(crate) fn containing<R>(&self, arena: &Arena<R>, offset: usize) -> Option<FreeBlock>
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.iter(arena)
            .take_while(|b| b.offset <= offset)
            .find(|b| b.contains(offset))
    }

    /// Returns the two listed blocks closest before `offset`, nearest last.
    fn neighbors<R>(&self, arena: &Arena<R>, offset: usize) -> (Option<FreeBlock>, Option<FreeBlock>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.iter(arena)
            .take_while(|b| b.offset < offset)
            .fold((None, None), |(_, prev), b| (prev, Some(b)))
    }

    /// Points `prev` (or the head when `prev` is `None`) at `next`.
    fn link<R>(&mut self, arena: &mut Arena<R>, prev: Option<FreeBlock>, next: Option<usize>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        match prev {
            Some(prev) => FreeNode {
                size: prev.size,
                next,
            }
            .write(arena, prev.offset),
            None => self.head = next,
        }
    }

    /// Unlinks `block` from the list.
    pub(crate) fn remove<R>(&mut self, arena: &mut Arena<R>, block: FreeBlock)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let (_, prev) = self.neighbors(arena, block.offset);
        let node = FreeNode::read(arena, block.offset);
        debug_assert_eq!(
            prev.map_or(self.head, |p| FreeNode::read(arena, p.offset).next),
            Some(block.offset),
            "removed block must be linked"
        );
        log::trace!("free list: unlink {:#x} ({} bytes)", block.offset, block.size);
        self.link(arena, prev, node.next);
    }

    /// Carves `needed` bytes off the front of `block`.
    ///
    /// When the tail left over can hold a free node it stays in the list in
    /// the position `block` held. Otherwise the whole block is unlinked and
    /// handed out. Returns the number of bytes actually granted.
    pub(crate) fn split<R>(&mut self, arena: &mut Arena<R>, block: FreeBlock, needed: usize) -> usize
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        debug_assert!(needed <= block.size);
        let remainder = block.size - needed;
        if remainder < FREE_NODE_SIZE {
            self.remove(arena, block);
            return block.size;
        }

        let (_, prev) = self.neighbors(arena, block.offset);
        let node = FreeNode::read(arena, block.offset);
        let tail = block.offset + needed;
        FreeNode {
            size: remainder,
            next: node.next,
        }
        .write(arena, tail);
        self.link(arena, prev, Some(tail));
        log::trace!(
            "free list: split {:#x} into {needed} + {remainder} bytes at {tail:#x}",
            block.offset
        );
        needed
    }

    /// Links the free range `offset..offset + size` into the list and merges
    /// it with every adjacent free block.
    ///
    /// Returns the free block that ends up covering `offset`.
    pub(crate) fn insert_and_merge<R>(
        &mut self,
        arena: &mut Arena<R>,
        offset: usize,
        size: usize,
    ) -> FreeBlock
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        debug_assert!(size >= FREE_NODE_SIZE);
        debug_assert!(self.containing(arena, offset).is_none());

        let (before_prev, prev) = self.neighbors(arena, offset);
        let next = prev.map_or(self.head, |p| FreeNode::read(arena, p.offset).next);
        FreeNode { size, next }.write(arena, offset);
        self.link(arena, prev, Some(offset));

        // Start two blocks back so a merge on the left is re-checked against
        // the block before it.
        let mut current = before_prev.or(prev).map_or(offset, |b| b.offset);
        loop {
            let (merged, next) = Self::absorb_adjacent(arena, current);
            if merged.contains(offset) {
                return merged;
            }
            let Some(next) = next else {
                log::error!("free list: inserted block {offset:#x} is not reachable");
                return merged;
            };
            current = next;
        }
    }

    /// Merges every free block directly following the block at `offset`
    /// into it. Returns the resulting block and its successor.
    fn absorb_adjacent<R>(arena: &mut Arena<R>, offset: usize) -> (FreeBlock, Option<usize>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let mut node = FreeNode::read(arena, offset);
        let mut merged = false;
        while let Some(next) = node.next {
            if offset + node.size != next {
                break;
            }
            let absorbed = FreeNode::read(arena, next);
            log::trace!(
                "free list: merge {next:#x} ({} bytes) into {offset:#x}",
                absorbed.size
            );
            node = FreeNode {
                size: node.size + absorbed.size,
                next: absorbed.next,
            };
            merged = true;
        }
        if merged {
            node.write(arena, offset);
        }
        (
            FreeBlock {
                offset,
                size: node.size,
            },
            node.next,
        )
    }
}

/// Iterator over the blocks of a [`FreeList`].
pub(crate) struct Iter<'a, R> {
    arena: &'a Arena<R>,
    next: Option<usize>,
    budget: usize,
}

impl<R> Clone for Iter<'_, R> {
    fn clone(&self) -> Self {
        Self {
            arena: self.arena,
            next: self.next,
            budget: self.budget,
        }
    }
}

impl<R> Iterator for Iter<'_, R>
where
    R: AsRef<[u8]> + AsMut<[u8]>,
{
    type Item = FreeBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next?;
        if self.budget == 0 {
            log::error!("free list: cycle detected at {offset:#x}");
            self.next = None;
            return None;
        }
        self.budget -= 1;
        let node = FreeNode::read(self.arena, offset);
        self.next = node.next;
        Some(FreeBlock {
            offset,
            size: node.size,
        })
    }
}

impl<R> FusedIterator for Iter<'_, R> where R: AsRef<[u8]> + AsMut<[u8]> {}
