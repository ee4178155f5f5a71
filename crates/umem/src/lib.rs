//! A single-arena user-space memory allocator.
//!
//! `umem` manages one contiguous byte region (the *arena*) reserved once at
//! initialization. Requests are served from an address-ordered free list
//! using one of four placement policies, and released blocks are coalesced
//! with their free neighbors immediately.
//!
//! ```text
//!  arena
//! ┌─────────┬───────────────┬─────────┬──────────┬────────────────────┐
//! │ alloc'd │ free ─────────┼────────▶│ alloc'd  │ free ──▶ ∅         │
//! └─────────┴───────────────┴─────────┴──────────┴────────────────────┘
//!  ▲ handle = block offset + header
//! ```
//!
//! # Placement Policies
//!
//! | Policy | Picks | Ties |
//! |--------|-------|------|
//! | [`Policy::FirstFit`] | first block large enough | - |
//! | [`Policy::BestFit`] | smallest block large enough | lowest address |
//! | [`Policy::WorstFit`] | largest block | lowest address |
//! | [`Policy::NextFit`] | first block large enough after the last pick | - |
//!
//! # Usage
//!
//! ```rust
//! use umem::{Allocator, Policy};
//!
//! let mut allocator = Allocator::default();
//! allocator.initialize(4096, Policy::FirstFit)?;
//!
//! let a = allocator.allocate(512);
//! let b = allocator.allocate(256);
//! allocator.release(a)?;
//! allocator.release(b)?;
//!
//! // Both blocks merged back into the whole arena.
//! assert_eq!(allocator.dump_free_list(), [4096]);
//! # Ok::<(), umem::UmemError>(())
//! ```
//!
//! # Error Detection
//!
//! Every allocated block carries a tag in its header. Releasing or resizing
//! a handle that does not lead to a tagged header reports
//! [`UmemError::Corruption`]; releasing a block that is already free
//! reports [`UmemError::DoubleRelease`]. Both are fatal: the arena should
//! not be trusted afterwards.
//!
//! # Memory Providers
//!
//! The arena comes from a [`MemoryProvider`]. [`HeapProvider`] takes it from
//! the global allocator; on Unix, [`MmapProvider`] maps anonymous pages.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use self::{
    allocator::Allocator,
    block::{BlockInfo, BlockState, Handle},
    error::UmemError,
    fragmentation::fragmentation_pct,
    free_list::FreeBlock,
    policy::{ParsePolicyError, Policy},
    provider::{HeapProvider, MemoryProvider, ReserveError},
    stats::AllocatorStats,
};
#[cfg(unix)]
pub use self::provider::{MmapProvider, MmapRegion};

mod allocator;
mod arena;
mod block;
mod error;
mod fragmentation;
mod free_list;
pub mod layout;
mod policy;
mod provider;
mod stats;
