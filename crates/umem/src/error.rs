use snafu::Snafu;
use snafu_utils::{Locate, Location};

use crate::provider::ReserveError;

/// Errors returned by [`Allocator`](crate::Allocator) operations.
///
/// Running out of memory is not an error: allocations that cannot be served
/// return `None`. [`UmemError::is_fatal`] identifies the conditions that
/// mean the arena or a caller's handle is no longer trustworthy.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UmemError {
    #[snafu(display("arena of {size} bytes cannot hold a free block (minimum {minimum})"))]
    ArenaTooSmall {
        size: usize,
        minimum: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to reserve the arena"))]
    Reserve {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: ReserveError,
    },
    #[snafu(display("allocator is not initialized"))]
    NotInitialized {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("handle {offset:#x} does not address a block in an arena of {arena_len} bytes"))]
    InvalidHandle {
        offset: usize,
        arena_len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("memory corruption detected at block {offset:#x}: tag {found:#018x}"))]
    Corruption {
        offset: usize,
        found: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("double release of block {offset:#x}"))]
    DoubleRelease {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block {offset:#x} has already been released"))]
    Released {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena is inconsistent: {reason}"))]
    Inconsistent {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl UmemError {
    /// Returns `true` for errors after which the calling program should not
    /// continue using the arena.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. }
                | Self::DoubleRelease { .. }
                | Self::Released { .. }
                | Self::Inconsistent { .. }
        )
    }
}

impl Locate for UmemError {
    fn location(&self) -> Option<Location> {
        match self {
            Self::ArenaTooSmall { location, .. }
            | Self::Reserve { location, .. }
            | Self::NotInitialized { location }
            | Self::InvalidHandle { location, .. }
            | Self::Corruption { location, .. }
            | Self::DoubleRelease { location, .. }
            | Self::Released { location, .. }
            | Self::Inconsistent { location, .. } => Some(*location),
        }
    }
}
