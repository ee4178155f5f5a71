//! Placement policies choosing which free block serves a request.
//!
//! Every policy sees the free blocks in address order and the total block
//! size needed (header included). Only [`Policy::NextFit`] keeps state
//! between searches: a cursor naming the free block where the next search
//! starts.

use core::str::FromStr;

use snafu::Snafu;

use crate::free_list::FreeBlock;

/// Strategy used to pick a free block for an allocation.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::IsVariant,
)]
pub enum Policy {
    /// Lowest-addressed block that is large enough.
    #[default]
    #[display("first-fit")]
    FirstFit,
    /// Smallest block that is large enough, lowest address on ties.
    #[display("best-fit")]
    BestFit,
    /// Largest block that is large enough, lowest address on ties.
    #[display("worst-fit")]
    WorstFit,
    /// First large-enough block at or after the cursor, wrapping around.
    #[display("next-fit")]
    NextFit,
}

impl Policy {
    /// Every policy, in declaration order.
    pub const ALL: [Self; 4] = [Self::FirstFit, Self::BestFit, Self::WorstFit, Self::NextFit];

    /// Selects a free block of at least `needed` bytes.
    ///
    /// `cursor` is only read and updated by [`Policy::NextFit`].
    pub(crate) fn find<I>(self, blocks: I, needed: usize, cursor: &mut Option<usize>) -> Option<FreeBlock>
    where
        I: Iterator<Item = FreeBlock> + Clone,
    {
        match self {
            Self::FirstFit => first_fit(blocks, needed),
            Self::BestFit => best_fit(blocks, needed),
            Self::WorstFit => worst_fit(blocks, needed),
            Self::NextFit => next_fit(blocks, needed, cursor),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(display(
    "unknown placement policy `{input}` (expected first-fit, best-fit, worst-fit or next-fit)"
))]
pub struct ParsePolicyError {
    input: String,
}

impl FromStr for Policy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|policy| policy.to_string() == normalized)
            .ok_or_else(|| ParsePolicySnafu { input: s }.build())
    }
}

fn first_fit<I>(mut blocks: I, needed: usize) -> Option<FreeBlock>
where
    I: Iterator<Item = FreeBlock>,
{
    blocks.find(|b| b.size >= needed)
}

fn best_fit<I>(blocks: I, needed: usize) -> Option<FreeBlock>
where
    I: Iterator<Item = FreeBlock>,
{
    blocks
        .filter(|b| b.size >= needed)
        .fold(None, |best, b| match best {
            Some(best) if best.size <= b.size => Some(best),
            _ => Some(b),
        })
}

fn worst_fit<I>(blocks: I, needed: usize) -> Option<FreeBlock>
where
    I: Iterator<Item = FreeBlock>,
{
    blocks
        .filter(|b| b.size >= needed)
        .fold(None, |worst, b| match worst {
            Some(worst) if b.size > worst.size => Some(b),
            Some(worst) => Some(worst),
            None => Some(b),
        })
}

fn next_fit<I>(blocks: I, needed: usize, cursor: &mut Option<usize>) -> Option<FreeBlock>
where
    I: Iterator<Item = FreeBlock> + Clone,
{
    // A cursor whose block was allocated or merged away restarts at the head.
    let start = cursor.filter(|&c| blocks.clone().any(|b| b.offset == c));
    let found = match start {
        Some(start) => blocks
            .clone()
            .skip_while(|b| b.offset != start)
            .chain(blocks.clone().take_while(|b| b.offset != start))
            .find(|b| b.size >= needed),
        None => blocks.clone().find(|b| b.size >= needed),
    };

    *cursor = found.and_then(|found| {
        blocks
            .clone()
            .skip_while(|b| b.offset != found.offset)
            .nth(1)
            .or_else(|| blocks.clone().next())
            .map(|b| b.offset)
    });
    found
}
