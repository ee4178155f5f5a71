//! Human-readable rendering of allocator state.

use core::fmt;

use ansi_term::Color;
use umem::{AllocatorStats, BlockInfo, BlockState, Handle};

use crate::scenario::Scenario;

/// Displays a nullable handle as its payload offset or `null`.
pub struct ShowHandle(pub Option<Handle>);

impl fmt::Display for ShowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(handle) => write!(f, "{handle}"),
            None => write!(f, "{}", Color::DarkGray.paint("null")),
        }
    }
}

struct FreeList<'a>(&'a [usize]);

impl fmt::Display for FreeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for size in self.0 {
            write!(f, "{size} -> ")?;
        }
        write!(f, "end")
    }
}

pub fn print_free_list(sizes: &[usize]) {
    println!("  free list: {}", FreeList(sizes));
}

pub fn print_stats(stats: &AllocatorStats) {
    println!("  {}", Color::Cyan.paint("statistics"));
    println!("    allocations      {:>8}", stats.alloc_count);
    println!("    releases         {:>8}", stats.release_count);
    println!("    bytes allocated  {:>8}", stats.bytes_allocated);
    println!("    bytes free       {:>8}", stats.bytes_free);
    println!("    fragmentation    {:>7.2}%", stats.fragmentation_pct);
}

pub fn print_heap_map(blocks: &[BlockInfo]) {
    println!("  {}", Color::Cyan.paint("heap map"));
    for block in blocks {
        let state = match block.state {
            BlockState::Allocated => Color::Green.paint(block.state),
            BlockState::Free => Color::DarkGray.paint(block.state),
        };
        println!(
            "    {:#07x} {:>6} bytes  {state}",
            block.offset, block.size
        );
    }
}

pub fn print_scenarios(scenarios: &[Scenario]) {
    for scenario in scenarios {
        println!(
            "{:<20} {:<10} {:>5}  {}",
            scenario.name,
            scenario.policy.to_string(),
            scenario.size,
            scenario.summary
        );
    }
}
