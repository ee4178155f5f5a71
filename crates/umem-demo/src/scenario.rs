//! Scripted allocation sequences exercising each placement policy.

use ansi_term::Color;
use umem::{Allocator, Handle, Policy, UmemError};

use crate::printer::{self, ShowHandle};

pub struct Scenario {
    pub name: &'static str,
    pub summary: &'static str,
    pub policy: Policy,
    pub size: usize,
    body: fn(&mut Session) -> Result<(), UmemError>,
}

/// Scenarios in the order they run by default.
///
/// `double-release` ends with a fatal error and therefore comes last.
pub static ALL: &[Scenario] = &[
    Scenario {
        name: "basic-first-fit",
        summary: "allocate three blocks, release them, allocate again",
        policy: Policy::FirstFit,
        size: 4096,
        body: basic_first_fit,
    },
    Scenario {
        name: "intensive-first-fit",
        summary: "odd sizes, resizes and interleaved releases",
        policy: Policy::FirstFit,
        size: 4096,
        body: intensive_first_fit,
    },
    Scenario {
        name: "basic-best-fit",
        summary: "a freed middle block is reused by a smaller request",
        policy: Policy::BestFit,
        size: 1000,
        body: basic_best_fit,
    },
    Scenario {
        name: "intensive-best-fit",
        summary: "odd sizes, resizes and interleaved releases",
        policy: Policy::BestFit,
        size: 4096,
        body: intensive_best_fit,
    },
    Scenario {
        name: "basic-next-fit",
        summary: "coalesced space is found by resuming the search",
        policy: Policy::NextFit,
        size: 4096,
        body: basic_next_fit,
    },
    Scenario {
        name: "intensive-next-fit",
        summary: "odd sizes and interleaved releases",
        policy: Policy::NextFit,
        size: 4096,
        body: intensive_next_fit,
    },
    Scenario {
        name: "next-fit-edge",
        summary: "nearly full arena with a hole too small to reuse",
        policy: Policy::NextFit,
        size: 4096,
        body: next_fit_edge,
    },
    Scenario {
        name: "basic-worst-fit",
        summary: "requests are carved from the largest hole",
        policy: Policy::WorstFit,
        size: 4096,
        body: basic_worst_fit,
    },
    Scenario {
        name: "edge-cases",
        summary: "null handles, zero sizes, alignment and oversized requests",
        policy: Policy::BestFit,
        size: 4096,
        body: edge_cases,
    },
    Scenario {
        name: "fragmentation",
        summary: "alternating holes defeat a large request until merged",
        policy: Policy::BestFit,
        size: 4096,
        body: fragmentation,
    },
    Scenario {
        name: "realloc-stress",
        summary: "repeated grow and shrink, then growth into a freed neighbor",
        policy: Policy::BestFit,
        size: 4096,
        body: realloc_stress,
    },
    Scenario {
        name: "double-release",
        summary: "releasing the same block twice is fatal",
        policy: Policy::FirstFit,
        size: 4096,
        body: double_release,
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    ALL.iter().find(|s| s.name == name)
}

impl Scenario {
    /// Runs the scenario on a fresh allocator and prints the final state.
    pub fn run(&self, size: usize, policy: Policy) -> Result<(), UmemError> {
        println!();
        println!(
            "=== {} ({policy}, {size} bytes) ===",
            Color::White.paint(self.name)
        );
        let mut session = Session::start(size, policy)?;
        (self.body)(&mut session)?;
        session.finish()
    }
}

/// An allocator that echoes every call it serves.
pub struct Session {
    allocator: Allocator,
}

impl Session {
    fn start(size: usize, policy: Policy) -> Result<Self, UmemError> {
        let mut allocator = Allocator::default();
        allocator.initialize(size, policy)?;
        Ok(Self { allocator })
    }

    fn section(&self, title: &str) {
        println!("  {}", Color::Cyan.paint(title));
        log::debug!("{title}: {} bytes free", self.allocator.stats().bytes_free);
    }

    fn allocate(&mut self, size: usize) -> Option<Handle> {
        let handle = self.allocator.allocate(size);
        println!("    allocate({size}) -> {}", ShowHandle(handle));
        handle
    }

    fn release(&mut self, handle: Option<Handle>) -> Result<(), UmemError> {
        println!("    release({})", ShowHandle(handle));
        self.allocator.release(handle)
    }

    fn resize(&mut self, handle: Option<Handle>, size: usize) -> Result<Option<Handle>, UmemError> {
        let resized = self.allocator.resize(handle, size)?;
        println!(
            "    resize({}, {size}) -> {}",
            ShowHandle(handle),
            ShowHandle(resized)
        );
        Ok(resized)
    }

    fn show_free_list(&self) {
        printer::print_free_list(&self.allocator.dump_free_list());
    }

    fn finish(self) -> Result<(), UmemError> {
        self.allocator.validate()?;
        self.show_free_list();
        printer::print_heap_map(&self.allocator.blocks()?);
        printer::print_stats(&self.allocator.stats());
        Ok(())
    }
}

fn basic_first_fit(s: &mut Session) -> Result<(), UmemError> {
    s.section("allocate");
    let ptr1 = s.allocate(512);
    let ptr2 = s.allocate(1024);
    let ptr3 = s.allocate(256);

    s.section("release");
    s.release(ptr1)?;
    s.release(ptr2)?;
    s.release(ptr3)?;
    s.show_free_list();

    // 144 + 272 bytes end up allocated.
    s.section("allocate again");
    s.allocate(128);
    s.allocate(256);
    Ok(())
}

fn intensive_first_fit(s: &mut Session) -> Result<(), UmemError> {
    s.section("odd sizes");
    let ptr1 = s.allocate(123);
    let ptr2 = s.allocate(507);
    let ptr3 = s.allocate(221);
    let ptr4 = s.allocate(1031);
    let ptr5 = s.allocate(249);
    let ptr6 = s.allocate(61);

    s.section("resize");
    let ptr1 = s.resize(ptr1, 187)?;
    let ptr4 = s.resize(ptr4, 1503)?;

    s.section("release and refill");
    s.release(ptr2)?;
    s.release(ptr3)?;
    let ptr7 = s.allocate(513);
    let ptr8 = s.allocate(127);
    let ptr9 = s.allocate(1025);
    s.release(ptr1)?;
    s.release(ptr5)?;
    let ptr10 = s.allocate(129);
    let ptr11 = s.allocate(511);
    let ptr12 = s.allocate(255);
    s.show_free_list();

    s.section("release nearly everything");
    for ptr in [ptr4, ptr6, ptr7, ptr8, ptr9, ptr10, ptr11, ptr12] {
        s.release(ptr)?;
    }

    s.section("small requests");
    s.allocate(17);
    let ptr14 = s.allocate(3);
    s.allocate(25);
    s.allocate(1023);
    s.release(ptr14)?;
    Ok(())
}

fn basic_best_fit(s: &mut Session) -> Result<(), UmemError> {
    s.section("allocate");
    let ptr1 = s.allocate(50);
    let ptr2 = s.allocate(64);
    let ptr3 = s.allocate(100);
    s.show_free_list();

    s.section("release the middle block");
    s.release(ptr2)?;
    s.show_free_list();

    // Rounds up to the size of the hole left by ptr2.
    let ptr4 = s.allocate(60);
    s.show_free_list();

    s.section("clean up");
    s.release(ptr1)?;
    s.release(ptr3)?;
    s.release(ptr4)?;
    Ok(())
}

fn intensive_best_fit(s: &mut Session) -> Result<(), UmemError> {
    s.section("odd sizes");
    let ptrs: Vec<_> = [509, 1027, 253, 129, 65, 519, 251, 127, 61, 131]
        .into_iter()
        .map(|size| s.allocate(size))
        .collect();

    s.section("release every other block");
    for ptr in ptrs.iter().step_by(2) {
        s.release(*ptr)?;
    }
    s.show_free_list();

    s.section("resize");
    s.resize(ptrs[1], 1503)?;
    s.resize(ptrs[3], 95)?;
    s.resize(ptrs[5], 777)?;

    s.section("release and refill");
    let ptr11 = s.allocate(63);
    s.allocate(135);
    let ptr13 = s.allocate(507);
    s.release(ptr11)?;
    s.release(ptr13)?;
    s.allocate(123);
    s.allocate(249);
    Ok(())
}

fn basic_next_fit(s: &mut Session) -> Result<(), UmemError> {
    s.section("allocate");
    let ptr1 = s.allocate(100);
    let ptr2 = s.allocate(200);
    let ptr3 = s.allocate(300);

    s.section("release out of order");
    s.release(ptr2)?;
    s.release(ptr1)?;
    s.show_free_list();

    s.section("wrap around into the coalesced hole");
    let ptr4 = s.allocate(150);
    let ptr5 = s.allocate(50);
    s.show_free_list();

    s.section("release everything");
    s.release(ptr3)?;
    s.release(ptr4)?;
    s.release(ptr5)?;
    Ok(())
}

fn intensive_next_fit(s: &mut Session) -> Result<(), UmemError> {
    s.section("odd sizes");
    let ptrs: Vec<_> = [511, 1023, 255, 517, 127, 67, 259, 127, 63, 129]
        .into_iter()
        .map(|size| s.allocate(size))
        .collect();

    s.section("release every other block");
    for ptr in ptrs.iter().step_by(2) {
        s.release(*ptr)?;
    }
    s.show_free_list();

    s.section("release and refill");
    let ptr11 = s.allocate(61);
    s.allocate(133);
    let ptr13 = s.allocate(511);
    s.release(ptr11)?;
    s.release(ptr13)?;
    s.allocate(125);
    s.allocate(257);
    Ok(())
}

fn next_fit_edge(s: &mut Session) -> Result<(), UmemError> {
    s.section("fill most of the arena");
    let ptr1 = s.allocate(2000);
    let ptr2 = s.allocate(1000);
    let ptr3 = s.allocate(500);

    s.section("free the middle block and ask for more");
    s.release(ptr2)?;
    let ptr4 = s.allocate(1200);
    s.show_free_list();

    s.section("allocate the remaining space");
    let ptr5 = s.allocate(100);

    s.section("clean up");
    for ptr in [ptr1, ptr3, ptr4, ptr5] {
        s.release(ptr)?;
    }
    Ok(())
}

fn basic_worst_fit(s: &mut Session) -> Result<(), UmemError> {
    s.section("carve holes");
    let ptr1 = s.allocate(256);
    let _guard1 = s.allocate(8);
    let ptr2 = s.allocate(1024);
    let _guard2 = s.allocate(8);
    s.release(ptr1)?;
    s.release(ptr2)?;
    s.show_free_list();

    // Each request comes from whichever hole is currently largest.
    s.section("allocate from the largest hole");
    let ptr3 = s.allocate(200);
    let ptr4 = s.allocate(900);
    let ptr5 = s.allocate(900);
    s.show_free_list();

    s.section("clean up");
    for ptr in [ptr3, ptr4, ptr5] {
        s.release(ptr)?;
    }
    Ok(())
}

fn edge_cases(s: &mut Session) -> Result<(), UmemError> {
    s.section("null and zero-size");
    s.release(None)?;
    s.allocate(0);
    let ptr = s.resize(None, 100)?;
    s.resize(ptr, 0)?;

    s.section("alignment");
    for size in [3, 7, 8, 9] {
        s.allocate(size);
    }

    s.section("resize");
    let ptr = s.allocate(100);
    let ptr = s.resize(ptr, 200)?;
    let ptr = s.resize(ptr, 50)?;
    s.resize(ptr, 1000)?;

    s.section("boundaries");
    s.allocate(4000);
    s.allocate(4096);
    Ok(())
}

fn fragmentation(s: &mut Session) -> Result<(), UmemError> {
    s.section("alternate large and small blocks");
    let ptrs: Vec<_> = (0..10)
        .map(|i| s.allocate(if i % 2 == 1 { 64 } else { 256 }))
        .collect();

    s.section("release the large blocks");
    for ptr in ptrs.iter().step_by(2) {
        s.release(*ptr)?;
    }
    s.allocate(512);
    s.show_free_list();
    printer::print_stats(&s.allocator.stats());

    s.section("release the small blocks");
    for ptr in ptrs.iter().skip(1).step_by(2) {
        s.release(*ptr)?;
    }
    s.allocate(512);
    Ok(())
}

fn realloc_stress(s: &mut Session) -> Result<(), UmemError> {
    s.section("grow and shrink repeatedly");
    let mut ptr = s.allocate(64);
    for i in 1..=5 {
        ptr = s.resize(ptr, 128 * i)?;
        ptr = s.resize(ptr, 64)?;
    }

    s.section("grow into a freed neighbor");
    let block0 = s.allocate(128);
    let block1 = s.allocate(256);
    s.allocate(128);
    s.release(block1)?;
    s.resize(block0, 384)?;
    Ok(())
}

fn double_release(s: &mut Session) -> Result<(), UmemError> {
    let ptr = s.allocate(20);
    s.release(ptr)?;
    s.release(ptr)
}
