//! Error plumbing shared by the umem crates.
//!
//! - [`Location`] records the source position where an error value was
//!   built, as an implicit snafu field.
//! - [`GenericError`] is the catch-all error returned by binaries.
//! - [`Report`] renders an error, its location and its source chain.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

use alloc::{boxed::Box, string::String};
use core::{error::Error, fmt};

use ansi_term::Color;
use snafu::{GenerateImplicitData, Snafu};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Location {
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors that remember where they were raised.
pub trait Locate {
    fn location(&self) -> Option<Location>;
}

#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
pub struct GenericError {
    message: String,
    #[snafu(implicit)]
    location: Location,
    #[snafu(source(from(Box<dyn Error>, Some)))]
    source: Option<Box<dyn Error>>,
}

impl Locate for GenericError {
    fn location(&self) -> Option<Location> {
        Some(self.location)
    }
}

/// Recovers the location of an error met in a source chain, where only
/// `dyn Error` is known.
pub type Locator = fn(&(dyn Error + 'static)) -> Option<Location>;

pub struct Report<E> {
    error: E,
    locator: Option<Locator>,
}

impl<E> fmt::Debug for Report<E>
where
    E: Error + Locate,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error + Locate,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", Color::Red.paint(&self.error))?;
        if let Some(loc) = self.error.location() {
            writeln!(f, "  at {}", Color::DarkGray.paint(loc))?;
        }
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {}", Color::Red.paint(s))?;
            if let Some(loc) = self.source_location(s) {
                writeln!(f, "      at {}", Color::DarkGray.paint(loc))?;
            }
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self {
            error,
            locator: None,
        }
    }

    /// Uses `locator` to find locations of sources other than
    /// [`GenericError`].
    #[must_use]
    pub fn with_locator(self, locator: Locator) -> Self {
        Self {
            locator: Some(locator),
            ..self
        }
    }

    fn source_location(&self, source: &(dyn Error + 'static)) -> Option<Location> {
        if let Some(err) = source.downcast_ref::<GenericError>() {
            return err.location();
        }
        self.locator.and_then(|locate| locate(source))
    }
}
