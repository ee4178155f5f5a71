//! Minimal ANSI coloring for terminal diagnostics.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::fmt;

/// Foreground colors, valued by their SGR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Red = 31,
    Green = 32,
    Yellow = 33,
    Blue = 34,
    Purple = 35,
    Cyan = 36,
    White = 37,
    DarkGray = 90,
}

impl Color {
    /// Wraps `value` so that it is displayed in bold with this color.
    pub fn paint<T>(self, value: T) -> Painted<T> {
        Painted { color: self, value }
    }
}

/// A value rendered between a color escape and a reset.
#[derive(Debug, Clone, Copy)]
pub struct Painted<T> {
    color: Color,
    value: T,
}

impl<T> fmt::Display for Painted<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.color as u8;
        write!(f, "\x1B[{code};1m{}\x1B[0m", self.value)
    }
}
