//! Byte counts with an "undefined" state

use serde::Serialize;
use std::fmt;
use std::ops::{Add, AddAssign};

const KB: u64 = 1 << 10;
const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;

/// Size of a file or directory in bytes.
///
/// Zero doubles as "not computed yet": a directory placeholder starts out
/// undefined and only becomes defined once its aggregate is known. As a
/// consequence a genuinely empty file or directory also reads as undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Size(u64);

impl Size {
    pub const UNDEFINED: Size = Size(0);

    pub const fn new(bytes: u64) -> Self {
        Size(bytes)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub const fn is_defined(self) -> bool {
        self.0 > 0
    }

    /// Raw byte count as written into the report, empty when undefined.
    pub fn to_bytes_string(self) -> String {
        if self.is_defined() {
            self.0.to_string()
        } else {
            String::new()
        }
    }

    /// Human-readable rendering for summaries (e.g. "1.5 MiB").
    pub fn human(self) -> String {
        bytesize::to_string(self.0, true)
    }
}

impl From<u64> for Size {
    fn from(bytes: u64) -> Self {
        Size(bytes)
    }
}

impl Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        Size(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Size {
    fn add_assign(&mut self, rhs: Size) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Size {
    fn sum<I: Iterator<Item = Size>>(iter: I) -> Size {
        iter.fold(Size::UNDEFINED, |acc, s| acc + s)
    }
}

/// Truncating binary units: strictly above 1 GiB prints whole GB, and so on
/// down to KB; anything up to 1 KiB prints the raw number.
impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if !self.is_defined() {
            return Ok(());
        }
        if bytes > GB {
            write!(f, "{} GB", bytes / GB)
        } else if bytes > MB {
            write!(f, "{} MB", bytes / MB)
        } else if bytes > KB {
            write!(f, "{} KB", bytes / KB)
        } else {
            write!(f, "{}", bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_below_kilobyte_has_no_suffix() {
        assert_eq!(Size::new(100).to_string(), "100");
    }

    #[test]
    fn test_format_units() {
        assert_eq!(Size::new(10_000).to_string(), "9 KB");
        assert_eq!(Size::new(10_000_000).to_string(), "9 MB");
        assert_eq!(Size::new(10_000_000_000).to_string(), "9 GB");
    }

    #[test]
    fn test_format_boundaries_are_exclusive() {
        // Exactly 1 KiB is not "above" a kilobyte
        assert_eq!(Size::new(1024).to_string(), "1024");
        assert_eq!(Size::new(1025).to_string(), "1 KB");
        assert_eq!(Size::new(1 << 20).to_string(), "1024 KB");
        assert_eq!(Size::new(1 << 30).to_string(), "1024 MB");
    }

    #[test]
    fn test_undefined_renders_empty() {
        assert_eq!(Size::UNDEFINED.to_string(), "");
        assert_eq!(Size::new(0).to_bytes_string(), "");
        assert!(!Size::new(0).is_defined());
        assert!(Size::new(1).is_defined());
    }

    #[test]
    fn test_sum_and_add() {
        let total: Size = [Size::new(100), Size::UNDEFINED, Size::new(50)]
            .into_iter()
            .sum();
        assert_eq!(total, Size::new(150));

        let mut acc = Size::new(u64::MAX);
        acc += Size::new(1);
        assert_eq!(acc.bytes(), u64::MAX);
    }

    #[test]
    fn test_bytes_string() {
        assert_eq!(Size::new(10_000).to_bytes_string(), "10000");
    }
}
