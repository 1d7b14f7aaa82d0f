// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Arena budget: the ceiling on live tensor bytes.
//!
//! Target boards carry a few megabytes of SRAM, so budgets are usually
//! written in kilobytes or megabytes (`"2M"`, `"512K"`).

use crate::MemoryError;
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// Suffixes accepted by [`MemoryBudget::parse`], longest first so that
/// `"KB"` is tried before `"B"`.
const SUFFIXES: &[(&str, usize)] = &[
    ("KB", KIB),
    ("MB", MIB),
    ("K", KIB),
    ("M", MIB),
    ("B", 1),
];

/// A hard ceiling on the number of live bytes an arena may hand out.
///
/// # Examples
/// ```
/// use memory_manager::MemoryBudget;
///
/// let b = MemoryBudget::parse("6M").unwrap();
/// assert_eq!(b.as_bytes(), 6 * 1024 * 1024);
/// assert!(MemoryBudget::unlimited().is_unlimited());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// Creates a budget from a byte count.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a budget from kibibytes.
    pub fn from_kb(kb: usize) -> Self {
        Self { bytes: kb * KIB }
    }

    /// Creates a budget from mebibytes.
    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MIB }
    }

    /// A budget that never rejects an allocation. Used for host-side tools
    /// and tests where the device ceiling is irrelevant.
    pub fn unlimited() -> Self {
        Self { bytes: usize::MAX }
    }

    /// Returns `true` for [`MemoryBudget::unlimited`].
    pub fn is_unlimited(&self) -> bool {
        self.bytes == usize::MAX
    }

    /// Returns the budget in bytes.
    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Parses `"512K"`, `"2M"`, `"2MB"`, `"4096B"` or a plain byte count.
    /// Case-insensitive; surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();

        let (digits, multiplier) = SUFFIXES
            .iter()
            .find_map(|&(suffix, mult)| {
                upper
                    .strip_suffix(suffix)
                    .map(|rest| (rest.trim(), mult))
            })
            .unwrap_or((upper.as_str(), 1));

        let value: usize = digits
            .parse()
            .map_err(|_| MemoryError::InvalidBudget(s.to_string()))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| MemoryError::InvalidBudget(s.to_string()))?;

        if bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            write!(f, "unlimited")
        } else if self.bytes >= MIB && self.bytes % MIB == 0 {
            write!(f, "{} MB", self.bytes / MIB)
        } else if self.bytes >= KIB && self.bytes % KIB == 0 {
            write!(f, "{} KB", self.bytes / KIB)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(MemoryBudget::from_kb(4).as_bytes(), 4096);
        assert_eq!(MemoryBudget::from_mb(6).as_bytes(), 6 * MIB);
        assert!(!MemoryBudget::from_mb(6).is_unlimited());
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(MemoryBudget::parse("512K").unwrap().as_bytes(), 512 * KIB);
        assert_eq!(MemoryBudget::parse("512kb").unwrap().as_bytes(), 512 * KIB);
        assert_eq!(MemoryBudget::parse("2M").unwrap().as_bytes(), 2 * MIB);
        assert_eq!(MemoryBudget::parse("2mb").unwrap().as_bytes(), 2 * MIB);
        assert_eq!(MemoryBudget::parse("4096B").unwrap().as_bytes(), 4096);
        assert_eq!(MemoryBudget::parse("1000").unwrap().as_bytes(), 1000);
        assert_eq!(MemoryBudget::parse("  3M ").unwrap().as_bytes(), 3 * MIB);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            MemoryBudget::parse("lots"),
            Err(MemoryError::InvalidBudget(_))
        ));
        assert!(matches!(
            MemoryBudget::parse(""),
            Err(MemoryError::InvalidBudget(_))
        ));
        assert!(matches!(
            MemoryBudget::parse("0K"),
            Err(MemoryError::ZeroSizedAllocation)
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryBudget::from_mb(6).to_string(), "6 MB");
        assert_eq!(MemoryBudget::from_kb(512).to_string(), "512 KB");
        assert_eq!(MemoryBudget::from_bytes(100).to_string(), "100 B");
        assert_eq!(MemoryBudget::unlimited().to_string(), "unlimited");
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = MemoryBudget::from_kb(768);
        let json = serde_json::to_string(&b).unwrap();
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }
}
