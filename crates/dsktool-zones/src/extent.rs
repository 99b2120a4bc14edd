//! Partition end: an end LBA or a size with units

use dsktool_core::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Where a new partition ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Inclusive last LBA
    LastLba(u64),
    /// Size in bytes, rounded up to whole sectors
    Bytes(u64),
}

const UNITS: &[(&str, u64)] = &[
    ("B", 1),
    ("K", 1 << 10),
    ("KB", 1 << 10),
    ("M", 1 << 20),
    ("MB", 1 << 20),
    ("G", 1 << 30),
    ("GB", 1 << 30),
    ("T", 1 << 40),
    ("TB", 1 << 40),
];

impl Extent {
    /// Resolve to an inclusive last LBA for a partition starting at `first_lba`
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the end precedes the start, and
    /// `InvalidRequest` for a zero size or arithmetic overflow
    pub fn last_lba(&self, first_lba: u64, sector_size: u32) -> Result<u64> {
        match *self {
            Extent::LastLba(last_lba) if last_lba < first_lba => Err(Error::out_of_bounds(
                first_lba,
                last_lba,
                "end LBA precedes start LBA",
            )),
            Extent::LastLba(last_lba) => Ok(last_lba),
            Extent::Bytes(0) => Err(Error::invalid_request("partition size is zero")),
            Extent::Bytes(bytes) => {
                let sectors = bytes.div_ceil(sector_size as u64);
                first_lba
                    .checked_add(sectors - 1)
                    .ok_or_else(|| Error::invalid_request("partition end overflows"))
            }
        }
    }
}

impl FromStr for Extent {
    type Err = Error;

    /// A bare integer is an end LBA; a number followed by a unit
    /// (`B`, `K`/`KB`, `M`/`MB`, `G`/`GB`, `T`/`TB`) is a size
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let unit = unit.trim();

        if number.is_empty() {
            return Err(Error::invalid_request(format!("invalid size or end LBA '{}'", s)));
        }

        if unit.is_empty() {
            return number
                .parse::<u64>()
                .map(Extent::LastLba)
                .map_err(|e| Error::invalid_request(format!("invalid end LBA '{}': {}", s, e)));
        }

        let multiplier = UNITS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(unit))
            .map(|&(_, multiplier)| multiplier)
            .ok_or_else(|| {
                Error::invalid_request(format!(
                    "unknown unit '{}' (use B, K/KB, M/MB, G/GB, T/TB)",
                    unit
                ))
            })?;

        let value: f64 = number
            .parse()
            .map_err(|e| Error::invalid_request(format!("invalid size '{}': {}", s, e)))?;
        let bytes = (value * multiplier as f64).ceil();
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(Error::invalid_request(format!("size '{}' is too large", s)));
        }
        Ok(Extent::Bytes(bytes as u64))
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::LastLba(lba) => write!(f, "{}", lba),
            Extent::Bytes(bytes) => write!(f, "{}B", bytes),
        }
    }
}
