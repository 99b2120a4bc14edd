//! Core types for dsktool

use crate::error::{Error, Result};
use crate::security::{checked_multiply_u64, validate_sector_size};
use serde::Serialize;
use std::fmt;

/// Sector size and capacity of a device
///
/// Passed explicitly into every reader and mutator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceGeometry {
    /// Logical sector size in bytes
    pub sector_size: u32,

    /// Total number of addressable sectors
    pub disk_size_sectors: u64,
}

impl DeviceGeometry {
    /// Create a geometry, validating the sector size
    pub fn new(sector_size: u32, disk_size_sectors: u64) -> Result<Self> {
        validate_sector_size(sector_size)?;
        if disk_size_sectors == 0 {
            return Err(Error::invalid_geometry("disk has zero sectors"));
        }
        Ok(Self {
            sector_size,
            disk_size_sectors,
        })
    }

    /// Derive a geometry from a byte length; a trailing partial sector is ignored
    pub fn from_byte_length(sector_size: u32, length: u64) -> Result<Self> {
        validate_sector_size(sector_size)?;
        Self::new(sector_size, length / sector_size as u64)
    }

    /// Byte offset of an LBA
    pub fn byte_offset(&self, lba: u64) -> Result<u64> {
        checked_multiply_u64(lba, self.sector_size as u64, "LBA byte offset")
    }

    /// Last addressable LBA
    pub fn last_lba(&self) -> u64 {
        self.disk_size_sectors - 1
    }

    /// Total capacity in bytes
    pub fn size_bytes(&self) -> u64 {
        self.disk_size_sectors.saturating_mul(self.sector_size as u64)
    }
}

/// Partitioning scheme of a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Gpt,
    Mbr,
}

impl TableKind {
    /// Human-readable scheme name
    pub fn name(&self) -> &'static str {
        match self {
            TableKind::Gpt => "GUID Partition Table",
            TableKind::Mbr => "Master Boot Record",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Gpt => write!(f, "GPT"),
            TableKind::Mbr => write!(f, "MBR"),
        }
    }
}

/// What a record in the unified list describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    /// GPT partition entry
    Gpt,
    /// MBR primary partition
    Primary,
    /// MBR extended container
    Extended,
    /// Partition found in the EBR chain
    Logical,
    /// Synthetic trailing free space
    Unused,
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartitionKind::Gpt => "gpt",
            PartitionKind::Primary => "primary",
            PartitionKind::Extended => "extended",
            PartitionKind::Logical => "logical",
            PartitionKind::Unused => "unused",
        };
        write!(f, "{}", s)
    }
}

/// One entry of the unified partition list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionRecord {
    /// 1-based number in on-disk slot order
    pub number: usize,

    /// Record kind
    pub kind: PartitionKind,

    /// 0-based slot in the GPT entry array or MBR table, if the record has one
    pub slot: Option<usize>,

    /// First LBA (inclusive)
    pub first_lba: u64,

    /// Last LBA (inclusive)
    pub last_lba: u64,

    /// Length in sectors
    pub total_sectors: u64,

    /// Sector size in bytes
    pub sector_size: u32,

    /// Human-readable type (e.g. "Linux filesystem")
    pub type_name: String,

    /// Raw type identifier: GUID string for GPT, `0xNN` for MBR
    pub type_id: String,

    /// Unique partition GUID (GPT only)
    pub unique_guid: Option<String>,

    /// Partition name (GPT) or empty
    pub name: String,

    /// Active/bootable flag (MBR only)
    pub active: bool,

    /// True for the synthetic unused-space record
    pub is_unused: bool,
}

impl PartitionRecord {
    /// Create the synthetic unused-space record for an inclusive range
    pub fn unused(number: usize, first_lba: u64, last_lba: u64, sector_size: u32) -> Self {
        Self {
            number,
            kind: PartitionKind::Unused,
            slot: None,
            first_lba,
            last_lba,
            total_sectors: last_lba - first_lba + 1,
            sector_size,
            type_name: "Unused".to_string(),
            type_id: String::new(),
            unique_guid: None,
            name: "Unused".to_string(),
            active: false,
            is_unused: true,
        }
    }

    /// Size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.total_sectors.saturating_mul(self.sector_size as u64)
    }

    /// True if `lba` lies inside this record's range
    pub fn contains(&self, lba: u64) -> bool {
        lba >= self.first_lba && lba <= self.last_lba
    }

    /// True if this record's range intersects the inclusive range
    pub fn overlaps(&self, first_lba: u64, last_lba: u64) -> bool {
        first_lba <= self.last_lba && self.first_lba <= last_lba
    }
}

impl fmt::Display for PartitionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} [{} {} @ LBA {}..={}, {}]",
            self.number,
            self.kind,
            self.type_name,
            self.first_lba,
            self.last_lba,
            format_size(self.size_bytes())
        )?;
        if !self.name.is_empty() && !self.is_unused {
            write!(f, " \"{}\"", self.name)?;
        }
        if self.active {
            write!(f, " (active)")?;
        }
        Ok(())
    }
}

/// Format size in human-readable format
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = size as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
