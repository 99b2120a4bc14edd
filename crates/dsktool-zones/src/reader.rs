//! Partition table detection and the unified partition list

use crate::gpt::types::GptEntryArray;
use crate::gpt::{GptDisk, DEFAULT_FIRST_USABLE_LBA};
use crate::mbr::ebr::{walk_ebr_chain, LogicalPartition};
use crate::mbr::read_mbr;
use crate::mbr::types::{MbrPartitionEntry, MbrTable};
use dsktool_core::{
    DeviceGeometry, Error, PartitionKind, PartitionRecord, PartitionTable, RandomAccessDevice,
    Result, TableKind,
};
use serde::Serialize;
use tracing::{debug, warn};

/// Options controlling how tables are read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Treat CRC mismatches and unreadable EBRs as errors instead of diagnostics
    pub strict: bool,
}

/// An MBR with the logical partitions of each extended container
#[derive(Debug, Clone)]
pub struct MbrDisk {
    pub table: MbrTable,
    /// Logicals per primary slot; empty for non-extended slots
    pub logicals: [Vec<LogicalPartition>; MbrTable::NUM_PARTITIONS],
}

/// A raw table as read from disk
#[derive(Debug, Clone)]
pub enum DiskTable {
    Gpt(GptDisk),
    Mbr(MbrDisk),
}

impl DiskTable {
    /// Partitioning scheme
    pub fn kind(&self) -> TableKind {
        match self {
            DiskTable::Gpt(_) => TableKind::Gpt,
            DiskTable::Mbr(_) => TableKind::Mbr,
        }
    }
}

/// Look for a GPT at LBA 1, falling back to the MBR
///
/// # Errors
///
/// Returns `UnrecognizedTable` if neither is present. Other codec errors
/// (malformed headers, strict-mode CRC or EBR failures, I/O) propagate.
pub fn read_table(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    options: &ReadOptions,
    diagnostics: &mut Vec<String>,
) -> Result<DiskTable> {
    match GptDisk::read(dev, geometry, options, diagnostics) {
        Ok(gpt) => return Ok(DiskTable::Gpt(gpt)),
        Err(err) if err.is_detection_miss() => debug!("no GPT: {}", err),
        Err(err) => return Err(err),
    }

    let table = match read_mbr(dev) {
        Ok(table) => table,
        Err(err) if err.is_detection_miss() => {
            debug!("no MBR: {}", err);
            return Err(Error::UnrecognizedTable);
        }
        Err(err) => return Err(err),
    };

    if table.is_gpt_protective() {
        warn!("protective MBR found but no valid GPT header at LBA 1");
        diagnostics.push("protective MBR (type 0xEE) without a valid GPT header".to_string());
    }

    let mut logicals: [Vec<LogicalPartition>; MbrTable::NUM_PARTITIONS] = Default::default();
    for (slot, entry) in table.entries.iter().enumerate() {
        if !entry.is_empty() && entry.partition_type.is_extended() {
            logicals[slot] =
                walk_ebr_chain(dev, geometry, entry.first_sector as u64, options, diagnostics)?;
        }
    }

    Ok(DiskTable::Mbr(MbrDisk { table, logicals }))
}

/// Detect the partition table and build the unified partition list
pub fn detect_and_read(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    options: &ReadOptions,
) -> Result<UnifiedTable> {
    let mut diagnostics = Vec::new();
    let disk = read_table(dev, geometry, options, &mut diagnostics)?;
    Ok(UnifiedTable::build(&disk, geometry, diagnostics))
}

/// The flattened view of a GPT or MBR disk
///
/// Records are numbered 1..N in on-disk slot order; MBR logicals follow
/// their extended container. A trailing unused-space record is appended when
/// space remains after the last partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifiedTable {
    pub kind: TableKind,
    pub geometry: DeviceGeometry,
    pub partitions: Vec<PartitionRecord>,
    /// Non-fatal problems found while reading
    pub diagnostics: Vec<String>,
    /// Disk GUID (GPT)
    pub disk_guid: Option<String>,
    /// Disk signature (MBR)
    pub disk_signature: Option<u32>,
    /// Total slots in the GPT entry array or MBR table
    pub slot_count: usize,
    /// 1-based slots that are free for a new partition
    pub available_slots: Vec<usize>,
}

impl UnifiedTable {
    /// Flatten a raw table
    pub fn build(disk: &DiskTable, geometry: &DeviceGeometry, diagnostics: Vec<String>) -> Self {
        let sector_size = geometry.sector_size;
        let (mut partitions, floor, ceiling) = match disk {
            DiskTable::Gpt(gpt) => (
                gpt_records(&gpt.entries, sector_size),
                gpt.header.first_usable_lba.max(DEFAULT_FIRST_USABLE_LBA),
                gpt.header.last_usable_lba,
            ),
            DiskTable::Mbr(mbr) => (mbr_records(mbr, sector_size), 1, geometry.last_lba()),
        };

        let gap_start = partitions
            .iter()
            .map(|record| record.last_lba.saturating_add(1))
            .max()
            .map_or(floor, |end| end.max(floor));
        if gap_start <= ceiling {
            partitions.push(PartitionRecord::unused(
                partitions.len() + 1,
                gap_start,
                ceiling,
                sector_size,
            ));
        }

        let (disk_guid, disk_signature, slot_count, available_slots) = match disk {
            DiskTable::Gpt(gpt) => (
                Some(gpt.disk_guid().to_string()),
                None,
                gpt.entries.len(),
                gpt.entries
                    .iter()
                    .filter(|(_, entry)| entry.is_unused())
                    .map(|(slot, _)| slot + 1)
                    .collect(),
            ),
            DiskTable::Mbr(mbr) => (
                None,
                Some(mbr.table.disk_signature()),
                MbrTable::NUM_PARTITIONS,
                mbr.table.free_slots().into_iter().map(|slot| slot + 1).collect(),
            ),
        };

        Self {
            kind: disk.kind(),
            geometry: *geometry,
            partitions,
            diagnostics,
            disk_guid,
            disk_signature,
            slot_count,
            available_slots,
        }
    }

    /// The trailing unused-space record, if any
    pub fn unused(&self) -> Option<&PartitionRecord> {
        self.partitions.iter().find(|record| record.is_unused)
    }

    /// Records describing real partitions
    pub fn real_partitions(&self) -> impl Iterator<Item = &PartitionRecord> {
        self.partitions.iter().filter(|record| !record.is_unused)
    }
}

impl PartitionTable for UnifiedTable {
    fn identify(&self) -> &str {
        self.kind.name()
    }

    fn partitions(&self) -> &[PartitionRecord] {
        &self.partitions
    }
}

fn gpt_records(entries: &GptEntryArray, sector_size: u32) -> Vec<PartitionRecord> {
    entries
        .occupied()
        .enumerate()
        .map(|(index, (slot, entry))| PartitionRecord {
            number: index + 1,
            kind: PartitionKind::Gpt,
            slot: Some(slot),
            first_lba: entry.first_lba,
            last_lba: entry.last_lba,
            total_sectors: entry.size_lba(),
            sector_size,
            type_name: entry.partition_type_guid.name().to_string(),
            type_id: entry.partition_type_guid.0.to_string(),
            unique_guid: Some(entry.unique_partition_guid.to_string()),
            name: entry.name(),
            active: false,
            is_unused: false,
        })
        .collect()
}

fn mbr_record(
    number: usize,
    kind: PartitionKind,
    slot: Option<usize>,
    first_lba: u64,
    entry: &MbrPartitionEntry,
    sector_size: u32,
) -> PartitionRecord {
    PartitionRecord {
        number,
        kind,
        slot,
        first_lba,
        last_lba: first_lba + entry.sectors as u64 - 1,
        total_sectors: entry.sectors as u64,
        sector_size,
        type_name: entry.partition_type.name().to_string(),
        type_id: format!("0x{:02X}", entry.partition_type.to_byte()),
        unique_guid: None,
        name: String::new(),
        active: entry.is_active(),
        is_unused: false,
    }
}

fn mbr_records(mbr: &MbrDisk, sector_size: u32) -> Vec<PartitionRecord> {
    let mut records = Vec::new();
    for (slot, entry) in mbr.table.entries.iter().enumerate() {
        if entry.is_empty() {
            continue;
        }
        let kind = if entry.partition_type.is_extended() {
            PartitionKind::Extended
        } else {
            PartitionKind::Primary
        };
        records.push(mbr_record(
            records.len() + 1,
            kind,
            Some(slot),
            entry.first_sector as u64,
            entry,
            sector_size,
        ));

        for logical in &mbr.logicals[slot] {
            records.push(mbr_record(
                records.len() + 1,
                PartitionKind::Logical,
                None,
                logical.first_lba,
                &logical.entry,
                sector_size,
            ));
        }
    }
    records
}
