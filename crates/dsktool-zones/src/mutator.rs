//! Partition create/delete for GPT and MBR disks
//!
//! Every mutation re-reads the table, validates the request completely, and
//! only then writes. GPT writes go through [`write_table`]'s two-phase commit.

use crate::extent::Extent;
use crate::gpt::types::{GptPartitionEntry, PartitionTypeGuid};
use crate::gpt::{write_table, GptDisk};
use crate::guid::Guid;
use crate::mbr::types::{MbrPartitionEntry, MbrPartitionType, MbrTable};
use crate::mbr::{write_empty_ebr, write_mbr};
pub use crate::phase::Phase;
use crate::reader::{read_table, DiskTable, MbrDisk, ReadOptions, UnifiedTable};
use dsktool_core::{
    DeviceGeometry, Error, PartitionKind, PartitionRecord, PartitionTable, RandomAccessDevice,
    Result, TableKind,
};
use tracing::{debug, info};

/// GPT attribute bit 2: legacy BIOS bootable
pub const GPT_ATTR_LEGACY_BIOS_BOOTABLE: u64 = 1 << 2;

/// A request to create one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Scheme the caller expects the disk to carry
    pub scheme: TableKind,
    /// Preferred 1-based slot; required to be free on MBR, a preference on GPT
    pub slot_hint: Option<usize>,
    /// First LBA; defaults to the start of the free space
    pub first_lba: Option<u64>,
    /// End LBA or size
    pub extent: Extent,
    /// Type name, GUID literal (GPT) or `0xNN` literal (MBR)
    pub type_name: String,
    /// Partition name (GPT only)
    pub name: String,
    /// Set the active flag (MBR) or the legacy BIOS bootable attribute (GPT)
    pub bootable: bool,
}

/// Result of a committed mutation
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// The created or deleted partition as it was recorded
    pub record: PartitionRecord,
    /// The table re-read after the write
    pub table: UnifiedTable,
}

/// Create a partition inside `free_space`
///
/// `free_space` must be the unused-space record from a previous read; if the
/// disk no longer reports the same gap the request is rejected.
///
/// # Errors
///
/// - `InvalidRequest` for a scheme mismatch, stale free space, or bad name
/// - `OutOfBounds` if the range leaves the gap or overlaps a partition
/// - `UnknownPartitionType` if the type does not resolve
/// - `SlotUnavailable` if no suitable slot is free
/// - `VerificationFailed` / `PartiallyCommitted` from the GPT commit
pub fn create(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    free_space: &PartitionRecord,
    request: &CreateRequest,
    options: &ReadOptions,
) -> Result<MutationOutcome> {
    if !free_space.is_unused {
        return Err(Error::invalid_request(format!(
            "partition {} is not free space",
            free_space.number
        )));
    }

    debug!(phase = %Phase::Idle, "create");
    debug!(phase = %Phase::ReadTable, "create");
    let mut diagnostics = Vec::new();
    let mut disk = read_table(dev, geometry, options, &mut diagnostics)?;
    let table = UnifiedTable::build(&disk, geometry, diagnostics);

    debug!(phase = %Phase::Validate, "create");
    if table.kind != request.scheme {
        return Err(Error::invalid_request(format!(
            "request is for {} but the disk carries {}",
            request.scheme, table.kind
        )));
    }
    let gap = table
        .unused()
        .filter(|gap| gap.first_lba == free_space.first_lba && gap.last_lba == free_space.last_lba)
        .ok_or_else(|| {
            Error::invalid_request(format!(
                "free space LBA {}..={} no longer matches the disk",
                free_space.first_lba, free_space.last_lba
            ))
        })?;

    let first_lba = request.first_lba.unwrap_or(gap.first_lba);
    let last_lba = request.extent.last_lba(first_lba, geometry.sector_size)?;
    check_range(&table, gap, first_lba, last_lba)?;

    let slot = match &mut disk {
        DiskTable::Gpt(gpt) => stage_gpt_create(gpt, request, first_lba, last_lba)?,
        DiskTable::Mbr(mbr) => stage_mbr_create(mbr, request, first_lba, last_lba)?,
    };

    debug!(phase = %Phase::Mutate, slot = slot + 1, first_lba, last_lba, "create");
    if let DiskTable::Mbr(mbr) = &disk {
        if mbr.table.entries[slot].partition_type.is_extended() {
            write_empty_ebr(dev, geometry, first_lba)?;
        }
    }
    commit(dev, geometry, &mut disk)?;

    let table = reread(dev, geometry, options)?;
    let record = table
        .partitions
        .iter()
        .find(|record| record.slot == Some(slot))
        .cloned()
        .ok_or(Error::PartitionNotFound(slot + 1))?;

    info!(
        number = record.number,
        first_lba, last_lba, type_name = %record.type_name, "created partition"
    );
    Ok(MutationOutcome { record, table })
}

/// Delete partition `number` from the unified list
///
/// `mounted` is supplied by the caller; a mounted partition is refused
/// before the disk is touched.
///
/// # Errors
///
/// - `PartitionMounted` if `mounted` is set
/// - `PartitionNotFound` if no record has that number
/// - `UnsupportedOperation` for MBR logicals and extended containers
/// - `InvalidRequest` for the unused-space record
pub fn delete(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    number: usize,
    mounted: bool,
    options: &ReadOptions,
) -> Result<MutationOutcome> {
    if mounted {
        return Err(Error::PartitionMounted(number));
    }

    debug!(phase = %Phase::Idle, "delete");
    debug!(phase = %Phase::ReadTable, "delete");
    let mut diagnostics = Vec::new();
    let mut disk = read_table(dev, geometry, options, &mut diagnostics)?;
    let table = UnifiedTable::build(&disk, geometry, diagnostics);

    debug!(phase = %Phase::Validate, number, "delete");
    let record = table
        .get_partition(number)
        .cloned()
        .ok_or(Error::PartitionNotFound(number))?;

    let slot = match (record.kind, record.slot) {
        (PartitionKind::Unused, _) => {
            return Err(Error::invalid_request(format!(
                "record {} is free space, not a partition",
                number
            )))
        }
        (PartitionKind::Logical, _) => {
            return Err(Error::unsupported("deleting a logical partition"))
        }
        (PartitionKind::Extended, _) => {
            return Err(Error::unsupported("deleting an extended partition"))
        }
        (_, Some(slot)) => slot,
        (_, None) => return Err(Error::PartitionNotFound(number)),
    };

    debug!(phase = %Phase::Mutate, number, slot = slot + 1, "delete");
    match &mut disk {
        DiskTable::Gpt(gpt) => gpt.entries.clear(slot)?,
        DiskTable::Mbr(mbr) => mbr.table.entries[slot] = MbrPartitionEntry::EMPTY,
    }
    commit(dev, geometry, &mut disk)?;

    let table = reread(dev, geometry, options)?;
    info!(
        number,
        first_lba = record.first_lba,
        last_lba = record.last_lba,
        "deleted partition"
    );
    Ok(MutationOutcome { record, table })
}

fn check_range(
    table: &UnifiedTable,
    gap: &PartitionRecord,
    first_lba: u64,
    last_lba: u64,
) -> Result<()> {
    if first_lba < gap.first_lba {
        return Err(Error::out_of_bounds(
            first_lba,
            last_lba,
            format!("starts before free space at LBA {}", gap.first_lba),
        ));
    }
    if last_lba > gap.last_lba {
        return Err(Error::out_of_bounds(
            first_lba,
            last_lba,
            format!("ends past free space at LBA {}", gap.last_lba),
        ));
    }
    if let Some(existing) = table
        .real_partitions()
        .find(|record| record.overlaps(first_lba, last_lba))
    {
        return Err(Error::out_of_bounds(
            first_lba,
            last_lba,
            format!("overlaps partition {}", existing.number),
        ));
    }
    Ok(())
}

fn stage_gpt_create(
    gpt: &mut GptDisk,
    request: &CreateRequest,
    first_lba: u64,
    last_lba: u64,
) -> Result<usize> {
    let partition_type = PartitionTypeGuid::resolve(&request.type_name)?;
    if first_lba < gpt.header.first_usable_lba || last_lba > gpt.header.last_usable_lba {
        return Err(Error::out_of_bounds(
            first_lba,
            last_lba,
            format!(
                "outside usable LBAs {}..={}",
                gpt.header.first_usable_lba, gpt.header.last_usable_lba
            ),
        ));
    }

    let hinted = request
        .slot_hint
        .and_then(|hint| hint.checked_sub(1))
        .filter(|&slot| gpt.entries.get(slot).is_some_and(|entry| entry.is_unused()));
    let slot = hinted
        .or_else(|| gpt.entries.first_free_slot())
        .ok_or_else(|| {
            Error::slot_unavailable(format!("all {} GPT entries are in use", gpt.entries.len()))
        })?;

    let mut entry = GptPartitionEntry::new(
        partition_type,
        Guid::generate(),
        first_lba,
        last_lba,
        &request.name,
    )?;
    if request.bootable {
        entry.attributes |= GPT_ATTR_LEGACY_BIOS_BOOTABLE;
    }
    gpt.entries.set(slot, &entry)?;
    Ok(slot)
}

fn stage_mbr_create(
    mbr: &mut MbrDisk,
    request: &CreateRequest,
    first_lba: u64,
    last_lba: u64,
) -> Result<usize> {
    let partition_type = MbrPartitionType::resolve(&request.type_name)?;

    let first_sector = u32::try_from(first_lba)
        .map_err(|_| Error::out_of_bounds(first_lba, last_lba, "start exceeds MBR 32-bit LBA"))?;
    let sectors = u32::try_from(last_lba - first_lba + 1)
        .map_err(|_| Error::out_of_bounds(first_lba, last_lba, "size exceeds MBR 32-bit count"))?;

    let slot = match request.slot_hint {
        Some(hint) if !(1..=MbrTable::NUM_PARTITIONS).contains(&hint) => {
            return Err(Error::slot_unavailable(format!(
                "MBR slot {} does not exist (use 1-{})",
                hint,
                MbrTable::NUM_PARTITIONS
            )))
        }
        Some(hint) if !mbr.table.entries[hint - 1].is_empty() => {
            return Err(Error::slot_unavailable(format!("MBR slot {} is occupied", hint)))
        }
        Some(hint) => hint - 1,
        None => mbr
            .table
            .free_slots()
            .first()
            .copied()
            .ok_or_else(|| Error::slot_unavailable("all 4 MBR slots are in use"))?,
    };

    if partition_type.is_extended()
        && mbr
            .table
            .entries
            .iter()
            .any(|entry| !entry.is_empty() && entry.partition_type.is_extended())
    {
        return Err(Error::invalid_request("disk already has an extended partition"));
    }
    if !request.name.is_empty() {
        debug!(name = %request.name, "MBR partitions have no name; ignored");
    }

    mbr.table.entries[slot] =
        MbrPartitionEntry::new(partition_type, first_sector, sectors, request.bootable);
    Ok(slot)
}

fn commit(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    disk: &mut DiskTable,
) -> Result<()> {
    match disk {
        DiskTable::Gpt(gpt) => write_table(dev, geometry, gpt)?,
        DiskTable::Mbr(mbr) => {
            debug!(phase = %Phase::WritePrimary, "commit");
            write_mbr(dev, &mbr.table)?;
        }
    }
    debug!(phase = %Phase::Done, "commit");
    Ok(())
}

fn reread(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    options: &ReadOptions,
) -> Result<UnifiedTable> {
    let mut diagnostics = Vec::new();
    let disk = read_table(dev, geometry, options, &mut diagnostics)?;
    Ok(UnifiedTable::build(&disk, geometry, diagnostics))
}
