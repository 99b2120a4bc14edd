//! MBR (Master Boot Record) codec
//!
//! The Master Boot Record is the traditional partitioning scheme used by BIOS-based systems.
//! It supports up to 4 primary partitions, or 3 primary partitions and 1 extended partition
//! whose logical partitions are chained through EBRs (see [`ebr`]).

pub mod ebr;
pub mod types;

use dsktool_core::{DeviceGeometry, RandomAccessDevice, Result};
use tracing::debug;
use types::MbrTable;

/// Read the MBR from the first 512 bytes of the device
///
/// # Errors
///
/// Returns `NotMbr` if the boot signature is not 0xAA55
pub fn read_mbr(dev: &mut dyn RandomAccessDevice) -> Result<MbrTable> {
    let mut sector = [0u8; MbrTable::MBR_SIZE];
    dev.read_at(0, &mut sector)?;
    MbrTable::from_bytes(&sector)
}

/// Write the 512-byte MBR verbatim and sync
pub fn write_mbr(dev: &mut dyn RandomAccessDevice, table: &MbrTable) -> Result<()> {
    dev.write_at(0, &table.to_bytes())?;
    dev.sync()?;
    debug!(disk_signature = table.disk_signature(), "wrote MBR");
    Ok(())
}

/// Write a terminating EBR (no entries, signature only) at `lba`
///
/// A fresh extended container starts with one of these so the chain walk
/// finds a valid, empty first link.
pub fn write_empty_ebr(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    lba: u64,
) -> Result<()> {
    let mut sector = vec![0u8; geometry.sector_size as usize];
    sector[..MbrTable::MBR_SIZE].copy_from_slice(&MbrTable::empty().to_bytes());
    dev.write_at(geometry.byte_offset(lba)?, &sector)?;
    debug!(lba, "wrote empty EBR");
    Ok(())
}
