//! Extended Boot Record chain walker
//!
//! Each EBR is MBR-shaped. Its first entry describes one logical partition,
//! relative to the EBR's own LBA. Its second entry, when extended, points at
//! the next EBR relative to the start of the outermost extended partition.

use super::types::{MbrPartitionEntry, MbrTable};
use crate::reader::ReadOptions;
use dsktool_core::{DeviceGeometry, Error, RandomAccessDevice, Result, MAX_EBR_HOPS};
use std::collections::HashSet;
use tracing::{debug, warn};

/// A logical partition found in the EBR chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPartition {
    /// LBA of the EBR describing this partition
    pub ebr_lba: u64,
    /// Absolute first LBA
    pub first_lba: u64,
    /// Absolute last LBA (inclusive)
    pub last_lba: u64,
    /// The raw first entry of the EBR
    pub entry: MbrPartitionEntry,
}

/// Walk the EBR chain of the extended partition starting at `base_lba`
///
/// The walk stops at the first EBR whose second entry is not an extended
/// link, when a link revisits an EBR, or after [`MAX_EBR_HOPS`] EBRs.
/// Logicals that extend past the end of the disk are skipped.
///
/// # Errors
///
/// An unreadable EBR (bad signature, or outside the disk) is a
/// `MalformedEbr` error in strict mode. In lenient mode it ends the walk
/// and is appended to `diagnostics`, keeping the logicals found so far.
/// Device errors always propagate.
pub fn walk_ebr_chain(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    base_lba: u64,
    options: &ReadOptions,
    diagnostics: &mut Vec<String>,
) -> Result<Vec<LogicalPartition>> {
    let mut logicals = Vec::new();
    let mut visited = HashSet::new();
    let mut current = base_lba;
    let mut sector = vec![0u8; geometry.sector_size as usize];

    for hop in 0..MAX_EBR_HOPS {
        visited.insert(current);

        let ebr = match read_ebr(dev, geometry, current, &mut sector) {
            Ok(ebr) => ebr,
            Err(err @ Error::MalformedEbr { .. }) if !options.strict => {
                warn!("{}; logical partition list truncated", err);
                diagnostics.push(err.to_string());
                return Ok(logicals);
            }
            Err(err) => return Err(err),
        };

        let first = ebr.entries[0];
        if !first.is_empty() {
            let first_lba = current + first.first_sector as u64;
            let last_lba = first_lba + first.sectors as u64 - 1;
            if last_lba > geometry.last_lba() {
                warn!(
                    ebr = current,
                    first_lba,
                    last_lba,
                    "logical partition extends past the end of the disk; skipped"
                );
                diagnostics.push(format!(
                    "logical partition at LBA {}..={} (EBR {}) extends past the end of the disk",
                    first_lba, last_lba, current
                ));
            } else {
                logicals.push(LogicalPartition {
                    ebr_lba: current,
                    first_lba,
                    last_lba,
                    entry: first,
                });
            }
        }

        let link = ebr.entries[1];
        if link.is_empty() || !link.partition_type.is_extended() {
            debug!(hops = hop + 1, logicals = logicals.len(), "EBR chain complete");
            return Ok(logicals);
        }

        let next = base_lba + link.first_sector as u64;
        if visited.contains(&next) {
            warn!(ebr = current, next, "EBR chain loops back; stopping");
            diagnostics.push(format!("EBR at LBA {} links back to LBA {}", current, next));
            return Ok(logicals);
        }
        current = next;
    }

    warn!(limit = MAX_EBR_HOPS, "EBR chain exceeds hop limit; stopping");
    diagnostics.push(format!("EBR chain truncated after {} links", MAX_EBR_HOPS));
    Ok(logicals)
}

fn read_ebr(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    lba: u64,
    sector: &mut [u8],
) -> Result<MbrTable> {
    if lba > geometry.last_lba() {
        return Err(Error::malformed_ebr(lba, "outside the disk"));
    }
    dev.read_at(geometry.byte_offset(lba)?, sector)?;
    MbrTable::from_bytes(sector).map_err(|err| match err {
        Error::NotMbr(reason) => Error::malformed_ebr(lba, reason),
        other => other,
    })
}
