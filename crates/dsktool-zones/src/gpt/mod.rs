//! GPT (GUID Partition Table) codec
//!
//! ```text
//! LBA 0:    Protective MBR (for backward compatibility)
//! LBA 1:    Primary GPT header
//! LBA 2-33: Partition entries array (typically 128 entries)
//! LBA 34+:  Usable disk space
//! ...
//! Last 33:  Backup partition entries array
//! Last 1:   Backup GPT header
//! ```

pub mod types;

use crate::guid::Guid;
use crate::phase::Phase;
use crate::reader::ReadOptions;
use dsktool_core::{DeviceGeometry, Error, RandomAccessDevice, Result};
use std::io;
use tracing::{debug, info, warn};
use types::{GptEntryArray, GptHeader};

/// LBA of the primary GPT header
pub const PRIMARY_HEADER_LBA: u64 = 1;

/// Lowest usable LBA with a standard 128 × 128-byte entry array
pub const DEFAULT_FIRST_USABLE_LBA: u64 = 34;

/// A GPT as read from disk: header, its raw sector, and the raw entry array
#[derive(Debug, Clone)]
pub struct GptDisk {
    /// Parsed primary header
    pub header: GptHeader,
    /// Raw primary header sector
    pub header_sector: Vec<u8>,
    /// Raw entry array, empty slots included
    pub entries: GptEntryArray,
}

impl GptDisk {
    /// Read and validate the primary GPT
    ///
    /// CRC mismatches are errors in strict mode; otherwise they are logged and
    /// appended to `diagnostics`.
    ///
    /// # Errors
    ///
    /// Returns `NotGpt` if LBA 1 carries no GPT signature, `MalformedHeader`
    /// for structurally unusable headers (and, in strict mode, for entries
    /// outside the usable range), or `CrcMismatch` in strict mode
    pub fn read(
        dev: &mut dyn RandomAccessDevice,
        geometry: &DeviceGeometry,
        options: &ReadOptions,
        diagnostics: &mut Vec<String>,
    ) -> Result<Self> {
        let (header, header_sector) = read_header(dev, geometry, PRIMARY_HEADER_LBA)?;
        header.validate(geometry)?;
        header
            .header_check(&header_sector)?
            .enforce(options.strict, diagnostics)?;

        let entries = read_entries(dev, geometry, &header)?;
        header
            .entries_check(&entries)
            .enforce(options.strict, diagnostics)?;

        for (slot, entry) in entries.occupied() {
            if let Some(fault) = header.entry_fault(&entry) {
                let message = format!("GPT entry {} {}", slot + 1, fault);
                if options.strict {
                    return Err(Error::malformed_header(message));
                }
                warn!(slot = slot + 1, %fault, "GPT entry out of range");
                diagnostics.push(message);
            }
        }

        debug!(
            entries = header.num_partition_entries,
            entry_size = header.partition_entry_size,
            first_usable = header.first_usable_lba,
            last_usable = header.last_usable_lba,
            "read primary GPT"
        );

        Ok(Self {
            header,
            header_sector,
            entries,
        })
    }

    /// Get the disk GUID
    pub fn disk_guid(&self) -> Guid {
        self.header.disk_guid
    }
}

/// Read the header sector at `lba`
///
/// # Errors
///
/// Returns `NotGpt` if the LBA is past the end of the disk or the signature
/// is not `"EFI PART"`
pub fn read_header(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    lba: u64,
) -> Result<(GptHeader, Vec<u8>)> {
    if lba > geometry.last_lba() {
        return Err(Error::not_gpt(format!(
            "LBA {} is past the end of a {}-sector disk",
            lba, geometry.disk_size_sectors
        )));
    }

    let mut sector = vec![0u8; geometry.sector_size as usize];
    dev.read_at(geometry.byte_offset(lba)?, &mut sector)?;
    let header = GptHeader::from_bytes(&sector)?;
    Ok((header, sector))
}

/// Read the raw entry array described by `header`
pub fn read_entries(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    header: &GptHeader,
) -> Result<GptEntryArray> {
    let len = header.entry_array_len()?;
    let mut bytes = vec![0u8; len];
    dev.read_at(geometry.byte_offset(header.partition_entries_lba)?, &mut bytes)?;
    GptEntryArray::from_bytes(bytes, header.partition_entry_size as usize)
}

/// One header plus its sector, ready to write
struct StagedHeader {
    header: GptHeader,
    sector: Vec<u8>,
}

/// Write the entry array and both headers with a two-phase commit
///
/// Both images are staged in memory first. The backup entry array and
/// header are written and synced, then read back and compared; only then is
/// the primary written. On success `disk.header` and `disk.header_sector`
/// reflect what is on disk.
///
/// # Errors
///
/// Returns `VerificationFailed` if the backup read-back differs (the primary
/// is untouched), or `PartiallyCommitted` if the primary write fails after
/// the backup was committed
pub fn write_table(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    disk: &mut GptDisk,
) -> Result<()> {
    let entries_crc32 = disk.entries.crc32();

    let mut primary = StagedHeader {
        header: disk.header.clone(),
        sector: disk.header_sector.clone(),
    };
    primary.header.partition_entries_crc32 = entries_crc32;
    primary.header.seal(&mut primary.sector)?;

    let mut backup = stage_backup(dev, geometry, &primary.header)?;
    backup.header.seal(&mut backup.sector)?;

    let entry_bytes = disk.entries.as_bytes();

    debug!(phase = %Phase::WriteBackup, lba = backup.header.current_lba, "commit");
    write_image(dev, geometry, &backup, entry_bytes)?;
    dev.sync()?;

    debug!(phase = %Phase::VerifyBackup, lba = backup.header.current_lba, "commit");
    verify_image(dev, geometry, &backup, entry_bytes)?;

    debug!(phase = %Phase::WritePrimary, lba = primary.header.current_lba, "commit");
    write_image(dev, geometry, &primary, entry_bytes)
        .and_then(|()| dev.sync())
        .map_err(|err| Error::PartiallyCommitted {
            source: into_io_error(err),
        })?;

    info!("committed GPT (entry array CRC32 0x{:08X})", entries_crc32);

    disk.header = primary.header;
    disk.header_sector = primary.sector;
    Ok(())
}

/// Load the backup header that pairs with `primary`
///
/// The on-disk backup is reused only if its CRC is intact, it records its
/// own LBA, and the primary's entry array fits between the usable range and
/// the header. Otherwise it is rebuilt from the primary.
fn stage_backup(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    primary: &GptHeader,
) -> Result<StagedHeader> {
    let lba = primary.backup_lba;
    if lba <= primary.last_usable_lba || lba > geometry.last_lba() {
        return Err(Error::malformed_header(format!(
            "backup header LBA {} is outside {}..={}",
            lba,
            primary.last_usable_lba.saturating_add(1),
            geometry.last_lba()
        )));
    }

    match read_header(dev, geometry, lba) {
        Ok((header, sector)) => match adopt_backup(geometry, primary, header, &sector) {
            Ok(header) => return Ok(StagedHeader { header, sector }),
            Err(fault) => {
                warn!(lba, %fault, "backup GPT header unusable; rebuilding from primary")
            }
        },
        Err(Error::NotGpt(reason)) => {
            warn!(lba, %reason, "backup GPT header missing; rebuilding from primary")
        }
        Err(err) => return Err(err),
    }

    Ok(StagedHeader {
        header: primary.mirrored(geometry.sector_size)?,
        sector: vec![0u8; geometry.sector_size as usize],
    })
}

/// Check an on-disk backup header and align it with `primary`
///
/// Returns the reason the header cannot be trusted as a write target.
fn adopt_backup(
    geometry: &DeviceGeometry,
    primary: &GptHeader,
    mut header: GptHeader,
    sector: &[u8],
) -> std::result::Result<GptHeader, String> {
    let check = header.header_check(sector).map_err(|err| err.to_string())?;
    if !check.is_valid() {
        return Err(format!(
            "header CRC32 0x{:08X} does not match computed 0x{:08X}",
            check.stored, check.computed
        ));
    }
    if header.current_lba != primary.backup_lba {
        return Err(format!(
            "header records LBA {} but sits at LBA {}",
            header.current_lba, primary.backup_lba
        ));
    }

    header.backup_lba = primary.current_lba;
    header.first_usable_lba = primary.first_usable_lba;
    header.last_usable_lba = primary.last_usable_lba;
    header.disk_guid = primary.disk_guid;
    header.num_partition_entries = primary.num_partition_entries;
    header.partition_entry_size = primary.partition_entry_size;
    header.partition_entries_crc32 = primary.partition_entries_crc32;
    header.validate(geometry).map_err(|err| err.to_string())?;

    let array_sectors = header
        .entry_array_sectors(geometry.sector_size)
        .map_err(|err| err.to_string())?;
    let array_end = header.partition_entries_lba.saturating_add(array_sectors);
    if header.partition_entries_lba <= primary.last_usable_lba || array_end > header.current_lba {
        return Err(format!(
            "entry array at LBA {} ({} sectors) does not fit between LBA {} and the header",
            header.partition_entries_lba, array_sectors, primary.last_usable_lba
        ));
    }
    Ok(header)
}

fn write_image(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    staged: &StagedHeader,
    entry_bytes: &[u8],
) -> Result<()> {
    dev.write_at(
        geometry.byte_offset(staged.header.partition_entries_lba)?,
        entry_bytes,
    )?;
    dev.write_at(geometry.byte_offset(staged.header.current_lba)?, &staged.sector)
}

fn verify_image(
    dev: &mut dyn RandomAccessDevice,
    geometry: &DeviceGeometry,
    staged: &StagedHeader,
    entry_bytes: &[u8],
) -> Result<()> {
    let mut entries = vec![0u8; entry_bytes.len()];
    dev.read_at(
        geometry.byte_offset(staged.header.partition_entries_lba)?,
        &mut entries,
    )?;
    if entries != entry_bytes {
        return Err(Error::VerificationFailed(format!(
            "entry array at LBA {} differs from what was written",
            staged.header.partition_entries_lba
        )));
    }

    let mut sector = vec![0u8; staged.sector.len()];
    dev.read_at(geometry.byte_offset(staged.header.current_lba)?, &mut sector)?;
    if sector != staged.sector {
        return Err(Error::VerificationFailed(format!(
            "header at LBA {} differs from what was written",
            staged.header.current_lba
        )));
    }
    Ok(())
}

fn into_io_error(err: Error) -> io::Error {
    match err {
        Error::Io(err) => err,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::types::{GptPartitionEntry, PartitionTypeGuid};
    use super::*;
    use crate::fixtures::{
        gpt_image, gpt_image_with, FailingDevice, FailureMode, GptLayout, RESERVED_FILL, SECTOR,
    };
    use std::io::Cursor;

    const TOTAL: u64 = 1000;

    fn geometry() -> DeviceGeometry {
        DeviceGeometry::new(512, TOTAL).unwrap()
    }

    fn one_partition() -> Cursor<Vec<u8>> {
        gpt_image(TOTAL, &[(PartitionTypeGuid::LINUX_FILESYSTEM, 100, 199, "Test")])
    }

    fn read(dev: &mut dyn RandomAccessDevice, strict: bool) -> Result<(GptDisk, Vec<String>)> {
        let mut diagnostics = Vec::new();
        let disk = GptDisk::read(dev, &geometry(), &ReadOptions { strict }, &mut diagnostics)?;
        Ok((disk, diagnostics))
    }

    fn backup(dev: &mut dyn RandomAccessDevice) -> (GptHeader, Vec<u8>, Vec<u8>) {
        let (header, sector) = read_header(dev, &geometry(), TOTAL - 1).unwrap();
        let entries = read_entries(dev, &geometry(), &header).unwrap();
        (header, sector, entries.as_bytes().to_vec())
    }

    /// Edit the backup header in place, optionally keeping its stale CRC
    fn edit_backup(
        dev: &mut dyn RandomAccessDevice,
        reseal: bool,
        edit: impl FnOnce(&mut GptHeader),
    ) {
        let (mut header, mut sector) = read_header(dev, &geometry(), TOTAL - 1).unwrap();
        edit(&mut header);
        if reseal {
            header.seal(&mut sector).unwrap();
        } else {
            header.write_into(&mut sector);
        }
        dev.write_at((TOTAL - 1) * SECTOR as u64, &sector).unwrap();
    }

    fn assert_backup_rebuilt(dev: &mut dyn RandomAccessDevice, disk: &GptDisk) {
        let (header, sector, entries) = backup(dev);
        assert!(header.header_check(&sector).unwrap().is_valid());
        assert_eq!(header.current_lba, TOTAL - 1);
        assert_eq!(header.backup_lba, 1);
        assert_eq!(header.partition_entries_lba, TOTAL - 33);
        assert_eq!(header.num_partition_entries, disk.header.num_partition_entries);
        assert_eq!(entries, disk.entries.as_bytes());
    }

    #[test]
    fn test_read_valid_gpt() {
        let mut image = one_partition();
        let (disk, diagnostics) = read(&mut image, true).unwrap();

        assert!(diagnostics.is_empty());
        assert_eq!(disk.entries.len(), 128);
        let occupied: Vec<_> = disk.entries.occupied().collect();
        assert_eq!(occupied.len(), 1);
        assert_eq!(occupied[0].1.first_lba, 100);
        assert_eq!(occupied[0].1.last_lba, 199);
        assert_eq!(occupied[0].1.name(), "Test");
        assert_eq!(disk.header.usable_lba_count(), 933);
    }

    #[test]
    fn test_read_invalid_signature() {
        let mut image = one_partition();
        image.get_mut()[SECTOR] = 0xFF;
        assert!(matches!(read(&mut image, false), Err(Error::NotGpt(_))));
    }

    #[test]
    fn test_read_header_past_end() {
        let mut image = Cursor::new(vec![0u8; 512]);
        let geometry = DeviceGeometry::new(512, 1).unwrap();
        assert!(matches!(
            read_header(&mut image, &geometry, 1),
            Err(Error::NotGpt(_))
        ));
    }

    #[test]
    fn test_header_crc_mismatch_strict_and_lenient() {
        let mut image = one_partition();
        // first_usable_lba, outside the CRC field
        image.get_mut()[SECTOR + 40] = 35;

        assert!(matches!(
            read(&mut image, true),
            Err(Error::CrcMismatch { region: "GPT header", .. })
        ));

        let (disk, diagnostics) = read(&mut image, false).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(disk.header.first_usable_lba, 35);
    }

    #[test]
    fn test_entries_crc_mismatch_strict_and_lenient() {
        let mut image = one_partition();
        image.get_mut()[2 * SECTOR + 100] = 0xFF;

        assert!(matches!(
            read(&mut image, true),
            Err(Error::CrcMismatch { region: "GPT partition entry array", .. })
        ));
        let (_, diagnostics) = read(&mut image, false).unwrap();
        assert!(diagnostics[0].contains("entry array"));
    }

    #[test]
    fn test_malformed_header_size() {
        let mut image = one_partition();
        image.get_mut()[SECTOR + 12..SECTOR + 16].copy_from_slice(&600u32.to_le_bytes());
        assert!(matches!(read(&mut image, false), Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_write_unchanged_is_byte_identical() {
        let mut image = one_partition();
        let original = image.get_ref().clone();

        let (mut disk, _) = read(&mut image, true).unwrap();
        write_table(&mut image, &geometry(), &mut disk).unwrap();

        assert_eq!(image.get_ref(), &original);
    }

    #[test]
    fn test_write_keeps_crcs_and_mirrors_backup() {
        let mut image = one_partition();
        let (mut disk, _) = read(&mut image, true).unwrap();

        let entry = GptPartitionEntry::new(
            PartitionTypeGuid::LINUX_SWAP,
            Guid::generate(),
            200,
            299,
            "swap",
        )
        .unwrap();
        disk.entries.set(1, &entry).unwrap();
        write_table(&mut image, &geometry(), &mut disk).unwrap();

        let (reread, _) = read(&mut image, true).unwrap();
        assert_eq!(reread.entries.occupied().count(), 2);

        let (backup_header, backup_sector, backup_entries) = backup(&mut image);
        assert!(backup_header.header_check(&backup_sector).unwrap().is_valid());
        assert_eq!(backup_header.partition_entries_crc32, reread.entries.crc32());
        assert_eq!(backup_entries, reread.entries.as_bytes());
        assert_eq!(backup_header.current_lba, TOTAL - 1);
        assert_eq!(backup_header.backup_lba, 1);
    }

    #[test]
    fn test_write_rebuilds_missing_backup() {
        let mut image = one_partition();
        let backup_offset = (TOTAL as usize - 1) * SECTOR;
        image.get_mut()[backup_offset..backup_offset + SECTOR].fill(0);

        let (mut disk, _) = read(&mut image, true).unwrap();
        write_table(&mut image, &geometry(), &mut disk).unwrap();

        let (header, sector, entries) = backup(&mut image);
        assert!(header.header_check(&sector).unwrap().is_valid());
        assert_eq!(header.current_lba, TOTAL - 1);
        assert_eq!(header.backup_lba, 1);
        assert_eq!(header.partition_entries_lba, TOTAL - 33);
        assert_eq!(entries, disk.entries.as_bytes());
    }

    #[test]
    fn test_primary_failure_is_partially_committed() {
        let image = one_partition();
        let mut device = FailingDevice::new(image, 0..34 * SECTOR as u64, FailureMode::Error);

        let (mut disk, _) = read(&mut device, true).unwrap();
        disk.entries.clear(0).unwrap();

        let result = write_table(&mut device, &geometry(), &mut disk);
        assert!(matches!(result, Err(Error::PartiallyCommitted { .. })));

        // Backup already reflects the deletion
        let (_, _, entries) = backup(&mut device);
        assert!(entries.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_backup_mismatch_leaves_primary_untouched() {
        let image = one_partition();
        let original = image.get_ref().clone();
        let backup_region = (TOTAL - 33) * SECTOR as u64..TOTAL * SECTOR as u64;
        let mut device = FailingDevice::new(image, backup_region, FailureMode::Drop);

        let (mut disk, _) = read(&mut device, true).unwrap();
        disk.entries.clear(0).unwrap();

        let result = write_table(&mut device, &geometry(), &mut disk);
        assert!(matches!(result, Err(Error::VerificationFailed(_))));
        assert_eq!(device.into_inner().into_inner(), original);
    }

    #[test]
    fn test_backup_with_stale_crc_is_not_a_write_target() {
        let mut image = one_partition();
        let user_data = 500 * SECTOR;
        image.get_mut()[user_data..user_data + SECTOR].fill(0xAB);
        edit_backup(&mut image, false, |header| header.partition_entries_lba = 500);

        let (mut disk, _) = read(&mut image, true).unwrap();
        disk.entries.clear(0).unwrap();
        write_table(&mut image, &geometry(), &mut disk).unwrap();

        assert!(image.get_ref()[user_data..user_data + SECTOR].iter().all(|&b| b == 0xAB));
        assert_backup_rebuilt(&mut image, &disk);
    }

    #[test]
    fn test_backup_entry_array_inside_usable_range_is_rebuilt() {
        let mut image = one_partition();
        let user_data = 150 * SECTOR;
        image.get_mut()[user_data..user_data + SECTOR].fill(0xAB);
        edit_backup(&mut image, true, |header| header.partition_entries_lba = 150);

        let (mut disk, _) = read(&mut image, true).unwrap();
        write_table(&mut image, &geometry(), &mut disk).unwrap();

        assert!(image.get_ref()[user_data..user_data + SECTOR].iter().all(|&b| b == 0xAB));
        assert_backup_rebuilt(&mut image, &disk);
    }

    #[test]
    fn test_backup_recording_another_lba_is_rebuilt() {
        let mut image = one_partition();
        edit_backup(&mut image, true, |header| header.current_lba = TOTAL - 2);

        let (mut disk, _) = read(&mut image, true).unwrap();
        write_table(&mut image, &geometry(), &mut disk).unwrap();

        assert_backup_rebuilt(&mut image, &disk);
    }

    #[test]
    fn test_backup_too_small_for_primary_array_is_rebuilt() {
        let mut image = one_partition();
        edit_backup(&mut image, true, |header| {
            header.num_partition_entries = 4;
            header.partition_entries_lba = TOTAL - 2;
        });

        let (mut disk, _) = read(&mut image, true).unwrap();
        write_table(&mut image, &geometry(), &mut disk).unwrap();

        assert_eq!(image.get_ref().len(), TOTAL as usize * SECTOR);
        assert_backup_rebuilt(&mut image, &disk);
        assert_eq!(read(&mut image, true).unwrap().1, Vec::<String>::new());
    }

    #[test]
    fn test_wide_entries_and_long_header_round_trip() {
        let layout = GptLayout {
            entry_count: 128,
            entry_size: 256,
            header_size: 120,
        };
        let mut image = gpt_image_with(
            TOTAL,
            layout,
            &[(PartitionTypeGuid::LINUX_FILESYSTEM, 100, 199, "wide")],
        );
        let original = image.get_ref().clone();

        let (mut disk, diagnostics) = read(&mut image, true).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(disk.header.header_size, 120);
        assert_eq!(disk.header.first_usable_lba, 66);
        assert_eq!(disk.entries.entry_size(), 256);
        assert_eq!(disk.entries.get(0).unwrap().name(), "wide");

        write_table(&mut image, &geometry(), &mut disk).unwrap();
        assert_eq!(image.get_ref(), &original);

        let entry = GptPartitionEntry::new(
            PartitionTypeGuid::LINUX_SWAP,
            Guid::generate(),
            300,
            399,
            "swap",
        )
        .unwrap();
        disk.entries.set(1, &entry).unwrap();
        write_table(&mut image, &geometry(), &mut disk).unwrap();

        let (reread, diagnostics) = read(&mut image, true).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(reread.entries.occupied().count(), 2);
        assert!(reread.header_sector[92..120].iter().all(|&b| b == RESERVED_FILL));
        assert!(reread.entries.as_bytes()[128..256].iter().all(|&b| b == RESERVED_FILL));

        let (header, sector, entries) = backup(&mut image);
        assert!(header.header_check(&sector).unwrap().is_valid());
        assert_eq!(header.partition_entries_lba, TOTAL - 65);
        assert_eq!(header.partition_entries_crc32, reread.entries.crc32());
        assert_eq!(entries, reread.entries.as_bytes());
        assert!(sector[92..120].iter().all(|&b| b == RESERVED_FILL));
    }
}
