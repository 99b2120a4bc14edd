//! GPT partition types and structures

use crate::bytes::{read_array, read_u32, read_u64, write_u32, write_u64};
use crate::crc::{self, CrcCheck, MIN_HEADER_SIZE};
use crate::guid::{decode_name, encode_name, Guid, NAME_BYTES};
use dsktool_core::{
    checked_multiply_u32_to_u64, validate_allocation_size, DeviceGeometry, Error, Result,
    MAX_ENTRY_ARRAY_SIZE, MAX_PARTITION_ENTRIES,
};
use std::fmt;

/// GPT partition type GUID
///
/// Well-known partition type GUIDs used in GPT partition tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionTypeGuid(pub Guid);

impl PartitionTypeGuid {
    /// Unused entry
    pub const UNUSED: Self = Self(Guid::ZERO);

    /// EFI System Partition
    pub const EFI_SYSTEM: Self = Self(Guid([
        0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11,
        0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e, 0xc9, 0x3b,
    ]));

    /// Microsoft Basic Data (FAT, NTFS, exFAT)
    pub const MICROSOFT_BASIC_DATA: Self = Self(Guid([
        0xa2, 0xa0, 0xd0, 0xeb, 0xe5, 0xb9, 0x33, 0x44,
        0x87, 0xc0, 0x68, 0xb6, 0xb7, 0x26, 0x99, 0xc7,
    ]));

    /// Microsoft Reserved
    pub const MICROSOFT_RESERVED: Self = Self(Guid([
        0x16, 0xe3, 0xc9, 0xe3, 0x5c, 0x0b, 0xb8, 0x4d,
        0x81, 0x7d, 0xf9, 0x2d, 0xf0, 0x02, 0x15, 0xae,
    ]));

    /// Linux filesystem
    pub const LINUX_FILESYSTEM: Self = Self(Guid([
        0xaf, 0x3d, 0xc6, 0x0f, 0x83, 0x84, 0x72, 0x47,
        0x8e, 0x79, 0x3d, 0x69, 0xd8, 0x47, 0x7d, 0xe4,
    ]));

    /// Linux swap
    pub const LINUX_SWAP: Self = Self(Guid([
        0x6d, 0xfd, 0x57, 0x06, 0xab, 0xa4, 0xc4, 0x43,
        0x84, 0xe5, 0x09, 0x33, 0xc8, 0x4b, 0x4f, 0x4f,
    ]));

    /// Get a human-readable name for this partition type
    pub fn name(&self) -> &str {
        if *self == Self::UNUSED {
            return "Unused";
        }
        KNOWN_GPT_TYPES
            .iter()
            .find(|known| known.guid == *self)
            .map_or("Unknown", |known| known.name)
    }

    /// Resolve a type name or GUID literal
    ///
    /// Names are matched case-insensitively against [`KNOWN_GPT_TYPES`].
    ///
    /// # Errors
    ///
    /// Returns `UnknownPartitionType` for anything else, including the zero GUID
    pub fn resolve(input: &str) -> Result<Self> {
        let wanted = input.trim();
        if let Some(known) = KNOWN_GPT_TYPES.iter().find(|known| known.matches(wanted)) {
            return Ok(known.guid);
        }

        match Guid::parse(wanted) {
            Ok(guid) if !guid.is_zero() => Ok(Self(guid)),
            _ => Err(Error::UnknownPartitionType(input.to_string())),
        }
    }
}

impl fmt::Display for PartitionTypeGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named GPT partition type
#[derive(Debug, Clone, Copy)]
pub struct KnownGptType {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub guid: PartitionTypeGuid,
}

impl KnownGptType {
    fn matches(&self, wanted: &str) -> bool {
        self.name.eq_ignore_ascii_case(wanted)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(wanted))
    }
}

/// Partition types accepted by name on GPT disks
pub const KNOWN_GPT_TYPES: &[KnownGptType] = &[
    KnownGptType {
        name: "Linux Filesystem",
        aliases: &[],
        guid: PartitionTypeGuid::LINUX_FILESYSTEM,
    },
    KnownGptType {
        name: "Linux Swap",
        aliases: &[],
        guid: PartitionTypeGuid::LINUX_SWAP,
    },
    KnownGptType {
        name: "EFI System",
        aliases: &["ESP"],
        guid: PartitionTypeGuid::EFI_SYSTEM,
    },
    KnownGptType {
        name: "Windows Basic Data",
        aliases: &["Microsoft Basic Data"],
        guid: PartitionTypeGuid::MICROSOFT_BASIC_DATA,
    },
    KnownGptType {
        name: "Microsoft Reserved",
        aliases: &[],
        guid: PartitionTypeGuid::MICROSOFT_RESERVED,
    },
];

/// GPT partition entry
///
/// Only the first 128 bytes of a slot are interpreted; any extra bytes in a
/// larger header-declared entry size are left to [`GptEntryArray`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptPartitionEntry {
    /// Partition type GUID
    pub partition_type_guid: PartitionTypeGuid,
    /// Unique partition GUID
    pub unique_partition_guid: Guid,
    /// First LBA (inclusive)
    pub first_lba: u64,
    /// Last LBA (inclusive)
    pub last_lba: u64,
    /// Attribute flags
    pub attributes: u64,
    /// Raw UTF-16LE name field, kept verbatim so unchanged entries re-encode exactly
    pub name_bytes: [u8; NAME_BYTES],
}

impl GptPartitionEntry {
    /// Size of a partition entry in bytes
    pub const ENTRY_SIZE: usize = 128;

    /// Build a new entry with an encoded name
    pub fn new(
        partition_type_guid: PartitionTypeGuid,
        unique_partition_guid: Guid,
        first_lba: u64,
        last_lba: u64,
        name: &str,
    ) -> Result<Self> {
        Ok(Self {
            partition_type_guid,
            unique_partition_guid,
            first_lba,
            last_lba,
            attributes: 0,
            name_bytes: encode_name(name)?,
        })
    }

    /// Parse a partition entry from its 128-byte on-disk layout
    pub fn from_bytes(bytes: &[u8; Self::ENTRY_SIZE]) -> Self {
        Self {
            partition_type_guid: PartitionTypeGuid(Guid(read_array(bytes, 0))),
            unique_partition_guid: Guid(read_array(bytes, 16)),
            first_lba: read_u64(bytes, 32),
            last_lba: read_u64(bytes, 40),
            attributes: read_u64(bytes, 48),
            name_bytes: read_array(bytes, 56),
        }
    }

    /// Serialize to the 128-byte on-disk layout
    pub fn to_bytes(&self) -> [u8; Self::ENTRY_SIZE] {
        let mut bytes = [0u8; Self::ENTRY_SIZE];
        bytes[0..16].copy_from_slice(&self.partition_type_guid.0 .0);
        bytes[16..32].copy_from_slice(&self.unique_partition_guid.0);
        write_u64(&mut bytes, 32, self.first_lba);
        write_u64(&mut bytes, 40, self.last_lba);
        write_u64(&mut bytes, 48, self.attributes);
        bytes[56..128].copy_from_slice(&self.name_bytes);
        bytes
    }

    /// Check if this entry is unused
    pub fn is_unused(&self) -> bool {
        self.partition_type_guid == PartitionTypeGuid::UNUSED
    }

    /// Get the size of this partition in LBA sectors
    pub fn size_lba(&self) -> u64 {
        if self.last_lba >= self.first_lba {
            self.last_lba - self.first_lba + 1
        } else {
            0
        }
    }

    /// Decoded partition name
    pub fn name(&self) -> String {
        decode_name(&self.name_bytes)
    }
}

/// The raw partition entry array
///
/// Holds every slot, empty ones included, so that untouched bytes are written
/// back exactly as they were read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptEntryArray {
    entry_size: usize,
    bytes: Vec<u8>,
}

impl GptEntryArray {
    /// Wrap raw array bytes
    ///
    /// # Errors
    ///
    /// Returns `MalformedHeader` if the entry size is below 128 bytes or the
    /// byte count is not a whole number of entries
    pub fn from_bytes(bytes: Vec<u8>, entry_size: usize) -> Result<Self> {
        if entry_size < GptPartitionEntry::ENTRY_SIZE {
            return Err(Error::malformed_header(format!(
                "partition entry size {} is below {}",
                entry_size,
                GptPartitionEntry::ENTRY_SIZE
            )));
        }
        if bytes.len() % entry_size != 0 {
            return Err(Error::malformed_header(format!(
                "entry array of {} bytes is not a multiple of entry size {}",
                bytes.len(),
                entry_size
            )));
        }
        Ok(Self { entry_size, bytes })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.bytes.len() / self.entry_size
    }

    /// Check if the array has no slots
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Size of each slot in bytes
    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    /// Raw array bytes, exactly as they will be written
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// CRC32 of the raw array
    pub fn crc32(&self) -> u32 {
        crc::entries_crc32(&self.bytes)
    }

    fn slot_range(&self, slot: usize) -> Result<std::ops::Range<usize>> {
        if slot >= self.len() {
            return Err(Error::slot_unavailable(format!(
                "slot {} is outside the {}-entry array",
                slot + 1,
                self.len()
            )));
        }
        let start = slot * self.entry_size;
        Ok(start..start + self.entry_size)
    }

    /// Decode the entry in `slot` (0-based)
    pub fn get(&self, slot: usize) -> Option<GptPartitionEntry> {
        self.slot_range(slot)
            .ok()
            .map(|range| GptPartitionEntry::from_bytes(&read_array(&self.bytes[range], 0)))
    }

    /// Replace the entry in `slot`, zeroing any bytes past the first 128
    pub fn set(&mut self, slot: usize, entry: &GptPartitionEntry) -> Result<()> {
        let range = self.slot_range(slot)?;
        let target = &mut self.bytes[range];
        target.fill(0);
        target[..GptPartitionEntry::ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        Ok(())
    }

    /// Zero the whole slot
    pub fn clear(&mut self, slot: usize) -> Result<()> {
        let range = self.slot_range(slot)?;
        self.bytes[range].fill(0);
        Ok(())
    }

    /// Iterate all slots with their 0-based index
    pub fn iter(&self) -> impl Iterator<Item = (usize, GptPartitionEntry)> + '_ {
        self.bytes
            .chunks_exact(self.entry_size)
            .map(|chunk| GptPartitionEntry::from_bytes(&read_array(chunk, 0)))
            .enumerate()
    }

    /// Iterate only non-empty slots
    pub fn occupied(&self) -> impl Iterator<Item = (usize, GptPartitionEntry)> + '_ {
        self.iter().filter(|(_, entry)| !entry.is_unused())
    }

    /// First empty slot, if any
    pub fn first_free_slot(&self) -> Option<usize> {
        self.iter()
            .find(|(_, entry)| entry.is_unused())
            .map(|(slot, _)| slot)
    }
}

/// GPT header
///
/// The GPT header contains metadata about the partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptHeader {
    /// Header signature ("EFI PART")
    pub signature: [u8; 8],
    /// GPT revision (usually 0x00010000)
    pub revision: u32,
    /// Header size in bytes (usually 92)
    pub header_size: u32,
    /// CRC32 checksum of header
    pub header_crc32: u32,
    /// Reserved (must be zero)
    pub reserved: u32,
    /// Current LBA (location of this header)
    pub current_lba: u64,
    /// Backup LBA (location of the other header)
    pub backup_lba: u64,
    /// First usable LBA for partitions
    pub first_usable_lba: u64,
    /// Last usable LBA for partitions
    pub last_usable_lba: u64,
    /// Disk GUID
    pub disk_guid: Guid,
    /// Starting LBA of partition entries
    pub partition_entries_lba: u64,
    /// Number of partition entries
    pub num_partition_entries: u32,
    /// Size of each partition entry
    pub partition_entry_size: u32,
    /// CRC32 of partition entries array
    pub partition_entries_crc32: u32,
}

impl GptHeader {
    /// GPT header signature
    pub const SIGNATURE: &'static [u8; 8] = b"EFI PART";

    /// Typical GPT header size
    pub const HEADER_SIZE: usize = MIN_HEADER_SIZE;

    /// Parse GPT header from bytes
    ///
    /// # Errors
    ///
    /// Returns `NotGpt` on a signature mismatch and `MalformedHeader` if the
    /// buffer is shorter than 92 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(Error::malformed_header(format!(
                "{} bytes is too short for a GPT header",
                bytes.len()
            )));
        }

        let signature: [u8; 8] = read_array(bytes, 0);
        if &signature != Self::SIGNATURE {
            return Err(Error::not_gpt(format!(
                "signature {:02X?} is not \"EFI PART\"",
                signature
            )));
        }

        Ok(Self {
            signature,
            revision: read_u32(bytes, 8),
            header_size: read_u32(bytes, 12),
            header_crc32: read_u32(bytes, 16),
            reserved: read_u32(bytes, 20),
            current_lba: read_u64(bytes, 24),
            backup_lba: read_u64(bytes, 32),
            first_usable_lba: read_u64(bytes, 40),
            last_usable_lba: read_u64(bytes, 48),
            disk_guid: Guid(read_array(bytes, 56)),
            partition_entries_lba: read_u64(bytes, 72),
            num_partition_entries: read_u32(bytes, 80),
            partition_entry_size: read_u32(bytes, 84),
            partition_entries_crc32: read_u32(bytes, 88),
        })
    }

    /// Write the 92 defined header bytes into `sector`
    ///
    /// Bytes past offset 92 are left untouched.
    pub fn write_into(&self, sector: &mut [u8]) {
        sector[0..8].copy_from_slice(&self.signature);
        write_u32(sector, 8, self.revision);
        write_u32(sector, 12, self.header_size);
        write_u32(sector, 16, self.header_crc32);
        write_u32(sector, 20, self.reserved);
        write_u64(sector, 24, self.current_lba);
        write_u64(sector, 32, self.backup_lba);
        write_u64(sector, 40, self.first_usable_lba);
        write_u64(sector, 48, self.last_usable_lba);
        sector[56..72].copy_from_slice(&self.disk_guid.0);
        write_u64(sector, 72, self.partition_entries_lba);
        write_u32(sector, 80, self.num_partition_entries);
        write_u32(sector, 84, self.partition_entry_size);
        write_u32(sector, 88, self.partition_entries_crc32);
    }

    /// Serialize into `sector` and store a fresh header CRC32 in both
    /// `self` and the sector
    pub fn seal(&mut self, sector: &mut [u8]) -> Result<()> {
        self.write_into(sector);
        self.header_crc32 = crc::header_crc32(sector, self.header_size)?;
        write_u32(sector, 16, self.header_crc32);
        Ok(())
    }

    /// Check the header CRC32 against the raw header sector
    pub fn header_check(&self, sector: &[u8]) -> Result<CrcCheck> {
        CrcCheck::header(sector, self.header_size, self.header_crc32)
    }

    /// Check the entry array CRC32
    pub fn entries_check(&self, entries: &GptEntryArray) -> CrcCheck {
        CrcCheck::entries(entries.as_bytes(), self.partition_entries_crc32)
    }

    /// Size of the entry array in bytes, bounded by the allocation limit
    pub fn entry_array_len(&self) -> Result<usize> {
        if self.num_partition_entries > MAX_PARTITION_ENTRIES {
            return Err(Error::LimitExceeded(format!(
                "{} partition entries exceeds limit {}",
                self.num_partition_entries, MAX_PARTITION_ENTRIES
            )));
        }
        let size = checked_multiply_u32_to_u64(
            self.num_partition_entries,
            self.partition_entry_size,
            "GPT entry array",
        )?;
        validate_allocation_size(size, MAX_ENTRY_ARRAY_SIZE, "GPT entry array")
    }

    /// Number of whole sectors the entry array occupies
    pub fn entry_array_sectors(&self, sector_size: u32) -> Result<u64> {
        let len = self.entry_array_len()? as u64;
        Ok(len.div_ceil(sector_size as u64))
    }

    /// Check the structural fields against the device
    ///
    /// # Errors
    ///
    /// Returns `MalformedHeader` when the header size, entry size, usable
    /// range or entry array location cannot describe a table on this disk
    pub fn validate(&self, geometry: &DeviceGeometry) -> Result<()> {
        let header_size = self.header_size as usize;
        if header_size < Self::HEADER_SIZE || header_size > geometry.sector_size as usize {
            return Err(Error::malformed_header(format!(
                "header size {} outside {}..={}",
                self.header_size,
                Self::HEADER_SIZE,
                geometry.sector_size
            )));
        }

        let entry_size = self.partition_entry_size as usize;
        if entry_size < GptPartitionEntry::ENTRY_SIZE || entry_size % 8 != 0 {
            return Err(Error::malformed_header(format!(
                "partition entry size {} must be a multiple of 8 and at least {}",
                self.partition_entry_size,
                GptPartitionEntry::ENTRY_SIZE
            )));
        }

        let array_sectors = self.entry_array_sectors(geometry.sector_size)?;
        let array_end = self
            .partition_entries_lba
            .checked_add(array_sectors)
            .ok_or_else(|| Error::malformed_header("entry array LBA overflows"))?;
        if self.partition_entries_lba == 0 || array_end > geometry.disk_size_sectors {
            return Err(Error::malformed_header(format!(
                "entry array at LBA {} ({} sectors) lies outside the {}-sector disk",
                self.partition_entries_lba, array_sectors, geometry.disk_size_sectors
            )));
        }

        if self.first_usable_lba > self.last_usable_lba
            || self.last_usable_lba > geometry.last_lba()
        {
            return Err(Error::malformed_header(format!(
                "usable range {}..={} is invalid for a {}-sector disk",
                self.first_usable_lba, self.last_usable_lba, geometry.disk_size_sectors
            )));
        }

        let usable = self.first_usable_lba..=self.last_usable_lba;
        if array_sectors > 0
            && self.partition_entries_lba <= self.last_usable_lba
            && self.first_usable_lba < array_end
        {
            return Err(Error::malformed_header(format!(
                "entry array at LBA {} ({} sectors) overlaps usable LBAs {}..={}",
                self.partition_entries_lba,
                array_sectors,
                self.first_usable_lba,
                self.last_usable_lba
            )));
        }
        if usable.contains(&self.current_lba)
            || (self.partition_entries_lba..array_end).contains(&self.current_lba)
        {
            return Err(Error::malformed_header(format!(
                "header LBA {} lies inside its usable range or entry array",
                self.current_lba
            )));
        }

        Ok(())
    }

    /// Describe why an occupied entry's range is unusable, if it is
    pub fn entry_fault(&self, entry: &GptPartitionEntry) -> Option<String> {
        if entry.first_lba > entry.last_lba {
            Some(format!(
                "ends at LBA {} before it starts at LBA {}",
                entry.last_lba, entry.first_lba
            ))
        } else if entry.first_lba < self.first_usable_lba || entry.last_lba > self.last_usable_lba {
            Some(format!(
                "LBA {}..={} lies outside usable LBAs {}..={}",
                entry.first_lba, entry.last_lba, self.first_usable_lba, self.last_usable_lba
            ))
        } else {
            None
        }
    }

    /// Build the alternate header that mirrors this one at `backup_lba`
    ///
    /// The current and backup LBAs are swapped and the entry array is placed
    /// directly before the alternate header.
    pub fn mirrored(&self, sector_size: u32) -> Result<Self> {
        let array_sectors = self.entry_array_sectors(sector_size)?;
        let partition_entries_lba = self
            .backup_lba
            .checked_sub(array_sectors)
            .filter(|&lba| lba > self.last_usable_lba)
            .ok_or_else(|| {
                Error::malformed_header(format!(
                    "no room for a {}-sector backup entry array before LBA {}",
                    array_sectors, self.backup_lba
                ))
            })?;

        Ok(Self {
            current_lba: self.backup_lba,
            backup_lba: self.current_lba,
            partition_entries_lba,
            ..self.clone()
        })
    }

    /// Get the number of usable sectors on the disk
    pub fn usable_lba_count(&self) -> u64 {
        if self.last_usable_lba >= self.first_usable_lba {
            self.last_usable_lba - self.first_usable_lba + 1
        } else {
            0
        }
    }
}
