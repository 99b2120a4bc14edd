//! MBR partition types, entries and CHS addressing

use crate::bytes::{read_array, read_u16, read_u32, write_u16, write_u32};
use dsktool_core::{Error, Result};
use std::fmt;

/// MBR partition type codes
///
/// These are the standard partition type identifiers used in the MBR partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbrPartitionType {
    /// Empty/unused partition entry
    Empty,
    /// FAT12, CHS
    Fat12,
    /// FAT16 < 32MB, CHS
    Fat16Small,
    /// Extended partition, CHS
    Extended,
    /// FAT16 >= 32MB, CHS
    Fat16,
    /// NTFS/exFAT/HPFS
    Ntfs,
    /// FAT32, CHS
    Fat32Chs,
    /// FAT32, LBA
    Fat32Lba,
    /// FAT16, LBA
    Fat16Lba,
    /// Extended partition, LBA
    ExtendedLba,
    /// Windows recovery environment / Microsoft reserved
    WindowsRecovery,
    /// Linux swap
    LinuxSwap,
    /// Linux native (ext2/ext3/ext4)
    LinuxNative,
    /// Linux extended partition
    ExtendedLinux,
    /// GPT protective MBR
    GptProtective,
    /// EFI system partition
    EfiSystem,
    /// Unknown partition type
    Unknown(u8),
}

impl MbrPartitionType {
    /// Create a partition type from a byte value
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => Self::Empty,
            0x01 => Self::Fat12,
            0x04 => Self::Fat16Small,
            0x05 => Self::Extended,
            0x06 => Self::Fat16,
            0x07 => Self::Ntfs,
            0x0B => Self::Fat32Chs,
            0x0C => Self::Fat32Lba,
            0x0E => Self::Fat16Lba,
            0x0F => Self::ExtendedLba,
            0x27 => Self::WindowsRecovery,
            0x82 => Self::LinuxSwap,
            0x83 => Self::LinuxNative,
            0x85 => Self::ExtendedLinux,
            0xEE => Self::GptProtective,
            0xEF => Self::EfiSystem,
            _ => Self::Unknown(b),
        }
    }

    /// Get the byte value of this partition type
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Empty => 0x00,
            Self::Fat12 => 0x01,
            Self::Fat16Small => 0x04,
            Self::Extended => 0x05,
            Self::Fat16 => 0x06,
            Self::Ntfs => 0x07,
            Self::Fat32Chs => 0x0B,
            Self::Fat32Lba => 0x0C,
            Self::Fat16Lba => 0x0E,
            Self::ExtendedLba => 0x0F,
            Self::WindowsRecovery => 0x27,
            Self::LinuxSwap => 0x82,
            Self::LinuxNative => 0x83,
            Self::ExtendedLinux => 0x85,
            Self::GptProtective => 0xEE,
            Self::EfiSystem => 0xEF,
            Self::Unknown(b) => b,
        }
    }

    /// Get a human-readable name for this partition type
    pub fn name(&self) -> &str {
        match self {
            Self::Empty => "Empty",
            Self::Fat12 => "FAT12",
            Self::Fat16Small => "FAT16 (<32MB)",
            Self::Extended => "Extended",
            Self::Fat16 => "FAT16",
            Self::Ntfs => "NTFS/exFAT",
            Self::Fat32Chs => "FAT32 (CHS)",
            Self::Fat32Lba => "FAT32 (LBA)",
            Self::Fat16Lba => "FAT16 (LBA)",
            Self::ExtendedLba => "Extended (LBA)",
            Self::WindowsRecovery => "Windows RE",
            Self::LinuxSwap => "Linux swap",
            Self::LinuxNative => "Linux",
            Self::ExtendedLinux => "Linux extended",
            Self::GptProtective => "GPT Protective",
            Self::EfiSystem => "EFI System",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// True for types that hold an EBR chain (0x05, 0x0F, 0x85)
    pub fn is_extended(&self) -> bool {
        matches!(self, Self::Extended | Self::ExtendedLba | Self::ExtendedLinux)
    }

    /// Resolve a type name or a `0xNN` literal
    ///
    /// # Errors
    ///
    /// Returns `UnknownPartitionType` for unknown names and for the empty
    /// (0x00) and GPT protective (0xEE) codes
    pub fn resolve(input: &str) -> Result<Self> {
        let wanted = input.trim();
        if let Some(known) = KNOWN_MBR_TYPES.iter().find(|known| known.matches(wanted)) {
            return Ok(Self::from_byte(known.code));
        }

        let literal = wanted
            .strip_prefix("0x")
            .or_else(|| wanted.strip_prefix("0X"))
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match literal.map(Self::from_byte) {
            Some(Self::Empty) | Some(Self::GptProtective) | None => {
                Err(Error::UnknownPartitionType(input.to_string()))
            }
            Some(partition_type) => Ok(partition_type),
        }
    }
}

impl fmt::Display for MbrPartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named MBR partition type
#[derive(Debug, Clone, Copy)]
pub struct KnownMbrType {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub code: u8,
}

impl KnownMbrType {
    fn matches(&self, wanted: &str) -> bool {
        self.name.eq_ignore_ascii_case(wanted)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(wanted))
    }
}

/// Partition types accepted by name on MBR disks
pub const KNOWN_MBR_TYPES: &[KnownMbrType] = &[
    KnownMbrType {
        name: "Linux Filesystem",
        aliases: &[],
        code: 0x83,
    },
    KnownMbrType {
        name: "Linux Swap",
        aliases: &[],
        code: 0x82,
    },
    KnownMbrType {
        name: "EFI System",
        aliases: &["ESP"],
        code: 0xEF,
    },
    KnownMbrType {
        name: "Windows Basic Data",
        aliases: &["Microsoft Basic Data"],
        code: 0x07,
    },
    KnownMbrType {
        name: "Microsoft Reserved",
        aliases: &[],
        code: 0x27,
    },
    KnownMbrType {
        name: "Extended Partition",
        aliases: &["Extended"],
        code: 0x05,
    },
];

/// CHS (Cylinder-Head-Sector) address
///
/// Traditional disk addressing using physical geometry.
/// Maximum values: 1023 cylinders, 255 heads, 63 sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CHSAddress {
    pub cylinder: u16,
    pub head: u8,
    pub sector: u8,
}

impl CHSAddress {
    /// Parse CHS address from 3 bytes
    ///
    /// Format:
    /// - Byte 0: Head (0-255)
    /// - Byte 1: Sector (bits 0-5) + Cylinder high (bits 6-7)
    /// - Byte 2: Cylinder low (bits 0-7)
    pub fn from_bytes(bytes: &[u8; 3]) -> Self {
        let head = bytes[0];
        let sector = bytes[1] & 0x3F; // Lower 6 bits
        let cyl_high = ((bytes[1] & 0xC0) as u16) << 2; // Upper 2 bits
        let cyl_low = bytes[2] as u16;
        let cylinder = cyl_high | cyl_low;

        Self {
            cylinder,
            head,
            sector,
        }
    }

    /// Convert CHS to bytes
    pub fn to_bytes(&self) -> [u8; 3] {
        let cyl_high = ((self.cylinder >> 8) & 0x03) as u8;
        let cyl_low = (self.cylinder & 0xFF) as u8;

        [
            self.head,
            (self.sector & 0x3F) | (cyl_high << 6),
            cyl_low,
        ]
    }
}

impl fmt::Display for CHSAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C:{}/H:{}/S:{}", self.cylinder, self.head, self.sector)
    }
}

/// One 16-byte MBR or EBR partition entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrPartitionEntry {
    /// 0x80 = active
    pub status: u8,
    pub chs_start: CHSAddress,
    pub partition_type: MbrPartitionType,
    pub chs_end: CHSAddress,
    /// First sector (LBA)
    pub first_sector: u32,
    /// Sector count
    pub sectors: u32,
}

impl MbrPartitionEntry {
    /// Size of a partition entry in bytes
    pub const ENTRY_SIZE: usize = 16;

    /// Status byte of an active (bootable) partition
    pub const STATUS_ACTIVE: u8 = 0x80;

    /// An all-zero slot
    pub const EMPTY: Self = Self {
        status: 0,
        chs_start: CHSAddress {
            cylinder: 0,
            head: 0,
            sector: 0,
        },
        partition_type: MbrPartitionType::Empty,
        chs_end: CHSAddress {
            cylinder: 0,
            head: 0,
            sector: 0,
        },
        first_sector: 0,
        sectors: 0,
    };

    /// Build an entry with zeroed CHS fields
    pub fn new(
        partition_type: MbrPartitionType,
        first_sector: u32,
        sectors: u32,
        active: bool,
    ) -> Self {
        Self {
            status: if active { Self::STATUS_ACTIVE } else { 0 },
            partition_type,
            first_sector,
            sectors,
            ..Self::EMPTY
        }
    }

    /// Parse an entry from 16 bytes
    pub fn from_bytes(entry: &[u8; Self::ENTRY_SIZE]) -> Self {
        Self {
            status: entry[0],
            chs_start: CHSAddress::from_bytes(&read_array(entry, 1)),
            partition_type: MbrPartitionType::from_byte(entry[4]),
            chs_end: CHSAddress::from_bytes(&read_array(entry, 5)),
            first_sector: read_u32(entry, 8),
            sectors: read_u32(entry, 12),
        }
    }

    /// Serialize to 16 bytes
    pub fn to_bytes(&self) -> [u8; Self::ENTRY_SIZE] {
        let mut entry = [0u8; Self::ENTRY_SIZE];
        entry[0] = self.status;
        entry[1..4].copy_from_slice(&self.chs_start.to_bytes());
        entry[4] = self.partition_type.to_byte();
        entry[5..8].copy_from_slice(&self.chs_end.to_bytes());
        write_u32(&mut entry, 8, self.first_sector);
        write_u32(&mut entry, 12, self.sectors);
        entry
    }

    /// True if the slot describes no partition
    pub fn is_empty(&self) -> bool {
        self.partition_type == MbrPartitionType::Empty || self.sectors == 0
    }

    /// True if the active flag is set
    pub fn is_active(&self) -> bool {
        self.status & Self::STATUS_ACTIVE != 0
    }

    /// Last sector (inclusive), relative to the same base as `first_sector`
    pub fn last_sector(&self) -> u64 {
        (self.first_sector as u64 + self.sectors as u64).saturating_sub(1)
    }
}

/// The 512-byte MBR (or EBR) structure
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0x000   446   Bootstrap code (disk signature at 0x1B8)
/// 0x1BE   16    Partition entry 1
/// 0x1CE   16    Partition entry 2
/// 0x1DE   16    Partition entry 3
/// 0x1EE   16    Partition entry 4
/// 0x1FE   2     Boot signature (0xAA55)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbrTable {
    /// Bootstrap code, kept opaque
    pub boot_code: [u8; Self::BOOT_CODE_SIZE],
    pub entries: [MbrPartitionEntry; Self::NUM_PARTITIONS],
    pub signature: u16,
}

impl MbrTable {
    /// The boot signature that must be present at offset 0x1FE
    pub const BOOT_SIGNATURE: u16 = 0xAA55;

    /// Size of the MBR in bytes (always 512)
    pub const MBR_SIZE: usize = 512;

    /// Size of the bootstrap area preceding the partition table
    pub const BOOT_CODE_SIZE: usize = 446;

    /// Offset of the first partition entry
    pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;

    /// Offset of the disk signature
    pub const DISK_SIGNATURE_OFFSET: usize = 0x1B8;

    /// Offset of the boot signature
    pub const BOOT_SIGNATURE_OFFSET: usize = 0x1FE;

    /// Number of partition entries in MBR
    pub const NUM_PARTITIONS: usize = 4;

    /// A table with no partitions and a valid signature
    pub fn empty() -> Self {
        Self {
            boot_code: [0; Self::BOOT_CODE_SIZE],
            entries: [MbrPartitionEntry::EMPTY; Self::NUM_PARTITIONS],
            signature: Self::BOOT_SIGNATURE,
        }
    }

    /// Parse an MBR-shaped sector
    ///
    /// # Errors
    ///
    /// Returns `NotMbr` if the buffer is short or the boot signature is not 0xAA55
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::MBR_SIZE {
            return Err(Error::not_mbr(format!(
                "{} bytes is too short for an MBR",
                bytes.len()
            )));
        }

        let signature = read_u16(bytes, Self::BOOT_SIGNATURE_OFFSET);
        if signature != Self::BOOT_SIGNATURE {
            return Err(Error::not_mbr(format!(
                "Invalid MBR boot signature: expected 0x{:04X}, got 0x{:04X}",
                Self::BOOT_SIGNATURE,
                signature
            )));
        }

        let mut boot_code = [0u8; Self::BOOT_CODE_SIZE];
        boot_code.copy_from_slice(&bytes[..Self::BOOT_CODE_SIZE]);

        let mut entries = [MbrPartitionEntry::EMPTY; Self::NUM_PARTITIONS];
        for (i, entry) in entries.iter_mut().enumerate() {
            let offset = Self::PARTITION_TABLE_OFFSET + i * MbrPartitionEntry::ENTRY_SIZE;
            *entry = MbrPartitionEntry::from_bytes(&read_array(bytes, offset));
        }

        Ok(Self {
            boot_code,
            entries,
            signature,
        })
    }

    /// Serialize to the 512-byte layout
    pub fn to_bytes(&self) -> [u8; Self::MBR_SIZE] {
        let mut bytes = [0u8; Self::MBR_SIZE];
        bytes[..Self::BOOT_CODE_SIZE].copy_from_slice(&self.boot_code);
        for (i, entry) in self.entries.iter().enumerate() {
            let offset = Self::PARTITION_TABLE_OFFSET + i * MbrPartitionEntry::ENTRY_SIZE;
            bytes[offset..offset + MbrPartitionEntry::ENTRY_SIZE]
                .copy_from_slice(&entry.to_bytes());
        }
        write_u16(&mut bytes, Self::BOOT_SIGNATURE_OFFSET, self.signature);
        bytes
    }

    /// Get the disk signature
    pub fn disk_signature(&self) -> u32 {
        read_u32(&self.boot_code, Self::DISK_SIGNATURE_OFFSET)
    }

    /// Check if this MBR contains a GPT protective partition
    ///
    /// A GPT protective partition indicates that this is actually a GPT disk
    /// with a protective MBR for backwards compatibility.
    pub fn is_gpt_protective(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.partition_type == MbrPartitionType::GptProtective)
    }

    /// 0-based indexes of empty slots
    pub fn free_slots(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_empty())
            .map(|(slot, _)| slot)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mbr() -> Vec<u8> {
        let mut mbr = vec![0u8; 512];
        mbr[0..3].copy_from_slice(&[0xEB, 0x63, 0x90]);

        // Set disk signature
        mbr[0x1B8..0x1BC].copy_from_slice(&[0x12, 0x34, 0x56, 0x78]);

        // Partition entry 1: FAT32 LBA, 2048 sectors starting at LBA 2048
        let entry = 0x1BE;
        mbr[entry] = 0x80;
        mbr[entry + 1..entry + 4].copy_from_slice(&[0x20, 0x21, 0x00]);
        mbr[entry + 4] = 0x0C;
        mbr[entry + 5..entry + 8].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
        mbr[entry + 8..entry + 12].copy_from_slice(&2048u32.to_le_bytes());
        mbr[entry + 12..entry + 16].copy_from_slice(&2048u32.to_le_bytes());

        // Boot signature
        mbr[0x1FE] = 0x55;
        mbr[0x1FF] = 0xAA;
        mbr
    }

    #[test]
    fn test_partition_type_from_byte() {
        assert_eq!(MbrPartitionType::from_byte(0x00), MbrPartitionType::Empty);
        assert_eq!(MbrPartitionType::from_byte(0x0B), MbrPartitionType::Fat32Chs);
        assert_eq!(MbrPartitionType::from_byte(0x83), MbrPartitionType::LinuxNative);
        assert!(matches!(MbrPartitionType::from_byte(0xFF), MbrPartitionType::Unknown(0xFF)));
    }

    #[test]
    fn test_partition_type_byte_roundtrip() {
        for b in 0..=u8::MAX {
            assert_eq!(MbrPartitionType::from_byte(b).to_byte(), b);
        }
    }

    #[test]
    fn test_partition_type_name() {
        assert_eq!(MbrPartitionType::Fat32Lba.name(), "FAT32 (LBA)");
        assert_eq!(MbrPartitionType::LinuxNative.name(), "Linux");
        assert_eq!(MbrPartitionType::Unknown(0x42).name(), "Unknown");
    }

    #[test]
    fn test_extended_types() {
        for b in [0x05, 0x0F, 0x85] {
            assert!(MbrPartitionType::from_byte(b).is_extended());
        }
        assert!(!MbrPartitionType::LinuxNative.is_extended());
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            MbrPartitionType::resolve("linux filesystem").unwrap(),
            MbrPartitionType::LinuxNative
        );
        assert_eq!(MbrPartitionType::resolve("Microsoft Reserved").unwrap().to_byte(), 0x27);
        assert_eq!(
            MbrPartitionType::resolve("Extended Partition").unwrap(),
            MbrPartitionType::Extended
        );
        assert_eq!(MbrPartitionType::resolve("0x0c").unwrap(), MbrPartitionType::Fat32Lba);
        assert_eq!(MbrPartitionType::resolve("0xDA").unwrap(), MbrPartitionType::Unknown(0xDA));

        for input in ["Linux", "0x00", "0xEE", "0x100", "83", ""] {
            assert!(
                matches!(MbrPartitionType::resolve(input), Err(Error::UnknownPartitionType(_))),
                "{input:?} should not resolve"
            );
        }
    }

    #[test]
    fn test_chs_from_bytes() {
        // Example: C=0, H=1, S=1
        let bytes = [0x01, 0x01, 0x00];
        let chs = CHSAddress::from_bytes(&bytes);
        assert_eq!(chs.cylinder, 0);
        assert_eq!(chs.head, 1);
        assert_eq!(chs.sector, 1);
    }

    #[test]
    fn test_chs_to_bytes_is_lossless() {
        let bytes = [0xFE, 0xFF, 0xFF];
        let chs = CHSAddress::from_bytes(&bytes);
        assert_eq!(chs.cylinder, 1023);
        assert_eq!(chs.sector, 63);
        assert_eq!(chs.to_bytes(), bytes);
    }

    #[test]
    fn test_parse_valid_mbr() {
        let table = MbrTable::from_bytes(&sample_mbr()).unwrap();

        assert_eq!(table.signature, 0xAA55);
        assert_eq!(table.disk_signature(), 0x78563412);
        assert!(!table.is_gpt_protective());
        assert_eq!(table.free_slots(), vec![1, 2, 3]);

        let entry = table.entries[0];
        assert!(entry.is_active());
        assert_eq!(entry.partition_type, MbrPartitionType::Fat32Lba);
        assert_eq!(entry.first_sector, 2048);
        assert_eq!(entry.last_sector(), 4095);
    }

    #[test]
    fn test_mbr_roundtrip_is_exact() {
        let bytes = sample_mbr();
        let table = MbrTable::from_bytes(&bytes).unwrap();
        assert_eq!(table.to_bytes().as_slice(), bytes.as_slice());
    }

    #[test]
    fn test_parse_invalid_boot_signature() {
        let mut bytes = sample_mbr();
        bytes[0x1FE] = 0x00;

        let err = MbrTable::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Error::NotMbr(_)));
        assert!(err.to_string().contains("Invalid MBR boot signature"));
    }

    #[test]
    fn test_gpt_protective_detection() {
        let mut bytes = sample_mbr();
        bytes[0x1BE + 4] = 0xEE;
        assert!(MbrTable::from_bytes(&bytes).unwrap().is_gpt_protective());
    }

    #[test]
    fn test_new_entry_has_zero_chs() {
        let entry = MbrPartitionEntry::new(MbrPartitionType::LinuxNative, 2048, 204_800, true);
        let bytes = entry.to_bytes();
        assert_eq!(bytes[0], 0x80);
        assert_eq!(&bytes[1..4], &[0, 0, 0]);
        assert_eq!(bytes[4], 0x83);
        assert_eq!(&bytes[5..8], &[0, 0, 0]);
        assert_eq!(MbrPartitionEntry::from_bytes(&bytes), entry);
    }
}
