//! Disk image builders shared by the unit tests

use crate::bytes::{write_u32, write_u64};
use crate::gpt::types::PartitionTypeGuid;
use dsktool_core::{RandomAccessDevice, Result};
use std::io::{self, Cursor};
use std::ops::Range;

pub(crate) const SECTOR: usize = 512;

/// GPT disk GUID written by the builders
pub(crate) const DISK_GUID: [u8; 16] = [
    0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0,
];

/// Header-declared GPT sizes
#[derive(Debug, Clone, Copy)]
pub(crate) struct GptLayout {
    pub entry_count: u32,
    pub entry_size: u32,
    pub header_size: u32,
}

impl GptLayout {
    /// 128 entries of 128 bytes behind a 92-byte header
    pub(crate) const STANDARD: Self = Self {
        entry_count: 128,
        entry_size: 128,
        header_size: 92,
    };

    pub(crate) fn array_sectors(&self) -> u64 {
        (self.entry_count as u64 * self.entry_size as u64).div_ceil(SECTOR as u64)
    }
}

/// Byte written into header bytes past offset 92 and entry bytes past 128
pub(crate) const RESERVED_FILL: u8 = 0x5A;

/// GPT partition description: type, first LBA, last LBA, name
pub(crate) type GptPart<'a> = (PartitionTypeGuid, u64, u64, &'a str);

/// MBR slot description: slot (0-based), status, type, first sector, sector count
pub(crate) type MbrPart = (usize, u8, u8, u32, u32);

/// Write a protective MBR and a consistent primary/backup GPT onto `dev`
pub(crate) fn write_gpt(dev: &mut dyn RandomAccessDevice, total_sectors: u64, parts: &[GptPart]) {
    write_gpt_with(dev, total_sectors, GptLayout::STANDARD, parts);
}

/// [`write_gpt`] with explicit header and entry sizes
///
/// Non-standard sizes fill the bytes past the defined fields with
/// [`RESERVED_FILL`] so that their preservation can be checked.
pub(crate) fn write_gpt_with(
    dev: &mut dyn RandomAccessDevice,
    total_sectors: u64,
    layout: GptLayout,
    parts: &[GptPart],
) {
    let mut mbr = vec![0u8; SECTOR];
    put_mbr_entry(
        &mut mbr,
        0,
        0x00,
        0xEE,
        1,
        u32::try_from(total_sectors - 1).unwrap_or(u32::MAX),
    );
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    dev.write_at(0, &mbr).unwrap();

    let entry_size = layout.entry_size as usize;
    let mut entries = vec![0u8; layout.entry_count as usize * entry_size];
    for (index, (type_guid, first, last, name)) in parts.iter().enumerate() {
        let entry = &mut entries[index * entry_size..][..entry_size];
        entry[0..16].copy_from_slice(&type_guid.0 .0);
        entry[16..32].copy_from_slice(&[index as u8 + 1; 16]);
        write_u64(entry, 32, *first);
        write_u64(entry, 40, *last);
        for (i, unit) in name.encode_utf16().enumerate() {
            entry[56 + i * 2..58 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        entry[128..].fill(RESERVED_FILL);
    }
    let entries_crc = crc32fast::hash(&entries);

    let array_sectors = layout.array_sectors();
    let last_lba = total_sectors - 1;
    let backup_entries_lba = last_lba - array_sectors;
    let header_size = layout.header_size as usize;
    let layouts = [(1, last_lba, 2), (last_lba, 1, backup_entries_lba)];
    for (current, alternate, entries_lba) in layouts {
        let mut header = vec![0u8; SECTOR];
        header[0..8].copy_from_slice(b"EFI PART");
        write_u32(&mut header, 8, 0x0001_0000);
        write_u32(&mut header, 12, layout.header_size);
        write_u64(&mut header, 24, current);
        write_u64(&mut header, 32, alternate);
        write_u64(&mut header, 40, 2 + array_sectors);
        write_u64(&mut header, 48, backup_entries_lba - 1);
        header[56..72].copy_from_slice(&DISK_GUID);
        write_u64(&mut header, 72, entries_lba);
        write_u32(&mut header, 80, layout.entry_count);
        write_u32(&mut header, 84, layout.entry_size);
        write_u32(&mut header, 88, entries_crc);
        header[92..header_size].fill(RESERVED_FILL);
        let header_crc = crc32fast::hash(&header[..header_size]);
        write_u32(&mut header, 16, header_crc);

        dev.write_at(entries_lba * SECTOR as u64, &entries).unwrap();
        dev.write_at(current * SECTOR as u64, &header).unwrap();
    }
}

/// In-memory GPT disk of `total_sectors` sectors
pub(crate) fn gpt_image(total_sectors: u64, parts: &[GptPart]) -> Cursor<Vec<u8>> {
    gpt_image_with(total_sectors, GptLayout::STANDARD, parts)
}

/// In-memory GPT disk with explicit header and entry sizes
pub(crate) fn gpt_image_with(
    total_sectors: u64,
    layout: GptLayout,
    parts: &[GptPart],
) -> Cursor<Vec<u8>> {
    let mut image = Cursor::new(vec![0u8; total_sectors as usize * SECTOR]);
    write_gpt_with(&mut image, total_sectors, layout, parts);
    image
}

/// Fill one 16-byte MBR/EBR partition entry
pub(crate) fn put_mbr_entry(
    sector: &mut [u8],
    index: usize,
    status: u8,
    partition_type: u8,
    first_sector: u32,
    sectors: u32,
) {
    let entry = &mut sector[446 + index * 16..][..16];
    entry[0] = status;
    entry[4] = partition_type;
    write_u32(entry, 8, first_sector);
    write_u32(entry, 12, sectors);
}

/// In-memory MBR disk with the given primary slots
pub(crate) fn mbr_image(total_sectors: u64, parts: &[MbrPart]) -> Cursor<Vec<u8>> {
    let mut disk = vec![0u8; total_sectors as usize * SECTOR];
    disk[0..4].copy_from_slice(&[0xFA, 0x33, 0xC0, 0x8E]);
    disk[0x1B8..0x1BC].copy_from_slice(&[0x12, 0x34, 0x56, 0x78]);
    for &(slot, status, partition_type, first, sectors) in parts {
        put_mbr_entry(&mut disk, slot, status, partition_type, first, sectors);
    }
    disk[510] = 0x55;
    disk[511] = 0xAA;
    Cursor::new(disk)
}

/// Write an EBR at `lba`
///
/// `logical` is (type, offset from this EBR, sectors); `next` is
/// (offset from the extended base, sectors).
pub(crate) fn put_ebr(
    image: &mut Cursor<Vec<u8>>,
    lba: u64,
    logical: Option<(u8, u32, u32)>,
    next: Option<(u32, u32)>,
) {
    let offset = lba as usize * SECTOR;
    let sector = &mut image.get_mut()[offset..offset + SECTOR];
    sector.fill(0);
    if let Some((partition_type, start, sectors)) = logical {
        put_mbr_entry(sector, 0, 0x00, partition_type, start, sectors);
    }
    if let Some((start, sectors)) = next {
        put_mbr_entry(sector, 1, 0x00, 0x05, start, sectors);
    }
    sector[510] = 0x55;
    sector[511] = 0xAA;
}

/// What a [`FailingDevice`] does with writes inside its range
#[derive(Debug, Clone, Copy)]
pub(crate) enum FailureMode {
    /// Return an I/O error
    Error,
    /// Report success without writing
    Drop,
}

/// Wraps an in-memory image and sabotages writes that touch a byte range
pub(crate) struct FailingDevice {
    inner: Cursor<Vec<u8>>,
    range: Range<u64>,
    mode: FailureMode,
}

impl FailingDevice {
    pub(crate) fn new(inner: Cursor<Vec<u8>>, range: Range<u64>, mode: FailureMode) -> Self {
        Self { inner, range, mode }
    }

    pub(crate) fn into_inner(self) -> Cursor<Vec<u8>> {
        self.inner
    }
}

impl RandomAccessDevice for FailingDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let end = offset + buf.len() as u64;
        if offset < self.range.end && self.range.start < end {
            return match self.mode {
                FailureMode::Error => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("injected write failure at offset {}", offset),
                )
                .into()),
                FailureMode::Drop => Ok(()),
            };
        }
        self.inner.write_at(offset, buf)
    }
}
