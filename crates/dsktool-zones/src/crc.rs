//! CRC32 integrity engine for GPT headers and partition entry arrays

use dsktool_core::{Error, Result};
use tracing::warn;

/// Byte range of the header CRC field within the GPT header
pub const HEADER_CRC_OFFSET: usize = 16;

/// Smallest legal GPT header size (UEFI revision 1.0)
pub const MIN_HEADER_SIZE: usize = 92;

/// Region name used when the GPT header checksum fails
pub const HEADER_REGION: &str = "GPT header";

/// Region name used when the entry array checksum fails
pub const ENTRIES_REGION: &str = "GPT partition entry array";

/// CRC32 (IEEE) of the first `header_size` bytes, with the CRC field zeroed
///
/// # Errors
///
/// Returns `MalformedHeader` if `header_size` is below 92 or exceeds the
/// supplied bytes
pub fn header_crc32(header_bytes: &[u8], header_size: u32) -> Result<u32> {
    let size = header_size as usize;
    if size < MIN_HEADER_SIZE || size > header_bytes.len() {
        return Err(Error::malformed_header(format!(
            "header size {} outside {}..={}",
            header_size,
            MIN_HEADER_SIZE,
            header_bytes.len()
        )));
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_bytes[..HEADER_CRC_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&header_bytes[HEADER_CRC_OFFSET + 4..size]);
    Ok(hasher.finalize())
}

/// CRC32 (IEEE) over the raw entry array (count × entry size bytes)
pub fn entries_crc32(entry_array_bytes: &[u8]) -> u32 {
    crc32fast::hash(entry_array_bytes)
}

/// Compare a computed checksum against the stored one
pub fn validate(region: &'static str, computed: u32, stored: u32) -> Result<()> {
    CrcCheck {
        region,
        computed,
        stored,
    }
    .validate()
}

/// Outcome of one checksum comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcCheck {
    pub region: &'static str,
    pub computed: u32,
    pub stored: u32,
}

impl CrcCheck {
    /// Check the GPT header bytes against the stored header CRC
    pub fn header(header_bytes: &[u8], header_size: u32, stored: u32) -> Result<Self> {
        Ok(Self {
            region: HEADER_REGION,
            computed: header_crc32(header_bytes, header_size)?,
            stored,
        })
    }

    /// Check an entry array against the stored array CRC
    pub fn entries(entry_array_bytes: &[u8], stored: u32) -> Self {
        Self {
            region: ENTRIES_REGION,
            computed: entries_crc32(entry_array_bytes),
            stored,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.computed == self.stored
    }

    /// Turn a mismatch into `CrcMismatch`
    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::CrcMismatch {
                region: self.region,
                computed: self.computed,
                stored: self.stored,
            })
        }
    }

    /// Apply the read policy: fail in strict mode, otherwise warn and record
    pub fn enforce(&self, strict: bool, diagnostics: &mut Vec<String>) -> Result<()> {
        match self.validate() {
            Ok(()) => Ok(()),
            Err(err) if strict => Err(err),
            Err(err) => {
                warn!("{}; continuing in lenient mode", err);
                diagnostics.push(err.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; 512];
        bytes[0..8].copy_from_slice(b"EFI PART");
        bytes[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
        bytes[12..16].copy_from_slice(&92u32.to_le_bytes());
        bytes[24..32].copy_from_slice(&1u64.to_le_bytes());
        bytes
    }

    #[test]
    fn test_header_crc_ignores_stored_crc_field() {
        let mut bytes = header_bytes();
        let clean = header_crc32(&bytes, 92).unwrap();

        bytes[16..20].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        assert_eq!(header_crc32(&bytes, 92).unwrap(), clean);
    }

    #[test]
    fn test_header_crc_matches_manual_zeroing() {
        let mut bytes = header_bytes();
        bytes[16..20].copy_from_slice(&0x1234_5678u32.to_le_bytes());

        let mut zeroed = bytes[..92].to_vec();
        zeroed[16..20].fill(0);
        assert_eq!(header_crc32(&bytes, 92).unwrap(), crc32fast::hash(&zeroed));
    }

    #[test]
    fn test_header_crc_ignores_bytes_past_header_size() {
        let mut bytes = header_bytes();
        let before = header_crc32(&bytes, 92).unwrap();
        bytes[200] = 0xAB;
        assert_eq!(header_crc32(&bytes, 92).unwrap(), before);
    }

    #[test]
    fn test_header_crc_rejects_bad_size() {
        let bytes = header_bytes();
        assert!(matches!(header_crc32(&bytes, 91), Err(Error::MalformedHeader(_))));
        assert!(matches!(header_crc32(&bytes, 513), Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_entries_crc_known_value() {
        // CRC32 of 16384 zero bytes, the common empty 128x128 array
        assert_eq!(entries_crc32(&[0u8; 128 * 128]), 0xAB54_D286);
    }

    #[test]
    fn test_validate_mismatch() {
        assert!(validate(HEADER_REGION, 1, 1).is_ok());
        assert!(matches!(
            validate(ENTRIES_REGION, 1, 2),
            Err(Error::CrcMismatch { computed: 1, stored: 2, .. })
        ));
    }

    #[test]
    fn test_enforce_lenient_records_diagnostic() {
        let check = CrcCheck::entries(&[1, 2, 3], 0);
        let mut diagnostics = Vec::new();

        check.enforce(false, &mut diagnostics).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("entry array"));

        assert!(check.enforce(true, &mut diagnostics).is_err());
    }
}
