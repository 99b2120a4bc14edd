//! Security validation constants and helpers
//!
//! On-disk fields drive buffer sizes and loop bounds. These limits keep a
//! corrupted or hostile table from exhausting memory or looping forever.

use crate::Error;

/// Maximum sector size we'll accept (4KB - common for advanced format)
pub const MAX_SECTOR_SIZE: u32 = 4096;

/// Maximum size of a GPT partition entry array read into memory (16 MB)
pub const MAX_ENTRY_ARRAY_SIZE: usize = 16 * 1024 * 1024;

/// Maximum number of GPT partition entries
pub const MAX_PARTITION_ENTRIES: u32 = 16_384;

/// Maximum EBR hops when walking a logical partition chain
pub const MAX_EBR_HOPS: usize = 128;

/// Validate that a size is within allocation limits
///
/// # Security
/// Prevents memory exhaustion from malicious entry counts
pub fn validate_allocation_size(size: u64, limit: usize, context: &str) -> crate::Result<usize> {
    if size > limit as u64 {
        return Err(Error::LimitExceeded(format!(
            "{} size {} exceeds limit {}",
            context, size, limit
        )));
    }

    size.try_into()
        .map_err(|_| Error::LimitExceeded(format!("{} size exceeds platform limits", context)))
}

/// Safely multiply two u64 values with overflow checking
///
/// # Security
/// Prevents integer overflow in LBA-to-byte conversions
pub fn checked_multiply_u64(a: u64, b: u64, context: &str) -> crate::Result<u64> {
    a.checked_mul(b)
        .ok_or_else(|| Error::LimitExceeded(format!("{}: multiplication overflow", context)))
}

/// Safely multiply u32 values and return u64
pub fn checked_multiply_u32_to_u64(a: u32, b: u32, context: &str) -> crate::Result<u64> {
    (a as u64)
        .checked_mul(b as u64)
        .ok_or_else(|| Error::LimitExceeded(format!("{}: multiplication overflow", context)))
}

/// Validate sector size is reasonable
pub fn validate_sector_size(sector_size: u32) -> crate::Result<()> {
    if sector_size < 512 || sector_size > MAX_SECTOR_SIZE {
        return Err(Error::invalid_geometry(format!(
            "Invalid sector size: {} (must be 512-{})",
            sector_size, MAX_SECTOR_SIZE
        )));
    }

    if !sector_size.is_power_of_two() {
        return Err(Error::invalid_geometry(format!(
            "Sector size {} is not a power of 2",
            sector_size
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_allocation_size() {
        assert_eq!(
            validate_allocation_size(128 * 128, MAX_ENTRY_ARRAY_SIZE, "test").unwrap(),
            16_384
        );

        assert!(validate_allocation_size(
            MAX_ENTRY_ARRAY_SIZE as u64 + 1,
            MAX_ENTRY_ARRAY_SIZE,
            "test"
        )
        .is_err());
    }

    #[test]
    fn test_checked_multiply_u64() {
        assert_eq!(checked_multiply_u64(1000, 512, "test").unwrap(), 512_000);
        assert!(checked_multiply_u64(u64::MAX, 2, "test").is_err());
    }

    #[test]
    fn test_checked_multiply_u32_to_u64() {
        assert_eq!(
            checked_multiply_u32_to_u64(u32::MAX, 2, "test").unwrap(),
            u32::MAX as u64 * 2
        );
    }

    #[test]
    fn test_validate_sector_size() {
        assert!(validate_sector_size(512).is_ok());
        assert!(validate_sector_size(4096).is_ok());

        assert!(validate_sector_size(0).is_err());
        assert!(validate_sector_size(256).is_err());
        assert!(validate_sector_size(8192).is_err());
        assert!(validate_sector_size(1000).is_err()); // Not power of 2
    }
}
