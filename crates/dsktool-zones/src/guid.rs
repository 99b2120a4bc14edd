//! GUID and partition name codec
//!
//! GPT stores GUIDs mixed-endian: the first three fields little-endian, the
//! last eight bytes as-is. Names are fixed 72-byte UTF-16LE fields.

use dsktool_core::{Error, Result};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Size of the GPT partition name field in bytes
pub const NAME_BYTES: usize = 72;

/// Maximum name length in UTF-16 code units
pub const NAME_UNITS: usize = NAME_BYTES / 2;

/// A GUID in on-disk byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// The all-zero GUID (marks an empty GPT entry)
    pub const ZERO: Self = Self([0; 16]);

    /// Generate a random (version 4) GUID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_bytes_le())
    }

    /// Parse the canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(|uuid| Self(uuid.to_bytes_le()))
            .map_err(|e| Error::invalid_request(format!("invalid GUID '{}': {}", s, e)))
    }

    /// Check if every byte is zero
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Convert to a `Uuid` in canonical field order
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes_le(self.0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid().hyphenated())
    }
}

impl FromStr for Guid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Decode a UTF-16LE name, stopping at the first NUL code unit
pub fn decode_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();

    String::from_utf16_lossy(&units)
}

/// Encode a name into the fixed 72-byte field, zero-padded
///
/// # Errors
///
/// Returns an error if the name needs more than 36 UTF-16 code units or
/// contains a NUL character
pub fn encode_name(name: &str) -> Result<[u8; NAME_BYTES]> {
    if name.contains('\0') {
        return Err(Error::invalid_request("partition name contains NUL"));
    }

    let units: Vec<u16> = name.encode_utf16().collect();
    if units.len() > NAME_UNITS {
        return Err(Error::invalid_request(format!(
            "partition name '{}' is {} UTF-16 units long (max {})",
            name,
            units.len(),
            NAME_UNITS
        )));
    }

    let mut field = [0u8; NAME_BYTES];
    for (slot, unit) in field.chunks_exact_mut(2).zip(&units) {
        slot.copy_from_slice(&unit.to_le_bytes());
    }
    Ok(field)
}
