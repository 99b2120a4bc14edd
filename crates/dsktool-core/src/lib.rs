//! # dsktool Core
//!
//! Core traits, types, and error handling shared by the dsktool crates.
//!
//! This crate provides the foundational abstractions for partition work:
//! - **RandomAccessDevice**: positioned read/write over a disk or image
//! - **DeviceGeometry**: explicit sector size and capacity, passed into every call
//! - **PartitionRecord**: one row of the unified GPT/MBR partition list
//! - **Error**: the typed error returned by every codec and mutator
//!
//! ## Example
//!
//! ```rust,no_run
//! use dsktool_core::{DeviceGeometry, RandomAccessDevice, Result};
//!
//! fn read_lba(
//!     dev: &mut dyn RandomAccessDevice,
//!     geometry: &DeviceGeometry,
//!     lba: u64,
//! ) -> Result<Vec<u8>> {
//!     let mut sector = vec![0u8; geometry.sector_size as usize];
//!     dev.read_at(geometry.byte_offset(lba)?, &mut sector)?;
//!     Ok(sector)
//! }
//! ```

pub mod error;
pub mod security;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{Error, Result};
pub use security::*;
pub use traits::{PartitionTable, RandomAccessDevice};
pub use types::{format_size, DeviceGeometry, PartitionKind, PartitionRecord, TableKind};
