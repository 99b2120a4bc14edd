//! # dsktool Zones
//!
//! GPT and MBR partition table codecs, the unified reader, and the mutator.
//!
//! - **guid / crc**: mixed-endian GUIDs, UTF-16LE names, CRC32 integrity
//! - **gpt**: header and entry array codec with a two-phase backup-first commit
//! - **mbr**: MBR codec and EBR chain walker
//! - **reader**: GPT/MBR detection and the numbered partition list
//! - **mutator**: partition create and delete
//!
//! ## Example
//!
//! ```rust,no_run
//! use dsktool_core::{DeviceGeometry, PartitionTable};
//! use dsktool_zones::{detect_and_read, ReadOptions};
//! use std::fs::File;
//!
//! let mut file = File::open("disk.img").unwrap();
//! let length = file.metadata().unwrap().len();
//! let geometry = DeviceGeometry::from_byte_length(512, length).unwrap();
//!
//! let table = detect_and_read(&mut file, &geometry, &ReadOptions::default()).unwrap();
//! println!("Partition table: {}", table.identify());
//! for record in table.partitions() {
//!     println!("  {}", record);
//! }
//! ```

mod bytes;
pub mod crc;
pub mod extent;
pub mod gpt;
pub mod guid;
pub mod mbr;
pub mod mutator;
mod phase;
pub mod reader;

#[cfg(test)]
mod fixtures;

pub use extent::Extent;
pub use gpt::types::{PartitionTypeGuid, KNOWN_GPT_TYPES};
pub use gpt::GptDisk;
pub use guid::Guid;
pub use mbr::types::{MbrPartitionType, MbrTable, KNOWN_MBR_TYPES};
pub use mutator::{create, delete, CreateRequest, MutationOutcome};
pub use reader::{detect_and_read, read_table, DiskTable, ReadOptions, UnifiedTable};
