//! # dsktool Device
//!
//! Device-opening collaborators for the partition engine.
//!
//! The codecs only see [`RandomAccessDevice`]. This crate supplies the
//! platform side: opening a path and reporting its geometry.
//! - **FileDevice**: read/write access to a block device or image file
//! - **MmapDevice**: read-only memory-mapped access to an image file
//!
//! ## Example
//!
//! ```rust,no_run
//! use dsktool_device::{open_device, DeviceConfig};
//! use std::path::Path;
//!
//! let config = DeviceConfig::default();
//! let (mut device, geometry) = open_device(Path::new("disk.img"), &config).unwrap();
//! let mut sector = vec![0u8; geometry.sector_size as usize];
//! device.read_at(0, &mut sector).unwrap();
//! ```

pub mod file;
pub mod mmap;

pub use file::{DeviceConfig, FileDevice};
pub use mmap::MmapDevice;

use dsktool_core::{DeviceGeometry, Error, RandomAccessDevice, Result};
use std::path::Path;

/// Open a path as a device according to `config`
///
/// Memory mapping is read-only, so it cannot be combined with `writable`.
pub fn open_device(
    path: &Path,
    config: &DeviceConfig,
) -> Result<(Box<dyn RandomAccessDevice>, DeviceGeometry)> {
    if config.use_mmap {
        if config.writable {
            return Err(Error::invalid_request(
                "memory-mapped devices cannot be opened for writing",
            ));
        }
        let device = MmapDevice::open(path, config.sector_size)?;
        let geometry = device.geometry();
        return Ok((Box::new(device), geometry));
    }

    let device = FileDevice::open(path, config)?;
    let geometry = device.geometry();
    Ok((Box::new(device), geometry))
}
