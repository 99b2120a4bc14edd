//! File device - positioned access to a block device or raw image file

use dsktool_core::{DeviceGeometry, RandomAccessDevice, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration for opening a device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Logical sector size in bytes
    pub sector_size: u32,
    /// Open for writing (required by create/delete)
    pub writable: bool,
    /// Use a read-only memory map instead of file reads (regular files only)
    pub use_mmap: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sector_size: 512,
            writable: false,
            use_mmap: false,
        }
    }
}

/// A block device or raw disk image opened through the filesystem
///
/// The capacity is taken by seeking to the end of the handle, which works for
/// both regular files and block device nodes.
///
/// # Example
///
/// ```rust,no_run
/// use dsktool_device::{DeviceConfig, FileDevice};
/// use std::path::Path;
///
/// let device = FileDevice::open(Path::new("/dev/sdb"), &DeviceConfig::default()).unwrap();
/// println!("{} sectors", device.geometry().disk_size_sectors);
/// ```
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    path: PathBuf,
    geometry: DeviceGeometry,
    writable: bool,
}

impl FileDevice {
    /// Open a device or image file
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be opened with the requested
    /// access, or if its size does not form a valid geometry
    pub fn open(path: &Path, config: &DeviceConfig) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(config.writable)
            .open(path)?;

        let length = file.seek(SeekFrom::End(0))?;
        let geometry = DeviceGeometry::from_byte_length(config.sector_size, length)?;

        debug!(
            path = %path.display(),
            length,
            sector_size = geometry.sector_size,
            writable = config.writable,
            "opened device"
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            geometry,
            writable: config.writable,
        })
    }

    /// Geometry derived at open time
    pub fn geometry(&self) -> DeviceGeometry {
        self.geometry
    }

    /// Path this device was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether writes are permitted
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl RandomAccessDevice for FileDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        RandomAccessDevice::read_at(&mut self.file, offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} was opened read-only", self.path.display()),
            )
            .into());
        }
        RandomAccessDevice::write_at(&mut self.file, offset, buf)
    }

    fn sync(&mut self) -> Result<()> {
        if self.writable {
            RandomAccessDevice::sync(&mut self.file)?;
        }
        Ok(())
    }
}
