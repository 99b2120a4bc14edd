//! Memory-mapped device for read-only inspection of disk images

use dsktool_core::{DeviceGeometry, RandomAccessDevice, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;

/// Maximum file size for memory mapping (16 GB - practical limit for most systems)
pub const MAX_MMAP_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// A read-only device backed by a memory-mapped image file
///
/// Listing a large image maps it once instead of issuing a syscall per
/// sector. Writes always fail; mutations must go through [`crate::FileDevice`].
///
/// # Example
///
/// ```rust,no_run
/// use dsktool_device::MmapDevice;
/// use std::path::Path;
///
/// let device = MmapDevice::open(Path::new("disk.img"), 512).unwrap();
/// ```
pub struct MmapDevice {
    mmap: Mmap,
    geometry: DeviceGeometry,
}

impl MmapDevice {
    /// Map an image file
    ///
    /// # Security
    ///
    /// Validates file before mapping:
    /// - Ensures file is a regular file (not device, pipe, etc.)
    /// - Checks file size is within reasonable limits
    ///
    /// # Safety
    ///
    /// Uses `unsafe` for memory mapping because:
    /// - The OS guarantees memory safety for valid file descriptors
    /// - We validate the file is a regular file before mapping
    /// - File must not be truncated during access (caller responsibility)
    pub fn open(path: &Path, sector_size: u32) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file, sector_size)
    }

    /// Map an already-open image file
    ///
    /// # Safety
    ///
    /// See `open()` for safety documentation
    pub fn from_file(file: &File, sector_size: u32) -> Result<Self> {
        let metadata = file.metadata()?;

        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Only regular files can be memory-mapped",
            )
            .into());
        }

        if metadata.len() > MAX_MMAP_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "File size {} exceeds memory mapping limit {} (16 GB)",
                    metadata.len(),
                    MAX_MMAP_SIZE
                ),
            )
            .into());
        }

        let geometry = DeviceGeometry::from_byte_length(sector_size, metadata.len())?;

        // SAFETY: regular file, bounded size, valid descriptor; the mapping is read-only
        let mmap = unsafe { Mmap::map(file)? };

        Ok(Self { mmap, geometry })
    }

    /// Geometry derived from the mapped length
    pub fn geometry(&self) -> DeviceGeometry {
        self.geometry
    }

    /// Length of the mapped region in bytes
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Check if the mapped region is empty
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl RandomAccessDevice for MmapDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = usize::try_from(offset).ok();
        let end = start.and_then(|s| s.checked_add(buf.len()));
        match (start, end) {
            (Some(start), Some(end)) if end <= self.mmap.len() => {
                buf.copy_from_slice(&self.mmap[start..end]);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at offset {} past end of image ({} bytes)",
                    buf.len(),
                    offset,
                    self.mmap.len()
                ),
            )
            .into()),
        }
    }

    fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "memory-mapped images are read-only",
        )
        .into())
    }
}
