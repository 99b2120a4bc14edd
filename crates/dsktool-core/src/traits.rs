//! Core traits for dsktool

use crate::error::Result;
use crate::types::PartitionRecord;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Positioned byte access to a disk or disk image
///
/// Every codec in the workspace talks to storage through this trait only.
/// Implementations issue direct reads and writes; they must not cache.
pub trait RandomAccessDevice {
    /// Fill `buf` with the bytes starting at `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` starting at `offset`
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Push written data to stable storage
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A parsed partition table exposing the unified record list
pub trait PartitionTable {
    /// Get a human-readable identifier for this table type
    fn identify(&self) -> &str;

    /// Get all records, including a trailing unused-space record if any
    fn partitions(&self) -> &[PartitionRecord];

    /// Get a record by its 1-based partition number
    fn get_partition(&self, number: usize) -> Option<&PartitionRecord> {
        self.partitions().iter().find(|p| p.number == number)
    }
}

fn seek_read<S: Read + Seek + ?Sized>(stream: &mut S, offset: u64, buf: &mut [u8]) -> Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.read_exact(buf)?;
    Ok(())
}

fn seek_write<S: Write + Seek + ?Sized>(stream: &mut S, offset: u64, buf: &[u8]) -> Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.write_all(buf)?;
    Ok(())
}

impl RandomAccessDevice for File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        seek_read(self, offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        seek_write(self, offset, buf)
    }

    fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.sync_data()?;
        Ok(())
    }
}

/// In-memory disk image. Writes may not grow the image.
impl RandomAccessDevice for Cursor<Vec<u8>> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        seek_read(self, offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let len = self.get_ref().len() as u64;
        let end = offset.checked_add(buf.len() as u64);
        if end.map_or(true, |end| end > len) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "write of {} bytes at offset {} exceeds image length {}",
                    buf.len(),
                    offset,
                    len
                ),
            )
            .into());
        }
        seek_write(self, offset, buf)
    }
}

impl<D: RandomAccessDevice + ?Sized> RandomAccessDevice for &mut D {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        (**self).write_at(offset, buf)
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }
}

impl<D: RandomAccessDevice + ?Sized> RandomAccessDevice for Box<D> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        (**self).write_at(offset, buf)
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }
}
