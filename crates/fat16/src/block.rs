use core::fmt::Debug;
use core::ops::Add;
use core::sync::atomic::{AtomicBool, Ordering};

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;
use thiserror::Error;

/// FAT16 volumes handled here always use 512 byte sectors.
pub const SECTOR_SIZE: usize = 512;

/// Logical block address of a 512 byte sector on the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lba(pub u32);

impl Lba {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Byte offset of the start of this sector.
    pub fn byte_offset(self) -> usize {
        self.0 as usize * SECTOR_SIZE
    }
}

impl From<u32> for Lba {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Lba> for u32 {
    fn from(value: Lba) -> Self {
        value.0
    }
}

impl Add<u32> for Lba {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("sectors {start}..{end} are past the end of the device")]
    OutOfRange { start: u32, end: u32 },
    #[error("buffer of {len} bytes is not a whole number of sectors")]
    PartialSector { len: usize },
    #[error("device rejected the transfer")]
    Transfer,
}

/// Sector-addressed storage underneath a volume. Transfers always cover
/// `buf.len() / SECTOR_SIZE` whole sectors starting at `lba`.
///
/// Methods take `&self`. It is assumed some form of lock is wrapping the
/// volume that owns the device, so calls never overlap.
pub trait BlockDevice: Debug {
    fn read_sectors(&self, lba: Lba, buf: &mut [u8]) -> Result<(), DeviceError>;

    fn write_sectors(&self, lba: Lba, data: &[u8]) -> Result<(), DeviceError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn read_sectors(&self, lba: Lba, buf: &mut [u8]) -> Result<(), DeviceError> {
        (**self).read_sectors(lba, buf)
    }

    fn write_sectors(&self, lba: Lba, data: &[u8]) -> Result<(), DeviceError> {
        (**self).write_sectors(lba, data)
    }
}

/// RAM-backed disk image. Clones share the same storage, which lets a
/// caller keep inspecting the raw bytes after handing a clone to a volume.
#[derive(Debug, Clone)]
pub struct MemoryDisk {
    data: Arc<Mutex<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryDisk {
    /// Creates a zero-filled disk of `sectors` sectors.
    pub fn new(sectors: u32) -> Self {
        Self::from_bytes(vec![0; sectors as usize * SECTOR_SIZE])
    }

    /// Wraps an existing image. A trailing partial sector is zero padded.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        let padded = bytes.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        bytes.resize(padded, 0);
        Self {
            data: Arc::new(Mutex::new(bytes)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sector_count(&self) -> u32 {
        (self.data.lock().len() / SECTOR_SIZE) as u32
    }

    /// Copy of the whole image.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Makes every subsequent write fail with [`DeviceError::Transfer`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn span(lba: Lba, len: usize, device_len: usize) -> Result<(usize, usize), DeviceError> {
        if len % SECTOR_SIZE != 0 {
            return Err(DeviceError::PartialSector { len });
        }
        let start = lba.byte_offset();
        let end = start + len;
        if end > device_len {
            return Err(DeviceError::OutOfRange {
                start: lba.0,
                end: (end / SECTOR_SIZE) as u32,
            });
        }
        Ok((start, end))
    }
}

impl BlockDevice for MemoryDisk {
    fn read_sectors(&self, lba: Lba, buf: &mut [u8]) -> Result<(), DeviceError> {
        let data = self.data.lock();
        let (start, end) = Self::span(lba, buf.len(), data.len())?;
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_sectors(&self, lba: Lba, buf: &[u8]) -> Result<(), DeviceError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(DeviceError::Transfer);
        }
        let mut data = self.data.lock();
        let (start, end) = Self::span(lba, buf.len(), data.len())?;
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}
