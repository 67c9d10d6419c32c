//! An on-disk file-system core for a teaching-grade kernel: a clock-
//! replacement buffer cache with read-ahead, a multi-level indexed inode
//! layer, and a persisted free-sector bitmap, glued together by a minimal
//! single-level directory and mount façade.
//!
//! The three modules that carry the engineering weight are [`cache`],
//! [`inode`], and [`freemap`]. [`directory`] and [`fs`] are ambient,
//! supplemental layers that make the core exercisable end to end; see
//! why they stay deliberately simple.

pub mod cache;
pub mod device;
pub mod directory;
pub mod error;
pub mod freemap;
pub mod fs;
pub mod inode;
pub mod param;

pub use device::{BlockDevice, MemBlockDevice};
pub use error::{FsError, FsResult};
pub use fs::Filesystem;
pub use inode::{Inode, SectorId};

#[cfg(test)]
mod end_to_end {
    use std::sync::Arc;

    use crate::device::MemBlockDevice;
    use crate::error::FsError;
    use crate::fs::Filesystem;
    use crate::inode::{self, SECTOR_NONE};
    use crate::param::{DIRECT_COUNT, PTRS_PER_INDEX, SECTOR_SIZE};

    fn mounted(num_sectors: u32) -> Filesystem {
        Filesystem::init(Arc::new(MemBlockDevice::new(num_sectors)), true)
    }

    /// Small PRNG-driven byte sequence for a random-bytes round-trip test.
    fn prng_bytes(seed: u64, len: usize) -> Vec<u8> {
        use rand::{Rng, SeedableRng};
        use rand::rngs::StdRng;
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    #[test]
    fn scenario_small_file() {
        let fs = mounted(64);
        fs.create("/a", 0).unwrap();
        let file = fs.open("/a").unwrap();
        fs.write_at(&file, &[0x5Au8; 200], 0).unwrap();
        let mut dst = [0u8; 200];
        fs.read_at(&file, &mut dst, 0);
        assert_eq!(dst, [0x5Au8; 200]);
        assert_eq!(fs.length(&file), 200);
        fs.close(file);
    }

    #[test]
    fn scenario_crossing_direct_boundary() {
        let fs = mounted(512);
        fs.create("/a", 0).unwrap();
        let file = fs.open("/a").unwrap();
        let len = DIRECT_COUNT * SECTOR_SIZE + 1000;
        let src = prng_bytes(1, len);
        fs.write_at(&file, &src, 0).unwrap();

        let sector = fs.inumber(&file);
        let dinode = inode::read_dinode(fs.cache(), sector);
        assert_ne!(dinode.indirect, SECTOR_NONE);
        assert_eq!(dinode.double_indirect, SECTOR_NONE);
        let index = inode::read_index(fs.cache(), dinode.indirect);
        let allocated = index.entries.iter().filter(|&&e| e != SECTOR_NONE).count();
        assert_eq!(allocated, 2, "exactly two indirect entries should be allocated");

        fs.close(file);

        let file = fs.open("/a").unwrap();
        let mut dst = vec![0u8; len];
        fs.read_at(&file, &mut dst, 0);
        assert_eq!(dst, src);
        fs.close(file);
    }

    #[test]
    fn scenario_double_indirect() {
        let fs = mounted(700);
        fs.create("/a", 0).unwrap();
        let file = fs.open("/a").unwrap();
        let offset = (DIRECT_COUNT + PTRS_PER_INDEX) * SECTOR_SIZE;
        fs.write_at(&file, &[0xAA], offset).unwrap();
        assert_eq!(fs.length(&file) as usize, offset + 1);

        let sector = fs.inumber(&file);
        let dinode = inode::read_dinode(fs.cache(), sector);
        assert_ne!(dinode.double_indirect, SECTOR_NONE);
        let dbl = inode::read_index(fs.cache(), dinode.double_indirect);
        let dbl_allocated = dbl.entries.iter().filter(|&&e| e != SECTOR_NONE).count();
        assert_eq!(dbl_allocated, 1, "exactly one single-indirect sector should be allocated");
        let single = inode::read_index(fs.cache(), dbl.entries[0]);
        let single_allocated = single.entries.iter().filter(|&&e| e != SECTOR_NONE).count();
        assert_eq!(single_allocated, 1, "exactly one data sector should be allocated");

        fs.close(file);
    }

    #[test]
    fn scenario_grow_on_write() {
        let fs = mounted(64);
        fs.create("/a", 100).unwrap();
        let file = fs.open("/a").unwrap();
        fs.write_at(&file, &[7u8; 100], 1000).unwrap();

        let mut gap = [0xFFu8; 900];
        fs.read_at(&file, &mut gap, 100);
        assert_eq!(gap, [0u8; 900]);

        let mut tail = [0u8; 100];
        fs.read_at(&file, &mut tail, 1000);
        assert_eq!(tail, [7u8; 100]);
        fs.close(file);
    }

    #[test]
    fn scenario_delete_while_open() {
        let fs = mounted(64);
        fs.create("/b", 0).unwrap();
        let file = fs.open("/b").unwrap();
        fs.remove("/b").unwrap();
        fs.write_at(&file, &[1u8; 512], 0).unwrap();
        fs.close(file);
        assert!(matches!(fs.open("/b"), Err(FsError::NotFound)));
    }

    #[test]
    fn scenario_cache_eviction_correctness() {
        use crate::cache::BufferCache;
        let bc = BufferCache::bc_init(Arc::new(MemBlockDevice::new(70)));
        for s in 2..67u32 {
            bc.bc_write(s, &[s as u8; SECTOR_SIZE], 0, 0, SECTOR_SIZE);
        }
        let mut dst = [0u8; SECTOR_SIZE];
        bc.bc_read(2, &mut dst, 0, 0, SECTOR_SIZE);
        assert_eq!(dst, [2u8; SECTOR_SIZE]);
        bc.bc_read(30, &mut dst, 0, 0, SECTOR_SIZE);
        assert_eq!(dst, [30u8; SECTOR_SIZE]);
    }

    #[test]
    fn scenario_concurrent_writers() {
        use std::thread;

        let fs = Arc::new(mounted(64));
        fs.create("/c", 0).unwrap();
        let file_a = fs.open("/c").unwrap();
        let file_b = fs.reopen(&file_a);

        let fs1 = Arc::clone(&fs);
        let t1 = thread::spawn(move || {
            fs1.write_at(&file_a, &[1u8; 4096], 0).unwrap();
            file_a
        });
        let fs2 = Arc::clone(&fs);
        let t2 = thread::spawn(move || {
            fs2.write_at(&file_b, &[2u8; 4096], 4096).unwrap();
            file_b
        });
        let file_a = t1.join().unwrap();
        let file_b = t2.join().unwrap();

        assert_eq!(fs.length(&file_a), 8192);
        let mut first = [0u8; 4096];
        fs.read_at(&file_a, &mut first, 0);
        assert_eq!(first, [1u8; 4096]);
        let mut second = [0u8; 4096];
        fs.read_at(&file_a, &mut second, 4096);
        assert_eq!(second, [2u8; 4096]);
        fs.close(file_a);
        fs.close(file_b);
    }
}
