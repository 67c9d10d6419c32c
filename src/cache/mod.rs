//! The fixed-size, clock-replacement buffer cache.
//!
//! All sector-level I/O in this crate — inode metadata, index sectors, data
//! sectors, and the free-map's own backing file — passes through here. The
//! cache is the only thing that ever touches the `BlockDevice`.

mod frame;
mod readahead;

use std::sync::{Arc, Mutex, MutexGuard};

use array_macro::array;

use crate::device::BlockDevice;
use crate::param::{NUM_FRAMES, SECTOR_SIZE};

use frame::{Frame, FrameGuard};
use readahead::{ReadAhead, ReadAheadMsg};

/// Cache metadata protected by the single global `bh_lock`: which sector
/// (if any) each frame currently holds, and the clock sweep cursor.
struct BhState {
    sector_of: [Option<u32>; NUM_FRAMES],
    clock_hand: usize,
}

pub(crate) struct CacheInner {
    bh: Mutex<BhState>,
    frames: [Frame; NUM_FRAMES],
    device: Arc<dyn BlockDevice>,
}

enum Lookup<'a> {
    Hit {
        idx: usize,
        inner: MutexGuard<'a, frame::FrameInner>,
    },
    Miss {
        bh: MutexGuard<'a, BhState>,
    },
}

impl CacheInner {
    fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            bh: Mutex::new(BhState {
                sector_of: [None; NUM_FRAMES],
                clock_hand: 0,
            }),
            frames: array![_ => Frame::new(); NUM_FRAMES],
            device,
        }
    }

    /// Scans the frame table for `sector`. On a hit, acquires the frame's
    /// mutex and releases `bh_lock` before returning. On a miss, `bh_lock`
    /// is retained so the caller can select a victim atomically with
    /// respect to other lookups.
    fn lookup(&self, bh: MutexGuard<'_, BhState>, sector: u32) -> Lookup<'_> {
        for idx in 0..NUM_FRAMES {
            if bh.sector_of[idx] == Some(sector) {
                let inner = self.frames[idx].lock.lock().unwrap();
                drop(bh);
                return Lookup::Hit { idx, inner };
            }
        }
        Lookup::Miss { bh }
    }

    /// Clock sweep, called only while `bh_lock` is held on a miss. Skips
    /// frames currently pinned by another caller; among the rest, evicts
    /// the first with a clear reference bit, clearing the bit of every
    /// frame it passes over. Guaranteed to terminate within two full sweeps
    /// of the frame array, since each pass clears at least one bit unless a
    /// frame qualifies immediately.
    fn select_victim<'a>(&'a self, bh: &mut BhState) -> (usize, MutexGuard<'a, frame::FrameInner>) {
        let mut scanned = 0usize;
        loop {
            let idx = bh.clock_hand;
            bh.clock_hand = (bh.clock_hand + 1) % NUM_FRAMES;

            if !self.frames[idx].is_pinned() {
                let mut inner = self.frames[idx].lock.lock().unwrap();
                if inner.accessed {
                    inner.accessed = false;
                } else {
                    return (idx, inner);
                }
            }

            scanned += 1;
            if scanned > 2 * NUM_FRAMES {
                eprintln!("cache: clock sweep found no victim within two passes of {NUM_FRAMES} frames");
            }
            assert!(
                scanned <= 2 * NUM_FRAMES,
                "clock sweep failed to find a victim within two passes"
            );
        }
    }

    /// Finds or installs the frame caching `sector`, pinning it for the
    /// duration of the returned guard.
    fn fetch(&self, sector: u32) -> FrameGuard<'_> {
        assert!(
            sector < self.device.num_sectors(),
            "sector {sector} out of device bounds"
        );
        let bh = self.bh.lock().unwrap();
        match self.lookup(bh, sector) {
            Lookup::Hit { idx, mut inner } => {
                inner.accessed = true;
                FrameGuard::new(idx, &self.frames[idx], inner)
            }
            Lookup::Miss { mut bh } => {
                let (idx, mut inner) = self.select_victim(&mut bh);

                if inner.dirty {
                    if let Some(old_sector) = bh.sector_of[idx] {
                        self.device.write_sector(old_sector, &inner.data);
                    }
                }
                bh.sector_of[idx] = Some(sector);
                inner.dirty = false;
                inner.accessed = true;

                // Pin before releasing bh_lock: a concurrent select_victim
                // must see this frame as in_use for the whole device read,
                // or it would block on the frame mutex while holding bh_lock.
                let mut guard = FrameGuard::new(idx, &self.frames[idx], inner);
                drop(bh);
                self.device.read_sector(sector, &mut guard.inner.data);

                guard
            }
        }
    }

    fn read(&self, sector: u32, dst: &mut [u8], dst_offset: usize, sector_offset: usize, n: usize) {
        assert!(sector_offset + n <= SECTOR_SIZE);
        if n == 0 {
            // Used by read-ahead: install the sector without copying.
            let _guard = self.fetch(sector);
            return;
        }
        let guard = self.fetch(sector);
        dst[dst_offset..dst_offset + n]
            .copy_from_slice(&guard.inner.data[sector_offset..sector_offset + n]);
    }

    fn write(&self, sector: u32, src: &[u8], src_offset: usize, sector_offset: usize, n: usize) {
        assert!(sector_offset + n <= SECTOR_SIZE);
        let mut guard = self.fetch(sector);
        guard.inner.data[sector_offset..sector_offset + n]
            .copy_from_slice(&src[src_offset..src_offset + n]);
        guard.inner.dirty = true;
    }

    fn flush_all(&self) {
        let bh = self.bh.lock().unwrap();
        for idx in 0..NUM_FRAMES {
            let mut inner = self.frames[idx].lock.lock().unwrap();
            if inner.dirty {
                if let Some(sector) = bh.sector_of[idx] {
                    self.device.write_sector(sector, &inner.data);
                }
                inner.dirty = false;
            }
        }
    }
}

/// The public buffer-cache handle.
pub struct BufferCache {
    inner: Arc<CacheInner>,
    read_ahead: ReadAhead,
}

impl BufferCache {
    /// `bc_init`: zero all frames, spawn the read-ahead worker.
    pub fn bc_init(device: Arc<dyn BlockDevice>) -> Self {
        let inner = Arc::new(CacheInner::new(device));
        let read_ahead = ReadAhead::spawn(Arc::clone(&inner));
        Self { inner, read_ahead }
    }

    /// `bc_term`: stop the read-ahead worker, then write back every dirty
    /// frame.
    pub fn bc_term(&self) {
        self.read_ahead.shutdown();
        self.inner.flush_all();
    }

    pub fn bc_read(&self, sector: u32, dst: &mut [u8], dst_offset: usize, sector_offset: usize, n: usize) {
        self.inner.read(sector, dst, dst_offset, sector_offset, n);
    }

    pub fn bc_write(&self, sector: u32, src: &[u8], src_offset: usize, sector_offset: usize, n: usize) {
        self.inner.write(sector, src, src_offset, sector_offset, n);
    }

    pub fn bc_flush_all(&self) {
        self.inner.flush_all();
    }

    /// Enqueues `sector` for advisory prefetch. Never blocks the caller;
    /// a full or closed queue silently drops the request.
    pub fn enqueue_read_ahead(&self, sector: u32) {
        self.read_ahead.request(sector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;

    fn cache(num_sectors: u32) -> BufferCache {
        BufferCache::bc_init(Arc::new(MemBlockDevice::new(num_sectors)))
    }

    #[test]
    fn write_then_read_round_trips() {
        let bc = cache(4);
        let src = [9u8; 512];
        bc.bc_write(1, &src, 0, 0, 512);
        let mut dst = [0u8; 512];
        bc.bc_read(1, &mut dst, 0, 0, 512);
        assert_eq!(dst, src);
    }

    #[test]
    fn partial_offset_copy() {
        let bc = cache(2);
        let src = [3u8; 10];
        bc.bc_write(0, &src, 0, 100, 10);
        let mut dst = [0u8; 10];
        bc.bc_read(0, &mut dst, 0, 100, 10);
        assert_eq!(dst, src);
    }

    #[test]
    fn coherence_survives_eviction() {
        // Only NUM_FRAMES+1 sectors so the first write's frame is reclaimed
        // before we read it back.
        let bc = cache((NUM_FRAMES as u32) + 2);
        bc.bc_write(2, &[0xAAu8; 512], 0, 0, 512);
        for s in 3..(NUM_FRAMES as u32 + 2) {
            bc.bc_write(s, &[s as u8; 512], 0, 0, 512);
        }
        let mut dst = [0u8; 512];
        bc.bc_read(2, &mut dst, 0, 0, 512);
        assert_eq!(dst, [0xAAu8; 512]);
    }

    #[test]
    fn at_most_one_frame_per_sector() {
        let bc = cache(8);
        for s in 0..8 {
            bc.bc_write(s, &[s as u8; 512], 0, 0, 512);
        }
        let bh = bc.inner.bh.lock().unwrap();
        let mut seen = std::collections::HashSet::new();
        for slot in bh.sector_of.iter().flatten() {
            assert!(seen.insert(*slot), "sector {slot} cached in two frames");
        }
    }

    #[test]
    fn clock_fairness_round_robin() {
        // Touch NUM_FRAMES+1 distinct sectors repeatedly; within 128
        // accesses every sector must have been evicted (i.e. every frame
        // must have changed which sector it holds) at least once.
        let total_sectors = (NUM_FRAMES as u32) + 1;
        let bc = cache(total_sectors);
        let mut last_mapping: Vec<Option<u32>> = vec![None; NUM_FRAMES];
        let mut evicted_once = vec![false; NUM_FRAMES];

        for access in 0..128u32 {
            let sector = access % total_sectors;
            bc.bc_write(sector, &[sector as u8; 512], 0, 0, 512);
            let bh = bc.inner.bh.lock().unwrap();
            for idx in 0..NUM_FRAMES {
                if let Some(prev) = last_mapping[idx] {
                    if bh.sector_of[idx] != Some(prev) {
                        evicted_once[idx] = true;
                    }
                }
                last_mapping[idx] = bh.sector_of[idx];
            }
        }

        assert!(
            evicted_once.iter().all(|&e| e),
            "some frame never saw an eviction within 128 accesses"
        );
    }

    #[test]
    fn flush_all_clears_dirty_bits() {
        let bc = cache(2);
        bc.bc_write(0, &[1u8; 512], 0, 0, 512);
        bc.bc_flush_all();
        let bh = bc.inner.bh.lock().unwrap();
        for idx in 0..NUM_FRAMES {
            if bh.sector_of[idx].is_some() {
                let inner = bc.inner.frames[idx].lock.lock().unwrap();
                assert!(!inner.dirty);
            }
        }
    }
}
