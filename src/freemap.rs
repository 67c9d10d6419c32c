//! The persistent free-sector bitmap.
//!
//! One bit per device sector, `1` meaning allocated. The bitmap lives in
//! memory as a plain `Vec<u8>` — not the `bitmaps` crate's const-generic
//! `Bitmap<N>`, since the device size (and so the bitmap's bit count) is
//! only known at mount time — and is mirrored to its own backing file once
//! that file exists: `free_map_allocate` only writes through once
//! `free_map_file` is non-null. Before the backing file
//! is created (during the bootstrap allocation inside `free_map_create`
//! itself) allocations only touch the in-memory copy, breaking what would
//! otherwise be a chicken-and-egg dependency on the inode layer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use crate::cache::BufferCache;
use crate::inode::{self, Inode, InodeTable, SectorId};
use crate::param::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};

struct State {
    bits: Vec<u8>,
    num_sectors: u32,
    file: Option<Inode>,
}

impl State {
    fn get(&self, sector: SectorId) -> bool {
        let (byte, mask) = Self::locate(sector);
        self.bits[byte] & mask != 0
    }

    fn set(&mut self, sector: SectorId, value: bool) {
        let (byte, mask) = Self::locate(sector);
        if value {
            self.bits[byte] |= mask;
        } else {
            self.bits[byte] &= !mask;
        }
    }

    fn locate(sector: SectorId) -> (usize, u8) {
        let sector = sector as usize;
        (sector / 8, 1u8 << (sector % 8))
    }

    /// First run of `cnt` consecutive clear bits, first-fit.
    fn scan_clear_run(&self, cnt: usize) -> Option<SectorId> {
        if cnt == 0 {
            return None;
        }
        let mut run_start = None;
        let mut run_len = 0usize;
        for s in 0..self.num_sectors {
            if !self.get(s) {
                if run_len == 0 {
                    run_start = Some(s);
                }
                run_len += 1;
                if run_len == cnt {
                    return run_start;
                }
            } else {
                run_len = 0;
                run_start = None;
            }
        }
        None
    }
}

/// The persistent free-sector bitmap. One value is shared by the whole
/// mount, owned by the `Filesystem` façade.
pub struct FreeMap {
    state: Mutex<State>,
}

impl FreeMap {
    /// `free_map_init`: a fresh in-memory bitmap with sectors 0
    /// (`FREE_MAP_SECTOR`) and 1 (`ROOT_DIR_SECTOR`) pre-marked.
    pub fn init(num_sectors: u32) -> Self {
        let byte_len = (num_sectors as usize + 7) / 8;
        let mut state = State {
            bits: vec![0u8; byte_len],
            num_sectors,
            file: None,
        };
        state.set(FREE_MAP_SECTOR, true);
        state.set(ROOT_DIR_SECTOR, true);
        Self {
            state: Mutex::new(state),
        }
    }

    #[cfg(test)]
    pub(crate) fn mark_used(&self, sectors: &[SectorId]) {
        let mut state = self.state.lock().unwrap();
        for &s in sectors {
            state.set(s, true);
        }
    }

    #[cfg(test)]
    pub(crate) fn count_used(&self) -> usize {
        let state = self.state.lock().unwrap();
        (0..state.num_sectors).filter(|&s| state.get(s)).count()
    }

    fn byte_len(&self) -> usize {
        self.state.lock().unwrap().bits.len()
    }

    /// `free_map_create`: allocates the backing inode at `FREE_MAP_SECTOR`
    /// (using this very bitmap, with the file not yet open so no
    /// write-through happens) and serializes the current bitmap into it.
    pub fn create(&self, cache: &BufferCache, table: &InodeTable) {
        let byte_len = self.byte_len();
        inode::create(cache, self, FREE_MAP_SECTOR, byte_len as i32, false)
            .expect("free map creation failed: device too small");
        let file = table.open(FREE_MAP_SECTOR);
        let bits = self.state.lock().unwrap().bits.clone();
        inode::write_at(cache, self, &file, &bits, 0).expect("can't write free map");
        self.state.lock().unwrap().file = Some(file);
    }

    /// `free_map_open`: opens the existing backing file and reads the
    /// bitmap from it.
    pub fn open(&self, cache: &BufferCache, table: &InodeTable) {
        let file = table.open(FREE_MAP_SECTOR);
        let byte_len = self.byte_len();
        let mut bits = vec![0u8; byte_len];
        let n = inode::read_at(cache, &file, &mut bits, 0);
        assert_eq!(n, byte_len, "can't read free map");
        let mut state = self.state.lock().unwrap();
        state.bits = bits;
        state.file = Some(file);
    }

    /// `free_map_close`.
    pub fn close(&self, cache: &BufferCache, table: &InodeTable) {
        let file = self.state.lock().unwrap().file.take();
        if let Some(file) = file {
            table.close(cache, self, file);
        }
    }

    /// `free_map_allocate`: first-fit `cnt` consecutive sectors. Returns the
    /// first sector of the run. Writes the bitmap through to disk before
    /// returning success; a failed write-through (simulated here as a
    /// caught device panic, since `BlockDevice` otherwise reports no
    /// recoverable errors) reverts the bits and returns `None`.
    pub fn allocate(&self, cache: &BufferCache, cnt: usize) -> Option<SectorId> {
        let (start, has_file) = {
            let mut state = self.state.lock().unwrap();
            let start = state.scan_clear_run(cnt)?;
            for s in start..start + cnt as u32 {
                state.set(s, true);
            }
            (start, state.file.is_some())
        };

        // Bits are already set optimistically; a guard reverts them unless
        // the write-through below defuses it on success.
        let revert = scopeguard::guard((), |_| {
            let mut state = self.state.lock().unwrap();
            for s in start..start + cnt as u32 {
                state.set(s, false);
            }
        });

        if has_file && !self.write_through(cache) {
            return None;
        }
        scopeguard::ScopeGuard::into_inner(revert);
        Some(start)
    }

    /// `free_map_release`: clears `cnt` bits starting at `sector` and writes
    /// the bitmap through. The caller must have allocated them.
    pub fn release(&self, cache: &BufferCache, sector: SectorId, cnt: usize) {
        {
            let mut state = self.state.lock().unwrap();
            for s in sector..sector + cnt as u32 {
                if !state.get(s) {
                    eprintln!("free map: releasing sector {s} that wasn't allocated");
                }
                assert!(state.get(s), "releasing a sector that wasn't allocated");
                state.set(s, false);
            }
        }
        if self.state.lock().unwrap().file.is_some() {
            self.write_through(cache);
        }
    }

    fn write_through(&self, cache: &BufferCache) -> bool {
        let (bits, file) = {
            let state = self.state.lock().unwrap();
            let file = state
                .file
                .as_ref()
                .expect("write_through with no backing file")
                .share();
            (state.bits.clone(), file)
        };
        let result = catch_unwind(AssertUnwindSafe(|| {
            inode::write_at(cache, self, &file, &bits, 0).expect("free map write failed")
        }));
        result.is_ok()
    }
}
