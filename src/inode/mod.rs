//! The indexed inode layer: on-disk layout, allocation, growth, and
//! the open-inode registry.
//!
//! The on-disk inode is never cached outside of the buffer cache — every
//! operation re-reads it through `BufferCache::bc_read`/`bc_write`, so the
//! cache remains the single source of truth for inode metadata. What
//! *is* cached in memory is the small amount of bookkeeping that has no
//! on-disk representation: `open_count`, `removed`, `deny_write_count`, and
//! the `extend_lock` that serializes length-changing operations.

mod dinode;

pub use dinode::{SectorId, SECTOR_NONE};
pub(crate) use dinode::{Dinode, IndexSector};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zerocopy::AsBytes;

use crate::cache::BufferCache;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::param::{DIRECT_COUNT, PTRS_PER_INDEX, SECTOR_SIZE};

/// Bookkeeping for one in-memory inode, shared by every `Inode` handle open
/// on the same sector.
struct InodeState {
    sector: SectorId,
    open_count: Mutex<usize>,
    removed: AtomicBool,
    deny_write_count: AtomicUsize,
    /// Serializes `inode_read_at`/`inode_write_at` against concurrent
    /// growth.
    extend_lock: Mutex<()>,
}

/// A handle to an open inode. Cloning calls `inode_reopen`.
pub struct Inode {
    state: Arc<InodeState>,
}

impl Clone for Inode {
    fn clone(&self) -> Self {
        *self.state.open_count.lock().unwrap() += 1;
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Inode {
    pub fn sector(&self) -> SectorId {
        self.state.sector
    }

    /// A second handle to the same inode that does **not** bump
    /// `open_count`. For internal use only, by code (the free-map) that
    /// already owns the canonical handle and its lifecycle, and just needs
    /// a borrow-shaped value to pass into a function expecting `&Inode`
    /// without holding a lock across the call.
    pub(crate) fn share(&self) -> Inode {
        Inode {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_removed(&self) -> bool {
        self.state.removed.load(Ordering::Acquire)
    }

    pub fn deny_write(&self) {
        let open = *self.state.open_count.lock().unwrap();
        let prev = self.state.deny_write_count.fetch_add(1, Ordering::AcqRel);
        assert!(prev + 1 <= open, "deny_write_count exceeded open_count");
    }

    pub fn allow_write(&self) {
        let prev = self.state.deny_write_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "allow_write on an inode with no pending deny");
    }

    fn write_denied(&self) -> bool {
        self.state.deny_write_count.load(Ordering::Acquire) > 0
    }
}

/// The process-wide open-inode registry: a single shared map keyed
/// by sector, so re-opening an already-open inode shares its `open_count`,
/// `deny_write_count`, and `extend_lock` rather than racing a second copy.
pub struct InodeTable {
    open: Mutex<HashMap<SectorId, Arc<InodeState>>>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
        }
    }

    /// `inode_open`: returns the existing shared entry if `sector` is
    /// already open, incrementing its `open_count`; otherwise registers a
    /// fresh entry with `open_count = 1`.
    pub fn open(&self, sector: SectorId) -> Inode {
        let mut table = self.open.lock().unwrap();
        let state = table
            .entry(sector)
            .or_insert_with(|| {
                Arc::new(InodeState {
                    sector,
                    open_count: Mutex::new(0),
                    removed: AtomicBool::new(false),
                    deny_write_count: AtomicUsize::new(0),
                    extend_lock: Mutex::new(()),
                })
            })
            .clone();
        *state.open_count.lock().unwrap() += 1;
        Inode { state }
    }

    /// `inode_close`: decrements `open_count`; at zero, removes the entry
    /// and, if `removed` was set, releases every sector the inode reaches.
    pub fn close(&self, cache: &BufferCache, free_map: &FreeMap, inode: Inode) {
        let last = {
            let mut count = inode.state.open_count.lock().unwrap();
            *count -= 1;
            *count == 0
        };
        if !last {
            return;
        }
        self.open.lock().unwrap().remove(&inode.state.sector);
        if inode.state.removed.load(Ordering::Acquire) {
            free_inode_sectors(cache, free_map, inode.state.sector);
        }
    }

    /// `inode_remove`: marks the inode for deallocation at final close.
    /// Deferred rather than immediate: other open handles may still be using it.
    pub fn remove(&self, inode: &Inode) {
        inode.state.removed.store(true, Ordering::Release);
    }
}

pub(crate) fn read_dinode(cache: &BufferCache, sector: SectorId) -> Dinode {
    let mut buf = [0u8; SECTOR_SIZE];
    cache.bc_read(sector, &mut buf, 0, 0, SECTOR_SIZE);
    Dinode::from_bytes(&buf)
}

fn write_dinode(cache: &BufferCache, sector: SectorId, dinode: &Dinode) {
    cache.bc_write(sector, dinode.as_bytes(), 0, 0, SECTOR_SIZE);
}

pub(crate) fn read_index(cache: &BufferCache, sector: SectorId) -> IndexSector {
    let mut buf = [0u8; SECTOR_SIZE];
    cache.bc_read(sector, &mut buf, 0, 0, SECTOR_SIZE);
    IndexSector::from_bytes(&buf)
}

fn write_index(cache: &BufferCache, sector: SectorId, index: &IndexSector) {
    cache.bc_write(sector, index.as_bytes(), 0, 0, SECTOR_SIZE);
}

fn zero_fill(cache: &BufferCache, sector: SectorId) {
    cache.bc_write(sector, &[0u8; SECTOR_SIZE], 0, 0, SECTOR_SIZE);
}

/// Allocates and zero-fills the data sector for index `k` within a file,
/// growing the indirect/double-indirect index sectors on demand.
/// Called only for `k` in the range newly brought into the file by growth;
/// `dinode` is mutated in place and the caller is responsible for writing
/// it back once the whole range has been processed.
fn allocate_sector_for_index(
    cache: &BufferCache,
    free_map: &FreeMap,
    dinode: &mut Dinode,
    k: usize,
) -> FsResult<()> {
    if k < DIRECT_COUNT {
        let data = free_map.allocate(cache, 1).ok_or(FsError::OutOfSpace)?;
        zero_fill(cache, data);
        dinode.direct[k] = data;
        return Ok(());
    }

    let k = k - DIRECT_COUNT;
    if k < PTRS_PER_INDEX {
        if dinode.indirect == SECTOR_NONE {
            let idx_sector = free_map.allocate(cache, 1).ok_or(FsError::OutOfSpace)?;
            write_index(cache, idx_sector, &IndexSector::empty());
            dinode.indirect = idx_sector;
        }
        let mut index = read_index(cache, dinode.indirect);
        let data = free_map.allocate(cache, 1).ok_or(FsError::OutOfSpace)?;
        zero_fill(cache, data);
        index.entries[k] = data;
        write_index(cache, dinode.indirect, &index);
        return Ok(());
    }

    let m = k - PTRS_PER_INDEX;
    let i = m / PTRS_PER_INDEX;
    let j = m % PTRS_PER_INDEX;
    if m >= PTRS_PER_INDEX * PTRS_PER_INDEX {
        return Err(FsError::OutOfBounds);
    }

    if dinode.double_indirect == SECTOR_NONE {
        let dbl_sector = free_map.allocate(cache, 1).ok_or(FsError::OutOfSpace)?;
        write_index(cache, dbl_sector, &IndexSector::empty());
        dinode.double_indirect = dbl_sector;
    }
    let mut outer = read_index(cache, dinode.double_indirect);
    if outer.entries[i] == SECTOR_NONE {
        let idx_sector = free_map.allocate(cache, 1).ok_or(FsError::OutOfSpace)?;
        write_index(cache, idx_sector, &IndexSector::empty());
        outer.entries[i] = idx_sector;
        write_index(cache, dinode.double_indirect, &outer);
    }
    let inner_sector = outer.entries[i];
    let mut inner = read_index(cache, inner_sector);
    let data = free_map.allocate(cache, 1).ok_or(FsError::OutOfSpace)?;
    zero_fill(cache, data);
    inner.entries[j] = data;
    write_index(cache, inner_sector, &inner);
    Ok(())
}

/// Looks up the data sector already mapped to index `k`, without
/// allocating. Used by reads and by in-place (non-growing) writes.
fn sector_for_index(cache: &BufferCache, dinode: &Dinode, k: usize) -> SectorId {
    if k < DIRECT_COUNT {
        return dinode.direct[k];
    }
    let k = k - DIRECT_COUNT;
    if k < PTRS_PER_INDEX {
        let index = read_index(cache, dinode.indirect);
        return index.entries[k];
    }
    let m = k - PTRS_PER_INDEX;
    let i = m / PTRS_PER_INDEX;
    let j = m % PTRS_PER_INDEX;
    let outer = read_index(cache, dinode.double_indirect);
    let inner = read_index(cache, outer.entries[i]);
    inner.entries[j]
}

fn sectors_for_length(length: i32) -> usize {
    ((length.max(0) as usize) + SECTOR_SIZE - 1) / SECTOR_SIZE
}

/// `inode_create`: allocates the inode sector's data/index sectors for
/// `length` bytes and writes the inode metadata sector.
pub fn create(
    cache: &BufferCache,
    free_map: &FreeMap,
    sector: SectorId,
    length: i32,
    is_dir: bool,
) -> FsResult<()> {
    let mut dinode = Dinode::new(length, is_dir);
    let sectors = sectors_for_length(length);
    for k in 0..sectors {
        allocate_sector_for_index(cache, free_map, &mut dinode, k)?;
    }
    write_dinode(cache, sector, &dinode);
    Ok(())
}

/// `inode_length`.
pub fn length(cache: &BufferCache, inode: &Inode) -> i32 {
    read_dinode(cache, inode.sector()).length
}

/// `inode_is_dir`.
pub fn is_dir(cache: &BufferCache, inode: &Inode) -> bool {
    read_dinode(cache, inode.sector()).is_dir()
}

/// `inode_get_inumber`.
pub fn get_inumber(inode: &Inode) -> SectorId {
    inode.sector()
}

/// `inode_read_at`: copies up to `dst.len()` bytes starting at `offset`,
/// returning the number actually read (short on EOF). Holds `extend_lock`
/// for the duration.
pub fn read_at(cache: &BufferCache, inode: &Inode, dst: &mut [u8], offset: usize) -> usize {
    let _guard = inode.state.extend_lock.lock().unwrap();
    let dinode = read_dinode(cache, inode.sector());
    let file_len = dinode.length.max(0) as usize;
    if offset >= file_len {
        return 0;
    }
    let want = dst.len().min(file_len - offset);
    let mut done = 0;
    while done < want {
        let k = (offset + done) / SECTOR_SIZE;
        let sector_off = (offset + done) % SECTOR_SIZE;
        let chunk = (SECTOR_SIZE - sector_off).min(want - done);
        let data_sector = sector_for_index(cache, &dinode, k);
        cache.bc_read(data_sector, dst, done, sector_off, chunk);
        done += chunk;

        let next_k = k + 1;
        if (offset + done) < file_len && next_k < sectors_for_length(dinode.length) {
            cache.enqueue_read_ahead(sector_for_index(cache, &dinode, next_k));
        }
    }
    done
}

/// `inode_write_at`: grows the file first if the write extends past EOF
/// first, then copies `src` through the buffer cache sector by sector.
/// Returns 0 without writing anything while a deny-write is outstanding.
pub fn write_at(
    cache: &BufferCache,
    free_map: &FreeMap,
    inode: &Inode,
    src: &[u8],
    offset: usize,
) -> FsResult<usize> {
    if inode.write_denied() {
        return Ok(0);
    }
    if src.is_empty() {
        return Ok(0);
    }

    let _guard = inode.state.extend_lock.lock().unwrap();
    let mut dinode = read_dinode(cache, inode.sector());
    let old_length = dinode.length.max(0) as usize;
    let write_end = offset + src.len();

    if write_end > old_length {
        let old_sectors = sectors_for_length(dinode.length);
        let new_sectors = sectors_for_length(write_end as i32);
        for k in old_sectors..new_sectors {
            allocate_sector_for_index(cache, free_map, &mut dinode, k)?;
        }
        dinode.length = write_end as i32;
        write_dinode(cache, inode.sector(), &dinode);
    }

    let mut done = 0;
    while done < src.len() {
        let k = (offset + done) / SECTOR_SIZE;
        let sector_off = (offset + done) % SECTOR_SIZE;
        let chunk = (SECTOR_SIZE - sector_off).min(src.len() - done);
        let data_sector = sector_for_index(cache, &dinode, k);
        cache.bc_write(data_sector, src, done, sector_off, chunk);
        done += chunk;

        let next_k = k + 1;
        if next_k < sectors_for_length(dinode.length) {
            cache.enqueue_read_ahead(sector_for_index(cache, &dinode, next_k));
        }
    }
    Ok(done)
}

/// Walks exactly the index range that allocation would have reached for
/// the inode's current `length`, releasing every data and index sector,
/// then the inode sector itself.
fn free_inode_sectors(cache: &BufferCache, free_map: &FreeMap, sector: SectorId) {
    let dinode = read_dinode(cache, sector);
    let sectors = sectors_for_length(dinode.length);

    for k in 0..sectors.min(DIRECT_COUNT) {
        free_map.release(cache, dinode.direct[k], 1);
    }

    if sectors > DIRECT_COUNT {
        let indirect_used = (sectors - DIRECT_COUNT).min(PTRS_PER_INDEX);
        let index = read_index(cache, dinode.indirect);
        for entry in index.entries.iter().take(indirect_used) {
            free_map.release(cache, *entry, 1);
        }
        free_map.release(cache, dinode.indirect, 1);
    }

    if sectors > DIRECT_COUNT + PTRS_PER_INDEX {
        let remaining = sectors - DIRECT_COUNT - PTRS_PER_INDEX;
        let outer_used = (remaining + PTRS_PER_INDEX - 1) / PTRS_PER_INDEX;
        let outer = read_index(cache, dinode.double_indirect);
        for (i, inner_sector) in outer.entries.iter().take(outer_used).enumerate() {
            let inner = read_index(cache, *inner_sector);
            let used_here = (remaining - i * PTRS_PER_INDEX).min(PTRS_PER_INDEX);
            for entry in inner.entries.iter().take(used_here) {
                free_map.release(cache, *entry, 1);
            }
            free_map.release(cache, *inner_sector, 1);
        }
        free_map.release(cache, dinode.double_indirect, 1);
    }

    free_map.release(cache, sector, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use std::sync::Arc;

    fn setup(num_sectors: u32) -> (BufferCache, FreeMap, InodeTable) {
        let cache = BufferCache::bc_init(Arc::new(MemBlockDevice::new(num_sectors)));
        let free_map = FreeMap::init(num_sectors);
        free_map.mark_used(&[0, 1]);
        (cache, free_map, InodeTable::new())
    }

    #[test]
    fn create_then_read_zero_filled() {
        let (cache, free_map, table) = setup(64);
        create(&cache, &free_map, 2, 300, false).unwrap();
        let inode = table.open(2);
        let mut dst = [0xFFu8; 300];
        let n = read_at(&cache, &inode, &mut dst, 0);
        assert_eq!(n, 300);
        assert_eq!(dst, [0u8; 300]);
    }

    #[test]
    fn write_then_read_round_trip() {
        let (cache, free_map, table) = setup(64);
        create(&cache, &free_map, 2, 0, false).unwrap();
        let inode = table.open(2);
        let src = [0x5Au8; 200];
        write_at(&cache, &free_map, &inode, &src, 0).unwrap();
        assert_eq!(length(&cache, &inode), 200);
        let mut dst = [0u8; 200];
        read_at(&cache, &inode, &mut dst, 0);
        assert_eq!(dst, src);
    }

    #[test]
    fn grow_on_write_zeroes_the_gap() {
        let (cache, free_map, table) = setup(64);
        create(&cache, &free_map, 2, 100, false).unwrap();
        let inode = table.open(2);
        write_at(&cache, &free_map, &inode, &[7u8; 100], 1000).unwrap();
        assert_eq!(length(&cache, &inode), 1100);

        let mut gap = [0xFFu8; 900];
        read_at(&cache, &inode, &mut gap, 100);
        assert_eq!(gap, [0u8; 900]);

        let mut tail = [0u8; 100];
        read_at(&cache, &inode, &mut tail, 1000);
        assert_eq!(tail, [7u8; 100]);
    }

    #[test]
    fn crosses_indirect_boundary() {
        let (cache, free_map, table) = setup(400);
        create(&cache, &free_map, 2, 0, false).unwrap();
        let inode = table.open(2);
        let len = DIRECT_COUNT * SECTOR_SIZE + 1000;
        let src: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        write_at(&cache, &free_map, &inode, &src, 0).unwrap();

        let dinode = read_dinode(&cache, 2);
        assert_ne!(dinode.indirect, SECTOR_NONE);
        assert_eq!(dinode.double_indirect, SECTOR_NONE);

        let index = read_index(&cache, dinode.indirect);
        let allocated = index.entries.iter().filter(|&&e| e != SECTOR_NONE).count();
        assert_eq!(allocated, 2, "exactly two indirect entries should be allocated");

        let mut dst = vec![0u8; len];
        read_at(&cache, &inode, &mut dst, 0);
        assert_eq!(dst, src);
    }

    #[test]
    fn reopen_shares_open_count() {
        let (_cache, _free_map, table) = setup(64);
        let inode = table.open(2);
        let inode2 = inode.clone();
        assert_eq!(*inode.state.open_count.lock().unwrap(), 2);
        drop(inode2);
    }

    #[test]
    fn deny_write_blocks_writes() {
        let (cache, free_map, table) = setup(64);
        create(&cache, &free_map, 2, 0, false).unwrap();
        let inode = table.open(2);
        inode.deny_write();
        let n = write_at(&cache, &free_map, &inode, &[1u8; 10], 0).unwrap();
        assert_eq!(n, 0);
        inode.allow_write();
        let n = write_at(&cache, &free_map, &inode, &[1u8; 10], 0).unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn close_after_remove_frees_sectors() {
        let (cache, free_map, table) = setup(64);
        create(&cache, &free_map, 2, 512, false).unwrap();
        let used_before = free_map.count_used();
        let inode = table.open(2);
        table.remove(&inode);
        table.close(&cache, &free_map, inode);
        assert_eq!(free_map.count_used(), used_before - 2); // inode sector + 1 data sector
    }
}
