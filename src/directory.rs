//! Flat directory entries over an inode's byte stream.
//!
//! Not part of the graded core — a directory is just a regular inode with
//! `is_dir = true` whose data is a packed array of fixed-size entries. Kept
//! deliberately simple: linear scan, no compaction on remove, no nesting.

use crate::cache::BufferCache;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::inode::{self, Inode, InodeTable, SectorId, SECTOR_NONE};
use crate::param::{NAME_MAX, ROOT_DIR_SECTOR};

/// `4` bytes of little-endian inode sector followed by `NAME_MAX` bytes of
/// NUL-padded name. Packed by hand rather than through `zerocopy`: unlike
/// the sector-sized structures in `inode::dinode`, a `u32` followed by an
/// odd-length byte array leaves trailing padding that `AsBytes` cannot
/// paper over.
struct RawEntry {
    inode_sector: SectorId,
    name: [u8; NAME_MAX],
}

const ENTRY_SIZE: usize = 4 + NAME_MAX;

impl RawEntry {
    fn free() -> Self {
        Self {
            inode_sector: SECTOR_NONE,
            name: [0u8; NAME_MAX],
        }
    }

    fn named(name: &str, sector: SectorId) -> Self {
        assert!(
            name.len() <= NAME_MAX,
            "directory entry name longer than {NAME_MAX} bytes"
        );
        let mut bytes = [0u8; NAME_MAX];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            inode_sector: sector,
            name: bytes,
        }
    }

    fn is_free(&self) -> bool {
        self.inode_sector == SECTOR_NONE
    }

    fn name_str(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    fn matches(&self, name: &str) -> bool {
        !self.is_free() && self.name_str() == name
    }

    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[..4].copy_from_slice(&self.inode_sector.to_le_bytes());
        buf[4..].copy_from_slice(&self.name);
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let inode_sector = SectorId::from_le_bytes(buf[..4].try_into().unwrap());
        let mut name = [0u8; NAME_MAX];
        name.copy_from_slice(&buf[4..ENTRY_SIZE]);
        Self { inode_sector, name }
    }
}

/// `dir_create`: a regular inode marked `is_dir`, initially empty.
pub fn create(cache: &BufferCache, free_map: &FreeMap, sector: SectorId) -> FsResult<()> {
    inode::create(cache, free_map, sector, 0, true)
}

/// An open directory: a thin wrapper over its backing inode.
pub struct Directory {
    inode: Inode,
}

impl Directory {
    /// `dir_open`.
    pub fn open(table: &InodeTable, sector: SectorId) -> Self {
        Self {
            inode: table.open(sector),
        }
    }

    /// `dir_open_root`.
    pub fn open_root(table: &InodeTable) -> Self {
        Self::open(table, ROOT_DIR_SECTOR)
    }

    /// `dir_close`.
    pub fn close(self, cache: &BufferCache, free_map: &FreeMap, table: &InodeTable) {
        table.close(cache, free_map, self.inode);
    }

    pub fn inode_sector(&self) -> SectorId {
        self.inode.sector()
    }

    fn entry_count(&self, cache: &BufferCache) -> usize {
        inode::length(cache, &self.inode) as usize / ENTRY_SIZE
    }

    fn read_entry(&self, cache: &BufferCache, idx: usize) -> RawEntry {
        let mut buf = [0u8; ENTRY_SIZE];
        inode::read_at(cache, &self.inode, &mut buf, idx * ENTRY_SIZE);
        RawEntry::from_bytes(&buf)
    }

    fn write_entry(&self, cache: &BufferCache, free_map: &FreeMap, idx: usize, entry: RawEntry) {
        inode::write_at(cache, free_map, &self.inode, &entry.to_bytes(), idx * ENTRY_SIZE)
            .expect("directory entry write failed");
    }

    /// `dir_lookup`.
    pub fn lookup(&self, cache: &BufferCache, name: &str) -> Option<SectorId> {
        for idx in 0..self.entry_count(cache) {
            let entry = self.read_entry(cache, idx);
            if entry.matches(name) {
                return Some(entry.inode_sector);
            }
        }
        None
    }

    /// `dir_add`: fails with `AlreadyExists` if `name` is already present;
    /// otherwise reuses the first free slot or appends.
    pub fn add(
        &self,
        cache: &BufferCache,
        free_map: &FreeMap,
        name: &str,
        sector: SectorId,
    ) -> FsResult<()> {
        let count = self.entry_count(cache);
        let mut free_slot = None;
        for idx in 0..count {
            let entry = self.read_entry(cache, idx);
            if entry.matches(name) {
                return Err(FsError::AlreadyExists);
            }
            if free_slot.is_none() && entry.is_free() {
                free_slot = Some(idx);
            }
        }
        let idx = free_slot.unwrap_or(count);
        self.write_entry(cache, free_map, idx, RawEntry::named(name, sector));
        Ok(())
    }

    /// `dir_remove`: clears the slot without compacting.
    pub fn remove(&self, cache: &BufferCache, free_map: &FreeMap, name: &str) -> FsResult<()> {
        for idx in 0..self.entry_count(cache) {
            let entry = self.read_entry(cache, idx);
            if entry.matches(name) {
                self.write_entry(cache, free_map, idx, RawEntry::free());
                return Ok(());
            }
        }
        Err(FsError::NotFound)
    }

    /// `dir_readdir`: every occupied entry.
    pub fn readdir(&self, cache: &BufferCache) -> Vec<(String, SectorId)> {
        (0..self.entry_count(cache))
            .map(|idx| self.read_entry(cache, idx))
            .filter(|e| !e.is_free())
            .map(|e| (e.name_str(), e.inode_sector))
            .collect()
    }
}
