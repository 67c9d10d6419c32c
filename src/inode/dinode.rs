//! The on-disk inode layout and the index-sector layout it points
//! into. Both are exactly one sector, byte-exact, with no padding left to
//! the compiler: `zerocopy` gives us safe transmutation to and from the
//! buffer cache's raw `[u8; 512]`, and `static_assertions` catches any
//! future field addition that would blow the size budget at compile time
//! rather than at the first corrupted mount.

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::param::{DIRECT_COUNT, INODE_MAGIC, PTRS_PER_INDEX, SECTOR_SIZE};

pub type SectorId = u32;
pub const SECTOR_NONE: SectorId = u32::MAX;

#[repr(C)]
#[derive(AsBytes, FromBytes, Debug, Clone, Copy)]
pub(crate) struct Dinode {
    pub length: i32,
    pub magic: u32,
    pub is_dir: u32,
    pub direct: [SectorId; DIRECT_COUNT],
    pub indirect: SectorId,
    pub double_indirect: SectorId,
}

const_assert_eq!(core::mem::size_of::<Dinode>(), SECTOR_SIZE);

impl Dinode {
    pub fn new(length: i32, is_dir: bool) -> Self {
        Self {
            length,
            magic: INODE_MAGIC,
            is_dir: is_dir as u32,
            direct: [SECTOR_NONE; DIRECT_COUNT],
            indirect: SECTOR_NONE,
            double_indirect: SECTOR_NONE,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let dinode = Self::read_from(buf).expect("sector-sized buffer");
        assert_eq!(dinode.magic, INODE_MAGIC, "on-disk inode has bad magic");
        dinode
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }
}

/// A single-indirect index sector: 128 little-endian sector ids.
#[repr(C)]
#[derive(AsBytes, FromBytes, Debug, Clone, Copy)]
pub(crate) struct IndexSector {
    pub entries: [SectorId; PTRS_PER_INDEX],
}

const_assert_eq!(core::mem::size_of::<IndexSector>(), SECTOR_SIZE);

impl IndexSector {
    pub fn empty() -> Self {
        Self {
            entries: [SECTOR_NONE; PTRS_PER_INDEX],
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Self::read_from(buf).expect("sector-sized buffer")
    }
}
