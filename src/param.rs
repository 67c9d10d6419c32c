//! Fixed constants shared across the file-system core.

/// Size in bytes of one disk sector. All device I/O and cache frames are
/// measured in units of this size.
pub const SECTOR_SIZE: usize = 512;

/// Number of frames in the buffer cache.
pub const NUM_FRAMES: usize = 64;

/// Number of direct data-sector pointers in an on-disk inode.
pub const DIRECT_COUNT: usize = 123;

/// Number of `SectorId` entries held by a single indirect/double-indirect
/// index sector (`SECTOR_SIZE / size_of::<u32>()`).
pub const PTRS_PER_INDEX: usize = 128;

/// Largest sector index reachable through an inode's direct, indirect, and
/// double-indirect pointer tables: `123 + 128 + 128*128`.
pub const MAX_FILE_SECTORS: usize =
    DIRECT_COUNT + PTRS_PER_INDEX + PTRS_PER_INDEX * PTRS_PER_INDEX;

/// Largest byte offset (exclusive) addressable within a file.
pub const MAX_FILE_SIZE: usize = MAX_FILE_SECTORS * SECTOR_SIZE;

/// Magic value stamped into every on-disk inode sector.
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// Sector holding the free-map's own inode.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the root directory's inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Maximum length, in bytes, of a single path component stored in a
/// directory entry.
pub const NAME_MAX: usize = 14;

/// Depth of the read-ahead request queue.
pub const READ_AHEAD_QUEUE_DEPTH: usize = NUM_FRAMES;
