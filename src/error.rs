//! Error kinds for recoverable file-system conditions.
//!
//! Fatal conditions (`BadMagic`, device failure) are not represented here:
//! they panic at the point of discovery rather than unwind, matching a
//! kernel that has no way to recover from corrupt on-disk metadata.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// `free_map_allocate` could not find a long enough run of free sectors.
    OutOfSpace,
    /// An operation addressed a sector index beyond `MAX_FILE_SECTORS`.
    OutOfBounds,
    /// A name was not found by a directory lookup.
    NotFound,
    /// `dir_add`/`filesys_create` found the name already present.
    AlreadyExists,
    /// The inode's parent directory entry was removed; cached opens may
    /// still be serviced, but new lookups through the façade should fail.
    RemovedInode,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::OutOfSpace => "no free sectors available",
            FsError::OutOfBounds => "sector index beyond maximum file size",
            FsError::NotFound => "name not found",
            FsError::AlreadyExists => "name already exists",
            FsError::RemovedInode => "inode's directory entry was removed",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}

pub type FsResult<T> = Result<T, FsError>;
