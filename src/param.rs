//! Compile-time and default runtime parameters of the container layout.
//!
//! Mirrors the constants a real disk-based filesystem keeps in one place
//! (block size, block-id budget, table sizing) so the rest of the crate
//! never hard-codes a magic number.

/// Default block size in bytes. Containers built with other sizes are
/// legal; `VolumeParams` carries the effective value.
pub const BLOCK_SIZE: usize = 4096;

/// Number of direct block pointers held inline in an inode.
pub const NDIRECT: usize = 8;

/// Number of block ids that fit in a single indirect block.
pub const fn nindirect(block_size: usize) -> usize {
    block_size / 4
}

/// Maximum number of logical blocks a file can own: direct + single indirect.
pub const fn maxfile(block_size: usize) -> usize {
    NDIRECT + nindirect(block_size)
}

/// Fixed reserved block ids, in on-disk order.
pub const SUPER_BLOCK_ID: u32 = 0;
pub const BLOCK_BITMAP_ID: u32 = 1;
pub const INODE_BITMAP_ID: u32 = 2;
pub const INODE_TABLE_START: u32 = 3;

/// Default number of inodes when a caller doesn't size the container explicitly.
pub const DEFAULT_INODE_COUNT: u32 = 1024;

/// Default number of blocks in a freshly-made container (~16 MiB at 4096-byte blocks).
pub const DEFAULT_BLOCK_COUNT: u32 = 4096;

/// Default fd table size.
pub const DEFAULT_MAX_FD: usize = 128;

/// On-disk magic stamped by `mkfs` and checked by `mount`.
pub const MAGIC: u16 = 0xB10C;

/// Directory entries are padded up to this many bytes.
pub const DIRENT_ALIGN: usize = 4;

/// Fixed header size of a directory entry, before the variable-length name.
pub const DIRENT_HEADER_LEN: usize = 8;

/// Inode number of the root directory.
pub const ROOT_INODE: u32 = 0;
