//! `blockfs`: a small block-based filesystem that stores an entire
//! hierarchical namespace inside a single fixed-size container.
//!
//! The core is four coupled subsystems — the block/inode allocator, inode
//! block addressing (direct + single-indirect), the directory codec, and
//! the whole-file-buffered fd layer — wired together by [`volume::Volume`],
//! which replaces the process-wide globals of the design this crate is
//! modeled on with one owned value.

pub mod bitmap;
pub mod block;
pub mod cache;
pub mod dirent;
pub mod error;
pub mod fd;
pub mod handle;
pub mod inode;
mod namespace;
pub mod param;
pub mod path;
pub mod superblock;
pub mod volume;

pub use block::{BlockDevice, FileBlockDevice, MemBlockDevice};
pub use error::{Error, Result};
pub use fd::FdMode;
pub use superblock::VolumeParams;
pub use volume::{MountState, Volume};
