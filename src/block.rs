//! Block-device port: `blk_read`/`blk_write` of fixed-size blocks.
//!
//! This is an external collaborator in the core's design: the core never
//! assumes anything about the backing store beyond whole-block, by-id
//! reads and writes. Two implementations are provided: an in-memory
//! buffer (used by tests and by embedders that don't need persistence)
//! and a host-file-backed one (used by the CLI).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;

/// Fixed-size block storage, addressed by block id.
pub trait BlockDevice {
    fn block_size(&self) -> usize;
    fn block_count(&self) -> u32;

    /// Reads block `id` in full into `buf`. `buf.len()` must equal `block_size()`.
    fn read_block(&mut self, id: u32, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf` in full to block `id`. `buf.len()` must equal `block_size()`.
    fn write_block(&mut self, id: u32, buf: &[u8]) -> Result<()>;
}

/// An in-memory block device backed by a flat `Vec<u8>`.
pub struct MemBlockDevice {
    block_size: usize,
    block_count: u32,
    data: Vec<u8>,
}

impl MemBlockDevice {
    pub fn new(block_size: usize, block_count: u32) -> Self {
        Self {
            block_size,
            block_count,
            data: vec![0u8; block_size * block_count as usize],
        }
    }

    fn offset(&self, id: u32) -> usize {
        id as usize * self.block_size
    }
}

impl BlockDevice for MemBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read_block(&mut self, id: u32, buf: &mut [u8]) -> Result<()> {
        let off = self.offset(id);
        buf.copy_from_slice(&self.data[off..off + self.block_size]);
        Ok(())
    }

    fn write_block(&mut self, id: u32, buf: &[u8]) -> Result<()> {
        let off = self.offset(id);
        self.data[off..off + self.block_size].copy_from_slice(buf);
        Ok(())
    }
}

/// A block device backed by a host file. `mkfs` preallocates the file to
/// `block_size * block_count` bytes; this type never grows the container.
pub struct FileBlockDevice {
    file: File,
    block_size: usize,
    block_count: u32,
}

impl FileBlockDevice {
    /// Creates (or truncates) a host file sized for a fresh container.
    pub fn create(path: impl AsRef<Path>, block_size: usize, block_count: u32) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_size as u64 * block_count as u64)?;
        Ok(Self {
            file,
            block_size,
            block_count,
        })
    }

    /// Opens an existing container file. `block_count` is derived from the
    /// file's length.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let block_count = (len / block_size as u64) as u32;
        Ok(Self {
            file,
            block_size,
            block_count,
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read_block(&mut self, id: u32, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(id as u64 * self.block_size as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&mut self, id: u32, buf: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(id as u64 * self.block_size as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_round_trips_a_block() {
        let mut dev = MemBlockDevice::new(512, 4);
        let mut block = vec![0xAB; 512];
        dev.write_block(2, &block).unwrap();
        block.fill(0);
        dev.read_block(2, &mut block).unwrap();
        assert!(block.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn file_device_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image");
        {
            let mut dev = FileBlockDevice::create(&path, 512, 4).unwrap();
            dev.write_block(1, &[7u8; 512]).unwrap();
        }
        let mut dev = FileBlockDevice::open(&path, 512).unwrap();
        let mut buf = vec![0u8; 512];
        dev.read_block(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 7));
    }
}
