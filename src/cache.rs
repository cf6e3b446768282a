//! Metadata cache & allocator: the in-memory mirror of the superblock and
//! both bitmaps, plus `reserve`/`release` for blocks and inodes.
//!
//! Every reserve/release flushes all three cached blocks back to the
//! device before returning, per §4.1: there is no ordering requirement
//! across the three writes because the only concurrency is the single
//! caller, but all three must land before the call returns.

use log::{debug, trace};

use crate::bitmap::{clear_bitmap, find_free_bit, set_bitmap};
use crate::block::BlockDevice;
use crate::error::Result;
use crate::param::{BLOCK_BITMAP_ID, INODE_BITMAP_ID, SUPER_BLOCK_ID};
use crate::superblock::Superblock;

pub struct MetadataCache {
    pub superblock: Superblock,
    block_bitmap: Vec<u8>,
    inode_bitmap: Vec<u8>,
}

impl MetadataCache {
    pub fn new(superblock: Superblock, block_bitmap: Vec<u8>, inode_bitmap: Vec<u8>) -> Self {
        Self {
            superblock,
            block_bitmap,
            inode_bitmap,
        }
    }

    fn flush(&self, dev: &mut dyn BlockDevice) -> Result<()> {
        let block_size = dev.block_size();
        let mut buf = vec![0u8; block_size];
        self.superblock.encode(&mut buf);
        dev.write_block(SUPER_BLOCK_ID, &buf)?;
        dev.write_block(BLOCK_BITMAP_ID, &self.block_bitmap)?;
        dev.write_block(INODE_BITMAP_ID, &self.inode_bitmap)?;
        Ok(())
    }

    /// Reserves the lowest-index free block, returning 0 on exhaustion.
    pub fn reserve_block(&mut self, dev: &mut dyn BlockDevice) -> Result<u32> {
        if self.superblock.free_block_count == 0 {
            debug!("reserve_block: exhausted (free_block_count == 0)");
            return Ok(0);
        }
        let id = match find_free_bit(&self.block_bitmap, self.superblock.block_count) {
            Some(id) => id,
            None => return Ok(0),
        };
        set_bitmap(&mut self.block_bitmap, id);
        self.superblock.free_block_count -= 1;
        self.flush(dev)?;
        trace!(
            "reserve_block: allocated {id}, {} free remain",
            self.superblock.free_block_count
        );
        Ok(id)
    }

    pub fn release_block(&mut self, dev: &mut dyn BlockDevice, id: u32) -> Result<()> {
        clear_bitmap(&mut self.block_bitmap, id);
        self.superblock.free_block_count += 1;
        self.flush(dev)?;
        trace!(
            "release_block: freed {id}, {} free remain",
            self.superblock.free_block_count
        );
        Ok(())
    }

    /// Reserves the lowest-index free inode, returning 0 on exhaustion.
    pub fn reserve_inode(&mut self, dev: &mut dyn BlockDevice) -> Result<u32> {
        if self.superblock.free_inode_count == 0 {
            debug!("reserve_inode: exhausted (free_inode_count == 0)");
            return Ok(0);
        }
        let id = match find_free_bit(&self.inode_bitmap, self.superblock.inode_count) {
            Some(id) => id,
            None => return Ok(0),
        };
        set_bitmap(&mut self.inode_bitmap, id);
        self.superblock.free_inode_count -= 1;
        self.flush(dev)?;
        trace!(
            "reserve_inode: allocated {id}, {} free remain",
            self.superblock.free_inode_count
        );
        Ok(id)
    }

    pub fn release_inode(&mut self, dev: &mut dyn BlockDevice, iptr: u32) -> Result<()> {
        clear_bitmap(&mut self.inode_bitmap, iptr);
        self.superblock.free_inode_count += 1;
        self.flush(dev)?;
        trace!(
            "release_inode: freed {iptr}, {} free remain",
            self.superblock.free_inode_count
        );
        Ok(())
    }

    pub fn block_bitmap(&self) -> &[u8] {
        &self.block_bitmap
    }

    pub fn inode_bitmap(&self) -> &[u8] {
        &self.inode_bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::param::DEFAULT_INODE_COUNT;
    use crate::superblock::VolumeParams;

    fn fresh_cache() -> (MetadataCache, MemBlockDevice) {
        let params = VolumeParams {
            block_size: 512,
            block_count: 64,
            inode_count: 16,
            max_fd: 8,
        };
        let sb = Superblock::fresh(&params, 56);
        let cache = MetadataCache::new(sb, vec![0u8; 512], vec![0u8; 512]);
        let dev = MemBlockDevice::new(512, 64);
        let _ = DEFAULT_INODE_COUNT;
        (cache, dev)
    }

    #[test]
    fn reserve_then_release_restores_bitmap() {
        let (mut cache, mut dev) = fresh_cache();
        let before = cache.block_bitmap().to_vec();
        let id = cache.reserve_block(&mut dev).unwrap();
        assert_ne!(id, 0);
        cache.release_block(&mut dev, id).unwrap();
        assert_eq!(cache.block_bitmap(), &before[..]);
    }

    #[test]
    fn exhaustion_returns_zero() {
        let (mut cache, mut dev) = fresh_cache();
        cache.superblock.free_block_count = 0;
        assert_eq!(cache.reserve_block(&mut dev).unwrap(), 0);
    }

    #[test]
    fn popcount_matches_free_count_invariant() {
        let (mut cache, mut dev) = fresh_cache();
        let total = cache.superblock.block_count;
        for _ in 0..5 {
            cache.reserve_block(&mut dev).unwrap();
        }
        let used = crate::bitmap::popcount(cache.block_bitmap(), total);
        assert_eq!(used + cache.superblock.free_block_count, total);
    }
}
