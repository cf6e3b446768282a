//! Inodes: the on-disk record (`Dinode`) and the block-addressing layer
//! that maps a file's logical block index to a device block id, growing
//! the file through direct then single-indirect pointers.
//!
//! A directory and a regular file are both just an inode plus a sequence
//! of owned blocks; §4.3 (`dirent`) interprets a directory's bytes, this
//! module only knows about block ids.

use log::trace;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::block::BlockDevice;
use crate::cache::MetadataCache;
use crate::error::{Error, Result};
use crate::param::NDIRECT;

/// Size in bytes of the on-disk inode record.
pub const DINODE_SIZE: usize = std::mem::size_of::<RawDinode>();

const_assert!(std::mem::size_of::<RawDinode>() % 4 == 0);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum InodeType {
    Free = 0,
    File = 1,
    Dir = 2,
}

impl InodeType {
    fn from_u8(v: u8) -> InodeType {
        match v {
            1 => InodeType::File,
            2 => InodeType::Dir,
            _ => InodeType::Free,
        }
    }
}

/// On-disk inode layout. `repr(C)` because this is a wire format shared
/// verbatim with the inode-table port.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
struct RawDinode {
    typ: u8,
    _pad: [u8; 3],
    size: u32,
    modified: u64,
    blocks: u32,
    data0: [u32; NDIRECT],
    data1: u32,
}

/// The in-memory (and, bit for bit, on-disk) representation of an inode.
/// Owned independently by every fd and directory handle that inflates it.
#[derive(Copy, Clone, Debug)]
pub struct Inode {
    pub typ: InodeType,
    pub size: u32,
    pub modified: u64,
    pub blocks: u32,
    pub data0: [u32; NDIRECT],
    pub data1: u32,
}

impl Inode {
    pub fn new_dir(modified: u64) -> Self {
        Self {
            typ: InodeType::Dir,
            size: 0,
            modified,
            blocks: 0,
            data0: [0; NDIRECT],
            data1: 0,
        }
    }

    pub fn new_file(modified: u64) -> Self {
        Self {
            typ: InodeType::File,
            size: 0,
            modified,
            blocks: 0,
            data0: [0; NDIRECT],
            data1: 0,
        }
    }

    fn from_raw(raw: &RawDinode) -> Self {
        Self {
            typ: InodeType::from_u8(raw.typ),
            size: raw.size,
            modified: raw.modified,
            blocks: raw.blocks,
            data0: raw.data0,
            data1: raw.data1,
        }
    }

    fn to_raw(&self) -> RawDinode {
        RawDinode {
            typ: self.typ as u8,
            _pad: [0; 3],
            size: self.size,
            modified: self.modified,
            blocks: self.blocks,
            data0: self.data0,
            data1: self.data1,
        }
    }
}

/// Inodes per block for a given block size.
pub fn ipb(block_size: usize) -> usize {
    block_size / DINODE_SIZE
}

/// Inode-table port: reads the inode at slot `iptr`.
pub fn inode_read(dev: &mut dyn BlockDevice, cache: &MetadataCache, iptr: u32) -> Result<Inode> {
    let block_size = dev.block_size();
    let ipb = ipb(block_size);
    let block_id = cache.superblock.inode_block(iptr, ipb);
    let offset = cache.superblock.inode_offset(iptr, ipb, DINODE_SIZE);
    let mut block = vec![0u8; block_size];
    dev.read_block(block_id, &mut block)?;
    let raw = RawDinode::read_from(&block[offset..offset + DINODE_SIZE]).expect("aligned dinode");
    Ok(Inode::from_raw(&raw))
}

/// Inode-table port: writes `inode` into slot `iptr`.
pub fn inode_write(
    dev: &mut dyn BlockDevice,
    cache: &MetadataCache,
    iptr: u32,
    inode: &Inode,
) -> Result<()> {
    let block_size = dev.block_size();
    let ipb = ipb(block_size);
    let block_id = cache.superblock.inode_block(iptr, ipb);
    let offset = cache.superblock.inode_offset(iptr, ipb, DINODE_SIZE);
    let mut block = vec![0u8; block_size];
    dev.read_block(block_id, &mut block)?;
    let raw = inode.to_raw();
    block[offset..offset + DINODE_SIZE].copy_from_slice(raw.as_bytes());
    dev.write_block(block_id, &block)?;
    Ok(())
}

/// Maximum number of logical blocks a file may own for this block size.
pub fn maxfile(block_size: usize) -> usize {
    crate::param::maxfile(block_size)
}

/// Grows `inode`'s block set to own at least `n` blocks, reserving fresh
/// blocks as needed. Idempotent when `n <= inode.blocks`. See §4.2.
pub fn ensure_blocks(
    dev: &mut dyn BlockDevice,
    cache: &mut MetadataCache,
    inode: &mut Inode,
    n: u32,
) -> Result<()> {
    let block_size = dev.block_size();
    let nindirect = crate::param::nindirect(block_size);
    if n as usize > maxfile(block_size) {
        return Err(Error::FBig);
    }
    if n <= inode.blocks {
        return Ok(());
    }

    while (inode.blocks as usize) < NDIRECT.min(n as usize) {
        let id = cache.reserve_block(dev)?;
        if id == 0 {
            return Err(Error::NoSpc);
        }
        inode.data0[inode.blocks as usize] = id;
        inode.blocks += 1;
    }

    if (inode.blocks as usize) < n as usize {
        if inode.data1 == 0 {
            let id = cache.reserve_block(dev)?;
            if id == 0 {
                return Err(Error::NoSpc);
            }
            inode.data1 = id;
            let zero = vec![0u8; block_size];
            dev.write_block(inode.data1, &zero)?;
        }
        let mut indirect = vec![0u8; block_size];
        dev.read_block(inode.data1, &mut indirect)?;

        let lo = inode.blocks as usize - NDIRECT;
        let hi = n as usize - NDIRECT;
        debug_assert!(hi <= nindirect);
        for slot in lo..hi {
            let id = cache.reserve_block(dev)?;
            if id == 0 {
                dev.write_block(inode.data1, &indirect)?;
                return Err(Error::NoSpc);
            }
            indirect[slot * 4..slot * 4 + 4].copy_from_slice(&id.to_le_bytes());
            inode.blocks += 1;
        }
        dev.write_block(inode.data1, &indirect)?;
    }

    trace!("ensure_blocks: inode now owns {} blocks", inode.blocks);
    Ok(())
}

/// Returns the device block id owning logical block `i`, or 0 if `i` is
/// beyond the inode's currently-allocated block set.
fn block_at(
    dev: &mut dyn BlockDevice,
    inode: &Inode,
    i: usize,
) -> Result<u32> {
    if i < NDIRECT {
        return Ok(inode.data0[i]);
    }
    let slot = i - NDIRECT;
    if inode.data1 == 0 {
        return Ok(0);
    }
    let mut indirect = vec![0u8; dev.block_size()];
    dev.read_block(inode.data1, &mut indirect)?;
    Ok(u32::from_le_bytes(
        indirect[slot * 4..slot * 4 + 4].try_into().unwrap(),
    ))
}

/// Whole-file read: fills `buf` (at least `inode.blocks * block_size`
/// bytes) with every block the inode owns, in logical order.
pub fn llread(dev: &mut dyn BlockDevice, inode: &Inode, buf: &mut [u8]) -> Result<()> {
    let block_size = dev.block_size();
    debug_assert!(buf.len() >= inode.blocks as usize * block_size);
    for i in 0..inode.blocks as usize {
        let id = block_at(dev, inode, i)?;
        dev.read_block(id, &mut buf[i * block_size..(i + 1) * block_size])?;
    }
    Ok(())
}

/// Whole-file write: writes every block the inode owns from `buf` (at
/// least `inode.blocks * block_size` bytes) back to the device.
pub fn llwrite(dev: &mut dyn BlockDevice, inode: &Inode, buf: &[u8]) -> Result<()> {
    let block_size = dev.block_size();
    debug_assert!(buf.len() >= inode.blocks as usize * block_size);
    for i in 0..inode.blocks as usize {
        let id = block_at(dev, inode, i)?;
        dev.write_block(id, &buf[i * block_size..(i + 1) * block_size])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::superblock::{Superblock, VolumeParams};

    fn setup(block_count: u32) -> (MemBlockDevice, MetadataCache) {
        let params = VolumeParams {
            block_size: 512,
            block_count,
            inode_count: 16,
            max_fd: 8,
        };
        let sb = Superblock::fresh(&params, DINODE_SIZE);
        let dev = MemBlockDevice::new(512, block_count);
        let cache = MetadataCache::new(sb, vec![0u8; 512], vec![0u8; 512]);
        (dev, cache)
    }

    #[test]
    fn grows_direct_blocks_only() {
        let (mut dev, mut cache) = setup(64);
        let mut inode = Inode::new_file(0);
        ensure_blocks(&mut dev, &mut cache, &mut inode, 4).unwrap();
        assert_eq!(inode.blocks, 4);
        assert_eq!(inode.data1, 0);
        assert!(inode.data0[..4].iter().all(|&b| b != 0));
    }

    #[test]
    fn grows_past_direct_into_indirect() {
        let (mut dev, mut cache) = setup(64);
        let mut inode = Inode::new_file(0);
        ensure_blocks(&mut dev, &mut cache, &mut inode, 10).unwrap();
        assert_eq!(inode.blocks, 10);
        assert_ne!(inode.data1, 0);
        let b = block_at(&mut dev, &inode, 9).unwrap();
        assert_ne!(b, 0);
    }

    #[test]
    fn grow_is_idempotent_for_smaller_n() {
        let (mut dev, mut cache) = setup(64);
        let mut inode = Inode::new_file(0);
        ensure_blocks(&mut dev, &mut cache, &mut inode, 6).unwrap();
        let snapshot = inode.data0;
        ensure_blocks(&mut dev, &mut cache, &mut inode, 3).unwrap();
        assert_eq!(inode.data0, snapshot);
        assert_eq!(inode.blocks, 6);
    }

    #[test]
    fn past_maxfile_is_efbig() {
        let (mut dev, mut cache) = setup(64);
        let mut inode = Inode::new_file(0);
        let too_big = (maxfile(512) + 1) as u32;
        assert!(matches!(
            ensure_blocks(&mut dev, &mut cache, &mut inode, too_big),
            Err(Error::FBig)
        ));
    }

    #[test]
    fn inode_round_trips_through_table() {
        let (mut dev, mut cache) = setup(64);
        let mut inode = Inode::new_file(42);
        ensure_blocks(&mut dev, &mut cache, &mut inode, 2).unwrap();
        inode.size = 123;
        inode_write(&mut dev, &cache, 5, &inode).unwrap();
        let back = inode_read(&mut dev, &cache, 5).unwrap();
        assert_eq!(back.size, 123);
        assert_eq!(back.modified, 42);
        assert_eq!(back.data0, inode.data0);
        assert_eq!(back.typ, InodeType::File);
    }
}
