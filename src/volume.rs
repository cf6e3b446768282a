//! Host bridge: `mkfs`, `mount`, `umount`, `import`, `export`, and the
//! `Volume` value that replaces the process-wide globals of the original
//! design (§9) — one owned struct holding the metadata cache, the fd
//! table, and the cwd handle/path.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path as HostPath;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::block::BlockDevice;
use crate::cache::MetadataCache;
use crate::dirent;
use crate::error::{Error, Result};
use crate::fd::FdEntry;
use crate::handle::DirHandle;
use crate::inode::{self, Inode};
use crate::param::{BLOCK_BITMAP_ID, INODE_BITMAP_ID, ROOT_INODE, SUPER_BLOCK_ID};
use crate::superblock::{FsState, Superblock, VolumeParams};

/// Mount-time status of the volume (distinct from the on-disk `FsState`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MountState {
    Blank,
    Good,
    Error,
}

pub struct Volume {
    device: Box<dyn BlockDevice>,
    cache: Option<MetadataCache>,
    state: MountState,
    cwd: Option<DirHandle>,
    cwd_path: String,
    fd_table: Vec<FdEntry>,
    fd_bitmap: Vec<u8>,
    max_fd: usize,
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Volume {
    /// Wraps an already-open block device. The volume starts unmounted.
    pub fn new(device: Box<dyn BlockDevice>, max_fd: usize) -> Self {
        let fd_bitmap_bytes = max_fd.div_ceil(8).max(1);
        Self {
            device,
            cache: None,
            state: MountState::Blank,
            cwd: None,
            cwd_path: String::new(),
            fd_table: Vec::new(),
            fd_bitmap: vec![0u8; fd_bitmap_bytes],
            max_fd,
        }
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    pub fn block_size(&self) -> usize {
        self.device.block_size()
    }

    pub(crate) fn device_mut(&mut self) -> &mut dyn BlockDevice {
        self.device.as_mut()
    }

    pub fn cache(&self) -> Result<&MetadataCache> {
        self.cache.as_ref().ok_or(Error::NotMounted)
    }

    pub(crate) fn cache_mut(&mut self) -> Result<&mut MetadataCache> {
        self.cache.as_mut().ok_or(Error::NotMounted)
    }

    /// Splits the borrow of device and cache so both can be passed to a
    /// free function in the same call — `self.cache_mut()?.foo(self.device_mut())`
    /// does not borrow-check since both methods take `&mut self`.
    pub(crate) fn device_cache_mut(&mut self) -> Result<(&mut dyn BlockDevice, &mut MetadataCache)> {
        let Volume { device, cache, .. } = self;
        let cache = cache.as_mut().ok_or(Error::NotMounted)?;
        Ok((device.as_mut(), cache))
    }

    pub(crate) fn fd_table_mut(&mut self) -> &mut Vec<FdEntry> {
        &mut self.fd_table
    }

    pub(crate) fn fd_bitmap_mut(&mut self) -> &mut Vec<u8> {
        &mut self.fd_bitmap
    }

    pub(crate) fn max_fd(&self) -> usize {
        self.max_fd
    }

    pub(crate) fn cwd(&self) -> Result<&DirHandle> {
        self.cwd.as_ref().ok_or(Error::NotMounted)
    }

    pub(crate) fn cwd_mut(&mut self) -> Result<&mut DirHandle> {
        self.cwd.as_mut().ok_or(Error::NotMounted)
    }

    pub fn cwd_path(&self) -> &str {
        &self.cwd_path
    }

    pub(crate) fn set_cwd(&mut self, handle: DirHandle, path: String) {
        if let Some(old) = self.cwd.take() {
            old.close();
        }
        self.cwd = Some(handle);
        self.cwd_path = path;
    }

    /// Formats the container: superblock, both bitmaps, and a root inode
    /// containing `.`/`..` both pointing at inode 0.
    pub fn mkfs(device: &mut dyn BlockDevice, params: &VolumeParams) -> Result<()> {
        let block_size = device.block_size();
        let dinode_size = inode::DINODE_SIZE;
        let mut superblock = Superblock::fresh(params, dinode_size);

        let mut block_bitmap = vec![0u8; block_size];
        let mut inode_bitmap = vec![0u8; block_size];

        for id in 0..superblock.first_data_block {
            crate::bitmap::set_bitmap(&mut block_bitmap, id);
        }
        crate::bitmap::set_bitmap(&mut block_bitmap, superblock.first_data_block);
        superblock.free_block_count -= superblock.first_data_block + 1;

        crate::bitmap::set_bitmap(&mut inode_bitmap, ROOT_INODE);
        superblock.free_inode_count -= 1;

        let mut root = Inode::new_dir(now_secs());
        root.blocks = 1;
        root.data0[0] = superblock.first_data_block;
        let mut root_block = vec![0u8; block_size];
        root.size = dirent::init_dot_entries(&mut root_block, block_size, ROOT_INODE, ROOT_INODE);

        let cache = MetadataCache::new(superblock, block_bitmap, inode_bitmap);
        let mut sb_block = vec![0u8; block_size];
        cache.superblock.encode(&mut sb_block);
        device.write_block(SUPER_BLOCK_ID, &sb_block)?;
        device.write_block(BLOCK_BITMAP_ID, cache.block_bitmap())?;
        device.write_block(INODE_BITMAP_ID, cache.inode_bitmap())?;
        device.write_block(superblock.first_data_block, &root_block)?;
        inode::inode_write(device, &cache, ROOT_INODE, &root)?;

        info!(
            "mkfs: {} blocks, {} inodes, root at block {}",
            params.block_count, params.inode_count, superblock.first_data_block
        );
        Ok(())
    }

    /// Reads the superblock and both bitmaps into the cache. Containers
    /// with no magic, or whose on-disk state isn't `VALID` (left `ERROR`
    /// by an unclean unmount), mount as `MountState::Blank`; otherwise the
    /// volume is marked `ERROR` on disk until a clean `umount`.
    pub fn mount(&mut self) -> Result<()> {
        let block_size = self.device.block_size();
        let ipb = inode::ipb(block_size);
        let mut sb_block = vec![0u8; block_size];
        self.device.read_block(SUPER_BLOCK_ID, &mut sb_block)?;

        let superblock = match Superblock::decode(&sb_block, ipb, inode::DINODE_SIZE) {
            Ok(sb) => sb,
            Err(_) => {
                self.state = MountState::Blank;
                return Ok(());
            }
        };

        if superblock.state != FsState::Valid {
            warn!("mount: volume was left in ERROR state by an unclean unmount");
            self.state = MountState::Blank;
            return Ok(());
        }

        let mut block_bitmap = vec![0u8; block_size];
        self.device.read_block(BLOCK_BITMAP_ID, &mut block_bitmap)?;
        let mut inode_bitmap = vec![0u8; block_size];
        self.device.read_block(INODE_BITMAP_ID, &mut inode_bitmap)?;

        let mut cache = MetadataCache::new(superblock, block_bitmap, inode_bitmap);
        cache.superblock.state = FsState::Error;
        let device = self.device.as_mut();
        Self::flush_superblock(device, &cache)?;

        self.cache = Some(cache);
        self.state = MountState::Good;

        let Volume { device, cache, .. } = self;
        let cache = cache.as_ref().ok_or(Error::NotMounted)?;
        let root = DirHandle::inflate(device.as_mut(), cache, ROOT_INODE)?;
        self.set_cwd(root, "/".to_string());

        info!("mount: volume state GOOD");
        Ok(())
    }

    fn flush_superblock(device: &mut dyn BlockDevice, cache: &MetadataCache) -> Result<()> {
        let mut sb_block = vec![0u8; device.block_size()];
        cache.superblock.encode(&mut sb_block);
        device.write_block(SUPER_BLOCK_ID, &sb_block)
    }

    /// Closes the cwd handle, stamps `state = VALID`, and flushes metadata.
    pub fn umount(&mut self) -> Result<()> {
        if let Some(cwd) = self.cwd.take() {
            cwd.close();
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.superblock.state = FsState::Valid;
            Self::flush_superblock(self.device.as_mut(), cache)?;
        }
        self.state = MountState::Blank;
        self.cache = None;
        info!("umount: state restored to VALID");
        Ok(())
    }

    /// Reads `host` in full and writes it as the content of guest file
    /// `guest_path` (created if necessary). No streaming (§4.7).
    pub fn import(&mut self, host: impl AsRef<HostPath>, guest_path: &str) -> Result<()> {
        let mut data = Vec::new();
        File::open(host)?.read_to_end(&mut data)?;
        let fd = self.open_path(guest_path, crate::fd::FdMode::Write)?;
        let result = self.write(fd, &data);
        self.close(fd)?;
        result.map(|_| ())
    }

    /// Reads guest file `guest_path` in full and writes it to `host`.
    pub fn export(&mut self, guest_path: &str, host: impl AsRef<HostPath>) -> Result<()> {
        let data = self.cat(guest_path)?;
        File::create(host)?.write_all(&data)?;
        Ok(())
    }
}
