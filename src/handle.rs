//! Directory handles: a scoped-acquisition wrapper around an inflated
//! directory's inode and its single data block. Exists from `opendir` to
//! `closedir`; §5 requires every handle be closed explicitly, since
//! there's no finalizer on-disk side to release anything.

use log::warn;

use crate::block::BlockDevice;
use crate::cache::MetadataCache;
use crate::dirent::{self, DirEntry, DirIter};
use crate::error::Result;
use crate::inode::{self, Inode, InodeType};

pub struct DirHandle {
    pub inode_id: u32,
    pub inode: Inode,
    buf: Vec<u8>,
    pub cursor: usize,
    closed: bool,
}

impl DirHandle {
    /// Inflates a directory handle: reads its inode, allocates a
    /// block-sized buffer, and whole-file-reads its (at most one) block.
    pub fn inflate(dev: &mut dyn BlockDevice, cache: &MetadataCache, inode_id: u32) -> Result<Self> {
        let inode = inode::inode_read(dev, cache, inode_id)?;
        let block_size = dev.block_size();
        let mut buf = vec![0u8; block_size.max(inode.blocks as usize * block_size)];
        if inode.blocks > 0 {
            inode::llread(dev, &inode, &mut buf)?;
        }
        Ok(Self {
            inode_id,
            inode,
            buf,
            cursor: 0,
            closed: false,
        })
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn iter(&self) -> DirIter<'_> {
        DirIter::new(&self.buf, self.inode.size)
    }

    pub fn find(&self, name: &str) -> Option<DirEntry> {
        self.iter().find(|e| e.name == name)
    }

    /// Appends a new child entry, growing the directory's single block if
    /// this is its first entry beyond `.`/`..`, and persists both the
    /// block and the (now larger) inode.
    pub fn append_child(
        &mut self,
        dev: &mut dyn BlockDevice,
        cache: &mut MetadataCache,
        child_inode: u32,
        file_type: InodeType,
        name: &str,
        now: u64,
    ) -> Result<()> {
        let block_size = dev.block_size();
        if self.inode.blocks == 0 {
            inode::ensure_blocks(dev, cache, &mut self.inode, 1)?;
            self.buf = vec![0u8; block_size];
        }
        let new_size = dirent::append(
            &mut self.buf,
            block_size,
            self.inode.size,
            child_inode,
            file_type,
            name,
        )?;
        self.inode.size = new_size;
        self.inode.modified = now;
        self.persist(dev, cache)
    }

    /// Removes the entry named `name`, compacting the remaining bytes and
    /// shrinking `size` by the removed entry's length. Returns the
    /// removed entry.
    pub fn remove_child(
        &mut self,
        dev: &mut dyn BlockDevice,
        cache: &mut MetadataCache,
        name: &str,
        now: u64,
    ) -> Result<DirEntry> {
        let entry = self.find(name).ok_or(crate::error::Error::NoEnt)?;
        let start = entry.offset;
        let end = start + entry.entry_len;
        let size = self.inode.size as usize;
        self.buf.copy_within(end..size, start);
        self.inode.size -= entry.entry_len as u32;
        self.inode.modified = now;
        self.persist(dev, cache)?;
        Ok(entry)
    }

    /// Writes the handle's current inode and (if any) data block back to
    /// the device.
    pub fn persist(&self, dev: &mut dyn BlockDevice, cache: &MetadataCache) -> Result<()> {
        if self.inode.blocks > 0 {
            inode::llwrite(dev, &self.inode, &self.buf)?;
        }
        inode::inode_write(dev, cache, self.inode_id, &self.inode)
    }

    /// Marks the handle closed. The buffer is dropped with it; there is
    /// nothing further to release on disk.
    pub fn close(mut self) {
        self.closed = true;
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && !self.closed {
            warn!(
                "directory handle for inode {} dropped without close",
                self.inode_id
            );
        }
    }
}
