//! File-descriptor layer: `creat`/`open`/`read`/`write`/`seek`/`close`
//! over a whole-file RAM cache, plus the fd table and fd bitmap (§4.6).
//!
//! Every fd owns an independent copy of its inode and an independent
//! buffer; two fds opened on the same inode do not share a cache (§3).

use log::{debug, trace, warn};

use crate::bitmap::{clear_bitmap, find_free_bit, set_bitmap};
use crate::error::{Error, Result};
use crate::handle::DirHandle;
use crate::inode::{self, Inode, InodeType};
use crate::volume::{now_secs, Volume};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FdMode {
    Read,
    Write,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FdState {
    Free,
    Read,
    Write,
}

pub struct FdEntry {
    state: FdState,
    inode_id: u32,
    inode: Inode,
    cursor: u32,
    buf: Vec<u8>,
}

impl FdEntry {
    fn free() -> Self {
        Self {
            state: FdState::Free,
            inode_id: 0,
            inode: Inode::new_file(0),
            cursor: 0,
            buf: Vec::new(),
        }
    }
}

impl Volume {
    /// Splits an absolute or cwd-relative path into its parent directory
    /// handle and final-segment name, à la `nameiparent`.
    pub fn resolve_parent(&mut self, path: &str) -> Result<(DirHandle, String)> {
        let segs = crate::path::segments(path);
        let name = segs.last().ok_or(Error::Inval)?.to_string();
        let parent_path = if crate::path::is_absolute(path) {
            format!("/{}", segs[..segs.len() - 1].join("/"))
        } else {
            segs[..segs.len() - 1].join("/")
        };
        let parent = self.resolve_dir(&parent_path)?;
        Ok((parent, name))
    }

    /// `creat(dir, name)`: appends a FILE entry to `dir` and allocates an
    /// inode for it. Fails with `EEXIST` if the name is already present.
    pub fn creat(&mut self, dir: &mut DirHandle, name: &str) -> Result<u32> {
        if dir.find(name).is_some() {
            return Err(Error::Exist);
        }
        let now = now_secs();
        let (dev, cache) = self.device_cache_mut()?;
        let iptr = cache.reserve_inode(dev)?;
        if iptr == 0 {
            return Err(Error::NoSpc);
        }
        let file = Inode::new_file(now);
        inode::inode_write(dev, cache, iptr, &file)?;

        let (dev, cache) = self.device_cache_mut()?;
        dir.append_child(dev, cache, iptr, InodeType::File, name, now)?;
        debug!("creat: {name} -> inode {iptr}");
        Ok(iptr)
    }

    /// `open(dir, name, mode)`: allocates the lowest-index free fd.
    /// With `mode == Write` and a missing name, `creat`s it first.
    pub fn open(&mut self, dir: &mut DirHandle, name: &str, mode: FdMode) -> Result<i32> {
        let entry = match dir.find(name) {
            Some(e) => e,
            None if mode == FdMode::Write => {
                let iptr = self.creat(dir, name)?;
                dir.find(name).filter(|e| e.inode == iptr).ok_or(Error::NoEnt)?
            }
            None => return Err(Error::NoEnt),
        };

        let fd_index = find_free_bit(self.fd_bitmap_mut(), self.max_fd() as u32)
            .ok_or(Error::NoSpc)? as usize;
        set_bitmap(self.fd_bitmap_mut(), fd_index as u32);

        let (dev, cache) = self.device_cache_mut()?;
        let inode = inode::inode_read(dev, cache, entry.inode)?;
        let mut buf = Vec::new();
        if inode.blocks > 0 {
            buf = vec![0u8; inode.blocks as usize * dev.block_size()];
            inode::llread(dev, &inode, &mut buf)?;
        }

        let state = match mode {
            FdMode::Read => FdState::Read,
            FdMode::Write => FdState::Write,
        };
        let inode_id = entry.inode;
        let new_entry = FdEntry {
            state,
            inode_id,
            inode,
            cursor: 0,
            buf,
        };

        let table = self.fd_table_mut();
        while table.len() <= fd_index {
            table.push(FdEntry::free());
        }
        table[fd_index] = new_entry;
        debug!("open: fd {fd_index} -> inode {inode_id} ({mode:?})");
        Ok(fd_index as i32)
    }

    fn fd_entry(&mut self, fd: i32) -> Result<&mut FdEntry> {
        let fd = usize::try_from(fd).map_err(|_| Error::BadF)?;
        let entry = self.fd_table_mut().get_mut(fd).ok_or(Error::BadF)?;
        if entry.state == FdState::Free {
            return Err(Error::BadF);
        }
        Ok(entry)
    }

    /// `read(fd, buf, n)`: requires `state == Read`. Copies
    /// `min(n, size - (cursor + 1))` bytes — the off-by-one at EOF is
    /// preserved as specified (§9).
    pub fn read(&mut self, fd: i32, out: &mut [u8]) -> Result<usize> {
        let n = out.len();
        let entry = self.fd_entry(fd)?;
        if entry.state != FdState::Read {
            return Err(Error::Access);
        }
        let size = entry.inode.size as i64;
        let cursor = entry.cursor as i64;
        let remaining = size - (cursor + 1);
        if remaining <= 0 {
            return Ok(0);
        }
        let to_copy = n.min(remaining as usize);
        let start = entry.cursor as usize;
        out[..to_copy].copy_from_slice(&entry.buf[start..start + to_copy]);
        entry.cursor += to_copy as u32;
        trace!("read: fd {fd} copied {to_copy} bytes");
        Ok(to_copy)
    }

    /// Shared growth routine backing `seek` and `write`: preserves the
    /// `cursor + delta` (rather than purely-absolute) sizing rule of §9.
    fn grow_to(&mut self, fd: i32, required_size: u32) -> Result<()> {
        let block_size = self.block_size();
        let inode_id = {
            let entry = self.fd_entry(fd)?;
            if required_size <= entry.inode.size {
                return Ok(());
            }
            entry.inode_id
        };

        let required_blocks = required_size as usize / block_size + 1;
        let new_len = required_blocks * block_size;

        let mut inode = {
            let entry = self.fd_entry(fd)?;
            if entry.buf.len() < new_len {
                entry.buf.resize(new_len, 0);
            }
            entry.inode
        };

        if (inode.blocks as usize) < required_blocks {
            let (dev, cache) = self.device_cache_mut()?;
            if let Err(e) = inode::ensure_blocks(dev, cache, &mut inode, required_blocks as u32) {
                warn!("grow_to: fd {fd} failed to grow to {required_blocks} blocks: {e}");
                return Err(e);
            }
        }

        let now = now_secs();
        inode.size = required_size;
        inode.modified = now;

        let (dev, cache) = self.device_cache_mut()?;
        inode::inode_write(dev, cache, inode_id, &inode)?;

        let entry = self.fd_entry(fd)?;
        entry.inode = inode;
        Ok(())
    }

    /// `seek(fd, offset)`: grows as needed (§9's `cursor + offset` rule),
    /// then sets the cursor to `offset`.
    pub fn seek(&mut self, fd: i32, offset: u32) -> Result<()> {
        let cursor = self.fd_entry(fd)?.cursor;
        let required_size = cursor + offset;
        self.grow_to(fd, required_size)?;
        self.fd_entry(fd)?.cursor = offset;
        Ok(())
    }

    /// `write(fd, buf, n)`: requires `state == Write`. Grows, copies,
    /// advances the cursor, and whole-file-writes the buffer back.
    pub fn write(&mut self, fd: i32, data: &[u8]) -> Result<usize> {
        if self.fd_entry(fd)?.state != FdState::Write {
            return Err(Error::Access);
        }
        let n = data.len() as u32;
        let cursor = self.fd_entry(fd)?.cursor;
        let required_size = cursor + n;
        self.grow_to(fd, required_size)?;

        let entry = self.fd_entry(fd)?;
        let start = entry.cursor as usize;
        entry.buf[start..start + data.len()].copy_from_slice(data);
        entry.cursor += n;
        let inode = entry.inode;
        let buf = entry.buf.clone();

        let dev = self.device_mut();
        inode::llwrite(dev, &inode, &buf)?;
        trace!("write: fd {fd} wrote {} bytes", data.len());
        Ok(data.len())
    }

    /// `close(fd)`: frees the buffer and the fd bitmap slot.
    pub fn close(&mut self, fd: i32) -> Result<()> {
        let idx = usize::try_from(fd).map_err(|_| Error::BadF)?;
        {
            let entry = self.fd_table_mut().get_mut(idx).ok_or(Error::BadF)?;
            if entry.state == FdState::Free {
                return Err(Error::BadF);
            }
            *entry = FdEntry::free();
        }
        clear_bitmap(self.fd_bitmap_mut(), idx as u32);
        debug!("close: fd {fd}");
        Ok(())
    }

    /// CLI-level convenience: `creat PATH`.
    pub fn creat_path(&mut self, path: &str) -> Result<()> {
        let (mut dir, name) = self.resolve_parent(path)?;
        let result = self.creat(&mut dir, &name);
        dir.close();
        result.map(|_| ())
    }

    /// CLI-level convenience: `open PATH MODE -> fd`.
    pub fn open_path(&mut self, path: &str, mode: FdMode) -> Result<i32> {
        let (mut dir, name) = self.resolve_parent(path)?;
        let result = self.open(&mut dir, &name, mode);
        dir.close();
        result
    }

    /// `cat PATH -> BYTES`: reads a whole file in one call, straight out of
    /// the fd's whole-file buffer. This bypasses `read`'s off-by-one at EOF
    /// (§9) deliberately — `cat`, like `import`/`export`, reads the file's
    /// full content in one shot (§4.7), it is not built on top of `read`.
    pub fn cat(&mut self, path: &str) -> Result<Vec<u8>> {
        let fd = self.open_path(path, FdMode::Read)?;
        let entry = self.fd_entry(fd)?;
        let size = (entry.inode.size as usize).min(entry.buf.len());
        let out = entry.buf[..size].to_vec();
        self.close(fd)?;
        Ok(out)
    }
}
