//! Namespace operations: path resolution, `mkdir`/`rmdir`, `ls`/`stat`,
//! `cd`/`pwd`, and `tree` (§4.4, §4.5).

use log::debug;

use crate::dirent;
use crate::error::{Error, Result};
use crate::handle::DirHandle;
use crate::inode::{self, Inode, InodeType};
use crate::param::ROOT_INODE;
use crate::volume::{now_secs, Volume};

impl Volume {
    /// Resolves `path` (absolute or cwd-relative) to a fresh directory
    /// handle, walking one segment at a time à la `namex`. `ENOENT` on a
    /// missing component, `EINVAL` on a component that isn't a directory.
    pub fn resolve_dir(&mut self, path: &str) -> Result<DirHandle> {
        let segs = crate::path::segments(path);
        let start_id = if crate::path::is_absolute(path) {
            ROOT_INODE
        } else {
            self.cwd().map(|h| h.inode_id).unwrap_or(ROOT_INODE)
        };

        let (dev, cache) = self.device_cache_mut()?;
        let mut dir = DirHandle::inflate(dev, cache, start_id)?;

        for seg in segs {
            let entry = match dir.find(seg) {
                Some(e) => e,
                None => {
                    dir.close();
                    return Err(Error::NoEnt);
                }
            };
            if entry.file_type != InodeType::Dir {
                dir.close();
                return Err(Error::Inval);
            }
            let (dev, cache) = self.device_cache_mut()?;
            let next = DirHandle::inflate(dev, cache, entry.inode)?;
            dir.close();
            dir = next;
        }

        Ok(dir)
    }

    /// `mkdir(path)`: reserves an inode and a block for the new directory,
    /// writes its `.`/`..` entries, and links it into its parent.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let (mut parent, name) = self.resolve_parent(path)?;
        if parent.find(&name).is_some() {
            parent.close();
            return Err(Error::Exist);
        }

        let now = now_secs();
        let (dev, cache) = self.device_cache_mut()?;
        let child_iptr = cache.reserve_inode(dev)?;
        if child_iptr == 0 {
            parent.close();
            return Err(Error::NoSpc);
        }

        let mut child = Inode::new_dir(now);
        let (dev, cache) = self.device_cache_mut()?;
        if let Err(e) = inode::ensure_blocks(dev, cache, &mut child, 1) {
            cache.release_inode(dev, child_iptr)?;
            parent.close();
            return Err(e);
        }

        let block_size = self.block_size();
        let mut block = vec![0u8; block_size];
        child.size = dirent::init_dot_entries(&mut block, block_size, child_iptr, parent.inode_id);

        let dev = self.device_mut();
        inode::llwrite(dev, &child, &block)?;
        let (dev, cache) = self.device_cache_mut()?;
        inode::inode_write(dev, cache, child_iptr, &child)?;

        let (dev, cache) = self.device_cache_mut()?;
        let result = parent.append_child(dev, cache, child_iptr, InodeType::Dir, &name, now);
        parent.close();
        debug!("mkdir: {path} -> inode {child_iptr}");
        result
    }

    /// `rmdir(path)`: fails with `ENOTEMPTY` unless the target directory
    /// holds only its `.`/`..` entries, otherwise releases its block and
    /// inode and unlinks it from the parent.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let (mut parent, name) = self.resolve_parent(path)?;
        let entry = match parent.find(&name) {
            Some(e) => e,
            None => {
                parent.close();
                return Err(Error::NoEnt);
            }
        };
        if entry.file_type != InodeType::Dir {
            parent.close();
            return Err(Error::Inval);
        }

        let (dev, cache) = self.device_cache_mut()?;
        let child = DirHandle::inflate(dev, cache, entry.inode)?;
        if child.inode.size > 24 {
            child.close();
            parent.close();
            return Err(Error::NotEmpty);
        }
        let block_id = child.inode.data0[0];
        child.close();

        let now = now_secs();
        let (dev, cache) = self.device_cache_mut()?;
        if block_id != 0 {
            cache.release_block(dev, block_id)?;
        }
        cache.release_inode(dev, entry.inode)?;
        let result = parent.remove_child(dev, cache, &name, now);
        parent.close();
        debug!("rmdir: {path}");
        result.map(|_| ())
    }

    /// `ls(path)`: entry names of the directory at `path` (cwd if empty),
    /// `\n`-joined, including `.`/`..`.
    pub fn ls(&mut self, path: &str) -> Result<String> {
        let dir = self.resolve_dir(path)?;
        let names: Vec<String> = dir.iter().map(|e| e.name).collect();
        dir.close();
        let mut out = names.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        Ok(out)
    }

    /// `stat(dir, name)`: the inode id of `name` within an already-open
    /// directory handle.
    pub fn stat(&mut self, dir: &DirHandle, name: &str) -> Result<u32> {
        dir.find(name).map(|e| e.inode).ok_or(Error::NoEnt)
    }

    /// `cd(path)`: opendirs `path` and replaces the cwd handle. The cwd
    /// path string is stored literally, not joined against the previous
    /// cwd (§9 — preserved as specified).
    pub fn cd(&mut self, path: &str) -> Result<()> {
        let handle = self.resolve_dir(path)?;
        self.set_cwd(handle, path.to_string());
        Ok(())
    }

    /// `pwd`: the cached cwd path string.
    pub fn pwd(&self) -> String {
        self.cwd_path().to_string()
    }

    /// `tree`: depth-first walk from cwd, indenting 4 spaces per depth and
    /// printing `name`, a `F`/`D` flag, `size`, and `modified` for each
    /// entry. Skips `.`/`..`. Descends by opening each child directory in
    /// turn, every frame owning (and closing) its own handle.
    pub fn tree(&mut self) -> Result<String> {
        let root = self.cwd()?.inode_id;
        let mut out = String::new();
        self.tree_at(root, 0, &mut out)?;
        Ok(out)
    }

    fn tree_at(&mut self, inode_id: u32, depth: usize, out: &mut String) -> Result<()> {
        let (dev, cache) = self.device_cache_mut()?;
        let dir = DirHandle::inflate(dev, cache, inode_id)?;
        let entries: Vec<_> = dir.iter().filter(|e| e.name != "." && e.name != "..").collect();
        dir.close();

        for entry in entries {
            let (dev, cache) = self.device_cache_mut()?;
            let child = inode::inode_read(dev, cache, entry.inode)?;
            let flag = if entry.file_type == InodeType::Dir { 'D' } else { 'F' };
            out.push_str(&"    ".repeat(depth));
            out.push_str(&format!(
                "{} {} {} {}\n",
                entry.name,
                flag,
                child.size,
                format_modified(child.modified)
            ));
            if entry.file_type == InodeType::Dir {
                self.tree_at(entry.inode, depth + 1, out)?;
            }
        }
        Ok(())
    }
}

fn format_modified(secs: u64) -> String {
    format!("{secs}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::superblock::VolumeParams;

    fn mounted(block_count: u32, inode_count: u32) -> Volume {
        let params = VolumeParams {
            block_size: 512,
            block_count,
            inode_count,
            max_fd: 8,
        };
        let mut dev = MemBlockDevice::new(512, block_count);
        Volume::mkfs(&mut dev, &params).unwrap();
        let mut vol = Volume::new(Box::new(dev), 8);
        vol.mount().unwrap();
        vol
    }

    #[test]
    fn mkdir_then_ls_then_rmdir_round_trips() {
        let mut vol = mounted(64, 16);
        vol.mkdir("/a").unwrap();
        assert_eq!(vol.ls("/").unwrap(), ".\n..\na\n");
        vol.cd("/a").unwrap();
        assert_eq!(vol.pwd(), "/a");
        assert_eq!(vol.ls("").unwrap(), ".\n..\n");
        vol.cd("/").unwrap();
        vol.rmdir("a").unwrap();
        assert_eq!(vol.ls("/").unwrap(), ".\n..\n");
    }

    #[test]
    fn rmdir_nonempty_fails() {
        let mut vol = mounted(64, 16);
        vol.mkdir("/a").unwrap();
        vol.mkdir("/a/b").unwrap();
        assert!(matches!(vol.rmdir("/a"), Err(Error::NotEmpty)));
    }

    #[test]
    fn cd_stores_literal_path_without_joining() {
        let mut vol = mounted(64, 16);
        vol.mkdir("/a").unwrap();
        vol.cd("/a").unwrap();
        vol.cd("b").unwrap_err();
        vol.mkdir("b").unwrap();
        vol.cd("b").unwrap();
        assert_eq!(vol.pwd(), "b");
    }

    #[test]
    fn mkdir_rmdir_restores_bitmaps() {
        let mut vol = mounted(64, 16);
        let before_blocks = vol.cache().unwrap().block_bitmap().to_vec();
        let before_inodes = vol.cache().unwrap().inode_bitmap().to_vec();
        vol.mkdir("/a").unwrap();
        vol.rmdir("/a").unwrap();
        assert_eq!(vol.cache().unwrap().block_bitmap(), &before_blocks[..]);
        assert_eq!(vol.cache().unwrap().inode_bitmap(), &before_inodes[..]);
    }
}
