//! The top-level filesystem façade (supplemented component H): wires the
//! sector cache, free map, open-inode table, and directory layer together
//! behind the minimal syscall surface named in §6, and owns the
//! format/mount lifecycle grounded on the reference source's
//! `filesys_init`/`do_format`/`filesys_done`.

use std::sync::Arc;

use parking_lot::Mutex;
use sectorfs_device::{FreeMap, SectorDevice};

use crate::cache::{CacheStats, SectorCache};
use crate::dir::{self, DirEntry};
use crate::error::{Error, Result};
use crate::file;
use crate::inode;
use crate::table::{InCoreInode, OpenInodeTable};

/// The root directory's inode sector. Fixed across mounts per §6.
pub const ROOT_DIR_SECTOR: u32 = 1;
/// Reserved for the free-map file's inode in the persisted layout of §6.
/// This crate consumes `FreeMap` as an injected collaborator (§1) rather
/// than persisting the bitmap itself, so nothing is ever read from or
/// written to this sector directly — it exists so `format`'s `reserved`
/// count matches the layout the spec documents.
pub const FREE_MAP_SECTOR: u32 = 0;

/// An open file or directory. Holds its own seek cursor; `fd`-table
/// bookkeeping belongs to the process layer (§1, out of scope) and is not
/// modeled here.
pub struct FileHandle {
    inode: Arc<InCoreInode>,
    is_dir: bool,
    cursor: Mutex<u32>,
}

/// The file subsystem. Generic over the consumed device and free-map
/// collaborators so tests run against in-memory implementations and a real
/// mount runs against platform ones.
pub struct Filesystem<D: SectorDevice, F: FreeMap> {
    cache: SectorCache<D>,
    free_map: F,
    table: OpenInodeTable,
}

impl<D: SectorDevice, F: FreeMap> Filesystem<D, F> {
    /// Lay down a fresh filesystem: an empty root directory at
    /// [`ROOT_DIR_SECTOR`] whose `.` and `..` both point at itself.
    pub fn format(device: D, free_map: F, cache_capacity: usize) -> Self {
        let cache = SectorCache::new(device, cache_capacity);
        let table = OpenInodeTable::new();
        inode::create(&cache, ROOT_DIR_SECTOR);
        let root = table.open(ROOT_DIR_SECTOR);
        dir::init(&cache, &free_map, &root, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR);
        table.close(&cache, &free_map, root);
        #[cfg(feature = "log")]
        log::debug!("formatted filesystem, root directory at sector {ROOT_DIR_SECTOR}");
        Self { cache, free_map, table }
    }

    /// Mount an already-formatted device. Panics (§7's `CorruptInode` is
    /// fatal) if the root inode's magic doesn't check out.
    pub fn mount(device: D, free_map: F, cache_capacity: usize) -> Self {
        let cache = SectorCache::new(device, cache_capacity);
        inode::check_magic(&cache, ROOT_DIR_SECTOR);
        Self { cache, free_map, table: OpenInodeTable::new() }
    }

    /// Flush the cache to the device. Must be called before the underlying
    /// device goes away.
    pub fn shutdown(&self) {
        self.cache.flush();
    }

    fn resolve(&self, path: &str) -> Result<(u32, bool)> {
        if path.is_empty() || path == "/" {
            return Ok((ROOT_DIR_SECTOR, true));
        }
        let mut current = ROOT_DIR_SECTOR;
        let mut current_is_dir = true;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current_is_dir {
                return Err(Error::NotADirectory);
            }
            let dir = self.table.open(current);
            let found = dir::lookup(&self.cache, &dir, part);
            self.table.close(&self.cache, &self.free_map, dir);
            match found {
                Some((sector, is_dir)) => {
                    current = sector;
                    current_is_dir = is_dir;
                }
                None => return Err(Error::FileNotFound),
            }
        }
        Ok((current, current_is_dir))
    }

    fn split(path: &str) -> (String, String) {
        let trimmed = path.trim_end_matches('/');
        match trimmed.rsplit_once('/') {
            Some((parent, leaf)) => {
                let parent = if parent.is_empty() { "/" } else { parent };
                (parent.to_string(), leaf.to_string())
            }
            None => ("/".to_string(), trimmed.to_string()),
        }
    }

    /// `create(name, initial_size)`. Allocates a new, empty-or-sized file and
    /// links it into its parent directory.
    pub fn create(&self, path: &str, initial_size: u32) -> Result<()> {
        let (parent_path, leaf) = Self::split(path);
        let (parent_sector, parent_is_dir) = self.resolve(&parent_path)?;
        if !parent_is_dir {
            return Err(Error::NotADirectory);
        }
        let run = self.free_map.allocate(1).ok_or(Error::OutOfSpace)?;
        inode::create(&self.cache, run.start);
        if initial_size > 0 && !inode::resize(&self.cache, &self.free_map, run.start, initial_size) {
            self.free_map.release(run.start, 1);
            return Err(Error::OutOfSpace);
        }

        let parent = self.table.open(parent_sector);
        let new_inode = self.table.open(run.start);
        let result = dir::add(&self.cache, &self.free_map, &parent, &leaf, run.start, false);
        if result.is_err() {
            new_inode.mark_removed();
        }
        self.table.close(&self.cache, &self.free_map, new_inode);
        self.table.close(&self.cache, &self.free_map, parent);
        result
    }

    /// `mkdir(name)`. Allocates a new directory inode, installs `.`/`..`,
    /// and links it into its parent.
    pub fn mkdir(&self, path: &str) -> Result<()> {
        let (parent_path, leaf) = Self::split(path);
        let (parent_sector, parent_is_dir) = self.resolve(&parent_path)?;
        if !parent_is_dir {
            return Err(Error::NotADirectory);
        }
        let run = self.free_map.allocate(1).ok_or(Error::OutOfSpace)?;
        inode::create(&self.cache, run.start);

        let parent = self.table.open(parent_sector);
        let new_dir = self.table.open(run.start);
        dir::init(&self.cache, &self.free_map, &new_dir, run.start, parent_sector);
        let result = dir::add(&self.cache, &self.free_map, &parent, &leaf, run.start, true);
        if result.is_err() {
            new_dir.mark_removed();
        }
        self.table.close(&self.cache, &self.free_map, new_dir);
        self.table.close(&self.cache, &self.free_map, parent);
        result
    }

    /// `open(name)`.
    pub fn open(&self, path: &str) -> Result<FileHandle> {
        let (sector, is_dir) = self.resolve(path)?;
        let inode = self.table.open(sector);
        Ok(FileHandle { inode, is_dir, cursor: Mutex::new(0) })
    }

    /// `close(fd)`.
    pub fn close(&self, handle: FileHandle) {
        self.table.close(&self.cache, &self.free_map, handle.inode);
    }

    /// `remove(name)`. Refuses to remove a non-empty directory — see
    /// DESIGN.md for this crate's resolution of that open question.
    pub fn remove(&self, path: &str) -> Result<()> {
        let (parent_path, leaf) = Self::split(path);
        let (parent_sector, parent_is_dir) = self.resolve(&parent_path)?;
        if !parent_is_dir {
            return Err(Error::NotADirectory);
        }
        let parent = self.table.open(parent_sector);
        let Some((target_sector, target_is_dir)) = dir::lookup(&self.cache, &parent, &leaf) else {
            self.table.close(&self.cache, &self.free_map, parent);
            return Err(Error::FileNotFound);
        };

        let target = self.table.open(target_sector);
        if target_is_dir && !dir::is_empty(&self.cache, &target) {
            self.table.close(&self.cache, &self.free_map, target);
            self.table.close(&self.cache, &self.free_map, parent);
            return Err(Error::DirectoryNotEmpty);
        }
        target.mark_removed();
        self.table.close(&self.cache, &self.free_map, target);

        dir::remove(&self.cache, &self.free_map, &parent, &leaf)?;
        self.table.close(&self.cache, &self.free_map, parent);
        Ok(())
    }

    /// `chdir(name)`: resolves and validates a directory path. Process-level
    /// working-directory state is out of scope (§1) and belongs one layer
    /// up; this just answers "does this name a directory, and which inode".
    pub fn chdir(&self, path: &str) -> Result<u32> {
        let (sector, is_dir) = self.resolve(path)?;
        if !is_dir {
            return Err(Error::NotADirectory);
        }
        Ok(sector)
    }

    /// `read(fd, buf, size)`, advancing the handle's cursor by the amount
    /// actually read. Rejects a directory handle with
    /// [`Error::IsADirectory`], matching `sys_read`'s rejection of directory
    /// fds before any I/O.
    pub fn read(&self, handle: &FileHandle, buf: &mut [u8]) -> Result<usize> {
        if handle.is_dir {
            return Err(Error::IsADirectory);
        }
        let pos = *handle.cursor.lock();
        let n = file::read_at(&self.cache, &handle.inode, buf, buf.len(), pos);
        *handle.cursor.lock() = pos + n as u32;
        Ok(n)
    }

    /// `write(fd, buf, size)`, advancing the handle's cursor by the amount
    /// actually written. Rejects a directory handle with
    /// [`Error::IsADirectory`], matching `sys_write`'s rejection of
    /// directory fds before any I/O.
    pub fn write(&self, handle: &FileHandle, buf: &[u8]) -> Result<usize> {
        if handle.is_dir {
            return Err(Error::IsADirectory);
        }
        let pos = *handle.cursor.lock();
        let n = file::write_at(&self.cache, &self.free_map, &handle.inode, buf, buf.len(), pos);
        *handle.cursor.lock() = pos + n as u32;
        Ok(n)
    }

    /// `seek(fd, position)`.
    pub fn seek(&self, handle: &FileHandle, position: u32) {
        *handle.cursor.lock() = position;
    }

    /// `tell(fd)`.
    pub fn tell(&self, handle: &FileHandle) -> u32 {
        *handle.cursor.lock()
    }

    /// `filesize(fd)`.
    pub fn filesize(&self, handle: &FileHandle) -> u32 {
        file::length(&self.cache, &handle.inode)
    }

    /// `isdir(fd)`.
    pub fn isdir(&self, handle: &FileHandle) -> bool {
        handle.is_dir
    }

    /// `inumber(fd)`.
    pub fn inumber(&self, handle: &FileHandle) -> u32 {
        handle.inode.self_sector()
    }

    /// `readdir(fd)`, skipping `.` and `..`.
    pub fn readdir(&self, handle: &FileHandle) -> Result<Vec<DirEntry>> {
        if !handle.is_dir {
            return Err(Error::NotADirectory);
        }
        Ok(dir::readdir(&self.cache, &handle.inode))
    }

    /// Block writers from this handle's inode (e.g. while it is loaded as an
    /// executable image).
    pub fn deny_write(&self, handle: &FileHandle) {
        handle.inode.deny_write();
    }

    /// Undo a prior [`Filesystem::deny_write`].
    pub fn allow_write(&self, handle: &FileHandle) {
        handle.inode.allow_write();
    }

    /// `reset_cache`: flush and zero the hit/access counters atomically.
    pub fn reset_cache(&self) {
        self.cache.reset();
    }

    /// Snapshot of `num_cache_hits`/`num_cache_accesses`/`num_device_reads`/
    /// `num_device_writes`.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectorfs_device::{BitmapFreeMap, MemSectorDevice};

    fn fs() -> Filesystem<MemSectorDevice, BitmapFreeMap> {
        let device = MemSectorDevice::new(2000);
        let free_map = BitmapFreeMap::new(2000, 2);
        Filesystem::format(device, free_map, 64)
    }

    #[test]
    fn create_open_filesize_round_trip() {
        let fs = fs();
        fs.create("/a.txt", 42).unwrap();
        let h = fs.open("/a.txt").unwrap();
        assert_eq!(fs.filesize(&h), 42);
        assert!(!fs.isdir(&h));
        fs.close(h);
    }

    #[test]
    fn mkdir_and_readdir_and_nested_paths() {
        let fs = fs();
        fs.mkdir("/sub").unwrap();
        fs.create("/sub/f.txt", 0).unwrap();
        let dir = fs.open("/sub").unwrap();
        assert!(fs.isdir(&dir));
        let entries = fs.readdir(&dir).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "f.txt");
        fs.close(dir);
    }

    #[test]
    fn remove_refuses_non_empty_directory() {
        let fs = fs();
        fs.mkdir("/sub").unwrap();
        fs.create("/sub/f.txt", 0).unwrap();
        assert_eq!(fs.remove("/sub"), Err(Error::DirectoryNotEmpty));
        fs.remove("/sub/f.txt").unwrap();
        assert!(fs.remove("/sub").is_ok());
    }

    #[test]
    fn remove_while_open_defers_reclamation() {
        let fs = fs();
        fs.create("/f", 0).unwrap();
        let h1 = fs.open("/f").unwrap();
        fs.remove("/f").unwrap();

        let written = fs.write(&h1, b"x").unwrap();
        assert_eq!(written, 1);
        assert!(matches!(fs.open("/f"), Err(Error::FileNotFound)));

        let before = fs.cache_stats();
        fs.close(h1);
        let _ = before;
    }

    #[test]
    fn write_then_read_same_handle() {
        let fs = fs();
        fs.create("/f", 0).unwrap();
        let h = fs.open("/f").unwrap();
        fs.write(&h, b"hello world").unwrap();
        fs.seek(&h, 0);
        let mut buf = [0u8; 11];
        let n = fs.read(&h, &mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
        fs.close(h);
    }

    #[test]
    fn read_and_write_reject_directory_handles() {
        let fs = fs();
        fs.mkdir("/sub").unwrap();
        let dir = fs.open("/sub").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(&dir, &mut buf), Err(Error::IsADirectory));
        assert_eq!(fs.write(&dir, b"nope"), Err(Error::IsADirectory));
        fs.close(dir);
    }
}
