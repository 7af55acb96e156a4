//! The open-inode table (component E): at most one in-core inode per
//! `self_sector`, with reopen/last-close semantics and deferred sector
//! reclamation for a file removed while still open.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sectorfs_device::{FreeMap, SectorDevice};

use crate::access::AccessController;
use crate::cache::SectorCache;
use crate::inode;

struct InodeMeta {
    open_count: u32,
    removed: bool,
    deny_write_count: u32,
}

/// An in-core inode: the process-wide, reference-counted record for one
/// on-disk inode while it has at least one opener.
pub struct InCoreInode {
    self_sector: u32,
    /// The per-inode readers/writer/resizer controller (component D).
    pub access: AccessController,
    meta: Mutex<InodeMeta>,
}

impl InCoreInode {
    /// The sector holding this inode's on-disk record.
    pub fn self_sector(&self) -> u32 {
        self.self_sector
    }

    /// Whether this file has been `remove`d while still open.
    pub fn is_removed(&self) -> bool {
        self.meta.lock().removed
    }

    /// Mark this inode removed. It stays usable until the last close, at
    /// which point its sectors return to the free map.
    pub fn mark_removed(&self) {
        self.meta.lock().removed = true;
    }

    /// Increment the deny-write count (an executable load in progress).
    pub fn deny_write(&self) {
        self.meta.lock().deny_write_count += 1;
    }

    /// Decrement the deny-write count.
    pub fn allow_write(&self) {
        let mut m = self.meta.lock();
        debug_assert!(m.deny_write_count > 0, "allow_write without a matching deny_write");
        m.deny_write_count -= 1;
    }

    /// Current deny-write count; a writer observing this nonzero must fail
    /// with [`crate::Error::WritesDenied`] rather than block.
    pub fn deny_write_count(&self) -> u32 {
        self.meta.lock().deny_write_count
    }

    /// Number of live opens of this inode.
    pub fn open_count(&self) -> u32 {
        self.meta.lock().open_count
    }
}

/// The table itself: `self_sector -> in-core inode`, with at most one entry
/// per sector at any time.
pub struct OpenInodeTable {
    latch: Mutex<HashMap<u32, Arc<InCoreInode>>>,
}

impl Default for OpenInodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenInodeTable {
    pub fn new() -> Self {
        Self { latch: Mutex::new(HashMap::new()) }
    }

    /// Open (or reopen) the inode at `self_sector`. The table latch is held
    /// only for the hash-map lookup/insert and the `open_count` bump, never
    /// across device I/O.
    pub fn open(&self, self_sector: u32) -> Arc<InCoreInode> {
        let mut table = self.latch.lock();
        if let Some(existing) = table.get(&self_sector) {
            existing.meta.lock().open_count += 1;
            return existing.clone();
        }
        let inode = Arc::new(InCoreInode {
            self_sector,
            access: AccessController::new(),
            meta: Mutex::new(InodeMeta { open_count: 1, removed: false, deny_write_count: 0 }),
        });
        table.insert(self_sector, inode.clone());
        inode
    }

    /// Bump the reference count on an already-open handle.
    pub fn reopen(&self, inode: &Arc<InCoreInode>) {
        inode.meta.lock().open_count += 1;
    }

    /// Close a handle. On the last close of a removed file, every sector the
    /// inode still owns — its data, indirect, and doubly-indirect blocks,
    /// plus the inode sector itself — is released to `free_map`.
    pub fn close<D: SectorDevice, F: FreeMap>(&self, cache: &SectorCache<D>, free_map: &F, inode: Arc<InCoreInode>) {
        let mut table = self.latch.lock();
        let (last_close, removed) = {
            let mut m = inode.meta.lock();
            debug_assert!(m.open_count > 0, "close on an inode with no opens");
            m.open_count -= 1;
            (m.open_count == 0, m.removed)
        };
        if last_close {
            table.remove(&inode.self_sector);
        }
        drop(table);

        if last_close && removed {
            inode::resize(cache, free_map, inode.self_sector, 0);
            free_map.release(inode.self_sector, 1);
            #[cfg(feature = "log")]
            log::debug!("reclaimed sectors for removed inode {}", inode.self_sector);
        }
    }

    /// Number of in-core inodes currently resident. Test/diagnostic use.
    pub fn resident_count(&self) -> usize {
        self.latch.lock().len()
    }
}
