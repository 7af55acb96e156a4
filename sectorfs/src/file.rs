//! The file read/write driver (component F): splits a user request into
//! sector-sized chunks routed through the cache, entering the access
//! controller for the duration and triggering a resize on write-past-EOF.

use sectorfs_device::{FreeMap, SectorDevice, SECTOR_SIZE};

use crate::cache::SectorCache;
use crate::inode;
use crate::table::InCoreInode;

/// `read_at` from the design. Reads at most `size` bytes starting at
/// `offset` into `dst`, returning the number of bytes actually read — a
/// short read past EOF is not an error.
pub fn read_at<D: SectorDevice>(cache: &SectorCache<D>, inode: &InCoreInode, dst: &mut [u8], size: usize, offset: u32) -> usize {
    inode.access.enter_read();
    let n = read_at_locked(cache, inode.self_sector(), dst, size, offset);
    inode.access.exit_read();
    n
}

fn read_at_locked<D: SectorDevice>(cache: &SectorCache<D>, self_sector: u32, dst: &mut [u8], size: usize, offset: u32) -> usize {
    let length = inode::length_of(cache, self_sector);
    if offset >= length {
        return 0;
    }
    let mut remaining = size.min((length - offset) as usize);
    let mut pos = offset;
    let mut done = 0usize;

    while remaining > 0 {
        let sector_offset = (pos % SECTOR_SIZE as u32) as usize;
        let chunk = remaining.min(SECTOR_SIZE - sector_offset);
        match inode::sector_for_pos(cache, self_sector, pos) {
            Some(sector) => cache.cache_read(sector, &mut dst[done..done + chunk], sector_offset, chunk),
            None => dst[done..done + chunk].fill(0),
        }
        pos += chunk as u32;
        done += chunk;
        remaining -= chunk;
    }
    done
}

/// `write_at` from the design. Writes at most `size` bytes from `src`
/// starting at `offset`. Returns 0 (not an error) immediately if the inode's
/// deny-write count is nonzero — the original `inode_write_at`'s `if
/// (inode->deny_write_cnt) return 0;` runs before any extension logic, so
/// this check is unconditional, not just a guard on writes that grow the
/// file. If the write extends past the current length and writes are not
/// denied, implicitly enters `Resizing` to grow the file first; returns 0
/// if the resize fails for lack of space.
pub fn write_at<D: SectorDevice, F: FreeMap>(cache: &SectorCache<D>, free_map: &F, inode: &InCoreInode, src: &[u8], size: usize, offset: u32) -> usize {
    inode.access.enter_write();
    let n = write_at_locked(cache, free_map, inode, src, size, offset);
    inode.access.exit_write();
    n
}

fn write_at_locked<D: SectorDevice, F: FreeMap>(cache: &SectorCache<D>, free_map: &F, inode: &InCoreInode, src: &[u8], size: usize, offset: u32) -> usize {
    if inode.deny_write_count() > 0 {
        return 0;
    }

    let self_sector = inode.self_sector();
    let end = offset as u64 + size as u64;
    let length = inode::length_of(cache, self_sector) as u64;

    if end > length {
        let guard = inode.access.enter_resize();
        // Re-check under the resize lock: nothing else could have extended
        // this file concurrently (Writing is exclusive per inode), but the
        // design calls for the re-check unconditionally, so we keep it as a
        // defensive no-op against a future relaxation of that exclusivity.
        let length_now = inode::length_of(cache, self_sector) as u64;
        let grew = if end > length_now {
            let new_length = end.min(u32::MAX as u64) as u32;
            inode::resize(cache, free_map, self_sector, new_length)
        } else {
            true
        };
        drop(guard);
        if !grew {
            return 0;
        }
    }

    let mut remaining = size;
    let mut pos = offset;
    let mut done = 0usize;

    while remaining > 0 {
        let sector_offset = (pos % SECTOR_SIZE as u32) as usize;
        let chunk = remaining.min(SECTOR_SIZE - sector_offset);
        let sector = inode::sector_for_pos(cache, self_sector, pos).expect("sector must be allocated after a successful resize");
        cache.cache_write(sector, &src[done..done + chunk], sector_offset, chunk);
        pos += chunk as u32;
        done += chunk;
        remaining -= chunk;
    }
    done
}

/// Current length of the file, in bytes.
pub fn length<D: SectorDevice>(cache: &SectorCache<D>, inode: &InCoreInode) -> u32 {
    inode::length_of(cache, inode.self_sector())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::OpenInodeTable;
    use sectorfs_device::{BitmapFreeMap, MemSectorDevice};
    use std::sync::Arc;
    use std::thread;

    fn setup(sectors: u32, cap: usize) -> (SectorCache<MemSectorDevice>, BitmapFreeMap, OpenInodeTable) {
        let cache = SectorCache::new(MemSectorDevice::new(sectors), cap);
        let fm = BitmapFreeMap::new(sectors, 1);
        inode::create(&cache, 0);
        (cache, fm, OpenInodeTable::new())
    }

    #[test]
    fn write_then_read_round_trips_for_assorted_sizes() {
        let (cache, fm, table) = setup(20_000, 128);
        let h = table.open(0);
        for n in [0usize, 1, 511, 512, 513, 63487, 63488, 63489, 129024, 129025, 8_000_000] {
            let buf = vec![(n % 251) as u8; n];
            let written = write_at(&cache, &fm, &h, &buf, n, 0);
            assert_eq!(written, n);
            let mut out = vec![0u8; n];
            let read = read_at(&cache, &h, &mut out, n, 0);
            assert_eq!(read, n);
            assert_eq!(out, buf);
        }
    }

    #[test]
    fn deny_write_blocks_in_place_overwrite_not_just_extension() {
        let (cache, fm, table) = setup(400, 64);
        let h = table.open(0);
        let original = vec![0xAAu8; 100];
        write_at(&cache, &fm, &h, &original, 100, 0);

        h.deny_write();
        let written = write_at(&cache, &fm, &h, &[0xBB; 10], 10, 0);
        assert_eq!(written, 0, "an in-place overwrite must still be denied");

        let mut out = vec![0u8; 100];
        read_at(&cache, &h, &mut out, 100, 0);
        assert_eq!(out, original, "denied write must not have touched the bytes");

        h.allow_write();
        let written = write_at(&cache, &fm, &h, &[0xBB; 10], 10, 0);
        assert_eq!(written, 10);
    }

    #[test]
    fn reads_in_holes_return_zero() {
        let (cache, fm, table) = setup(400, 64);
        let h = table.open(0);
        assert!(inode::resize(&cache, &fm, 0, 1));
        write_at(&cache, &fm, &h, &[0xFF], 1, 0);
        write_at(&cache, &fm, &h, &[0xEE], 1, (inode::DIRECT_SPAN + inode::PTRS_PER_BLOCK as u32 * 512));
        let mut out = [0xAAu8; 1];
        let n = read_at(&cache, &h, &mut out, 1, 50_000);
        assert_eq!(n, 1);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn ten_concurrent_readers_see_identical_bytes() {
        let (cache, fm, table) = setup(400, 64);
        let h = table.open(0);
        let payload = vec![0x5A; 4096];
        write_at(&cache, &fm, &h, &payload, 4096, 0);
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                let h = h.clone();
                let expected = payload.clone();
                thread::spawn(move || {
                    let mut out = vec![0u8; 4096];
                    let n = read_at(&cache, &h, &mut out, 4096, 0);
                    assert_eq!(n, 4096);
                    assert_eq!(out, expected);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
