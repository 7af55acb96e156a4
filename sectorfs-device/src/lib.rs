//! Sector device and free-space-allocator abstractions for the sectorfs ecosystem.
//!
//! This crate provides the fundamental [`SectorDevice`] and [`FreeMap`] traits that
//! the filesystem core is built on top of. Both are declared-interface collaborators:
//! sectorfs never implements them for production hardware itself, only consumes them.
//!
//! # Example
//!
//! ```
//! use sectorfs_device::{SectorDevice, SECTOR_SIZE};
//!
//! struct MyDevice {
//!     sectors: Vec<[u8; SECTOR_SIZE]>,
//! }
//!
//! impl SectorDevice for MyDevice {
//!     fn read_sector(&self, idx: u32, out: &mut [u8; SECTOR_SIZE]) {
//!         out.copy_from_slice(&self.sectors[idx as usize]);
//!     }
//!
//!     fn write_sector(&self, idx: u32, data: &[u8; SECTOR_SIZE]) {
//!         // interior mutability is the implementor's responsibility; real devices
//!         // are typically wrapped in their own internal synchronization.
//!     }
//!
//!     fn sector_count(&self) -> u32 {
//!         self.sectors.len() as u32
//!     }
//! }
//! ```

#![warn(missing_docs)]

use std::sync::Mutex;

/// Size in bytes of the atomic I/O unit exchanged with a [`SectorDevice`].
pub const SECTOR_SIZE: usize = 512;

/// A raw, fixed-size sector device.
///
/// Implementations are assumed synchronous and infallible: a failed read or write
/// indicates a bug or hardware fault outside this crate's error model and should
/// panic rather than return an error, matching the diagnostic-panic policy used
/// throughout the filesystem core.
///
/// `read_sector` / `write_sector` take `&self` rather than `&mut self` because real
/// implementations serialize access internally (a queue to a physical controller, a
/// mutex around a file handle); the sector cache above this trait is what gives
/// callers the illusion of a simple synchronous device.
pub trait SectorDevice: Send + Sync {
    /// Read the whole contents of sector `idx` into `out`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    fn read_sector(&self, idx: u32, out: &mut [u8; SECTOR_SIZE]);

    /// Write the whole contents of `data` to sector `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    fn write_sector(&self, idx: u32, data: &[u8; SECTOR_SIZE]);

    /// Total number of addressable sectors on this device.
    fn sector_count(&self) -> u32;
}

/// A contiguous run of sectors returned by [`FreeMap::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRun {
    /// First sector index in the run.
    pub start: u32,
    /// Number of sectors in the run.
    pub count: u32,
}

/// The sector bitmap allocator, consumed but not owned by the filesystem core.
///
/// Consecutive allocation is desirable (it keeps files contiguous on disk) but not
/// required: implementations are free to satisfy `allocate(n)` with `n` separate
/// single-sector runs if a wider contiguous run isn't free.
pub trait FreeMap: Send + Sync {
    /// Allocate `count` sectors, returning their identity. Returns `None` if the
    /// device has fewer than `count` free sectors remaining.
    fn allocate(&self, count: u32) -> Option<SectorRun>;

    /// Return `count` sectors starting at `start` to the free pool.
    fn release(&self, start: u32, count: u32);

    /// Number of sectors currently free.
    fn free_count(&self) -> u32;
}

/// An in-memory [`SectorDevice`] backed by a `Vec`, used by tests and examples in
/// place of a real block device driver.
pub struct MemSectorDevice {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemSectorDevice {
    /// Create a device with `count` zeroed sectors.
    pub fn new(count: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; count as usize]),
        }
    }
}

impl SectorDevice for MemSectorDevice {
    fn read_sector(&self, idx: u32, out: &mut [u8; SECTOR_SIZE]) {
        let sectors = self.sectors.lock().unwrap();
        out.copy_from_slice(&sectors[idx as usize]);
    }

    fn write_sector(&self, idx: u32, data: &[u8; SECTOR_SIZE]) {
        let mut sectors = self.sectors.lock().unwrap();
        sectors[idx as usize].copy_from_slice(data);
    }

    fn sector_count(&self) -> u32 {
        self.sectors.lock().unwrap().len() as u32
    }
}

/// A bitmap-backed [`FreeMap`], one bit per sector, with a next-free-hint for
/// amortized O(1) allocation on an unfragmented device.
///
/// This mirrors the exFAT-style allocation bitmap used by the wider filesystem
/// ecosystem: a plain scan of an in-memory bitmap is dramatically cheaper than a
/// linked scan through on-disk metadata.
pub struct BitmapFreeMap {
    inner: Mutex<BitmapFreeMapInner>,
}

struct BitmapFreeMapInner {
    bitmap: Vec<u8>,
    total: u32,
    next_free_hint: u32,
    free_count: u32,
}

impl BitmapFreeMap {
    /// Create a bitmap tracking `total` sectors, all initially free, except the
    /// given `reserved` leading sectors (e.g. the free-map's own inode and the
    /// root directory's inode at format time).
    pub fn new(total: u32, reserved: u32) -> Self {
        let bitmap_bytes = (total as usize).div_ceil(8);
        let mut bitmap = vec![0u8; bitmap_bytes];
        for sector in 0..reserved.min(total) {
            set_bit(&mut bitmap, sector);
        }
        Self {
            inner: Mutex::new(BitmapFreeMapInner {
                bitmap,
                total,
                next_free_hint: reserved,
                free_count: total - reserved.min(total),
            }),
        }
    }
}

fn set_bit(bitmap: &mut [u8], bit: u32) {
    bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
}

fn clear_bit(bitmap: &mut [u8], bit: u32) {
    bitmap[(bit / 8) as usize] &= !(1 << (bit % 8));
}

fn bit_is_set(bitmap: &[u8], bit: u32) -> bool {
    bitmap[(bit / 8) as usize] & (1 << (bit % 8)) != 0
}

impl BitmapFreeMapInner {
    fn find_contiguous(&self, count: u32) -> Option<u32> {
        let mut run_start = None;
        let mut run_len = 0u32;
        for sector in self.next_free_hint..self.total {
            if !bit_is_set(&self.bitmap, sector) {
                if run_start.is_none() {
                    run_start = Some(sector);
                }
                run_len += 1;
                if run_len >= count {
                    return run_start;
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        // Wrap around: a fragmented device may still satisfy the request before
        // the hint even though the tail scan above failed.
        run_start = None;
        run_len = 0;
        for sector in 0..self.next_free_hint {
            if !bit_is_set(&self.bitmap, sector) {
                if run_start.is_none() {
                    run_start = Some(sector);
                }
                run_len += 1;
                if run_len >= count {
                    return run_start;
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        None
    }
}

impl FreeMap for BitmapFreeMap {
    fn allocate(&self, count: u32) -> Option<SectorRun> {
        if count == 0 {
            return Some(SectorRun { start: 0, count: 0 });
        }
        let mut inner = self.inner.lock().unwrap();
        if count > inner.free_count {
            return None;
        }
        let start = inner.find_contiguous(count)?;
        for sector in start..start + count {
            set_bit(&mut inner.bitmap, sector);
        }
        inner.free_count -= count;
        inner.next_free_hint = start + count;
        Some(SectorRun { start, count })
    }

    fn release(&self, start: u32, count: u32) {
        if count == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for sector in start..start + count {
            if bit_is_set(&inner.bitmap, sector) {
                clear_bit(&mut inner.bitmap, sector);
                inner.free_count += 1;
            }
        }
        if start < inner.next_free_hint {
            inner.next_free_hint = start;
        }
    }

    fn free_count(&self) -> u32 {
        self.inner.lock().unwrap().free_count
    }
}
