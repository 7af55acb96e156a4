//! The on-disk inode (component B) and its resize engine (component C).
//!
//! The inode sector is self-contained: it holds its own header plus every
//! direct pointer, with `indirect` and `double_indirect` naming sectors that
//! hold further pointer tables. This is the layout §9 names explicitly over
//! the alternative where the inode sector only points at a separate record —
//! do not reintroduce that indirection.

use sectorfs_device::{FreeMap, SectorDevice, SECTOR_SIZE};

use crate::cache::SectorCache;

/// Number of direct pointers that fit in the inode sector alongside its
/// header.
pub const DIRECT_COUNT: usize = 124;
/// Number of pointers held by one indirect (or double-indirect outer) block.
pub const PTRS_PER_BLOCK: usize = SECTOR_SIZE / 4;
/// Sentinel written into a pointer slot to mean "hole / unallocated".
const HOLE: u32 = 0;
/// Detects a corrupted or uninitialised inode sector.
pub const MAGIC: u32 = 0x494e4f44;

const LENGTH_OFFSET: usize = 0;
const DIRECT_BASE: usize = LENGTH_OFFSET + 4;
const INDIRECT_OFFSET: usize = DIRECT_BASE + DIRECT_COUNT * 4;
const DOUBLE_INDIRECT_OFFSET: usize = INDIRECT_OFFSET + 4;
const MAGIC_OFFSET: usize = DOUBLE_INDIRECT_OFFSET + 4;

const _: () = assert!(MAGIC_OFFSET + 4 == SECTOR_SIZE, "inode header must exactly fill one sector");

fn direct_offset(i: usize) -> usize {
    DIRECT_BASE + i * 4
}

/// Byte boundary of the file offset covered entirely by the direct band.
pub const DIRECT_SPAN: u32 = (DIRECT_COUNT * SECTOR_SIZE) as u32;
/// Byte boundary covered by the direct + indirect bands together.
pub const INDIRECT_SPAN: u32 = DIRECT_SPAN + (PTRS_PER_BLOCK * SECTOR_SIZE) as u32;

fn read_u32<D: SectorDevice>(cache: &SectorCache<D>, sector: u32, offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    cache.cache_read(sector, &mut buf, offset, 4);
    u32::from_le_bytes(buf)
}

fn write_u32<D: SectorDevice>(cache: &SectorCache<D>, sector: u32, offset: usize, value: u32) {
    cache.cache_write(sector, &value.to_le_bytes(), offset, 4);
}

fn zero_sector<D: SectorDevice>(cache: &SectorCache<D>, sector: u32) {
    cache.cache_write(sector, &[0u8; SECTOR_SIZE], 0, SECTOR_SIZE);
}

/// Read a pointer out of an indirect (or double-indirect outer) block.
fn get_ptr<D: SectorDevice>(cache: &SectorCache<D>, table_sector: u32, idx: usize) -> u32 {
    read_u32(cache, table_sector, idx * 4)
}

fn set_ptr<D: SectorDevice>(cache: &SectorCache<D>, table_sector: u32, idx: usize, value: u32) {
    write_u32(cache, table_sector, idx * 4, value);
}

/// `length_of` from the design: the inode's current byte length.
pub fn length_of<D: SectorDevice>(cache: &SectorCache<D>, self_sector: u32) -> u32 {
    let raw = read_u32(cache, self_sector, LENGTH_OFFSET) as i32;
    raw.max(0) as u32
}

fn set_length<D: SectorDevice>(cache: &SectorCache<D>, self_sector: u32, len: u32) {
    write_u32(cache, self_sector, LENGTH_OFFSET, len as i32 as u32);
}

/// Panics if the inode sector's magic doesn't match — corruption at this
/// layer is fatal and not locally recoverable (§7).
pub fn check_magic<D: SectorDevice>(cache: &SectorCache<D>, self_sector: u32) {
    let magic = read_u32(cache, self_sector, MAGIC_OFFSET);
    assert_eq!(magic, MAGIC, "corrupt inode at sector {self_sector}: bad magic {magic:#x}");
}

/// Format a brand-new, zero-length inode into `self_sector`. The caller is
/// responsible for having obtained `self_sector` from the free map first.
pub fn create<D: SectorDevice>(cache: &SectorCache<D>, self_sector: u32) {
    zero_sector(cache, self_sector);
    write_u32(cache, self_sector, MAGIC_OFFSET, MAGIC);
}

/// `sector_for_pos` from the design: translate a byte offset to a data
/// sector, walking the direct / indirect / doubly-indirect bands as needed.
/// Returns `None` for a hole or for `pos >= length`.
pub fn sector_for_pos<D: SectorDevice>(cache: &SectorCache<D>, self_sector: u32, pos: u32) -> Option<u32> {
    if pos >= length_of(cache, self_sector) {
        return None;
    }
    let index = (pos / SECTOR_SIZE as u32) as usize;

    if index < DIRECT_COUNT {
        let ptr = read_u32(cache, self_sector, direct_offset(index));
        return non_hole(ptr);
    }
    let index = index - DIRECT_COUNT;

    if index < PTRS_PER_BLOCK {
        let indirect = read_u32(cache, self_sector, INDIRECT_OFFSET);
        let indirect = non_hole(indirect)?;
        return non_hole(get_ptr(cache, indirect, index));
    }
    let index = index - PTRS_PER_BLOCK;

    let double = read_u32(cache, self_sector, DOUBLE_INDIRECT_OFFSET);
    let double = non_hole(double)?;
    let outer = index / PTRS_PER_BLOCK;
    let inner = index % PTRS_PER_BLOCK;
    let indirect = non_hole(get_ptr(cache, double, outer))?;
    non_hole(get_ptr(cache, indirect, inner))
}

fn non_hole(ptr: u32) -> Option<u32> {
    if ptr == HOLE {
        None
    } else {
        Some(ptr)
    }
}

/// Release an indirect block and every data sector it still points to.
/// Grounded on `flush_indirect_block` in the reference source's shrink path.
fn release_indirect_block<D: SectorDevice, F: FreeMap>(cache: &SectorCache<D>, free_map: &F, indirect: u32) {
    for i in 0..PTRS_PER_BLOCK {
        let ptr = get_ptr(cache, indirect, i);
        if ptr != HOLE {
            free_map.release(ptr, 1);
        }
    }
    free_map.release(indirect, 1);
}

fn alloc_one<F: FreeMap>(free_map: &F) -> Option<u32> {
    free_map.allocate(1).map(|run| run.start)
}

/// `resize` from the design (component C): grow or shrink the inode's map so
/// it covers exactly `[0, new_length)`. Returns `false` on allocation
/// failure, having rolled every band back to `[0, old_length)` first.
pub fn resize<D: SectorDevice, F: FreeMap>(cache: &SectorCache<D>, free_map: &F, self_sector: u32, new_length: u32) -> bool {
    let old_length = length_of(cache, self_sector);

    if !resize_direct_band(cache, free_map, self_sector, new_length) {
        return rollback(cache, free_map, self_sector, old_length);
    }
    if !resize_indirect_band(cache, free_map, self_sector, new_length) {
        return rollback(cache, free_map, self_sector, old_length);
    }
    if !resize_double_indirect_band(cache, free_map, self_sector, new_length) {
        return rollback(cache, free_map, self_sector, old_length);
    }

    set_length(cache, self_sector, new_length);
    true
}

fn rollback<D: SectorDevice, F: FreeMap>(cache: &SectorCache<D>, free_map: &F, self_sector: u32, old_length: u32) -> bool {
    let restored = resize(cache, free_map, self_sector, old_length);
    debug_assert!(restored, "rollback to a shorter length must not itself fail to allocate");
    false
}

fn resize_direct_band<D: SectorDevice, F: FreeMap>(cache: &SectorCache<D>, free_map: &F, self_sector: u32, new_length: u32) -> bool {
    for i in 0..DIRECT_COUNT {
        let boundary = (i * SECTOR_SIZE) as u32;
        let offset = direct_offset(i);
        let ptr = read_u32(cache, self_sector, offset);
        if new_length <= boundary {
            if ptr != HOLE {
                free_map.release(ptr, 1);
                write_u32(cache, self_sector, offset, HOLE);
            }
        } else if ptr == HOLE {
            match alloc_one(free_map) {
                Some(sector) => {
                    zero_sector(cache, sector);
                    write_u32(cache, self_sector, offset, sector);
                }
                None => return false,
            }
        }
    }
    true
}

fn resize_indirect_band<D: SectorDevice, F: FreeMap>(cache: &SectorCache<D>, free_map: &F, self_sector: u32, new_length: u32) -> bool {
    let indirect = read_u32(cache, self_sector, INDIRECT_OFFSET);

    if new_length <= DIRECT_SPAN {
        if indirect != HOLE {
            release_indirect_block(cache, free_map, indirect);
            write_u32(cache, self_sector, INDIRECT_OFFSET, HOLE);
        }
        return true;
    }

    let indirect = if indirect == HOLE {
        match alloc_one(free_map) {
            Some(sector) => {
                zero_sector(cache, sector);
                write_u32(cache, self_sector, INDIRECT_OFFSET, sector);
                sector
            }
            None => return false,
        }
    } else {
        indirect
    };

    for k in 0..PTRS_PER_BLOCK {
        let boundary = DIRECT_SPAN + (k * SECTOR_SIZE) as u32;
        let ptr = get_ptr(cache, indirect, k);
        if new_length <= boundary {
            if ptr != HOLE {
                free_map.release(ptr, 1);
                set_ptr(cache, indirect, k, HOLE);
            }
        } else if ptr == HOLE {
            match alloc_one(free_map) {
                Some(sector) => {
                    zero_sector(cache, sector);
                    set_ptr(cache, indirect, k, sector);
                }
                None => return false,
            }
        }
    }
    true
}

fn resize_double_indirect_band<D: SectorDevice, F: FreeMap>(cache: &SectorCache<D>, free_map: &F, self_sector: u32, new_length: u32) -> bool {
    let double = read_u32(cache, self_sector, DOUBLE_INDIRECT_OFFSET);

    if new_length <= INDIRECT_SPAN {
        if double != HOLE {
            for oi in 0..PTRS_PER_BLOCK {
                let indirect = get_ptr(cache, double, oi);
                if indirect != HOLE {
                    release_indirect_block(cache, free_map, indirect);
                }
            }
            free_map.release(double, 1);
            write_u32(cache, self_sector, DOUBLE_INDIRECT_OFFSET, HOLE);
        }
        return true;
    }

    let double = if double == HOLE {
        match alloc_one(free_map) {
            Some(sector) => {
                zero_sector(cache, sector);
                write_u32(cache, self_sector, DOUBLE_INDIRECT_OFFSET, sector);
                sector
            }
            None => return false,
        }
    } else {
        double
    };

    let band_size = (PTRS_PER_BLOCK * SECTOR_SIZE) as u32;
    for oi in 0..PTRS_PER_BLOCK {
        let outer_base = INDIRECT_SPAN + oi as u32 * band_size;
        let mut indirect = get_ptr(cache, double, oi);

        if new_length <= outer_base {
            if indirect != HOLE {
                release_indirect_block(cache, free_map, indirect);
                set_ptr(cache, double, oi, HOLE);
            }
            continue;
        }

        if indirect == HOLE {
            match alloc_one(free_map) {
                Some(sector) => {
                    zero_sector(cache, sector);
                    indirect = sector;
                    set_ptr(cache, double, oi, indirect);
                }
                None => return false,
            }
        }

        for ii in 0..PTRS_PER_BLOCK {
            let boundary = outer_base + (ii * SECTOR_SIZE) as u32;
            let ptr = get_ptr(cache, indirect, ii);
            if new_length <= boundary {
                if ptr != HOLE {
                    free_map.release(ptr, 1);
                    set_ptr(cache, indirect, ii, HOLE);
                }
            } else if ptr == HOLE {
                match alloc_one(free_map) {
                    Some(sector) => {
                        zero_sector(cache, sector);
                        set_ptr(cache, indirect, ii, sector);
                    }
                    None => return false,
                }
            }
        }
    }
    true
}
