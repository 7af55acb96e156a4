//! End-to-end concurrency scenarios, run against real `std::thread`s over an
//! in-memory device and bitmap free map.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use sectorfs::Filesystem;
use sectorfs_device::{BitmapFreeMap, MemSectorDevice};

fn fs(sectors: u32, cache_capacity: usize) -> Arc<Filesystem<MemSectorDevice, BitmapFreeMap>> {
    let device = MemSectorDevice::new(sectors);
    let free_map = BitmapFreeMap::new(sectors, 2);
    Arc::new(Filesystem::format(device, free_map, cache_capacity))
}

#[test]
fn grow_across_direct_indirect_and_double_indirect_bands() {
    let fs = fs(40_000, 64);
    fs.create("/big", 0).unwrap();
    let h = fs.open("/big").unwrap();

    fs.write(&h, &[1]).unwrap();
    assert_eq!(fs.filesize(&h), 1);

    let indirect_offset = 124 * 512;
    fs.seek(&h, indirect_offset as u32);
    fs.write(&h, &[2]).unwrap();

    let double_offset = 124 * 512 + 128 * 512;
    fs.seek(&h, double_offset as u32);
    fs.write(&h, &[3]).unwrap();

    assert_eq!(fs.filesize(&h), 130_561);

    let mut out = [0u8; 1];
    fs.seek(&h, 0);
    fs.read(&h, &mut out).unwrap();
    assert_eq!(out[0], 1);

    fs.seek(&h, indirect_offset as u32);
    fs.read(&h, &mut out).unwrap();
    assert_eq!(out[0], 2);

    fs.seek(&h, double_offset as u32);
    fs.read(&h, &mut out).unwrap();
    assert_eq!(out[0], 3);

    // a hole in between reads back as zero
    fs.seek(&h, 600);
    fs.read(&h, &mut out).unwrap();
    assert_eq!(out[0], 0);

    fs.close(h);
}

#[test]
fn ten_concurrent_readers_never_block_each_other() {
    let fs = fs(400, 64);
    fs.create("/f", 0).unwrap();
    let h = Arc::new(fs.open("/f").unwrap());
    let payload = vec![0x42u8; 4096];
    fs.write(&h, &payload).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let fs = fs.clone();
            let h = h.clone();
            let expected = payload.clone();
            thread::spawn(move || {
                fs.seek(&h, 0);
                let mut out = vec![0u8; 4096];
                let n = fs.read(&h, &mut out).unwrap();
                assert_eq!(n, 4096);
                assert_eq!(out, expected);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn writer_excludes_readers_no_torn_write_observed() {
    let fs = fs(4000, 64);
    fs.create("/f", 0).unwrap();
    let writer_handle = Arc::new(fs.open("/f").unwrap());
    let writer_done = Arc::new(AtomicBool::new(false));
    let max_length_seen = Arc::new(AtomicU32::new(0));

    let readers: Vec<_> = (0..10)
        .map(|_| {
            let fs = fs.clone();
            let writer_done = writer_done.clone();
            let max_length_seen = max_length_seen.clone();
            thread::spawn(move || {
                let reader_handle = fs.open("/f").unwrap();
                while !writer_done.load(Ordering::SeqCst) {
                    let length = fs.filesize(&reader_handle);
                    let mut out = vec![0u8; length as usize];
                    fs.seek(&reader_handle, 0);
                    let n = fs.read(&reader_handle, &mut out).unwrap();
                    // a torn write would show up as a read racing ahead of
                    // the length it itself just observed
                    assert_eq!(n, length as usize);
                    max_length_seen.fetch_max(length, Ordering::SeqCst);
                }
                fs.close(reader_handle);
            })
        })
        .collect();

    let payload = vec![0xAB; 1024 * 1024];
    fs.write(&writer_handle, &payload).unwrap();
    writer_done.store(true, Ordering::SeqCst);

    for reader in readers {
        reader.join().unwrap();
    }
    fs.close(Arc::try_unwrap(writer_handle).ok().unwrap());
    assert!(max_length_seen.load(Ordering::SeqCst) <= 1024 * 1024);
}

#[test]
fn remove_while_open_reclaims_sectors_on_last_close() {
    let fs = fs(200, 32);
    fs.create("/f", 0).unwrap();
    let h = fs.open("/f").unwrap();

    fs.remove("/f").unwrap();
    let written = fs.write(&h, b"x").unwrap();
    assert_eq!(written, 1);

    assert!(fs.open("/f").is_err());

    let before = fs.cache_stats();
    fs.close(h);
    let after = fs.cache_stats();
    // flushing the close doesn't reset counters; this just asserts the
    // filesystem is still usable post-reclamation.
    assert!(after.accesses >= before.accesses);

    fs.create("/g", 0).unwrap();
    assert!(fs.open("/g").is_ok());
}
