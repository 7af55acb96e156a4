//! A block-addressed file subsystem for a teaching operating system.
//!
//! This crate implements the hard core of a Pintos-style file layer: a
//! write-back [`cache`] with LRU eviction, a tri-level direct/indirect/
//! doubly-indirect on-disk [`inode`], a per-inode readers/writer/resizer
//! [`access`] controller, and the [`table`] of in-core inodes that ties
//! reference counting to last-close sector reclamation. [`file`] and [`dir`]
//! sit on top of those to give a [`fs::Filesystem`] its `read_at`/`write_at`
//! and path-based surface.
//!
//! # Usage
//!
//! ```
//! use sectorfs::Filesystem;
//! use sectorfs_device::{BitmapFreeMap, MemSectorDevice};
//!
//! let device = MemSectorDevice::new(4096);
//! let free_map = BitmapFreeMap::new(4096, 2);
//! let fs = Filesystem::format(device, free_map, 64);
//!
//! fs.create("/hello.txt", 0).unwrap();
//! let file = fs.open("/hello.txt").unwrap();
//! fs.write(&file, b"hello, sector");
//! fs.shutdown();
//! ```
//!
//! # Threading and concurrency
//!
//! There is no cooperative async anywhere in this crate: every blocking
//! operation (cache latch, slot lock, access-controller enter, table latch,
//! free-map allocation) is a true `std::thread` sleep on a
//! [`parking_lot::Condvar`] or [`parking_lot::Mutex`], matching a kernel
//! thread model rather than an executor. `Filesystem` is `Send + Sync`
//! whenever its device and free-map type parameters are, so it is meant to
//! be shared across threads behind an `Arc`, not behind a single-threaded
//! runtime.
//!
//! Out of scope, consumed only via the [`sectorfs_device`] traits: the raw
//! block device driver and the sector bitmap allocator. Also out of scope:
//! the syscall dispatcher, process/file-descriptor bookkeeping, and path
//! parsing beyond the minimal `/`-split this crate needs to exercise its own
//! directory layer in tests.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod cache;
pub mod dir;
pub mod error;
pub mod file;
pub mod fs;
pub mod inode;
pub mod table;

pub use crate::error::{Error, Result};
pub use crate::fs::{FileHandle, Filesystem, FREE_MAP_SECTOR, ROOT_DIR_SECTOR};
