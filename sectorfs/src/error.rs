//! Error kinds returned by the filesystem's public surface.
//!
//! `CorruptInode` and `PreconditionViolation` from the design are not variants
//! here: per §7 they are fatal and indicate a bug or disk damage that cannot
//! be recovered locally, so they are raised as panics at the point of
//! detection (inode magic check, cache bounds check) rather than values a
//! caller could catch and continue past.

use core::fmt;

/// Failure modes surfaced to the syscall-level API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The free map had fewer sectors available than the operation needed.
    OutOfSpace,
    /// No directory entry matched the requested name.
    FileNotFound,
    /// A path component that should have been a directory was a file.
    NotADirectory,
    /// A file operation was attempted on a directory.
    IsADirectory,
    /// The caller's handle table has no room for another open file.
    TooManyOpenFiles,
    /// A file descriptor did not name an open file.
    InvalidHandle,
    /// A write was attempted while the inode's deny-write count was nonzero.
    WritesDenied,
    /// `mkdir`/`remove` target a non-empty directory.
    DirectoryNotEmpty,
    /// A name already exists in the target directory.
    AlreadyExists,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::OutOfSpace => "free map exhausted",
            Error::FileNotFound => "file not found",
            Error::NotADirectory => "not a directory",
            Error::IsADirectory => "is a directory",
            Error::TooManyOpenFiles => "too many open files",
            Error::InvalidHandle => "invalid handle",
            Error::WritesDenied => "writes denied",
            Error::DirectoryNotEmpty => "directory not empty",
            Error::AlreadyExists => "already exists",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}

/// Shorthand result type for this crate's fallible operations.
pub type Result<T> = core::result::Result<T, Error>;
