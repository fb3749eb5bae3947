//! File inode core for projecting a flat, versioned object store as a
//! POSIX-like hierarchical file system.
//!
//! A kernel VFS layer dispatches file operations here. Each regular file is
//! a [`fs::inode::FileInode`] reconciling three views of the file's content:
//! the remote canonical object, a local scratch buffer for random writes,
//! and a streaming buffered-write pipeline for append-shaped writes.

pub mod clock;
pub mod config;
pub mod fs;
