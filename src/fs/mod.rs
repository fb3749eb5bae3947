//! The file layer: inodes, content backings, and the bucket façade.

pub mod bufferedwrites;
pub mod content;
pub mod err;
pub mod inode;
pub mod meta;
pub mod syncer;
