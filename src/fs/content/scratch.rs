//! The scratch content backing: a randomly addressable byte buffer
//! mirroring one generation of a remote object.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::clock::Clock;

/// A scratch shared between an inode and the content cache.
pub type SharedScratch = Arc<Mutex<Scratch>>;

/// Size and dirty state of a scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchStat {
    pub size: u64,

    /// Present iff the scratch has been mutated since materialization.
    pub mtime: Option<SystemTime>,
}

/// Mutable local copy of a file's content.
///
/// Materialized from a generation-pinned download (or empty, for files that
/// have never been persisted), mutated in place, and finally consumed by a
/// whole-object sync. A scratch is *dirty* once any write, truncate, or
/// explicit mtime update has touched it; the dirty mtime is what a sync
/// will persist as the object's mtime metadata.
pub struct Scratch {
    buf: Vec<u8>,
    mtime: Option<SystemTime>,
    destroyed: bool,
    clock: Arc<dyn Clock>,
}

impl Scratch {
    /// A clean scratch holding `contents`.
    pub fn from_bytes(contents: Vec<u8>, clock: Arc<dyn Clock>) -> Self {
        Self {
            buf: contents,
            mtime: None,
            destroyed: false,
            clock,
        }
    }

    /// An empty scratch for a file that has never been persisted. Marked
    /// dirty with the current time so a bare create-then-flush stamps a
    /// creation mtime.
    pub fn new_empty(clock: Arc<dyn Clock>) -> Self {
        let mut scratch = Self::from_bytes(Vec::new(), clock);
        scratch.mtime = Some(scratch.clock.now());
        scratch
    }

    /// Positional read into `dst`. Returns the number of bytes read; a
    /// short count (including 0) means end of content was reached.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> usize {
        let len = self.buf.len() as u64;
        if offset >= len {
            return 0;
        }
        let start = offset as usize;
        let n = dst.len().min(self.buf.len() - start);
        dst[..n].copy_from_slice(&self.buf[start..start + n]);
        n
    }

    /// Positional write of all of `src`. Extends the buffer as needed;
    /// any gap between the old end and `offset` reads as zeroes.
    pub fn write_at(&mut self, src: &[u8], offset: u64) {
        let end = offset as usize + src.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[offset as usize..end].copy_from_slice(src);
        self.mtime = Some(self.clock.now());
    }

    /// Set the logical size. Shrinking discards the tail; growing zero-fills.
    pub fn truncate(&mut self, size: u64) {
        self.buf.resize(size as usize, 0);
        self.mtime = Some(self.clock.now());
    }

    pub fn set_mtime(&mut self, mtime: SystemTime) {
        self.mtime = Some(mtime);
    }

    pub fn stat(&self) -> ScratchStat {
        ScratchStat {
            size: self.buf.len() as u64,
            mtime: self.mtime,
        }
    }

    /// Snapshot of the full content, for whole-object syncs.
    pub fn contents(&self) -> &[u8] {
        &self.buf
    }

    /// Release backing resources. Idempotent.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.buf = Vec::new();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Panics in debug builds if a destroyed scratch is still reachable
    /// from a live backing.
    pub fn check_invariants(&self) {
        debug_assert!(
            !self.destroyed,
            "destroyed scratch reachable from a live backing"
        );
    }
}
