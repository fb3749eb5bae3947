//! Local content backings: the mutable scratch buffer and its shared cache.

mod cache;
mod scratch;

pub use cache::{CacheKey, ContentCache};
pub use scratch::{Scratch, ScratchStat, SharedScratch};
