//! Streaming buffered writes: append-shaped uploads that never materialize
//! the whole file locally.
//!
//! Writes fill fixed-size blocks drawn from a bounded pool; full blocks are
//! handed to a background uploader that streams them to the object store
//! through a chunked upload session. The upload only becomes a visible
//! object at finalize.

mod block;
mod handler;
mod upload_handler;

pub use handler::{BufferedWriteHandler, WriteFileInfo};

pub(crate) use block::{Block, BlockPool};
pub(crate) use upload_handler::UploadHandler;
