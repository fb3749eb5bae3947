//! Reusable upload blocks and the bounded pool that hands them out.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::fs::err::FileError;

/// One fixed-capacity upload buffer. Holds a permit from the process-wide
/// block budget for as long as it is alive.
pub(crate) struct Block {
    buf: BytesMut,
    capacity: usize,
    _permit: OwnedSemaphorePermit,
}

impl Block {
    fn new(capacity: usize, permit: OwnedSemaphorePermit) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            _permit: permit,
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    /// Append as much of `src` as fits. Returns the number of bytes taken.
    pub(crate) fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.capacity - self.buf.len());
        self.buf.extend_from_slice(&src[..n]);
        n
    }

    pub(crate) fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Per-file block allocator, bounded twice over: at most `max_blocks` live
/// blocks for this file, and one permit per block from the process-wide
/// semaphore. Released blocks come back through the free list for reuse.
pub(crate) struct BlockPool {
    block_size: usize,
    max_blocks: u64,
    created: u64,
    free_tx: UnboundedSender<Block>,
    free_rx: UnboundedReceiver<Block>,
    global_budget: Arc<Semaphore>,
}

impl BlockPool {
    pub(crate) fn new(block_size: usize, max_blocks: u64, global_budget: Arc<Semaphore>) -> Self {
        let (free_tx, free_rx) = mpsc::unbounded_channel();
        Self {
            block_size,
            max_blocks,
            created: 0,
            free_tx,
            free_rx,
            global_budget,
        }
    }

    /// Sender through which consumers return spent blocks.
    pub(crate) fn free_sender(&self) -> UnboundedSender<Block> {
        self.free_tx.clone()
    }

    /// Obtain an empty block. Prefers a recycled one; mints a new block
    /// while under the per-file cap (waiting on the global budget if
    /// needed); otherwise waits for the uploader to return one.
    pub(crate) async fn get(&mut self) -> Result<Block, FileError> {
        if let Ok(mut block) = self.free_rx.try_recv() {
            block.reset();
            return Ok(block);
        }

        if self.created < self.max_blocks {
            let permit = Arc::clone(&self.global_budget)
                .acquire_owned()
                .await
                .map_err(|_| FileError::UploadFailed("global block budget closed".to_owned()))?;
            self.created += 1;
            return Ok(Block::new(self.block_size, permit));
        }

        match self.free_rx.recv().await {
            Some(mut block) => {
                block.reset();
                Ok(block)
            }
            None => Err(FileError::UploadFailed(
                "block free list closed".to_owned(),
            )),
        }
    }
}
