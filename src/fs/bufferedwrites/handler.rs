//! The buffered write handler: the streaming content backing of an inode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use gcs_store::Object;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::WriteConfig;
use crate::fs::err::FileError;
use crate::fs::meta::{format_mtime, MTIME_METADATA_KEY};
use crate::fs::syncer::SyncerBucket;

use super::{Block, BlockPool, UploadHandler};

/// Logical size and mtime of an in-flight streaming write, reported
/// synchronously for stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteFileInfo {
    pub total_size: u64,
    pub mtime: SystemTime,
}

/// Single-writer, append-oriented uploader.
///
/// Accepts writes whose offsets form a contiguous sequence from 0, spills
/// full blocks to the background uploader, and turns into a remote object
/// at [`finalize`](Self::finalize). The recorded mtime (creation time by
/// default, or the last explicit [`set_mtime`](Self::set_mtime)) is stamped
/// as object metadata when the upload finalizes.
pub struct BufferedWriteHandler {
    total_size: u64,
    mtime: SystemTime,
    current: Option<Block>,
    pool: BlockPool,
    uploader: UploadHandler,
}

impl BufferedWriteHandler {
    pub fn new(
        object_name: &str,
        bucket: SyncerBucket,
        config: &WriteConfig,
        global_budget: Arc<Semaphore>,
        clock: &dyn Clock,
    ) -> Self {
        let pool = BlockPool::new(
            config.block_size_bytes(),
            config.max_blocks_per_file,
            global_budget,
        );
        // The upload outlives any single caller operation, so it carries
        // its own cancellation token; destroy() fires it.
        let uploader = UploadHandler::new(
            object_name.to_owned(),
            bucket,
            CancellationToken::new(),
            pool.free_sender(),
        );
        Self {
            total_size: 0,
            mtime: clock.now(),
            current: None,
            pool,
            uploader,
        }
    }

    /// Append `data` at `offset`, which must equal the bytes written so
    /// far. A non-contiguous offset fails with `OutOfOrderWrite` and
    /// poisons the upload; any prior pipeline failure fails fast with
    /// `UploadFailed` carrying the first error.
    pub async fn write(&mut self, data: &[u8], offset: u64) -> Result<(), FileError> {
        if let Some(msg) = self.uploader.failure() {
            return Err(FileError::UploadFailed(msg));
        }

        if offset != self.total_size {
            let err = FileError::OutOfOrderWrite {
                offset,
                expected: self.total_size,
            };
            self.uploader.latch_failure(err.to_string());
            return Err(err);
        }

        let mut rest = data;
        while !rest.is_empty() {
            let mut block = match self.current.take() {
                Some(block) => block,
                None => self.pool.get().await?,
            };

            let n = block.fill(rest);
            rest = &rest[n..];
            self.total_size += n as u64;

            if block.is_full() {
                self.uploader.enqueue(block)?;
            } else {
                self.current = Some(block);
            }
        }
        Ok(())
    }

    /// Record the mtime to stamp on the object at finalize.
    pub fn set_mtime(&mut self, mtime: SystemTime) {
        self.mtime = mtime;
    }

    pub fn write_file_info(&self) -> WriteFileInfo {
        WriteFileInfo {
            total_size: self.total_size,
            mtime: self.mtime,
        }
    }

    /// Flush the partial block, close the upload session, and return the
    /// new object record. A poisoned upload returns the preserved error.
    pub async fn finalize(&mut self) -> Result<Object, FileError> {
        if let Some(block) = self.current.take() {
            if !block.is_empty() {
                self.uploader.enqueue(block)?;
            }
        }

        let mut metadata = HashMap::new();
        metadata.insert(MTIME_METADATA_KEY.to_owned(), format_mtime(self.mtime));
        self.uploader.finalize(metadata).await
    }

    /// Abandon the upload without finalizing.
    pub fn destroy(&mut self) {
        self.uploader.destroy();
    }
}
