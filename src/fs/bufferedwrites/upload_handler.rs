//! Background worker that streams filled blocks to the object store.

use std::collections::HashMap;
use std::sync::Arc;

use gcs_store::{ChunkWriter, Object};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::fs::err::FileError;
use crate::fs::syncer::SyncerBucket;

use super::Block;

/// One-shot failure slot shared between the worker and the front end. Only
/// the first failure is kept; later ones are dropped.
type FailureSlot = Arc<Mutex<Option<String>>>;

fn latch(slot: &FailureSlot, msg: String) {
    let mut slot = slot.lock();
    if slot.is_none() {
        warn!(error = %msg, "buffered upload failed");
        *slot = Some(msg);
    }
}

/// Streams blocks to a chunked upload session on a background task.
///
/// The chunk writer is created lazily when the first block arrives, so an
/// upload that never sees a block costs no bucket calls until finalize.
/// After any failure the worker keeps draining (and recycling) blocks but
/// stops uploading; the preserved first error surfaces on the next write
/// and on finalize.
pub(crate) struct UploadHandler {
    object_name: String,
    bucket: SyncerBucket,
    ctx: CancellationToken,
    upload_tx: Option<UnboundedSender<Block>>,
    worker: Option<JoinHandle<Option<Box<dyn ChunkWriter>>>>,
    failure: FailureSlot,
}

impl UploadHandler {
    pub(crate) fn new(
        object_name: String,
        bucket: SyncerBucket,
        ctx: CancellationToken,
        free_tx: UnboundedSender<Block>,
    ) -> Self {
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let failure = FailureSlot::default();
        let worker = tokio::spawn(upload_worker(
            object_name.clone(),
            bucket.clone(),
            ctx.clone(),
            upload_rx,
            free_tx,
            Arc::clone(&failure),
        ));
        Self {
            object_name,
            bucket,
            ctx,
            upload_tx: Some(upload_tx),
            worker: Some(worker),
            failure,
        }
    }

    /// The preserved first failure, if any.
    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Record a failure on behalf of the front end (e.g. an out-of-order
    /// write), poisoning the rest of the upload.
    pub(crate) fn latch_failure(&self, msg: String) {
        latch(&self.failure, msg);
    }

    /// Hand a filled block to the worker.
    pub(crate) fn enqueue(&self, block: Block) -> Result<(), FileError> {
        match &self.upload_tx {
            Some(tx) => tx
                .send(block)
                .map_err(|_| FileError::UploadFailed("upload worker exited".to_owned())),
            None => Err(FileError::UploadFailed(
                "upload already finalized".to_owned(),
            )),
        }
    }

    /// Close the block stream, wait for the worker to drain, and finalize
    /// the upload session with `metadata` stamped on the new object.
    pub(crate) async fn finalize(
        &mut self,
        metadata: HashMap<String, String>,
    ) -> Result<Object, FileError> {
        self.upload_tx.take();

        let writer = match self.worker.take() {
            Some(handle) => handle
                .await
                .map_err(|e| FileError::UploadFailed(format!("upload worker panicked: {e}")))?,
            None => None,
        };

        if let Some(msg) = self.failure() {
            return Err(FileError::UploadFailed(msg));
        }

        // No block ever arrived: the session was never opened. Open it now
        // so empty uploads still produce an object.
        let writer = match writer {
            Some(writer) => writer,
            None => self
                .bucket
                .create_object_chunk_writer(&self.ctx, &self.object_name)
                .await
                .map_err(|e| FileError::storage("CreateObjectChunkWriter", e))?,
        };

        self.bucket
            .finalize_upload(writer, metadata)
            .await
            .map_err(|e| FileError::storage("FinalizeUpload", e))
    }

    /// Abandon the upload: cancel in-flight bucket calls and stop the
    /// worker. Already-uploaded chunks are left to the store to reap.
    pub(crate) fn destroy(&mut self) {
        self.ctx.cancel();
        self.upload_tx.take();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn upload_worker(
    object_name: String,
    bucket: SyncerBucket,
    ctx: CancellationToken,
    mut upload_rx: UnboundedReceiver<Block>,
    free_tx: UnboundedSender<Block>,
    failure: FailureSlot,
) -> Option<Box<dyn ChunkWriter>> {
    let mut writer: Option<Box<dyn ChunkWriter>> = None;

    while let Some(block) = upload_rx.recv().await {
        if failure.lock().is_none() {
            if writer.is_none() {
                match bucket.create_object_chunk_writer(&ctx, &object_name).await {
                    Ok(w) => writer = Some(w),
                    Err(e) => latch(&failure, format!("createObjectWriter: {e}")),
                }
            }
            if let Some(w) = writer.as_mut() {
                if let Err(e) = w.write_chunk(block.bytes()).await {
                    latch(&failure, format!("uploadBlock: {e}"));
                }
            }
        }
        // Recycle the block whether or not it was uploaded.
        let _ = free_tx.send(block);
    }

    writer
}
