//! The bucket façade consumed by file inodes.
//!
//! Wraps a raw [`Bucket`] and adds the one compound operation the inode
//! needs: replacing a whole object from a scratch buffer under a
//! generation precondition, so that concurrent external mutation surfaces
//! as a precondition failure rather than silent data loss.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use gcs_store::{
    Bucket, ChunkWriter, CreateObjectRequest, ExtendedObjectAttributes, MinObject, Object,
    ObjectReader, ReadObjectRequest, StatObjectRequest, StorageError, UpdateObjectRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::fs::content::SharedScratch;
use crate::fs::inode::Name;
use crate::fs::meta::{format_mtime, MTIME_METADATA_KEY};

/// Cheaply cloneable handle over the raw bucket.
#[derive(Clone)]
pub struct SyncerBucket {
    inner: Arc<dyn Bucket>,
}

impl SyncerBucket {
    pub fn new(inner: Arc<dyn Bucket>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn stat_object(
        &self,
        ctx: &CancellationToken,
        req: &StatObjectRequest,
    ) -> Result<(MinObject, Option<ExtendedObjectAttributes>), StorageError> {
        self.inner.stat_object(ctx, req).await
    }

    pub async fn new_reader(
        &self,
        ctx: &CancellationToken,
        req: &ReadObjectRequest,
    ) -> Result<ObjectReader, StorageError> {
        self.inner.new_reader(ctx, req).await
    }

    pub async fn update_object(
        &self,
        ctx: &CancellationToken,
        req: &UpdateObjectRequest,
    ) -> Result<Object, StorageError> {
        self.inner.update_object(ctx, req).await
    }

    pub async fn create_object_chunk_writer(
        &self,
        ctx: &CancellationToken,
        name: &str,
    ) -> Result<Box<dyn ChunkWriter>, StorageError> {
        self.inner.create_object_chunk_writer(ctx, name).await
    }

    pub async fn finalize_upload(
        &self,
        writer: Box<dyn ChunkWriter>,
        metadata: HashMap<String, String>,
    ) -> Result<Object, StorageError> {
        writer.finalize(metadata).await
    }

    /// Replace the object named by `name` with the scratch's contents.
    ///
    /// `latest` is the freshest record the caller holds: its generation pair
    /// becomes the write precondition, and its metadata (including extended
    /// attributes the caller just re-fetched) is carried into the new
    /// generation. `None` means the file has never been persisted, so the
    /// write is preconditioned on the object not existing.
    ///
    /// A dirty scratch mtime is stamped as [`MTIME_METADATA_KEY`].
    pub async fn sync_object(
        &self,
        ctx: &CancellationToken,
        name: &Name,
        latest: Option<&Object>,
        scratch: &SharedScratch,
    ) -> Result<Object, StorageError> {
        let (contents, dirty_mtime) = {
            let scratch = scratch.lock();
            let stat = scratch.stat();
            (Bytes::copy_from_slice(scratch.contents()), stat.mtime)
        };

        let mut metadata = latest
            .map(|o| o.min.metadata.clone())
            .unwrap_or_default();
        if let Some(mtime) = dirty_mtime {
            metadata.insert(MTIME_METADATA_KEY.to_owned(), format_mtime(mtime));
        }

        let (generation_precondition, meta_generation_precondition) = match latest {
            Some(latest) => (
                Some(latest.min.generation),
                Some(latest.min.meta_generation),
            ),
            // Never persisted: the write must create the object.
            None => (Some(0), None),
        };

        let req = CreateObjectRequest {
            name: name.gcs_object_name().to_owned(),
            contents,
            generation_precondition,
            meta_generation_precondition,
            metadata,
            content_encoding: latest.and_then(|o| o.min.content_encoding.clone()),
        };

        debug!(
            object = %name,
            size = req.contents.len(),
            generation_precondition = ?req.generation_precondition,
            "syncing object"
        );
        self.inner.create_object(ctx, &req).await
    }
}
