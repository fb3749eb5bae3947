//! The `Bucket` trait: the narrow port the file system consumes.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::object::{ExtendedObjectAttributes, MinObject, Object};
use crate::request::{
    CreateObjectRequest, ReadObjectRequest, StatObjectRequest, UpdateObjectRequest,
};

/// Sequential byte stream over one generation of an object.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// A staged chunked-upload session for one object.
///
/// Chunks must be appended in order. The object only becomes visible when
/// [`finalize`](Self::finalize) succeeds; abandoning the writer abandons the
/// upload.
#[async_trait]
pub trait ChunkWriter: Send {
    /// Append `data` to the staged upload.
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), StorageError>;

    /// Close the session, stamping `metadata` on the new object, and return
    /// the resulting record with its freshly assigned generation.
    async fn finalize(
        self: Box<Self>,
        metadata: HashMap<String, String>,
    ) -> Result<Object, StorageError>;
}

/// Operations the file layer needs from the object store.
///
/// Every call takes a [`CancellationToken`]; implementations observing a
/// fired token return [`StorageError::Cancelled`] without side effects.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Name of the bucket this handle addresses.
    fn name(&self) -> &str;

    /// Fetch the current record for an object. Extended attributes are only
    /// populated when the request asks for them.
    async fn stat_object(
        &self,
        ctx: &CancellationToken,
        req: &StatObjectRequest,
    ) -> Result<(MinObject, Option<ExtendedObjectAttributes>), StorageError>;

    /// Open a reader pinned to one generation. `NotFound` here means the
    /// pinned generation has been replaced or deleted.
    async fn new_reader(
        &self,
        ctx: &CancellationToken,
        req: &ReadObjectRequest,
    ) -> Result<ObjectReader, StorageError>;

    /// Replace the whole object, subject to the request's preconditions.
    async fn create_object(
        &self,
        ctx: &CancellationToken,
        req: &CreateObjectRequest,
    ) -> Result<Object, StorageError>;

    /// Apply a preconditioned metadata patch.
    async fn update_object(
        &self,
        ctx: &CancellationToken,
        req: &UpdateObjectRequest,
    ) -> Result<Object, StorageError>;

    /// Begin a chunked upload session for `name`.
    async fn create_object_chunk_writer(
        &self,
        ctx: &CancellationToken,
        name: &str,
    ) -> Result<Box<dyn ChunkWriter>, StorageError>;
}
