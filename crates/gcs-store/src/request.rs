//! Request structs for bucket operations.

use std::collections::HashMap;

use bytes::Bytes;

/// Request for [`crate::Bucket::stat_object`].
#[derive(Debug, Clone, Default)]
pub struct StatObjectRequest {
    /// Object key to stat.
    pub name: String,

    /// Bypass any server-side or client-side stat caching and hit the
    /// backend directly.
    pub force_fetch_from_backend: bool,

    /// Also return [`crate::ExtendedObjectAttributes`]. Listings omit them,
    /// so callers that rewrite full objects must ask explicitly.
    pub return_extended_object_attributes: bool,
}

/// Request for [`crate::Bucket::new_reader`].
///
/// The read is pinned to `generation`: if that exact generation no longer
/// exists the store answers `NotFound`, even when a newer generation does.
#[derive(Debug, Clone)]
pub struct ReadObjectRequest {
    pub name: String,
    pub generation: i64,

    /// Request the stored (compressed) representation rather than the
    /// decoded one. Set for gzip-encoded objects.
    pub read_compressed: bool,
}

/// Request for [`crate::Bucket::update_object`]: a preconditioned metadata
/// patch that does not touch object content.
#[derive(Debug, Clone, Default)]
pub struct UpdateObjectRequest {
    pub name: String,
    pub generation: i64,

    /// The patch only applies while the object's metageneration equals this.
    pub meta_generation_precondition: Option<i64>,

    /// Metadata entries to merge. A `None` value deletes the key.
    pub metadata: HashMap<String, Option<String>>,
}

/// Request for [`crate::Bucket::create_object`]: a whole-object write.
#[derive(Debug, Clone, Default)]
pub struct CreateObjectRequest {
    pub name: String,
    pub contents: Bytes,

    /// When `Some(0)` the object must not exist; when `Some(g)` the live
    /// generation must equal `g`. Violations surface as `Precondition`.
    pub generation_precondition: Option<i64>,

    /// When set, the live metageneration must equal this value.
    pub meta_generation_precondition: Option<i64>,

    /// Full replacement metadata for the new generation.
    pub metadata: HashMap<String, String>,

    /// `Content-Encoding` to record for the new generation.
    pub content_encoding: Option<String>,
}
