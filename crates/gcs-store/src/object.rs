//! Object records returned by the store.

use std::collections::HashMap;
use std::time::SystemTime;

/// The minimal projection of a remote object that most callers need.
///
/// A `MinObject` is immutable while held; callers replace the whole record
/// when an operation returns a newer one.
#[derive(Debug, Clone, PartialEq)]
pub struct MinObject {
    /// Full object key within the bucket.
    pub name: String,

    /// Content generation. Each full-object replacement bumps this.
    pub generation: i64,

    /// Metadata generation within `generation`. Metadata-only updates bump
    /// this without changing `generation`.
    pub meta_generation: i64,

    /// Content length in bytes.
    pub size: u64,

    /// Server-side update time.
    pub updated: SystemTime,

    /// User metadata key/value pairs.
    pub metadata: HashMap<String, String>,

    /// `Content-Encoding` of the stored bytes, if any.
    pub content_encoding: Option<String>,
}

impl MinObject {
    /// Whether the stored bytes are gzip-encoded and readers should request
    /// the compressed representation.
    pub fn has_gzip_content_encoding(&self) -> bool {
        self.content_encoding
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("gzip"))
    }
}

impl Default for MinObject {
    fn default() -> Self {
        Self {
            name: String::new(),
            generation: 0,
            meta_generation: 0,
            size: 0,
            updated: SystemTime::UNIX_EPOCH,
            metadata: HashMap::new(),
            content_encoding: None,
        }
    }
}

/// Attributes omitted from listings and only returned when a stat explicitly
/// asks for them. Full-object rewrites must carry these forward.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtendedObjectAttributes {
    /// Access control entries, serialized by the store.
    pub acl: Vec<String>,

    /// Entity that owns the object.
    pub owner: Option<String>,

    /// `Cache-Control` header value, if set.
    pub cache_control: Option<String>,
}

/// A full object record: the minimal projection plus extended attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    pub min: MinObject,
    pub extended: ExtendedObjectAttributes,
}

impl Object {
    pub fn new(min: MinObject, extended: Option<ExtendedObjectAttributes>) -> Self {
        Self {
            min,
            extended: extended.unwrap_or_default(),
        }
    }

    /// Project down to the minimal record.
    pub fn to_min(&self) -> MinObject {
        self.min.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_detection_is_case_insensitive() {
        let mut obj = MinObject {
            content_encoding: Some("GZip".into()),
            ..MinObject::default()
        };
        assert!(obj.has_gzip_content_encoding());

        obj.content_encoding = Some("identity".into());
        assert!(!obj.has_gzip_content_encoding());

        obj.content_encoding = None;
        assert!(!obj.has_gzip_content_encoding());
    }
}
