//! Narrow SDK over a flat, versioned object store.
//!
//! Objects are identified by `(name, generation, metageneration)`. Every
//! mutating operation supports optimistic-concurrency preconditions; a failed
//! precondition is a first-class error so that callers can implement
//! clobber detection on top.

mod bucket;
mod error;
mod object;
mod request;

pub use bucket::{Bucket, ChunkWriter, ObjectReader};
pub use error::StorageError;
pub use object::{ExtendedObjectAttributes, MinObject, Object};
pub use request::{
    CreateObjectRequest, ReadObjectRequest, StatObjectRequest, UpdateObjectRequest,
};
