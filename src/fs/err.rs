//! Error taxonomy for file inode operations.

use gcs_store::StorageError;
use thiserror::Error;

/// Errors surfaced by [`crate::fs::inode::FileInode`] operations.
#[derive(Debug, Error)]
pub enum FileError {
    /// The remote object no longer matches the inode's source generation:
    /// it was replaced or deleted externally. The VFS layer translates this
    /// into an unlink on the host.
    #[error("file was clobbered")]
    Clobbered {
        #[source]
        source: Option<Box<FileError>>,
    },

    /// Reads are refused while a streaming upload is in progress.
    #[error("cannot read a file when upload in progress")]
    ReadDuringUpload,

    /// Streaming writes must form a contiguous sequence starting at 0.
    #[error("out-of-order write at offset {offset}, expected {expected}")]
    OutOfOrderWrite { offset: u64, expected: u64 },

    /// The streaming upload pipeline latched a failure; the first error is
    /// preserved and re-surfaced by every subsequent write and by finalize.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// An object carried an unparseable `gcsfuse_mtime` metadata value.
    #[error("bad mtime metadata {value:?}: {source}")]
    BadMetadata {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// A bucket operation failed; `op` names the operation for context.
    #[error("{op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: StorageError,
    },
}

impl FileError {
    /// Wrap a bucket error with the name of the failed operation.
    pub(crate) fn storage(op: &'static str, source: StorageError) -> Self {
        Self::Storage { op, source }
    }

    /// A clobber signal with no underlying bucket error (stat mismatch).
    pub(crate) fn clobbered() -> Self {
        Self::Clobbered { source: None }
    }

    /// A clobber signal wrapping the bucket error that revealed it.
    pub(crate) fn clobbered_by(source: FileError) -> Self {
        Self::Clobbered {
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error (at the top level) is the clobber signal.
    pub fn is_clobbered(&self) -> bool {
        matches!(self, Self::Clobbered { .. })
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn storage_display_is_prefixed_with_op() {
        let err = FileError::storage(
            "StatObject",
            StorageError::Transport("connection reset".into()),
        );
        assert_eq!(err.to_string(), "StatObject: transport error: connection reset");
    }

    #[test]
    fn clobbered_preserves_source_chain() {
        let inner = FileError::storage(
            "NewReader",
            StorageError::NotFound {
                name: "a/b".into(),
            },
        );
        let err = FileError::clobbered_by(inner);
        assert!(err.is_clobbered());

        let source = err.source().expect("clobbered should expose its cause");
        assert_eq!(source.to_string(), "NewReader: object not found: a/b");
    }

    #[test]
    fn plain_clobbered_has_no_source() {
        assert!(FileError::clobbered().source().is_none());
    }
}
