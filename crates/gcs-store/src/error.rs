//! Error types surfaced by bucket implementations.

use thiserror::Error;

/// Errors returned by [`crate::Bucket`] operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The named object (or the pinned generation of it) does not exist.
    #[error("object not found: {name}")]
    NotFound {
        /// The object name the operation addressed.
        name: String,
    },

    /// A generation or metageneration precondition did not hold.
    #[error("precondition failed: {message}")]
    Precondition {
        /// Human-readable description of the failed precondition.
        message: String,
    },

    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let nf = StorageError::NotFound {
            name: "a/b".into(),
        };
        assert!(nf.is_not_found());
        assert!(!nf.is_precondition());

        let pc = StorageError::Precondition {
            message: "generation mismatch".into(),
        };
        assert!(pc.is_precondition());
        assert!(!pc.is_not_found());
    }

    #[test]
    fn display_includes_object_name() {
        let nf = StorageError::NotFound {
            name: "dir/file.txt".into(),
        };
        assert_eq!(nf.to_string(), "object not found: dir/file.txt");
    }
}
