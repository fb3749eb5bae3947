//! Module for file-system configuration settings.
//!
//! User configurations may be specified in a configuration file.

use std::path::Path;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Write-path configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WriteConfig {
    /// Stream appends directly to the object store instead of buffering the
    /// whole file locally. Only eligible inodes (new files, or files whose
    /// source object is empty) use this path.
    pub experimental_streaming_writes: bool,

    /// Size of one upload block in MiB.
    pub block_size_mb: u64,

    /// Maximum number of upload blocks a single file may hold at once.
    pub max_blocks_per_file: u64,

    /// Process-wide upload block budget, shared across all files.
    pub global_max_blocks: u64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            experimental_streaming_writes: false,
            block_size_mb: 32,
            max_blocks_per_file: 16,
            global_max_blocks: 64,
        }
    }
}

impl WriteConfig {
    /// Block size in bytes.
    pub fn block_size_bytes(&self) -> usize {
        usize::try_from(self.block_size_mb).unwrap_or(usize::MAX) << 20
    }
}

/// Shared scratch-content cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ContentCacheConfig {
    /// Keep downloaded scratch contents in a process-wide cache keyed by
    /// `(bucket, object)` and re-use them across inode materializations.
    pub enabled: bool,

    /// Soft cap on total cached bytes. The cache evicts least-recently-used
    /// entries to get back under this limit.
    pub max_size: ByteSize,
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: ByteSize::mib(256),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub write: WriteConfig,
    pub content_cache: ContentCacheConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Validate the correctness of the configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.write.block_size_mb == 0 {
            errors.push("block-size-mb must be at least 1".to_owned());
        }
        if self.write.max_blocks_per_file == 0 {
            errors.push("max-blocks-per-file must be at least 1".to_owned());
        }
        if self.write.global_max_blocks < self.write.max_blocks_per_file {
            errors.push(format!(
                "global-max-blocks ({}) must not be smaller than max-blocks-per-file ({})",
                self.write.global_max_blocks, self.write.max_blocks_per_file
            ));
        }
        if self.content_cache.enabled && self.content_cache.max_size.as_u64() == 0 {
            errors.push("content-cache.max-size must be non-zero when the cache is enabled".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Loads config from a single TOML file and validates it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config
            .validate()
            .map_err(ConfigError::ValidationErrors)?;
        Ok(config)
    }
}
