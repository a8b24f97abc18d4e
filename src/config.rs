//! Cache configuration.
//!
//! A single data directory plus a handful of size thresholds: where the two
//! files live, how far the journal must grow past the sealed cache before a
//! rebuild is worth it, and how large a single record's body may be.

use std::path::{Path, PathBuf};

/// Default name of the sealed cache file within the data directory.
pub const DEFAULT_CACHE_FILE_NAME: &str = "cached-microdescs";
/// Default name of the append-only journal file within the data directory.
pub const DEFAULT_JOURNAL_FILE_NAME: &str = "cached-microdescs.new";
/// Extra slack, in bytes, the journal must exceed the cache size by before a
/// rebuild is considered.
pub const DEFAULT_REBUILD_SLACK_BYTES: u64 = 16 * 1024;
/// Multiple of the cache size the journal must exceed before a rebuild is
/// considered.
pub const DEFAULT_REBUILD_MULTIPLE: u64 = 2;
/// Default cap on a single record's body size, enforced by the parser.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 8 * 1024 * 1024;

/// Configuration for a [`crate::engine::CacheEngine`].
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) cache_file_name: String,
    pub(crate) journal_file_name: String,
    pub(crate) rebuild_slack_bytes: u64,
    pub(crate) rebuild_multiple: u64,
    pub(crate) max_record_size: usize,
}

impl CacheConfig {
    /// Starts building a configuration rooted at `data_dir`.
    pub fn from_data_dir<P>(data_dir: P) -> CacheConfigBuilder
    where
        P: AsRef<Path>,
    {
        CacheConfigBuilder {
            data_dir: data_dir.as_ref().to_path_buf(),
            cache_file_name: None,
            journal_file_name: None,
            rebuild_slack_bytes: None,
            rebuild_multiple: None,
            max_record_size: None,
        }
    }

    /// Path to the sealed cache file.
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_file_name)
    }

    /// Path to the journal file.
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(&self.journal_file_name)
    }
}

/// Builder for [`CacheConfig`].
pub struct CacheConfigBuilder {
    data_dir: PathBuf,
    cache_file_name: Option<String>,
    journal_file_name: Option<String>,
    rebuild_slack_bytes: Option<u64>,
    rebuild_multiple: Option<u64>,
    max_record_size: Option<usize>,
}

impl CacheConfigBuilder {
    /// Overrides the sealed cache file's name. Defaults to `cached-microdescs`.
    #[allow(dead_code)]
    pub fn cache_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.cache_file_name = Some(name.into());
        self
    }

    /// Overrides the journal file's name. Defaults to `cached-microdescs.new`.
    #[allow(dead_code)]
    pub fn journal_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.journal_file_name = Some(name.into());
        self
    }

    /// Overrides the rebuild slack threshold. Defaults to 16 KiB.
    #[allow(dead_code)]
    pub fn rebuild_slack_bytes(mut self, bytes: u64) -> Self {
        self.rebuild_slack_bytes = Some(bytes);
        self
    }

    /// Overrides the rebuild multiple threshold. Defaults to 2.
    #[allow(dead_code)]
    pub fn rebuild_multiple(mut self, multiple: u64) -> Self {
        self.rebuild_multiple = Some(multiple);
        self
    }

    /// Overrides the maximum size, in bytes, of a single record's body.
    #[allow(dead_code)]
    pub fn max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = Some(bytes);
        self
    }

    /// Consumes this builder and constructs a [`CacheConfig`].
    pub fn build(self) -> CacheConfig {
        CacheConfig {
            data_dir: self.data_dir,
            cache_file_name: self
                .cache_file_name
                .unwrap_or_else(|| DEFAULT_CACHE_FILE_NAME.to_string()),
            journal_file_name: self
                .journal_file_name
                .unwrap_or_else(|| DEFAULT_JOURNAL_FILE_NAME.to_string()),
            rebuild_slack_bytes: self.rebuild_slack_bytes.unwrap_or(DEFAULT_REBUILD_SLACK_BYTES),
            rebuild_multiple: self.rebuild_multiple.unwrap_or(DEFAULT_REBUILD_MULTIPLE),
            max_record_size: self.max_record_size.unwrap_or(DEFAULT_MAX_RECORD_SIZE),
        }
    }
}
