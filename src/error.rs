//! Error types for each fallible subsystem: one `snafu`-derived enum per
//! subsystem, each variant carrying enough context to log usefully.

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Errors from the backing store (C3): journal append, cache replace, mmap.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("failed to open journal file {}: {}", path.display(), source))]
    OpenJournal { path: PathBuf, source: io::Error },

    #[snafu(display("failed to open replacement cache file {}: {}", path.display(), source))]
    OpenReplacement { path: PathBuf, source: io::Error },

    #[snafu(display("failed to finalize replacement cache file {}: {}", path.display(), source))]
    FinalizeReplacement { path: PathBuf, source: io::Error },

    #[snafu(display("failed to map cache file {}: {}", path.display(), source))]
    Map { path: PathBuf, source: io::Error },

    #[snafu(display("failed to truncate journal file {}: {}", path.display(), source))]
    TruncateJournal { path: PathBuf, source: io::Error },

    #[snafu(display("failed to read journal file {}: {}", path.display(), source))]
    ReadJournal { path: PathBuf, source: io::Error },
}

/// Errors from parsing caller-supplied input that isn't just tolerated and
/// dropped (C7): specifically, decoding a digest handed in as hex text
/// rather than raw bytes.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParseError {
    #[snafu(display("invalid hex digest: {}", source))]
    InvalidHexDigest { source: hex::FromHexError },

    #[snafu(display("digest must be {} bytes, got {}", expected, got))]
    WrongLength { expected: usize, got: usize },
}

/// Errors from the serializer (C4) writing a single record to a stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SerializeError {
    #[snafu(display("I/O error while writing record: {}", source))]
    Io { source: io::Error },

    #[snafu(display("wrote {} of {} expected body bytes", written, expected))]
    ShortWrite { written: usize, expected: usize },
}

impl From<io::Error> for SerializeError {
    fn from(source: io::Error) -> Self {
        SerializeError::Io { source }
    }
}

/// Errors surfaced from `rebuild()`. Only rebuild catastrophes are surfaced
/// to the caller; everything else is recovered locally and logged.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RebuildError {
    #[snafu(display("failed to open replacement cache file: {}", source))]
    RebuildOpenReplacement { source: StoreError },

    #[snafu(display("failed to write or finalize replacement cache file: {}", source))]
    RebuildFinalizeReplacement { source: StoreError },

    #[snafu(display(
        "remap of newly-written cache file failed after the old mapping was released; \
         {} live record(s) now have a dangling body and the engine must not be used further",
        live_records
    ))]
    RebuildRemap {
        source: StoreError,
        live_records: usize,
    },

    #[snafu(display("failed to truncate journal after rebuild: {}", source))]
    RebuildTruncateJournal { source: StoreError },

    #[snafu(display("failed to serialize a record during rebuild: {}", source))]
    RebuildSerialize { source: SerializeError },
}

/// Umbrella error for operations that can fail in more than one subsystem.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CacheError {
    #[snafu(display("{}", source))]
    Store { source: StoreError },

    #[snafu(display("{}", source))]
    Rebuild { source: RebuildError },

    #[snafu(display("failed to serialize record to journal: {}", source))]
    Serialize { source: SerializeError },
}

impl From<StoreError> for CacheError {
    fn from(source: StoreError) -> Self {
        CacheError::Store { source }
    }
}

impl From<RebuildError> for CacheError {
    fn from(source: RebuildError) -> Self {
        CacheError::Rebuild { source }
    }
}

impl From<SerializeError> for CacheError {
    fn from(source: SerializeError) -> Self {
        CacheError::Serialize { source }
    }
}
