//! The two files on disk and the live memory map over the sealed cache file.
//!
//! The cache file is replaced with a tmp-file-then-rename so a crash
//! mid-write never corrupts the previous generation; the mmap is recreated
//! on demand and can be dropped and remapped as rebuild swaps in a freshly
//! renamed file.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Seek, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use memmap2::Mmap;
use snafu::ResultExt;
use tracing::warn;

use crate::{
    config::CacheConfig,
    error::{
        FinalizeReplacementSnafu, MapSnafu, OpenJournalSnafu, OpenReplacementSnafu,
        StoreError, TruncateJournalSnafu,
    },
};

#[cfg(unix)]
fn create_with_mode(path: &Path, mode: u32) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn create_with_mode(path: &Path, _mode: u32) -> io::Result<File> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(unix)]
fn append_with_mode(path: &Path, mode: u32) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .append(true)
        .create(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn append_with_mode(path: &Path, _mode: u32) -> io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

const FILE_MODE: u32 = 0o600;

/// A write handle for the journal file, opened in append mode.
pub(crate) struct JournalAppendHandle {
    path: PathBuf,
    file: BufWriter<File>,
}

impl JournalAppendHandle {
    pub(crate) fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    pub(crate) fn finish(mut self) -> Result<(), StoreError> {
        self.file
            .flush()
            .and_then(|_| self.file.get_ref().sync_data())
            .context(OpenJournalSnafu { path: self.path })
    }
}

/// A write handle that, on [`finish`](Self::finish), atomically replaces the
/// sealed cache file by writing to a temporary sibling and renaming it into
/// place.
pub(crate) struct CacheReplaceWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: BufWriter<File>,
}

impl CacheReplaceWriter {
    /// Current position within the file being written, used by the
    /// serializer to record a record's body offset before writing it.
    pub(crate) fn stream_position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    pub(crate) fn finish(mut self) -> Result<(), StoreError> {
        self.file
            .flush()
            .and_then(|_| self.file.get_ref().sync_all())
            .context(OpenReplacementSnafu { path: &self.tmp_path })?;
        fs::rename(&self.tmp_path, &self.final_path).context(FinalizeReplacementSnafu {
            path: &self.final_path,
        })
    }
}

impl Write for CacheReplaceWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// The two files and the live mmap generation over the sealed cache file.
pub(crate) struct Store {
    config: CacheConfig,
    mmap: Option<Arc<Mmap>>,
}

impl Store {
    pub(crate) fn new(config: CacheConfig) -> Self {
        Self { config, mmap: None }
    }

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Opens the journal file for appending, creating it with mode 0600 if
    /// absent.
    pub(crate) fn open_journal_append(&self) -> Result<JournalAppendHandle, StoreError> {
        let path = self.config.journal_path();
        let file = append_with_mode(&path, FILE_MODE).context(OpenJournalSnafu { path: path.clone() })?;
        Ok(JournalAppendHandle {
            path,
            file: BufWriter::new(file),
        })
    }

    /// Opens a replacement cache file. The write lands in a `.tmp` sibling
    /// until [`CacheReplaceWriter::finish`] renames it into place, so a
    /// crash mid-rebuild leaves the previous cache file untouched.
    pub(crate) fn open_cache_replace(&self) -> Result<CacheReplaceWriter, StoreError> {
        let final_path = self.config.cache_path();
        let tmp_path = final_path.with_extension("tmp");
        let file =
            create_with_mode(&tmp_path, FILE_MODE).context(OpenReplacementSnafu { path: &tmp_path })?;
        Ok(CacheReplaceWriter {
            tmp_path,
            final_path,
            file: BufWriter::new(file),
        })
    }

    /// Maps the cache file read-only. Returns `None` if the file is absent
    /// or empty; a missing or zero-length cache file just means there is
    /// nothing to map yet.
    pub(crate) fn map_cache(&mut self) -> Result<Option<Arc<Mmap>>, StoreError> {
        let path = self.config.cache_path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.mmap = None;
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Map { path, source }),
        };
        let len = file.metadata().context(MapSnafu { path: &path })?.len();
        if len == 0 {
            self.mmap = None;
            return Ok(None);
        }
        // SAFETY: the cache file is only ever mutated by this process, via
        // `open_cache_replace`'s write-then-rename, never in place; no other
        // writer can invalidate this mapping out from under us.
        let mmap = unsafe { Mmap::map(&file) }.context(MapSnafu { path })?;
        let mmap = Arc::new(mmap);
        self.mmap = Some(Arc::clone(&mmap));
        Ok(Some(mmap))
    }

    /// Releases the engine's handle to the current mmap generation. Records
    /// still aliasing it (there should be none mid-rebuild, see
    /// `engine::rebuild`) keep it alive via their own `Arc` clone until they
    /// are re-pointed or dropped.
    pub(crate) fn unmap(&mut self) {
        self.mmap = None;
    }

    /// Size in bytes of the currently-mapped cache, or 0 if unmapped.
    pub(crate) fn mapped_len(&self) -> u64 {
        self.mmap.as_ref().map_or(0, |m| m.len() as u64)
    }

    /// Current size of the journal file on disk, or 0 if absent.
    pub(crate) fn journal_len(&self) -> Result<u64, StoreError> {
        let path = self.config.journal_path();
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(StoreError::ReadJournal { path, source }),
        }
    }

    /// Replaces the journal with empty contents.
    pub(crate) fn truncate_journal(&self) -> Result<(), StoreError> {
        let path = self.config.journal_path();
        fs::write(&path, []).context(TruncateJournalSnafu { path })
    }

    /// Reads the full journal file, if present. A missing journal is not an
    /// error.
    pub(crate) fn read_journal(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.config.journal_path();
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::ReadJournal { path, source }),
        }
    }

    /// A last-ditch attempt to recover mapping visibility of the cache file
    /// after a remap failure, since the rename that produced it already
    /// succeeded. Logs and returns `None` rather than erroring again if this
    /// also fails.
    pub(crate) fn try_remap_after_failure(&mut self) -> Option<Arc<Mmap>> {
        match self.map_cache() {
            Ok(mmap) => mmap,
            Err(error) => {
                warn!(%error, "defensive re-map after rebuild failure also failed");
                None
            }
        }
    }
}
