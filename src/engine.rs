//! Cache engine: the component that owns the digest index and the backing
//! store together, and drives ingest, dedup, reload, and rebuild.
//!
//! The rebuild ordering here is the one invariant this whole crate exists to
//! get right. The old mmap must stay mapped until the new cache file is
//! fully written and renamed into place, and no record may be re-pointed at
//! the new mapping until it is live. Getting this backwards, by unmapping
//! before the replacement is durable, or by re-pointing a record before the
//! mapping it names exists, is exactly the class of bug this design is meant
//! to make unrepresentable.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    config::CacheConfig,
    digest::Digest,
    error::{CacheError, RebuildError, StoreError},
    index::DigestIndex,
    parser,
    record::{Provenance, Record},
    serializer,
    store::{JournalAppendHandle, Store},
};

/// Default average returned by [`CacheEngine::average_body_size`] before any
/// record has ever been seen.
const DEFAULT_AVERAGE_BODY_SIZE: u64 = 512;

/// Owns the digest index and the backing store, and coordinates the two.
pub struct CacheEngine {
    store: Store,
    index: DigestIndex,
    n_seen: u64,
    total_len_seen: u64,
}

impl CacheEngine {
    /// Opens (without yet populating) an engine rooted at `config`. Call
    /// [`reload`](Self::reload) to populate it from disk.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: Store::new(config),
            index: DigestIndex::new(),
            n_seen: 0,
            total_len_seen: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        self.store.config()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lookup(&self, digest: &Digest) -> Option<&Record> {
        self.index.find(digest)
    }

    /// Running mean body size across every record ever kept, or 512 before
    /// any record has been seen. Unlike a recomputed mean over the current
    /// index, this tracks `n_seen`/`total_len_seen` across the engine's
    /// lifetime, so a record later dropped by a rebuild still counts toward
    /// the average it was seen at.
    pub fn average_body_size(&self) -> u64 {
        if self.n_seen == 0 {
            return DEFAULT_AVERAGE_BODY_SIZE;
        }
        self.total_len_seen / self.n_seen
    }

    /// Drops every record and releases the current mmap generation, without
    /// touching what's on disk. A subsequent [`reload`](Self::reload)
    /// repopulates from the files as they stand.
    pub fn clear(&mut self) {
        self.index.clear();
        self.store.unmap();
        self.n_seen = 0;
        self.total_len_seen = 0;
    }

    /// Populates the engine from disk: maps the sealed cache file, parses
    /// every record out of it as zero-copy `Provenance::InCache` records,
    /// then parses the journal on top of that as owned
    /// `Provenance::InJournal` records, merging on digest collision. A
    /// truncated trailing journal entry left by a crash mid-append is simply
    /// dropped by the parser, not treated as corruption.
    pub fn reload(&mut self) -> Result<(), CacheError> {
        self.clear();

        let max_record_size = self.config().max_record_size;

        if let Some(mmap) = self.store.map_cache()? {
            let parsed = parser::parse_records(&mmap, true, max_record_size);
            debug!(count = parsed.len(), "parsed records from sealed cache");
            let records = parsed
                .into_iter()
                .map(|p| Record::new_mapped(p.digest, Arc::clone(&mmap), p.start..p.end, p.last_listed))
                .collect();
            // `provenance_hint = InCache` keeps the journal from being
            // reopened for content that is, by definition, already sealed.
            self.add_records(records, Provenance::InCache, false)?;
        }

        if let Some(journal_bytes) = self.store.read_journal()? {
            let parsed = parser::parse_records(&journal_bytes, true, max_record_size);
            debug!(count = parsed.len(), "parsed records from journal");
            let records = parsed
                .into_iter()
                .map(|p| Record::new_owned(p.digest, journal_bytes[p.start..p.end].to_vec(), p.last_listed))
                .collect();
            // `provenance_hint = InJournal` likewise keeps this already
            // on-disk content from being re-appended to the journal.
            self.add_records(records, Provenance::InJournal, false)?;
        }

        Ok(())
    }

    /// Parses `data` as zero or more concatenated microdescriptors and hands
    /// the result to [`add_records`](Self::add_records).
    ///
    /// Annotations are only recognized when `provenance_hint` is something
    /// other than [`Provenance::Nowhere`]: bytes a caller hands in as
    /// genuinely new, never-before-seen content have no annotation to
    /// parse, so treating a body's own `@`-prefixed line as metadata there
    /// would misparse caller data as a cache artifact.
    pub fn add_from_bytes(
        &mut self,
        data: &[u8],
        provenance_hint: Provenance,
        no_save: bool,
    ) -> Result<Vec<Digest>, CacheError> {
        let allow_annotations = provenance_hint != Provenance::Nowhere;
        let max_record_size = self.config().max_record_size;
        let parsed = parser::parse_records(data, allow_annotations, max_record_size);

        let records = parsed
            .into_iter()
            .map(|p| Record::new_owned(p.digest, p.body(data).to_vec(), p.last_listed))
            .collect();

        self.add_records(records, provenance_hint, no_save)
    }

    /// Inserts already-parsed `records` into the index, deduplicating by
    /// digest. A record whose digest is already present only has its
    /// `last_listed` merged forward; the incoming copy is dropped rather
    /// than replacing the existing body, since bodies are immutable once
    /// cached.
    ///
    /// The journal is only opened for genuinely new content: when
    /// `provenance_hint` is anything other than [`Provenance::Nowhere`], the
    /// records being inserted are already durable (loaded from the sealed
    /// cache or the journal itself during [`reload`](Self::reload)), so
    /// writing them to the journal again would be redundant. `no_save`
    /// suppresses journaling unconditionally.
    ///
    /// Triggers a [`rebuild`](Self::rebuild) afterwards if the journal has
    /// grown past the configured threshold.
    pub fn add_records(
        &mut self,
        records: Vec<Record>,
        provenance_hint: Provenance,
        no_save: bool,
    ) -> Result<Vec<Digest>, CacheError> {
        let mut added = Vec::new();
        if records.is_empty() {
            return Ok(added);
        }

        let needs_journal = provenance_hint == Provenance::Nowhere && !no_save;
        let mut journal = if needs_journal {
            Some(self.store.open_journal_append()?)
        } else {
            None
        };

        for mut record in records {
            self.n_seen += 1;

            if let Some(existing) = self.index.find_mut(&record.digest()) {
                existing.merge_last_listed(record.last_listed());
                continue;
            }

            record.set_no_save(no_save);

            if let Some(journal) = journal.as_mut() {
                serializer::dump(&mut JournalWrite(journal), &record, true)?;
                record.mark_journaled();
            } else if provenance_hint == Provenance::InJournal {
                // Already durable in the on-disk journal; mark it so without
                // writing it a second time.
                record.mark_journaled();
            }

            self.total_len_seen += record.body_len() as u64;
            added.push(record.digest());
            self.index.insert(record);
        }

        if let Some(journal) = journal {
            journal.finish()?;
        }

        if !added.is_empty() {
            self.maybe_rebuild()?;
        }

        Ok(added)
    }

    /// Checks the rebuild trigger and rebuilds if the journal has grown
    /// enough relative to the sealed cache to be worth folding in.
    fn maybe_rebuild(&mut self) -> Result<(), CacheError> {
        let journal_len = self.store.journal_len()?;
        let cache_len = self.store.mapped_len();
        let config = self.config();

        let should_rebuild = journal_len > config.rebuild_slack_bytes + cache_len
            && journal_len > config.rebuild_multiple * cache_len;

        if should_rebuild {
            info!(journal_len, cache_len, "rebuild threshold crossed");
            self.rebuild()?;
        }
        Ok(())
    }

    /// Folds every live record into a freshly-written sealed cache file,
    /// re-points every record at the new mapping, and truncates the journal.
    ///
    /// This is the one operation in the crate where getting the order of
    /// steps wrong has a use-after-free-shaped consequence, so they are not
    /// to be reordered:
    ///
    /// 1. Write every record's on-disk form to a new, separate file.
    /// 2. Rename it into place atomically.
    /// 3. Only now release the old mmap.
    /// 4. Map the new file.
    /// 5. Re-point every record at the new mapping.
    /// 6. Truncate the journal.
    ///
    /// Records with `no_save` set are skipped entirely: they stay resident
    /// and looked-up but are excluded from the written cache file.
    pub fn rebuild(&mut self) -> Result<(), RebuildError> {
        let mut writer = self
            .store
            .open_cache_replace()
            .map_err(|source| RebuildError::RebuildOpenReplacement { source })?;

        let mut ranges = Vec::with_capacity(self.index.len());
        for (digest, record) in self.index.iter().filter(|(_, r)| !r.no_save()) {
            let offset_before = writer.stream_position().map_err(|source| {
                RebuildError::RebuildFinalizeReplacement {
                    source: StoreError::FinalizeReplacement {
                        path: self.config().cache_path(),
                        source,
                    },
                }
            })?;
            let dump_result = serializer::dump(&mut writer, record, true)
                .map_err(|source| RebuildError::RebuildSerialize { source })?;
            let body_start = offset_before + dump_result.annotation_len as u64;
            let body_end = body_start + record.body_len() as u64;
            ranges.push((*digest, body_start as usize..body_end as usize));
        }

        writer
            .finish()
            .map_err(|source| RebuildError::RebuildFinalizeReplacement { source })?;

        // The old mapping is released only now that the replacement file is
        // durable on disk under its final name.
        self.store.unmap();

        match self.store.map_cache() {
            Ok(Some(mmap)) => {
                for (digest, range) in ranges {
                    if let Some(record) = self.index.find_mut(&digest) {
                        record.repoint_into_cache(Arc::clone(&mmap), range);
                    }
                }
            }
            Ok(None) => {
                warn!("rebuild wrote a cache file but it mapped as empty");
            }
            Err(source) => {
                warn!(%source, "remap after rebuild failed, attempting one recovery re-map");
                if self.store.try_remap_after_failure().is_none() {
                    return Err(RebuildError::RebuildRemap {
                        source,
                        live_records: self.index.len(),
                    });
                }
            }
        }

        self.store
            .truncate_journal()
            .map_err(|source| RebuildError::RebuildTruncateJournal { source })?;

        Ok(())
    }
}

/// Adapts [`JournalAppendHandle`] to [`std::io::Write`] so the serializer
/// can write to it without the serializer knowing about the store's types.
struct JournalWrite<'a>(&'a mut JournalAppendHandle);

impl std::io::Write for JournalWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
