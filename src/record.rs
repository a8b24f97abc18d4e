//! A single immutable microdescriptor record, and the provenance of its body
//! bytes.
//!
//! The body is modeled as a tagged variant rather than a raw pointer that is
//! sometimes owned and sometimes a view into an mmap: either an owned heap
//! allocation, or a zero-copy slice of a shared, reference-counted memory
//! map. Letting a record hold a clone of the mmap handle means the mapping
//! stays valid for as long as any record still aliases it, even across a
//! rebuild that has moved the engine on to a newer generation.

use std::{ops::Range, sync::Arc};

use chrono::{DateTime, Utc};
use memmap2::Mmap;

use crate::digest::{Digest, KeyRelease};

/// Where a record's body bytes currently live.
///
/// This is derived from [`Body`] rather than stored independently, so that
/// "provenance" and "how the bytes are actually held" can never disagree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// The body aliases the live mmap of the sealed cache file.
    InCache,
    /// The body is an owned heap copy that has been written to the journal.
    InJournal,
    /// The body is an owned heap copy that exists only in memory.
    Nowhere,
}

/// The storage representation of a record's body.
#[derive(Debug)]
pub(crate) enum Body {
    /// An exclusively-owned heap allocation. `journaled` distinguishes
    /// [`Provenance::InJournal`] from [`Provenance::Nowhere`] without adding
    /// a second, independently-mutable field.
    Owned { bytes: Vec<u8>, journaled: bool },
    /// A zero-copy view into a shared memory map. Kept alive for as long as
    /// any record (or the engine itself) holds a clone of `mmap`.
    Mapped { mmap: Arc<Mmap>, range: Range<usize> },
}

impl Body {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Body::Owned { bytes, .. } => bytes,
            Body::Mapped { mmap, range } => &mmap[range.clone()],
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Body::Owned { bytes, .. } => bytes.len(),
            Body::Mapped { range, .. } => range.len(),
        }
    }
}

/// Key material parsed from a record's body.
///
/// Decoding the actual key is out of this crate's scope (it belongs to the
/// directory protocol's cryptographic collaborator); this wraps whatever
/// opaque bytes the parser captured and calls [`KeyRelease::release`] on
/// drop.
#[derive(Debug, Default)]
pub struct OnionKey(Vec<u8>);

impl OnionKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl KeyRelease for OnionKey {}

/// One immutable, digest-identified microdescriptor.
#[derive(Debug)]
pub struct Record {
    digest: Digest,
    body: Body,
    last_listed: Option<DateTime<Utc>>,
    no_save: bool,
    onion_pkey: Option<OnionKey>,
    family: Vec<String>,
    exit_summary: Option<String>,
}

impl Record {
    /// Builds a record with an owned, heap-allocated body. Used when parsing
    /// anything other than the live cache mmap.
    pub fn new_owned(digest: Digest, body: Vec<u8>, last_listed: Option<DateTime<Utc>>) -> Self {
        Self {
            digest,
            body: Body::Owned {
                bytes: body,
                journaled: false,
            },
            last_listed,
            no_save: false,
            onion_pkey: None,
            family: Vec::new(),
            exit_summary: None,
        }
    }

    /// Builds a record whose body aliases `range` of `mmap`. Used when
    /// parsing directly out of the live cache mmap during reload.
    pub(crate) fn new_mapped(
        digest: Digest,
        mmap: Arc<Mmap>,
        range: Range<usize>,
        last_listed: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            digest,
            body: Body::Mapped { mmap, range },
            last_listed,
            no_save: false,
            onion_pkey: None,
            family: Vec::new(),
            exit_summary: None,
        }
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn body(&self) -> &[u8] {
        self.body.as_slice()
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn provenance(&self) -> Provenance {
        match &self.body {
            Body::Mapped { .. } => Provenance::InCache,
            Body::Owned { journaled: true, .. } => Provenance::InJournal,
            Body::Owned { journaled: false, .. } => Provenance::Nowhere,
        }
    }

    /// Byte offset into the current sealed cache file where the body begins.
    /// Meaningful only when [`Provenance::InCache`].
    pub fn offset(&self) -> Option<u64> {
        match &self.body {
            Body::Mapped { range, .. } => Some(range.start as u64),
            Body::Owned { .. } => None,
        }
    }

    pub fn last_listed(&self) -> Option<DateTime<Utc>> {
        self.last_listed
    }

    pub fn no_save(&self) -> bool {
        self.no_save
    }

    pub fn set_no_save(&mut self, no_save: bool) {
        self.no_save = no_save;
    }

    pub fn family(&self) -> &[String] {
        &self.family
    }

    pub fn set_family(&mut self, family: Vec<String>) {
        self.family = family;
    }

    pub fn exit_summary(&self) -> Option<&str> {
        self.exit_summary.as_deref()
    }

    pub fn set_exit_summary(&mut self, summary: Option<String>) {
        self.exit_summary = summary;
    }

    pub fn onion_pkey(&self) -> Option<&OnionKey> {
        self.onion_pkey.as_ref()
    }

    pub fn set_onion_pkey(&mut self, key: Option<OnionKey>) {
        self.onion_pkey = key;
    }

    /// Merges another record seen for the same digest: keeps the later of
    /// the two `last_listed` timestamps.
    pub(crate) fn merge_last_listed(&mut self, other_last_listed: Option<DateTime<Utc>>) {
        self.last_listed = match (self.last_listed, other_last_listed) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
    }

    pub(crate) fn mark_journaled(&mut self) {
        if let Body::Owned { journaled, .. } = &mut self.body {
            *journaled = true;
        }
    }

    /// Re-points this record's body at `range` of the freshly-built mmap
    /// generation, freeing whatever owned body it previously held. Called
    /// only on records the rebuild just wrote.
    pub(crate) fn repoint_into_cache(&mut self, mmap: Arc<Mmap>, range: Range<usize>) {
        self.body = Body::Mapped { mmap, range };
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        if let Some(key) = self.onion_pkey.as_mut() {
            key.release();
        }
    }
}
