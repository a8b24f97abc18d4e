//! `digest -> Record`, keyed by an already-uniform 256-bit digest.
//!
//! When the key is already a well-mixed cryptographic hash, re-hashing it
//! with `std`'s default SipHash is wasted work, so this folds the digest's
//! own lanes together instead of delegating to a general-purpose hasher.

use std::{
    collections::HashMap,
    collections::hash_map::Iter,
    hash::{BuildHasherDefault, Hasher},
};

use crate::{digest::Digest, record::Record};

/// A [`Hasher`] that XOR-folds the digest's bytes rather than mixing them.
///
/// Only ever fed a single `write` call with exactly 32 bytes (the digest),
/// so the multi-call `Hasher` contract is a formality here.
#[derive(Default)]
pub(crate) struct DigestHasher(u64);

impl Hasher for DigestHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut lanes = [0u8; 8];
        for chunk in bytes.chunks(8) {
            lanes.fill(0);
            lanes[..chunk.len()].copy_from_slice(chunk);
            self.0 ^= u64::from_ne_bytes(lanes);
        }
    }
}

pub(crate) type DigestBuildHasher = BuildHasherDefault<DigestHasher>;

impl std::hash::Hash for Digest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.as_bytes());
    }
}

/// The mapping from digest to [`Record`], unique by key.
#[derive(Default)]
pub struct DigestIndex {
    records: HashMap<Digest, Record, DigestBuildHasher>,
}

impl DigestIndex {
    pub fn new() -> Self {
        Self {
            records: HashMap::with_hasher(DigestBuildHasher::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.records.contains_key(digest)
    }

    pub fn find(&self, digest: &Digest) -> Option<&Record> {
        self.records.get(digest)
    }

    pub fn find_mut(&mut self, digest: &Digest) -> Option<&mut Record> {
        self.records.get_mut(digest)
    }

    /// Inserts `record` by its digest. The precondition that no entry for
    /// that digest already exists is the caller's responsibility; the engine
    /// resolves duplicates itself before ever calling this.
    pub(crate) fn insert(&mut self, record: Record) {
        debug_assert!(
            !self.records.contains_key(&record.digest()),
            "digest index insert precondition violated: duplicate digest"
        );
        self.records.insert(record.digest(), record);
    }

    pub(crate) fn remove(&mut self, digest: &Digest) -> Option<Record> {
        self.records.remove(digest)
    }

    pub fn iter(&self) -> Iter<'_, Digest, Record> {
        self.records.iter()
    }

    /// Removes and drops every record in the index, one at a time through
    /// [`remove`](Self::remove) rather than a bulk clear, so each record's
    /// destruction goes through the same path a single removal would.
    pub(crate) fn clear(&mut self) {
        let digests: Vec<Digest> = self.records.keys().copied().collect();
        for digest in digests {
            self.remove(&digest);
        }
    }
}
