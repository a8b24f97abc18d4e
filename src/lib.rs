//! A persistent, memory-mapped cache of digest-identified microdescriptor
//! records.
//!
//! The cache is split across a sealed, memory-mapped cache file and an
//! append-only journal; new records land in the journal first and are only
//! folded into the cache file by an occasional rebuild. See
//! [`CacheEngine`] for the operations and [`config::CacheConfig`] for how to
//! point one at a data directory.

#[macro_use]
extern crate tracing;

mod config;
mod digest;
mod engine;
mod error;
mod index;
mod parser;
mod record;
mod serializer;
mod store;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use digest::{Digest, KeyRelease, DIGEST_LEN};
pub use engine::CacheEngine;
pub use error::{CacheError, ParseError, RebuildError, SerializeError, StoreError};
pub use index::DigestIndex;
pub use record::{OnionKey, Provenance, Record};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[test]
    fn fresh_ingest_then_lookup() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();
        let mut engine = CacheEngine::new(config);
        engine.reload().unwrap();

        let data = b"onion-key\nbody one\nonion-key\nbody two\n";
        let added = engine.add_from_bytes(data, Provenance::Nowhere, false).unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(engine.len(), 2);

        for digest in &added {
            assert!(engine.lookup(digest).is_some());
        }
    }

    #[test]
    fn duplicate_digest_merges_last_listed() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();
        let mut engine = CacheEngine::new(config);
        engine.reload().unwrap();

        let data = b"@last-listed 2024-01-01 00:00:00\nonion-key\nsame body\n";
        let added_first = engine.add_from_bytes(data, Provenance::InJournal, false).unwrap();
        assert_eq!(added_first.len(), 1);

        let data_again = b"@last-listed 2024-06-01 00:00:00\nonion-key\nsame body\n";
        let added_second = engine.add_from_bytes(data_again, Provenance::InJournal, false).unwrap();
        assert!(added_second.is_empty());
        assert_eq!(engine.len(), 1);

        let digest = added_first[0];
        let record = engine.lookup(&digest).unwrap();
        assert_eq!(
            record.last_listed().unwrap().format("%Y").to_string(),
            "2024"
        );
        assert_eq!(record.last_listed().unwrap().format("%m").to_string(), "06");
    }

    #[test]
    fn reload_after_restart_recovers_journal_only_state() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();

        let digest = {
            let mut engine = CacheEngine::new(config.clone());
            engine.reload().unwrap();
            let added = engine
                .add_from_bytes(b"onion-key\nbody surviving restart\n", Provenance::Nowhere, false)
                .unwrap();
            added[0]
        };

        let mut engine = CacheEngine::new(config);
        engine.reload().unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.lookup(&digest).unwrap().body(), b"onion-key\nbody surviving restart\n");
    }

    #[test]
    fn reload_tolerates_truncated_trailing_journal_entry() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();
        let mut engine = CacheEngine::new(config.clone());
        engine.reload().unwrap();
        engine
            .add_from_bytes(b"onion-key\ncomplete body\n", Provenance::Nowhere, false)
            .unwrap();

        let journal_path = config.journal_path();
        let mut bytes = fs::read(&journal_path).unwrap();
        bytes.extend_from_slice(b"onion-key\ntruncated tail with no fo");
        fs::write(&journal_path, &bytes).unwrap();

        let mut engine = CacheEngine::new(config);
        engine.reload().unwrap();
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn average_body_size_defaults_to_512_and_means_otherwise() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();
        let mut engine = CacheEngine::new(config);
        engine.reload().unwrap();
        assert_eq!(engine.average_body_size(), 512);

        engine.add_from_bytes(b"onion-key\naaaa\n", Provenance::Nowhere, false).unwrap();
        engine.add_from_bytes(b"onion-key\nbb\n", Provenance::Nowhere, false).unwrap();
        let expected = (b"onion-key\naaaa\n".len() + b"onion-key\nbb\n".len()) as u64 / 2;
        assert_eq!(engine.average_body_size(), expected);
    }

    #[test]
    fn average_body_size_counts_duplicates_seen_but_not_their_bytes() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();
        let mut engine = CacheEngine::new(config);
        engine.reload().unwrap();

        engine.add_from_bytes(b"onion-key\nsame body\n", Provenance::Nowhere, false).unwrap();
        // A duplicate digest still bumps n_seen even though it contributes
        // no new bytes and is not kept, so the average is pulled down by the
        // unrewarded second observation.
        engine.add_from_bytes(b"onion-key\nsame body\n", Provenance::Nowhere, false).unwrap();

        assert_eq!(engine.len(), 1);
        let body_len = b"onion-key\nsame body\n".len() as u64;
        assert_eq!(engine.average_body_size(), body_len / 2);
    }

    #[test]
    fn rebuild_preserves_lookup_and_truncates_journal() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();
        let mut engine = CacheEngine::new(config.clone());
        engine.reload().unwrap();

        let added = engine
            .add_from_bytes(b"onion-key\nbody one\nonion-key\nbody two\n", Provenance::Nowhere, false)
            .unwrap();
        engine.rebuild().unwrap();

        let journal_len = fs::metadata(config.journal_path()).unwrap().len();
        assert_eq!(journal_len, 0);

        for digest in &added {
            let record = engine.lookup(digest).unwrap();
            assert_eq!(record.provenance(), Provenance::InCache);
        }

        let mut reloaded = CacheEngine::new(config);
        reloaded.reload().unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn no_save_records_are_looked_up_but_excluded_from_rebuild() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();
        let mut engine = CacheEngine::new(config.clone());
        engine.reload().unwrap();

        let added = engine
            .add_from_bytes(b"onion-key\nephemeral\n", Provenance::Nowhere, true)
            .unwrap();
        let digest = added[0];

        assert!(engine.lookup(&digest).unwrap().no_save());
        assert_eq!(engine.lookup(&digest).unwrap().provenance(), Provenance::Nowhere);

        // no_save records never touch the journal, so the file is never
        // even created, and an explicit rebuild must still leave the record
        // out of the written cache file and resident only in memory.
        assert!(!config.journal_path().exists());

        engine.rebuild().unwrap();
        assert!(engine.lookup(&digest).is_some());
        assert_eq!(engine.lookup(&digest).unwrap().provenance(), Provenance::Nowhere);

        let mut reloaded = CacheEngine::new(config);
        reloaded.reload().unwrap();
        assert!(reloaded.is_empty(), "no_save records must not survive a restart");
    }

    #[test]
    fn rebuild_trigger_threshold_based_on_config() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path())
            .rebuild_slack_bytes(0)
            .rebuild_multiple(1)
            .build();
        let mut engine = CacheEngine::new(config.clone());
        engine.reload().unwrap();

        engine.add_from_bytes(b"onion-key\nfirst\n", Provenance::Nowhere, false).unwrap();
        engine.rebuild().unwrap();

        // With slack=0 and multiple=1, any further journal growth beyond the
        // (now nonzero) cache size should trip the automatic rebuild on the
        // next add.
        engine
            .add_from_bytes(b"onion-key\nsecond-longer-body\n", Provenance::Nowhere, false)
            .unwrap();

        let journal_len = fs::metadata(config.journal_path()).unwrap().len();
        assert_eq!(journal_len, 0, "journal should have been folded in by an automatic rebuild");
    }

    #[test]
    fn digest_from_hex_allows_lookup_by_logged_form() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig::from_data_dir(dir.path()).build();
        let mut engine = CacheEngine::new(config);
        engine.reload().unwrap();

        let added = engine
            .add_from_bytes(b"onion-key\nbody one\n", Provenance::Nowhere, false)
            .unwrap();
        let hex = added[0].to_string();

        let parsed = Digest::from_hex(&hex).unwrap();
        assert!(engine.lookup(&parsed).is_some());
    }
}
