//! Splits a buffer holding one or more concatenated microdescriptors into
//! individual records.
//!
//! A record is an optional run of `@`-prefixed annotation lines (only
//! `@last-listed` is kept; every other annotation is recognized and
//! dropped) immediately followed by a line reading exactly `onion-key`, and
//! its body runs until the next such marker or end of input. A malformed or
//! truncated tail is tolerated by simply stopping rather than erroring.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use crate::digest::Digest;

const MARKER: &[u8] = b"onion-key";
const LAST_LISTED_PREFIX: &str = "@last-listed ";
const LAST_LISTED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One microdescriptor found within a larger buffer.
pub(crate) struct ParsedRecord {
    pub(crate) digest: Digest,
    pub(crate) last_listed: Option<DateTime<Utc>>,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl ParsedRecord {
    pub(crate) fn body<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start..self.end]
    }
}

/// Offsets of every line start in `data`, including 0.
fn line_starts(data: &[u8]) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' && i + 1 < data.len() {
            starts.push(i + 1);
        }
    }
    starts
}

fn is_marker_line(data: &[u8], offset: usize) -> bool {
    let rest = &data[offset..];
    rest == MARKER || rest.starts_with(b"onion-key\n") || rest.starts_with(b"onion-key\r\n")
}

fn is_annotation_line(data: &[u8], offset: usize) -> bool {
    data[offset..].first() == Some(&b'@')
}

fn parse_last_listed(line: &str) -> Option<DateTime<Utc>> {
    let rest = line.strip_prefix(LAST_LISTED_PREFIX)?;
    let rest = rest.trim_end_matches(['\r', '\n']);
    let naive = NaiveDateTime::parse_from_str(rest, LAST_LISTED_FORMAT).ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Splits `data` into individual records.
///
/// Records whose body would exceed `max_record_size` are dropped with a
/// warning rather than failing the whole parse: a single oversized or
/// corrupt entry must not take down the rest of the cache. When
/// `allow_annotations` is false, any `@`-prefixed lines immediately
/// preceding a marker are skipped as if absent rather than parsed.
pub(crate) fn parse_records(
    data: &[u8],
    allow_annotations: bool,
    max_record_size: usize,
) -> Vec<ParsedRecord> {
    let starts = line_starts(data);
    let marker_positions: Vec<usize> = starts
        .iter()
        .copied()
        .filter(|&offset| is_marker_line(data, offset))
        .collect();

    let mut records = Vec::with_capacity(marker_positions.len());
    let mut previous_end = 0usize;

    for (i, &marker) in marker_positions.iter().enumerate() {
        let next_marker = marker_positions.get(i + 1).copied().unwrap_or(data.len());

        let mut region_start = marker;
        if allow_annotations {
            let mut idx = starts.partition_point(|&s| s <= marker);
            while idx > 0 {
                let candidate = starts[idx - 1];
                if candidate < previous_end || !is_annotation_line(data, candidate) {
                    break;
                }
                region_start = candidate;
                idx -= 1;
            }
        }

        let mut last_listed = None;
        if region_start < marker {
            for &line_start in &starts {
                if line_start < region_start || line_start >= marker {
                    continue;
                }
                let line_end = data[line_start..marker]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map(|p| line_start + p + 1)
                    .unwrap_or(marker);
                if let Ok(text) = std::str::from_utf8(&data[line_start..line_end]) {
                    if let Some(ts) = parse_last_listed(text) {
                        last_listed = Some(ts);
                    }
                }
            }
        }

        let end = next_marker;
        let body_len = end - marker;
        if body_len > max_record_size {
            warn!(body_len, max_record_size, "dropping oversized record during parse");
            previous_end = end;
            continue;
        }
        if body_len == 0 {
            previous_end = end;
            continue;
        }

        records.push(ParsedRecord {
            digest: Digest::compute(&data[marker..end]),
            last_listed,
            start: marker,
            end,
        });
        previous_end = end;
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_record_without_annotation() {
        let data = b"onion-key\nMIIBody\n";
        let records = parse_records(data, true, 1_000_000);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].start, 0);
        assert_eq!(records[0].end, data.len());
        assert!(records[0].last_listed.is_none());
    }

    #[test]
    fn parses_annotation_and_strips_it_from_body() {
        let data = b"@last-listed 2024-01-02 03:04:05\nonion-key\nMIIBody\n";
        let records = parse_records(data, true, 1_000_000);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.body(data), &data[b"@last-listed 2024-01-02 03:04:05\n".len()..]);
        assert!(r.last_listed.is_some());
    }

    #[test]
    fn ignores_annotation_when_disallowed() {
        let data = b"@last-listed 2024-01-02 03:04:05\nonion-key\nMIIBody\n";
        let records = parse_records(data, false, 1_000_000);
        assert_eq!(records.len(), 1);
        assert!(records[0].last_listed.is_none());
        assert_eq!(records[0].start, b"@last-listed 2024-01-02 03:04:05\n".len());
    }

    #[test]
    fn parses_multiple_concatenated_records() {
        let data = b"onion-key\nbody-a\nonion-key\nbody-b\n";
        let records = parse_records(data, true, 1_000_000);
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].digest, records[1].digest);
    }

    #[test]
    fn drops_oversized_record() {
        let data = b"onion-key\nbody-that-is-too-long\n";
        let records = parse_records(data, true, 5);
        assert!(records.is_empty());
    }

    #[test]
    fn tolerates_trailing_garbage_with_no_marker() {
        let data = b"garbage with no marker at all";
        let records = parse_records(data, true, 1_000_000);
        assert!(records.is_empty());
    }
}
