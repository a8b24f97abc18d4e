//! Writes a single record's on-disk representation to a stream, used by
//! both the journal appender and the rebuild writer.
//!
//! The wire format is plain text: an optional `@last-listed` annotation line
//! followed by the record's body bytes verbatim. There is no framing,
//! checksum, or length prefix. The format only has to survive exactly what
//! the directory protocol already writes, so it stays line-oriented rather
//! than reaching for a richer binary encoding.

use std::io::Write;

use crate::{error::SerializeError, record::Record};

/// Result of writing a single record: how many bytes the annotation (if any)
/// took, and the total bytes written including the body.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct DumpResult {
    pub(crate) annotation_len: usize,
    pub(crate) total_len: usize,
}

/// Writes `record`'s annotation line (if `write_annotations` is set and the
/// record has a `last_listed` timestamp) followed by its body, to `stream`.
///
/// Returns the split between annotation bytes and total bytes so the caller
/// can compute the body's offset within the stream without a second seek.
pub(crate) fn dump<W: Write>(
    stream: &mut W,
    record: &Record,
    write_annotations: bool,
) -> Result<DumpResult, SerializeError> {
    let mut annotation_len = 0;

    if write_annotations {
        if let Some(last_listed) = record.last_listed() {
            let line = format!("@last-listed {}\n", last_listed.format("%Y-%m-%d %H:%M:%S"));
            stream.write_all(line.as_bytes())?;
            annotation_len = line.len();
        }
    }

    let body = record.body();
    stream.write_all(body)?;

    let written = annotation_len + body.len();
    Ok(DumpResult {
        annotation_len,
        total_len: written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use chrono::DateTime;

    #[test]
    fn dump_without_annotation_writes_body_only() {
        let record = Record::new_owned(Digest::compute(b"onion-key a"), b"onion-key a\n".to_vec(), None);
        let mut buf = Vec::new();
        let result = dump(&mut buf, &record, true).unwrap();
        assert_eq!(result.annotation_len, 0);
        assert_eq!(buf, b"onion-key a\n");
    }

    #[test]
    fn dump_with_annotation_prefixes_last_listed() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record = Record::new_owned(
            Digest::compute(b"onion-key a"),
            b"onion-key a\n".to_vec(),
            Some(ts),
        );
        let mut buf = Vec::new();
        let result = dump(&mut buf, &record, true).unwrap();
        assert!(result.annotation_len > 0);
        assert_eq!(result.total_len, buf.len());

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("@last-listed "));
        assert!(text.ends_with("onion-key a\n"));
        assert_eq!(&buf[result.annotation_len..], b"onion-key a\n");
    }

    #[test]
    fn dump_without_write_annotations_flag_skips_annotation_even_if_present() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record = Record::new_owned(
            Digest::compute(b"onion-key a"),
            b"onion-key a\n".to_vec(),
            Some(ts),
        );
        let mut buf = Vec::new();
        let result = dump(&mut buf, &record, false).unwrap();
        assert_eq!(result.annotation_len, 0);
        assert_eq!(buf, b"onion-key a\n");
    }
}
