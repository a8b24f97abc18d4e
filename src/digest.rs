//! The 256-bit content identifier used as the primary key for cached records.

use std::fmt;

use sha2::{Digest as _, Sha256};
use snafu::{ensure, ResultExt};

use crate::error::{InvalidHexDigestSnafu, ParseError, WrongLengthSnafu};

/// Length in bytes of a digest.
pub const DIGEST_LEN: usize = 32;

/// A SHA-256 content digest, used as the primary key of the cache.
///
/// Computing a digest is out of this crate's scope in the general case (it's
/// part of the directory protocol this cache is a collaborator of), but a
/// `compute` helper is provided for the bundled parser and for tests that
/// need to manufacture records without a full descriptor pipeline.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wraps a raw 32-byte digest.
    pub const fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Computes the SHA-256 digest of `body`.
    pub fn compute(body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(body);
        let result = hasher.finalize();
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Returns the raw bytes of this digest.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Parses a digest from its lowercase (or uppercase) hex representation,
    /// the form it's logged and looked up in by external callers.
    pub fn from_hex(text: &str) -> Result<Self, ParseError> {
        let decoded = hex::decode(text).context(InvalidHexDigestSnafu)?;
        ensure!(
            decoded.len() == DIGEST_LEN,
            WrongLengthSnafu {
                expected: DIGEST_LEN,
                got: decoded.len(),
            }
        );
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Releases the key material parsed for a record.
///
/// The directory protocol's public-key decoding and storage is out of scope
/// for this crate; this trait is the seam a collaborator hangs its key type
/// off of. The default implementation is a no-op.
pub trait KeyRelease {
    fn release(&mut self) {}
}

impl KeyRelease for () {}
