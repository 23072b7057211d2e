use std::fmt;

use sha2::{Digest, Sha256};

/// SHA-256 digest of a cloud file's bytes.
///
/// File index rows and staged uploads carry the lowercase hex form, which is
/// also what clients send as `checksum`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// `None` unless `digest` is exactly 64 hex characters.
    pub fn from_hex(digest: &str) -> Option<Self> {
        let bytes = hex::decode(digest).ok()?;
        bytes.try_into().ok().map(Self)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}
