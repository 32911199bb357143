//! Content addressing for events, blocks and frames.

use std::fmt::{Debug, Display};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

type Blake2b256 = Blake2b<U32>;

/// Blake2b-256 digest of a canonical encoding. Every record in the graph
/// is identified by one of these; logs render them base58.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Default)]
pub struct HashType([u8; 32]);

impl HashType {
    /// Digest of the given bytes.
    pub fn of<B: AsRef<[u8]>>(data: B) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(Blake2b256::digest(data.as_ref()).as_slice());
        Self(out)
    }

    pub fn new(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Byte-wise XOR against the round hash, whitening event signatures so
    /// consensus tie-breaking cannot be steered by signature grinding.
    pub(crate) fn xor(&self, other: &[u8]) -> HashType {
        let mut out = self.0;
        for (i, b) in other.iter().enumerate() {
            out[i % 32] ^= b;
        }
        HashType(out)
    }

    pub(crate) fn base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl Debug for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.base58())
    }
}

impl Display for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base58())
    }
}

impl From<[u8; 32]> for HashType {
    fn from(hash: [u8; 32]) -> Self {
        Self(hash)
    }
}
