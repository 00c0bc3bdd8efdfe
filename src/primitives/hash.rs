// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::{Decode, Encode};
use sha2::{Digest, Sha256};
use std::fmt;

/// A sha256 digest
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default, Encode, Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    #[must_use]
    pub fn hash_from_slice<T: AsRef<[u8]>>(bytes: T) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hasher.finalize().into())
    }

    /// Digest of the concatenation of two digests, used for merkle folds
    #[must_use]
    pub fn hash_pair(left: &Hash256, right: &Hash256) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }

    #[must_use]
    pub fn inner(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Transaction id, the digest of the unsigned transaction
pub type TransactionId = Hash256;

/// Block id. The first 160 bits of the signed header digest with the high
/// 32 bits overwritten by the big-endian block number, so the height is
/// recoverable from the id itself.
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default, Encode, Decode,
)]
pub struct BlockId(pub [u8; 20]);

impl BlockId {
    #[must_use]
    pub fn from_digest(digest: &Hash256, block_num: u32) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.0[..20]);
        out[..4].copy_from_slice(&block_num.to_be_bytes());
        Self(out)
    }

    /// Height encoded in the id
    #[must_use]
    pub fn block_num(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Second 32 bits of the id, referenced by transactions for TaPoS
    #[must_use]
    pub fn tapos_prefix(&self) -> u32 {
        u32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 20]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.to_hex())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_hashes_the_empty_string() {
        let result = Hash256::hash_from_slice(b"");
        assert_eq!(
            result.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn block_ids_embed_the_height() {
        let digest = Hash256::hash_from_slice(b"header");
        let id = BlockId::from_digest(&digest, 0xDEAD_BEEF);
        assert_eq!(id.block_num(), 0xDEAD_BEEF);
        // the remaining bytes come from the digest
        assert_eq!(&id.0[4..20], &digest.0[4..20]);
    }

    #[test]
    fn tapos_prefix_is_stable() {
        let digest = Hash256::hash_from_slice(b"header");
        let a = BlockId::from_digest(&digest, 1);
        let b = BlockId::from_digest(&digest, 2);
        assert_eq!(a.tapos_prefix(), b.tapos_prefix());
    }
}
