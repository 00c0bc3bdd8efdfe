// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Timestamp;
use crate::primitives::{
    AccountName, BlockHeaderExtension, BlockId, Hash256, PublicKey, SignatureBytes,
    SignedTransaction, TransactionError, SECP,
};
use bincode::{Decode, Encode};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, SecretKey};

/// A block header plus the producing witness's signature
#[derive(PartialEq, Debug, Clone, Default, Encode, Decode)]
pub struct SignedBlockHeader {
    pub previous: BlockId,
    pub timestamp: Timestamp,
    pub witness: AccountName,
    pub transaction_merkle_root: Hash256,
    pub extensions: Vec<BlockHeaderExtension>,
    pub witness_signature: SignatureBytes,
}

impl SignedBlockHeader {
    /// Height of this block, recovered from the previous id
    #[must_use]
    pub fn block_num(&self) -> u32 {
        self.previous.block_num() + 1
    }

    fn signing_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let body = (
            &self.previous,
            self.timestamp,
            &self.witness,
            &self.transaction_merkle_root,
            &self.extensions,
        );
        Ok(crate::codec::encode_to_vec(&body)?)
    }

    /// Digest the witness signs
    pub fn signing_digest(&self) -> Result<Hash256, TransactionError> {
        Ok(Hash256::hash_from_slice(self.signing_bytes()?))
    }

    /// Block id: the signed-header digest with the height injected
    pub fn id(&self) -> Result<BlockId, TransactionError> {
        let digest = Hash256::hash_from_slice(crate::codec::encode_to_vec(self)?);
        Ok(BlockId::from_digest(&digest, self.block_num()))
    }

    pub fn sign(&mut self, secret: &SecretKey) -> Result<(), TransactionError> {
        let digest = self.signing_digest()?;
        let msg = Message::from_slice(&digest.0)?;
        let sig = SECP.sign_ecdsa_recoverable(&msg, secret);
        let (rec_id, compact) = sig.serialize_compact();

        let mut bytes = [0u8; 65];
        bytes[0] = rec_id.to_i32() as u8;
        bytes[1..].copy_from_slice(&compact);
        self.witness_signature = SignatureBytes(bytes);
        Ok(())
    }

    /// Recover the signer's public key
    pub fn signee(&self) -> Result<PublicKey, TransactionError> {
        let digest = self.signing_digest()?;
        let msg = Message::from_slice(&digest.0)?;
        let rec_id = RecoveryId::from_i32(i32::from(self.witness_signature.0[0]))?;
        let recoverable =
            RecoverableSignature::from_compact(&self.witness_signature.0[1..], rec_id)?;
        let key = SECP.recover_ecdsa(&msg, &recoverable)?;
        Ok(PublicKey::from_secp(&key))
    }

    /// True when the block was signed with the given key
    #[must_use]
    pub fn validate_signee(&self, key: &PublicKey) -> bool {
        matches!(self.signee(), Ok(recovered) if recovered == *key)
    }
}

/// A full block
#[derive(PartialEq, Debug, Clone, Default, Encode, Decode)]
pub struct SignedBlock {
    pub header: SignedBlockHeader,
    pub transactions: Vec<SignedTransaction>,
}

impl SignedBlock {
    #[must_use]
    pub fn block_num(&self) -> u32 {
        self.header.block_num()
    }

    pub fn id(&self) -> Result<BlockId, TransactionError> {
        self.header.id()
    }

    /// Merkle root over the transactions' signed digests. The empty block
    /// carries the null root.
    pub fn calculate_merkle_root(&self) -> Result<Hash256, TransactionError> {
        if self.transactions.is_empty() {
            return Ok(Hash256::default());
        }

        let mut layer = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            layer.push(tx.merkle_digest()?);
        }

        while layer.len() > 1 {
            let mut next = Vec::with_capacity((layer.len() + 1) / 2);
            for pair in layer.chunks(2) {
                if pair.len() == 2 {
                    next.push(Hash256::hash_pair(&pair[0], &pair[1]));
                } else {
                    // odd leaf promotes unpaired
                    next.push(pair[0]);
                }
            }
            layer = next;
        }

        Ok(layer[0])
    }

    /// Encoded size counted against the block size limit
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        crate::codec::encoded_size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn sample_block(num_parent: u32) -> SignedBlock {
        let parent_digest = Hash256::hash_from_slice(b"parent");
        SignedBlock {
            header: SignedBlockHeader {
                previous: BlockId::from_digest(&parent_digest, num_parent),
                timestamp: 1_700_000_003,
                witness: "amaranth".into(),
                transaction_merkle_root: Hash256::default(),
                extensions: vec![],
                witness_signature: SignatureBytes::null(),
            },
            transactions: vec![],
        }
    }

    #[test]
    fn block_num_follows_previous() {
        let block = sample_block(41);
        assert_eq!(block.block_num(), 42);
        assert_eq!(block.id().unwrap().block_num(), 42);
    }

    #[test]
    fn sign_and_validate_signee() {
        let (secret, public) = SECP.generate_keypair(&mut OsRng);
        let mut block = sample_block(0);
        block.header.sign(&secret).unwrap();

        let key = PublicKey::from_secp(&public);
        assert!(block.header.validate_signee(&key));

        let (_, other) = SECP.generate_keypair(&mut OsRng);
        assert!(!block.header.validate_signee(&PublicKey::from_secp(&other)));
    }

    #[test]
    fn empty_merkle_root_is_null() {
        let block = sample_block(0);
        assert_eq!(block.calculate_merkle_root().unwrap(), Hash256::default());
    }

    #[test]
    fn merkle_root_changes_with_transactions() {
        let mut block = sample_block(0);
        block.transactions.push(SignedTransaction::default());
        let one = block.calculate_merkle_root().unwrap();

        let mut two_tx = SignedTransaction::default();
        two_tx.ref_block_num = 9;
        block.transactions.push(two_tx);
        let two = block.calculate_merkle_root().unwrap();

        assert_ne!(one, Hash256::default());
        assert_ne!(one, two);
    }
}
