// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Timestamp;
use crate::primitives::{
    BlockId, Hash256, Operation, PublicKey, RequiredAuthorities, SignatureBytes, TransactionId,
    SECP,
};
use bincode::{Decode, Encode};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, SecretKey};

#[derive(Debug)]
pub enum TransactionError {
    /// Signature bytes failed to parse or recover
    Signature(secp256k1::Error),

    /// Transaction could not be encoded for signing
    Encode(bincode::error::EncodeError),
}

impl From<secp256k1::Error> for TransactionError {
    fn from(other: secp256k1::Error) -> Self {
        Self::Signature(other)
    }
}

impl From<bincode::error::EncodeError> for TransactionError {
    fn from(other: bincode::error::EncodeError) -> Self {
        Self::Encode(other)
    }
}

/// A signed transaction. `ref_block_num`/`ref_block_prefix` bind it to a
/// recent block (TaPoS): the low 16 bits of that block's height and the
/// second 32 bits of its id.
#[derive(PartialEq, Debug, Clone, Default, Encode, Decode)]
pub struct SignedTransaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: Timestamp,
    pub operations: Vec<Operation>,
    pub signatures: Vec<SignatureBytes>,
}

impl SignedTransaction {
    /// Bind this transaction to a reference block
    pub fn set_reference_block(&mut self, block_id: &BlockId) {
        self.ref_block_num = (block_id.block_num() & 0xFFFF) as u16;
        self.ref_block_prefix = block_id.tapos_prefix();
    }

    fn unsigned_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let body = (
            self.ref_block_num,
            self.ref_block_prefix,
            self.expiration,
            &self.operations,
        );
        Ok(crate::codec::encode_to_vec(&body)?)
    }

    /// Transaction id, the digest of the unsigned body
    pub fn id(&self) -> Result<TransactionId, TransactionError> {
        Ok(Hash256::hash_from_slice(self.unsigned_bytes()?))
    }

    /// Digest a signer commits to; salted with the chain id so signatures
    /// cannot replay across networks.
    pub fn sig_digest(&self, chain_id: &Hash256) -> Result<Hash256, TransactionError> {
        let mut bytes = chain_id.0.to_vec();
        bytes.extend_from_slice(&self.unsigned_bytes()?);
        Ok(Hash256::hash_from_slice(bytes))
    }

    /// Digest covering signatures too, used as the merkle leaf
    pub fn merkle_digest(&self) -> Result<Hash256, TransactionError> {
        Ok(Hash256::hash_from_slice(crate::codec::encode_to_vec(self)?))
    }

    /// Append a recoverable signature over the salted digest
    pub fn sign(
        &mut self,
        chain_id: &Hash256,
        secret: &SecretKey,
    ) -> Result<(), TransactionError> {
        let digest = self.sig_digest(chain_id)?;
        let msg = Message::from_slice(&digest.0)?;
        let sig = SECP.sign_ecdsa_recoverable(&msg, secret);
        let (rec_id, compact) = sig.serialize_compact();

        let mut bytes = [0u8; 65];
        bytes[0] = rec_id.to_i32() as u8;
        bytes[1..].copy_from_slice(&compact);
        self.signatures.push(SignatureBytes(bytes));
        Ok(())
    }

    /// Recover the public keys behind every signature
    pub fn signature_keys(&self, chain_id: &Hash256) -> Result<Vec<PublicKey>, TransactionError> {
        let digest = self.sig_digest(chain_id)?;
        let msg = Message::from_slice(&digest.0)?;

        let mut keys = Vec::with_capacity(self.signatures.len());
        for sig in &self.signatures {
            let rec_id = RecoveryId::from_i32(i32::from(sig.0[0]))?;
            let recoverable = RecoverableSignature::from_compact(&sig.0[1..], rec_id)?;
            let key = SECP.recover_ecdsa(&msg, &recoverable)?;
            keys.push(PublicKey::from_secp(&key));
        }
        Ok(keys)
    }

    /// Per-operation field validation plus transaction-level sanity
    pub fn validate(&self) -> Result<(), crate::primitives::ValidationError> {
        crate::primitives::operations::check(
            !self.operations.is_empty(),
            "transaction has no operations",
        )?;
        for op in &self.operations {
            op.validate()?;
        }
        Ok(())
    }

    /// Authority classes demanded across all operations
    #[must_use]
    pub fn required_authorities(&self) -> RequiredAuthorities {
        let mut req = RequiredAuthorities::default();
        for op in &self.operations {
            op.get_required_authorities(&mut req);
        }
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::PERCENT_100;
    use crate::primitives::{Asset, TransferOperation, AMA};
    use rand::rngs::OsRng;

    fn sample_tx() -> SignedTransaction {
        SignedTransaction {
            ref_block_num: 7,
            ref_block_prefix: 0xDEAD_BEEF,
            expiration: 1_700_000_060,
            operations: vec![Operation::Transfer(TransferOperation {
                from: "alice".into(),
                to: "bob".into(),
                amount: Asset::new(10_000, AMA),
                memo: String::new(),
            })],
            signatures: vec![],
        }
    }

    #[test]
    fn sign_and_recover() {
        let chain_id = Hash256::hash_from_slice(b"amaranth-testnet");
        let (secret, public) = SECP.generate_keypair(&mut OsRng);

        let mut tx = sample_tx();
        tx.sign(&chain_id, &secret).unwrap();

        let keys = tx.signature_keys(&chain_id).unwrap();
        assert_eq!(keys, vec![PublicKey::from_secp(&public)]);

        // Another chain id recovers a different key
        let other = Hash256::hash_from_slice(b"other-net");
        let wrong = tx.signature_keys(&other).unwrap();
        assert_ne!(wrong, keys);
    }

    #[test]
    fn id_ignores_signatures() {
        let chain_id = Hash256::hash_from_slice(b"amaranth-testnet");
        let (secret, _) = SECP.generate_keypair(&mut OsRng);

        let mut tx = sample_tx();
        let before = tx.id().unwrap();
        tx.sign(&chain_id, &secret).unwrap();
        assert_eq!(tx.id().unwrap(), before);
        assert_ne!(tx.merkle_digest().unwrap(), before);
    }

    #[test]
    fn tapos_reference_binding() {
        let digest = Hash256::hash_from_slice(b"block");
        let id = BlockId::from_digest(&digest, 0x0102_0304);
        let mut tx = sample_tx();
        tx.set_reference_block(&id);
        assert_eq!(tx.ref_block_num, 0x0304);
        assert_eq!(tx.ref_block_prefix, id.tapos_prefix());
    }

    #[test]
    fn weight_bounds_validate() {
        let mut tx = sample_tx();
        tx.operations.push(Operation::Vote(crate::primitives::VoteOperation {
            voter: "alice".into(),
            author: "bob".into(),
            permlink: "post".into(),
            weight: PERCENT_100 as i16,
        }));
        assert!(tx.validate().is_ok());

        tx.operations.clear();
        assert!(tx.validate().is_err());
    }
}
