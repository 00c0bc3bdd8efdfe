// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{MAX_AUTHORITY_MEMBERSHIP, MAX_SIG_CHECK_DEPTH};
use bincode::{Decode, Encode};
use lazy_static::lazy_static;
use secp256k1::{All, Secp256k1};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

lazy_static! {
    pub static ref SECP: Secp256k1<All> = Secp256k1::new();
}

/// Account names are the stable addressing scheme of the chain
pub type AccountName = String;

/// A compressed secp256k1 public key
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Encode, Decode,
)]
pub struct PublicKey(pub [u8; 33]);

impl PublicKey {
    /// The null key. Witnesses with a null signing key are disabled.
    #[must_use]
    pub const fn null() -> Self {
        Self([0u8; 33])
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 33]
    }

    #[must_use]
    pub fn from_secp(key: &secp256k1::PublicKey) -> Self {
        Self(key.serialize())
    }

    pub fn to_secp(&self) -> Result<secp256k1::PublicKey, secp256k1::Error> {
        secp256k1::PublicKey::from_slice(&self.0)
    }

    #[must_use]
    pub fn from_secret(secret: &secp256k1::SecretKey) -> Self {
        Self::from_secp(&secp256k1::PublicKey::from_secret_key(&SECP, secret))
    }
}

impl Default for PublicKey {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// A recoverable ECDSA signature: 64-byte compact form plus the recovery id
#[derive(PartialEq, Eq, Hash, Clone, Copy, Encode, Decode)]
pub struct SignatureBytes(pub [u8; 65]);

impl SignatureBytes {
    #[must_use]
    pub const fn null() -> Self {
        Self([0u8; 65])
    }
}

impl Default for SignatureBytes {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

/// A weighted-threshold multisig descriptor. Satisfied when the summed
/// weights of present keys and satisfied account references meet the
/// threshold.
#[derive(PartialEq, Eq, Debug, Clone, Default, Encode, Decode)]
pub struct Authority {
    pub weight_threshold: u32,
    pub account_auths: BTreeMap<AccountName, u16>,
    pub key_auths: BTreeMap<PublicKey, u16>,
}

impl Authority {
    #[must_use]
    pub fn single_key(key: PublicKey) -> Self {
        let mut key_auths = BTreeMap::new();
        key_auths.insert(key, 1);
        Self {
            weight_threshold: 1,
            account_auths: BTreeMap::new(),
            key_auths,
        }
    }

    /// An authority nobody can satisfy, used to lock accounts
    #[must_use]
    pub fn impossible() -> Self {
        Self {
            weight_threshold: 1,
            account_auths: BTreeMap::new(),
            key_auths: BTreeMap::new(),
        }
    }

    /// Threshold zero means anyone (including nobody) satisfies it
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.weight_threshold == 0
    }

    #[must_use]
    pub fn is_impossible(&self) -> bool {
        let total: u64 = self
            .account_auths
            .values()
            .chain(self.key_auths.values())
            .map(|w| u64::from(*w))
            .sum();
        total < u64::from(self.weight_threshold)
    }

    pub fn validate(&self) -> Result<(), AuthorityError> {
        if self.account_auths.len() + self.key_auths.len() > MAX_AUTHORITY_MEMBERSHIP {
            return Err(AuthorityError::TooManyMembers);
        }
        if self.account_auths.keys().any(|a| a.is_empty()) {
            return Err(AuthorityError::EmptyAccount);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum AuthorityError {
    /// More members than `MAX_AUTHORITY_MEMBERSHIP`
    TooManyMembers,

    /// Account reference with an empty name
    EmptyAccount,
}

/// Resolve a weighted-threshold authority against a set of recovered signing
/// keys. Account references recurse through `lookup` to at most
/// `MAX_SIG_CHECK_DEPTH` levels.
#[must_use]
pub fn authority_satisfied<F>(
    auth: &Authority,
    signed_keys: &BTreeSet<PublicKey>,
    lookup: &F,
    depth: u32,
) -> bool
where
    F: Fn(&str) -> Option<Authority>,
{
    if auth.is_trivial() {
        return true;
    }

    let mut total: u64 = 0;
    for (key, weight) in &auth.key_auths {
        if signed_keys.contains(key) {
            total += u64::from(*weight);
            if total >= u64::from(auth.weight_threshold) {
                return true;
            }
        }
    }

    for (account, weight) in &auth.account_auths {
        if depth >= MAX_SIG_CHECK_DEPTH {
            continue;
        }
        if let Some(inner) = lookup(account) {
            if authority_satisfied(&inner, signed_keys, lookup, depth + 1) {
                total += u64::from(*weight);
                if total >= u64::from(auth.weight_threshold) {
                    return true;
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> PublicKey {
        let mut k = [0u8; 33];
        k[0] = 2;
        k[32] = b;
        PublicKey(k)
    }

    fn signed(keys: &[PublicKey]) -> BTreeSet<PublicKey> {
        keys.iter().copied().collect()
    }

    #[test]
    fn single_key_threshold() {
        let auth = Authority::single_key(key(1));
        let no_lookup = |_: &str| None;
        assert!(authority_satisfied(&auth, &signed(&[key(1)]), &no_lookup, 0));
        assert!(!authority_satisfied(&auth, &signed(&[key(2)]), &no_lookup, 0));
        assert!(!authority_satisfied(&auth, &signed(&[]), &no_lookup, 0));
    }

    #[test]
    fn two_of_three_multisig() {
        let mut auth = Authority::default();
        auth.weight_threshold = 2;
        auth.key_auths.insert(key(1), 1);
        auth.key_auths.insert(key(2), 1);
        auth.key_auths.insert(key(3), 1);
        let no_lookup = |_: &str| None;

        assert!(!authority_satisfied(&auth, &signed(&[key(1)]), &no_lookup, 0));
        assert!(authority_satisfied(
            &auth,
            &signed(&[key(1), key(3)]),
            &no_lookup,
            0
        ));
    }

    #[test]
    fn account_references_recurse_with_depth_limit() {
        let mut outer = Authority::default();
        outer.weight_threshold = 1;
        outer.account_auths.insert("inner".to_owned(), 1);

        let inner = Authority::single_key(key(7));
        let lookup = move |name: &str| {
            if name == "inner" {
                Some(inner.clone())
            } else {
                None
            }
        };

        assert!(authority_satisfied(&outer, &signed(&[key(7)]), &lookup, 0));
        // Past the depth limit the reference stops resolving
        assert!(!authority_satisfied(
            &outer,
            &signed(&[key(7)]),
            &lookup,
            MAX_SIG_CHECK_DEPTH
        ));
    }

    #[test]
    fn impossible_authority() {
        let auth = Authority::impossible();
        assert!(auth.is_impossible());
        let no_lookup = |_: &str| None;
        assert!(!authority_satisfied(&auth, &signed(&[key(1)]), &no_lookup, 0));
    }
}
