// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::store::{IndexKey, KeyPart, ObjectId, StoreObject};
use crate::consensus::{ProtocolVersion, Share, Timestamp, VIRTUAL_SCHEDULE_LAP_LENGTH};
use crate::primitives::{AccountName, ChainProperties, Price};
use bincode::{Decode, Encode};

/// How a witness earned its slot in the current round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub enum WitnessScheduleClass {
    /// Among the top-voted
    Top,
    /// Virtual-time lottery slot
    #[default]
    Timeshare,
    /// Proof-of-work queue slot
    Miner,
}

/// An elected block producer
#[derive(Clone, Debug, Encode, Decode)]
pub struct WitnessObject {
    pub owner: AccountName,
    pub created: Timestamp,
    pub url: String,
    pub total_missed: u32,
    pub last_aslot: u64,
    pub last_confirmed_block_num: u32,

    /// Position in the proof-of-work queue; zero when not queued
    pub pow_worker: u64,

    pub signing_key: crate::primitives::PublicKey,
    pub props: ChainProperties,
    pub abd_exchange_rate: Price,
    pub last_abd_exchange_update: Timestamp,

    /// Sum of backing vesting shares
    pub votes: Share,
    pub schedule: WitnessScheduleClass,

    pub virtual_last_update: u128,
    pub virtual_position: u128,
    pub virtual_scheduled_time: u128,

    pub running_version: ProtocolVersion,
    pub hardfork_version_vote: ProtocolVersion,
    pub hardfork_time_vote: Timestamp,
}

impl Default for WitnessObject {
    fn default() -> Self {
        Self {
            owner: AccountName::new(),
            created: 0,
            url: String::new(),
            total_missed: 0,
            last_aslot: 0,
            last_confirmed_block_num: 0,
            pow_worker: 0,
            signing_key: crate::primitives::PublicKey::null(),
            props: ChainProperties::default(),
            abd_exchange_rate: Price::default(),
            last_abd_exchange_update: 0,
            votes: 0,
            schedule: WitnessScheduleClass::Timeshare,
            virtual_last_update: 0,
            virtual_position: 0,
            virtual_scheduled_time: VIRTUAL_SCHEDULE_LAP_LENGTH,
            running_version: ProtocolVersion::default(),
            hardfork_version_vote: ProtocolVersion::default(),
            hardfork_time_vote: 0,
        }
    }
}

impl WitnessObject {
    pub const BY_NAME: u8 = 0;
    pub const BY_VOTE: u8 = 1;
    pub const BY_SCHEDULE_TIME: u8 = 2;
    pub const BY_WORK: u8 = 3;
}

impl StoreObject for WitnessObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        let mut keys = vec![
            IndexKey::new(Self::BY_NAME, vec![KeyPart::Str(self.owner.clone())]),
            IndexKey::new(
                Self::BY_VOTE,
                vec![KeyPart::I64(self.votes), KeyPart::Str(self.owner.clone())],
            ),
            IndexKey::new(
                Self::BY_SCHEDULE_TIME,
                vec![
                    KeyPart::U128(self.virtual_scheduled_time),
                    KeyPart::Str(self.owner.clone()),
                ],
            ),
        ];
        if self.pow_worker > 0 {
            keys.push(IndexKey::new(
                Self::BY_WORK,
                vec![KeyPart::U64(self.pow_worker)],
            ));
        }
        keys
    }
}

/// One account approving one witness
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct WitnessVoteObject {
    pub account: AccountName,
    pub witness: AccountName,
}

impl WitnessVoteObject {
    pub const BY_ACCOUNT_WITNESS: u8 = 0;
    pub const BY_WITNESS_ACCOUNT: u8 = 1;
}

impl StoreObject for WitnessVoteObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_ACCOUNT_WITNESS,
                vec![
                    KeyPart::Str(self.account.clone()),
                    KeyPart::Str(self.witness.clone()),
                ],
            ),
            IndexKey::new(
                Self::BY_WITNESS_ACCOUNT,
                vec![
                    KeyPart::Str(self.witness.clone()),
                    KeyPart::Str(self.account.clone()),
                ],
            ),
        ]
    }
}

/// The current round's shuffled producer set and everything the scheduler
/// derives from witness votes. Singleton.
#[derive(Clone, Debug, Encode, Decode)]
pub struct WitnessScheduleObject {
    pub current_virtual_time: u128,
    pub next_shuffle_block_num: u32,
    pub current_shuffled_witnesses: Vec<AccountName>,
    pub num_scheduled_witnesses: u8,

    pub top_weight: u16,
    pub timeshare_weight: u16,
    pub miner_weight: u16,
    pub witness_pay_normalization_factor: u32,

    pub median_props: ChainProperties,
    pub majority_version: ProtocolVersion,
}

impl Default for WitnessScheduleObject {
    fn default() -> Self {
        Self {
            current_virtual_time: 0,
            next_shuffle_block_num: 1,
            current_shuffled_witnesses: Vec::new(),
            num_scheduled_witnesses: 1,
            top_weight: 1,
            timeshare_weight: 5,
            miner_weight: 1,
            witness_pay_normalization_factor: 25,
            median_props: ChainProperties::default(),
            majority_version: ProtocolVersion::default(),
        }
    }
}

impl StoreObject for WitnessScheduleObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        Vec::new()
    }
}
