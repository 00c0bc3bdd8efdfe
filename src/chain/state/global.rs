// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::store::{IndexKey, KeyPart, ObjectId, StoreObject};
use crate::consensus::{
    ProtocolVersion, Share, Timestamp, MAX_BLOCK_SIZE, PERCENT_100,
};
use crate::primitives::{AccountName, Asset, BlockId, Price, TransactionId, ABD, AMA, VESTS};
use bincode::{Decode, Encode};

/// Chain-wide dynamic state: head pointers, supplies, bandwidth scaling and
/// the irreversibility watermark. Singleton.
#[derive(Clone, Debug, Encode, Decode)]
pub struct DynamicGlobalPropertyObject {
    pub head_block_number: u32,
    pub head_block_id: BlockId,
    pub time: Timestamp,
    pub current_witness: AccountName,

    pub total_pow: u64,
    pub num_pow_witnesses: u32,

    pub virtual_supply: Asset,
    pub current_supply: Asset,
    pub current_abd_supply: Asset,

    pub total_vesting_fund: Asset,
    pub total_vesting_shares: Asset,

    /// Global content pool, superseded by the named funds at
    /// `HF_REWARD_FUNDS`
    pub total_reward_fund: Asset,
    pub total_reward_shares2: u128,

    pub abd_interest_rate: u16,
    pub abd_print_rate: u16,

    pub average_block_size: u32,
    pub maximum_block_size: u32,

    pub current_aslot: u64,
    /// 128-slot participation bitmap, most recent slot in the low bit
    pub recent_slots_filled: u128,
    pub participation_count: u8,

    pub last_irreversible_block_num: u32,

    pub current_reserve_ratio: u64,
    pub max_virtual_bandwidth: u128,
}

impl Default for DynamicGlobalPropertyObject {
    fn default() -> Self {
        Self {
            head_block_number: 0,
            head_block_id: BlockId::default(),
            time: 0,
            current_witness: AccountName::new(),
            total_pow: 0,
            num_pow_witnesses: 0,
            virtual_supply: Asset::zero(AMA),
            current_supply: Asset::zero(AMA),
            current_abd_supply: Asset::zero(ABD),
            total_vesting_fund: Asset::zero(AMA),
            total_vesting_shares: Asset::zero(VESTS),
            total_reward_fund: Asset::zero(AMA),
            total_reward_shares2: 0,
            abd_interest_rate: 0,
            abd_print_rate: PERCENT_100,
            average_block_size: 0,
            maximum_block_size: MAX_BLOCK_SIZE as u32,
            current_aslot: 0,
            recent_slots_filled: u128::MAX,
            participation_count: 128,
            last_irreversible_block_num: 0,
            current_reserve_ratio: 1,
            max_virtual_bandwidth: 0,
        }
    }
}

impl DynamicGlobalPropertyObject {
    /// AMA per vesting share. Before any vesting exists, one AMA buys one
    /// thousand shares.
    #[must_use]
    pub fn vesting_share_price(&self) -> Price {
        if self.total_vesting_fund.amount <= 0 || self.total_vesting_shares.amount <= 0 {
            return Price::new(Asset::new(1_000, AMA), Asset::new(1_000_000, VESTS));
        }
        Price::new(self.total_vesting_fund, self.total_vesting_shares)
    }
}

impl StoreObject for DynamicGlobalPropertyObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        Vec::new()
    }
}

/// Rolling window of median feeds; conversions settle against the
/// historical median. Singleton.
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct FeedHistoryObject {
    pub current_median_history: Price,
    pub price_history: Vec<Price>,
}

impl StoreObject for FeedHistoryObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        Vec::new()
    }
}

/// A named content reward pool
#[derive(Clone, Debug, Encode, Decode)]
pub struct RewardFundObject {
    pub name: String,
    pub reward_balance: Asset,
    pub recent_rshares2: u128,
    pub percent_content_rewards: u16,
    pub content_constant: u128,
    pub last_update: Timestamp,
}

impl Default for RewardFundObject {
    fn default() -> Self {
        Self {
            name: String::new(),
            reward_balance: Asset::zero(AMA),
            recent_rshares2: 0,
            percent_content_rewards: 0,
            content_constant: crate::consensus::CONTENT_CONSTANT,
            last_update: 0,
        }
    }
}

impl RewardFundObject {
    pub const BY_NAME: u8 = 0;
}

impl StoreObject for RewardFundObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![IndexKey::new(Self::BY_NAME, vec![KeyPart::Str(self.name.clone())])]
    }
}

/// TaPoS ring buffer slot, addressed by `block_num & 0xFFFF`
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct BlockSummaryObject {
    pub block_id: BlockId,
}

impl StoreObject for BlockSummaryObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        Vec::new()
    }
}

/// Applied-transaction dedup entry, kept until expiration
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct TransactionDedupObject {
    pub trx_id: TransactionId,
    pub expiration: Timestamp,
}

impl TransactionDedupObject {
    pub const BY_TRX_ID: u8 = 0;
    pub const BY_EXPIRATION: u8 = 1;
}

impl StoreObject for TransactionDedupObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_TRX_ID,
                vec![KeyPart::Bytes(self.trx_id.0.to_vec())],
            ),
            IndexKey::new(Self::BY_EXPIRATION, vec![KeyPart::U64(self.expiration)]),
        ]
    }
}

/// Which hardforks have run and which is armed next. Singleton.
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct HardforkPropertyObject {
    /// Activation times of every processed hardfork, index 0 = genesis
    pub processed_hardforks: Vec<Timestamp>,
    pub last_hardfork: u32,
    pub current_hardfork_version: ProtocolVersion,
    pub next_hardfork: ProtocolVersion,
    pub next_hardfork_time: Timestamp,
}

impl StoreObject for HardforkPropertyObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        Vec::new()
    }
}
