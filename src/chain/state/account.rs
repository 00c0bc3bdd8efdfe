// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::store::{IndexKey, KeyPart, ObjectId, StoreObject};
use crate::consensus::{Share, Timestamp, MAX_PROXY_DEPTH, PERCENT_100, PROXY_TO_SELF, TIMESTAMP_MAX};
use crate::primitives::{AccountName, Asset, Authority, PublicKey, ABD, AMA, VESTS};
use bincode::{Decode, Encode};

/// An on-chain account: balances, staking state, authorities and vote
/// plumbing all live on one record.
#[derive(Clone, Debug, Encode, Decode)]
pub struct AccountObject {
    pub name: AccountName,
    pub memo_key: PublicKey,
    pub json_metadata: String,
    /// Empty means the account votes for itself
    pub proxy: AccountName,
    pub created: Timestamp,
    pub recovery_account: AccountName,
    pub reset_account: AccountName,
    pub last_account_recovery: Timestamp,
    pub last_owner_update: Timestamp,

    pub comment_count: u32,
    pub post_count: u32,
    pub last_post: Timestamp,
    pub last_root_post: Timestamp,

    pub can_vote: bool,
    pub voting_power: u16,
    pub last_vote_time: Timestamp,

    pub balance: Asset,
    pub savings_balance: Asset,

    pub abd_balance: Asset,
    pub abd_seconds: u128,
    pub abd_seconds_last_update: Timestamp,
    pub abd_last_interest_payment: Timestamp,

    pub savings_abd_balance: Asset,
    pub savings_abd_seconds: u128,
    pub savings_abd_seconds_last_update: Timestamp,
    pub savings_abd_last_interest_payment: Timestamp,
    pub savings_withdraw_requests: u32,

    pub vesting_shares: Asset,
    pub delegated_vesting_shares: Asset,
    pub received_vesting_shares: Asset,
    pub vesting_withdraw_rate: Asset,
    pub next_vesting_withdrawal: Timestamp,
    pub withdrawn: Share,
    pub to_withdraw: Share,
    pub withdraw_routes: u16,

    pub curation_rewards: Share,
    pub posting_rewards: Share,

    /// Votes proxied through this account, bucketed by proxy-chain depth
    pub proxied_vsf_votes: [Share; MAX_PROXY_DEPTH],
    pub witnesses_voted_for: u16,

    pub owner: Authority,
    pub active: Authority,
    pub posting: Authority,

    pub challenged: bool,
    pub owner_challenged: bool,
}

impl Default for AccountObject {
    fn default() -> Self {
        Self {
            name: AccountName::new(),
            memo_key: PublicKey::null(),
            json_metadata: String::new(),
            proxy: PROXY_TO_SELF.to_owned(),
            created: 0,
            recovery_account: AccountName::new(),
            reset_account: AccountName::new(),
            last_account_recovery: 0,
            last_owner_update: 0,
            comment_count: 0,
            post_count: 0,
            last_post: 0,
            last_root_post: 0,
            can_vote: true,
            voting_power: PERCENT_100,
            last_vote_time: 0,
            balance: Asset::zero(AMA),
            savings_balance: Asset::zero(AMA),
            abd_balance: Asset::zero(ABD),
            abd_seconds: 0,
            abd_seconds_last_update: 0,
            abd_last_interest_payment: 0,
            savings_abd_balance: Asset::zero(ABD),
            savings_abd_seconds: 0,
            savings_abd_seconds_last_update: 0,
            savings_abd_last_interest_payment: 0,
            savings_withdraw_requests: 0,
            vesting_shares: Asset::zero(VESTS),
            delegated_vesting_shares: Asset::zero(VESTS),
            received_vesting_shares: Asset::zero(VESTS),
            vesting_withdraw_rate: Asset::zero(VESTS),
            next_vesting_withdrawal: TIMESTAMP_MAX,
            withdrawn: 0,
            to_withdraw: 0,
            withdraw_routes: 0,
            curation_rewards: 0,
            posting_rewards: 0,
            proxied_vsf_votes: [0; MAX_PROXY_DEPTH],
            witnesses_voted_for: 0,
            owner: Authority::default(),
            active: Authority::default(),
            posting: Authority::default(),
            challenged: false,
            owner_challenged: false,
        }
    }
}

impl AccountObject {
    pub const BY_NAME: u8 = 0;
    pub const BY_NEXT_VESTING_WITHDRAWAL: u8 = 1;

    /// Vesting shares net of outbound and inbound delegation
    #[must_use]
    pub fn effective_vesting_shares(&self) -> Asset {
        self.vesting_shares - self.delegated_vesting_shares + self.received_vesting_shares
    }

    #[must_use]
    pub fn proxied_vsf_votes_total(&self) -> Share {
        self.proxied_vsf_votes.iter().sum()
    }

    /// Weight this account contributes to each witness it approves
    #[must_use]
    pub fn witness_vote_weight(&self) -> Share {
        self.vesting_shares.amount + self.proxied_vsf_votes_total()
    }

    #[must_use]
    pub fn has_proxy(&self) -> bool {
        !self.proxy.is_empty()
    }
}

impl StoreObject for AccountObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(Self::BY_NAME, vec![KeyPart::Str(self.name.clone())]),
            IndexKey::new(
                Self::BY_NEXT_VESTING_WITHDRAWAL,
                vec![KeyPart::U64(self.next_vesting_withdrawal)],
            ),
        ]
    }
}

/// Balance in a user-issued asset; the three core balances live on the
/// account record itself.
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct AccountBalanceObject {
    pub owner: AccountName,
    pub symbol: crate::primitives::Symbol,
    pub balance: Share,
}

impl AccountBalanceObject {
    pub const BY_ACCOUNT_ASSET: u8 = 0;
}

impl StoreObject for AccountBalanceObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![IndexKey::new(
            Self::BY_ACCOUNT_ASSET,
            vec![KeyPart::Str(self.owner.clone()), KeyPart::U64(self.symbol.0)],
        )]
    }
}

/// Bandwidth classes tracked per account. The `Old*` pair keeps the legacy
/// accounting alive until `HF_REWARD_FUNDS`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub enum BandwidthClass {
    #[default]
    Forum,
    Market,
    OldForum,
    OldMarket,
}

impl BandwidthClass {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            BandwidthClass::Forum => 0,
            BandwidthClass::Market => 1,
            BandwidthClass::OldForum => 2,
            BandwidthClass::OldMarket => 3,
        }
    }
}

#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct AccountBandwidthObject {
    pub account: AccountName,
    pub class: BandwidthClass,
    pub average_bandwidth: u128,
    pub lifetime_bandwidth: u128,
    pub last_bandwidth_update: Timestamp,
}

impl AccountBandwidthObject {
    pub const BY_ACCOUNT_CLASS: u8 = 0;
}

impl StoreObject for AccountBandwidthObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![IndexKey::new(
            Self::BY_ACCOUNT_CLASS,
            vec![
                KeyPart::Str(self.account.clone()),
                KeyPart::U8(self.class.as_u8()),
            ],
        )]
    }
}

/// Superseded owner authorities, usable for account recovery while fresh
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct OwnerAuthorityHistoryObject {
    pub account: AccountName,
    pub previous_owner_authority: Authority,
    pub last_valid_time: Timestamp,
}

impl OwnerAuthorityHistoryObject {
    pub const BY_ACCOUNT: u8 = 0;
    pub const BY_LAST_VALID: u8 = 1;
}

impl StoreObject for OwnerAuthorityHistoryObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_ACCOUNT,
                vec![
                    KeyPart::Str(self.account.clone()),
                    KeyPart::U64(self.last_valid_time),
                ],
            ),
            IndexKey::new(Self::BY_LAST_VALID, vec![KeyPart::U64(self.last_valid_time)]),
        ]
    }
}

#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct AccountRecoveryRequestObject {
    pub account_to_recover: AccountName,
    pub new_owner_authority: Authority,
    pub expires: Timestamp,
}

impl AccountRecoveryRequestObject {
    pub const BY_ACCOUNT: u8 = 0;
    pub const BY_EXPIRATION: u8 = 1;
}

impl StoreObject for AccountRecoveryRequestObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_ACCOUNT,
                vec![KeyPart::Str(self.account_to_recover.clone())],
            ),
            IndexKey::new(Self::BY_EXPIRATION, vec![KeyPart::U64(self.expires)]),
        ]
    }
}

#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct ChangeRecoveryAccountRequestObject {
    pub account_to_recover: AccountName,
    pub recovery_account: AccountName,
    pub effective_on: Timestamp,
}

impl ChangeRecoveryAccountRequestObject {
    pub const BY_ACCOUNT: u8 = 0;
    pub const BY_EFFECTIVE_DATE: u8 = 1;
}

impl StoreObject for ChangeRecoveryAccountRequestObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_ACCOUNT,
                vec![KeyPart::Str(self.account_to_recover.clone())],
            ),
            IndexKey::new(
                Self::BY_EFFECTIVE_DATE,
                vec![KeyPart::U64(self.effective_on)],
            ),
        ]
    }
}

#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct DeclineVotingRightsRequestObject {
    pub account: AccountName,
    pub effective_date: Timestamp,
}

impl DeclineVotingRightsRequestObject {
    pub const BY_ACCOUNT: u8 = 0;
    pub const BY_EFFECTIVE_DATE: u8 = 1;
}

impl StoreObject for DeclineVotingRightsRequestObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(Self::BY_ACCOUNT, vec![KeyPart::Str(self.account.clone())]),
            IndexKey::new(
                Self::BY_EFFECTIVE_DATE,
                vec![KeyPart::U64(self.effective_date)],
            ),
        ]
    }
}

#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct SavingsWithdrawObject {
    pub from: AccountName,
    pub to: AccountName,
    pub memo: String,
    pub request_id: u32,
    pub amount: Asset,
    pub complete: Timestamp,
}

impl SavingsWithdrawObject {
    pub const BY_FROM_RID: u8 = 0;
    pub const BY_COMPLETE: u8 = 1;
}

impl StoreObject for SavingsWithdrawObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_FROM_RID,
                vec![KeyPart::Str(self.from.clone()), KeyPart::U32(self.request_id)],
            ),
            IndexKey::new(Self::BY_COMPLETE, vec![KeyPart::U64(self.complete)]),
        ]
    }
}

/// A standing instruction splitting vesting withdrawals toward an account
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct WithdrawRouteObject {
    pub from_account: AccountName,
    pub to_account: AccountName,
    pub percent: u16,
    pub auto_vest: bool,
}

impl WithdrawRouteObject {
    pub const BY_ROUTE: u8 = 0;
}

impl StoreObject for WithdrawRouteObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![IndexKey::new(
            Self::BY_ROUTE,
            vec![
                KeyPart::Str(self.from_account.clone()),
                KeyPart::Str(self.to_account.clone()),
            ],
        )]
    }
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct EscrowObject {
    pub escrow_id: u32,
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub ratification_deadline: Timestamp,
    pub escrow_expiration: Timestamp,
    pub abd_balance: Asset,
    pub ama_balance: Asset,
    pub pending_fee: Asset,
    pub to_approved: bool,
    pub agent_approved: bool,
    pub disputed: bool,
}

impl Default for EscrowObject {
    fn default() -> Self {
        Self {
            escrow_id: 0,
            from: AccountName::new(),
            to: AccountName::new(),
            agent: AccountName::new(),
            ratification_deadline: 0,
            escrow_expiration: 0,
            abd_balance: Asset::zero(ABD),
            ama_balance: Asset::zero(AMA),
            pending_fee: Asset::zero(AMA),
            to_approved: false,
            agent_approved: false,
            disputed: false,
        }
    }
}

impl EscrowObject {
    pub const BY_FROM_ID: u8 = 0;
    pub const BY_RATIFICATION_DEADLINE: u8 = 1;

    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.to_approved && self.agent_approved
    }
}

impl StoreObject for EscrowObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_FROM_ID,
                vec![KeyPart::Str(self.from.clone()), KeyPart::U32(self.escrow_id)],
            ),
            IndexKey::new(
                Self::BY_RATIFICATION_DEADLINE,
                vec![
                    KeyPart::Bool(self.is_approved()),
                    KeyPart::U64(self.ratification_deadline),
                ],
            ),
        ]
    }
}

#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct VestingDelegationObject {
    pub delegator: AccountName,
    pub delegatee: AccountName,
    pub vesting_shares: Asset,
    pub min_delegation_time: Timestamp,
}

impl VestingDelegationObject {
    pub const BY_DELEGATION: u8 = 0;
}

impl StoreObject for VestingDelegationObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![IndexKey::new(
            Self::BY_DELEGATION,
            vec![
                KeyPart::Str(self.delegator.clone()),
                KeyPart::Str(self.delegatee.clone()),
            ],
        )]
    }
}

/// Delegated shares cooling down on their way back to the delegator
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct VestingDelegationExpirationObject {
    pub delegator: AccountName,
    pub vesting_shares: Asset,
    pub expiration: Timestamp,
}

impl VestingDelegationExpirationObject {
    pub const BY_EXPIRATION: u8 = 0;
}

impl StoreObject for VestingDelegationExpirationObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![IndexKey::new(
            Self::BY_EXPIRATION,
            vec![KeyPart::U64(self.expiration)],
        )]
    }
}
