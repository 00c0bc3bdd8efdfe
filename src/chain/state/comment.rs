// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::store::{IndexKey, KeyPart, ObjectId, StoreObject};
use crate::consensus::{Share, Timestamp, PERCENT_100, TIMESTAMP_MAX};
use crate::primitives::{AccountName, Asset, BeneficiaryRoute, ABD};
use bincode::{Decode, Encode};

/// A post or reply. Parents are referenced by (author, permlink); children
/// are discovered through the root index.
#[derive(Clone, Debug, Encode, Decode)]
pub struct CommentObject {
    /// Empty for a root post
    pub parent_author: AccountName,
    pub parent_permlink: String,
    pub author: AccountName,
    pub permlink: String,
    /// Root posts carry their parent permlink as the category
    pub category: String,

    pub title: String,
    pub body: String,
    pub json_metadata: String,

    pub depth: u16,
    pub children: u32,

    pub created: Timestamp,
    pub last_update: Timestamp,
    pub active: Timestamp,
    pub last_payout: Timestamp,
    pub cashout_time: Timestamp,
    pub max_cashout_time: Timestamp,

    pub net_rshares: Share,
    pub abs_rshares: Share,
    pub vote_rshares: Share,
    pub children_abs_rshares: Share,
    /// Sum of this comment's and all descendants' rshares², maintained up
    /// the tree on every vote
    pub children_rshares2: u128,

    pub total_vote_weight: u64,
    pub reward_weight: u16,
    pub net_votes: i32,

    pub total_payout_value: Asset,
    pub curator_payout_value: Asset,
    pub beneficiary_payout_value: Asset,
    pub author_rewards: Share,

    /// Store id of the root post (self for roots)
    pub root_comment: ObjectId,

    pub max_accepted_payout: Asset,
    pub percent_amaranth_dollars: u16,
    pub allow_replies: bool,
    pub allow_votes: bool,
    pub allow_curation_rewards: bool,
    pub beneficiaries: Vec<BeneficiaryRoute>,
}

impl Default for CommentObject {
    fn default() -> Self {
        Self {
            parent_author: AccountName::new(),
            parent_permlink: String::new(),
            author: AccountName::new(),
            permlink: String::new(),
            category: String::new(),
            title: String::new(),
            body: String::new(),
            json_metadata: String::new(),
            depth: 0,
            children: 0,
            created: 0,
            last_update: 0,
            active: 0,
            last_payout: 0,
            cashout_time: TIMESTAMP_MAX,
            max_cashout_time: TIMESTAMP_MAX,
            net_rshares: 0,
            abs_rshares: 0,
            vote_rshares: 0,
            children_abs_rshares: 0,
            children_rshares2: 0,
            total_vote_weight: 0,
            reward_weight: PERCENT_100,
            net_votes: 0,
            total_payout_value: Asset::zero(ABD),
            curator_payout_value: Asset::zero(ABD),
            beneficiary_payout_value: Asset::zero(ABD),
            author_rewards: 0,
            root_comment: 0,
            max_accepted_payout: Asset::new(1_000_000_000_000, ABD),
            percent_amaranth_dollars: PERCENT_100,
            allow_replies: true,
            allow_votes: true,
            allow_curation_rewards: true,
            beneficiaries: Vec::new(),
        }
    }
}

impl CommentObject {
    pub const BY_PERMLINK: u8 = 0;
    pub const BY_CASHOUT_TIME: u8 = 1;
    pub const BY_ROOT: u8 = 2;

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_author.is_empty()
    }
}

impl StoreObject for CommentObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_PERMLINK,
                vec![
                    KeyPart::Str(self.author.clone()),
                    KeyPart::Str(self.permlink.clone()),
                ],
            ),
            IndexKey::new(Self::BY_CASHOUT_TIME, vec![KeyPart::U64(self.cashout_time)]),
            IndexKey::new(Self::BY_ROOT, vec![KeyPart::U64(self.root_comment)]),
        ]
    }
}

/// One voter's standing vote on one comment. `weight` is the curation claim
/// captured when the vote landed.
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct CommentVoteObject {
    pub voter: AccountName,
    pub comment: ObjectId,
    pub weight: u64,
    pub rshares: Share,
    pub vote_percent: i16,
    pub last_update: Timestamp,
    pub num_changes: i8,
}

impl CommentVoteObject {
    pub const BY_COMMENT_VOTER: u8 = 0;
    pub const BY_VOTER_COMMENT: u8 = 1;
}

impl StoreObject for CommentVoteObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_COMMENT_VOTER,
                vec![KeyPart::U64(self.comment), KeyPart::Str(self.voter.clone())],
            ),
            IndexKey::new(
                Self::BY_VOTER_COMMENT,
                vec![KeyPart::Str(self.voter.clone()), KeyPart::U64(self.comment)],
            ),
        ]
    }
}
