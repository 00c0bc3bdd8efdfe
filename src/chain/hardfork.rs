// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{Chain, ChainError, ChainResult};
use crate::chain::store::ObjectId;
use crate::consensus::*;
use crate::primitives::{Asset, HardforkOperation, Operation, AMA};
use log::warn;

impl Chain {
    /// Apply any hardforks that have come due. Once version reporting is
    /// consensus, activation additionally requires the armed witness-majority
    /// vote.
    pub(crate) fn process_hardforks(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();

        if self.has_hardfork(HF_VERSION_REPORTING) {
            loop {
                let hardforks = self.store.hardforks();
                let armed = hardfork_version(hardforks.last_hardfork) < hardforks.next_hardfork
                    && hardforks.next_hardfork_time <= now;
                if !armed {
                    break;
                }
                if hardforks.last_hardfork >= NUM_HARDFORKS {
                    return Err(ChainError::Consensus(
                        "chain has voted in a hardfork this binary does not know".into(),
                    ));
                }
                let next = hardforks.last_hardfork + 1;
                self.apply_hardfork(next)?;
            }
        } else {
            while self.store.hardforks().last_hardfork < HF_VERSION_REPORTING
                && hardfork_time(self.store.hardforks().last_hardfork + 1) <= now
            {
                let next = self.store.hardforks().last_hardfork + 1;
                self.apply_hardfork(next)?;
            }
        }
        Ok(())
    }

    /// Fast-forward hardforks, used by genesis bootstrapping and tests
    pub fn set_hardfork(&mut self, hardfork: u32) -> ChainResult<()> {
        let target = hardfork.min(NUM_HARDFORKS);
        while self.store.hardforks().last_hardfork < target {
            let next = self.store.hardforks().last_hardfork + 1;
            self.store.hardforks_mut(|hardforks| {
                hardforks.next_hardfork = hardfork_version(next);
                hardforks.next_hardfork_time = 0;
            });
            self.apply_hardfork(next)?;
        }
        Ok(())
    }

    fn apply_hardfork(&mut self, hardfork: u32) -> ChainResult<()> {
        warn!("HARDFORK {hardfork} at block {}", self.head_block_num());

        match hardfork {
            HF_VERSION_REPORTING => {}
            HF_VOTE_RETALLY => {
                self.retally_witness_votes()?;
                self.reset_virtual_schedule_time();
            }
            HF_COUNT_RETALLY => {
                self.retally_witness_vote_counts(true)?;
                self.retally_comment_children();
            }
            HF_REWARD_FUNDS => {
                self.seed_reward_funds()?;
            }
            HF_COLLATERAL_MARKETS => {
                // the gate alone arms the asset and margin machinery
            }
            HF_DELEGATION => {}
            _ => {
                return Err(ChainError::Consensus(format!(
                    "cannot apply unknown hardfork {hardfork}"
                )));
            }
        }

        let expected_len = hardfork as usize;
        let hfp = self.store.hardforks();
        if hardfork != hfp.last_hardfork + 1 || hfp.processed_hardforks.len() != expected_len {
            return Err(ChainError::Fatal(format!(
                "hardfork {hardfork} being applied out of order"
            )));
        }

        self.store.hardforks_mut(|hardforks| {
            hardforks.processed_hardforks.push(hardfork_time(hardfork));
            hardforks.last_hardfork = hardfork;
            hardforks.current_hardfork_version = hardfork_version(hardfork);
        });

        self.push_virtual_operation(Operation::Hardfork(HardforkOperation {
            hardfork_id: hardfork,
        }));
        Ok(())
    }

    /// Create the named reward funds, move the global content pool into
    /// them, and give every open discussion a single fixed cashout window.
    fn seed_reward_funds(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        let pool = self.store.props().total_reward_fund;

        let post_share = percent_of(pool.amount, POST_REWARD_FUND_PERCENT);
        let comment_share = pool.amount - post_share;

        self.store.reward_funds.create(|fund| {
            fund.name = POST_REWARD_FUND_NAME.to_owned();
            fund.percent_content_rewards = POST_REWARD_FUND_PERCENT;
            fund.reward_balance = Asset::new(post_share, AMA);
            fund.content_constant = CONTENT_CONSTANT;
            fund.last_update = now;
        });
        self.store.reward_funds.create(|fund| {
            fund.name = COMMENT_REWARD_FUND_NAME.to_owned();
            fund.percent_content_rewards = COMMENT_REWARD_FUND_PERCENT;
            fund.reward_balance = Asset::new(comment_share, AMA);
            fund.content_constant = CONTENT_CONSTANT;
            fund.last_update = now;
        });

        self.store.props_mut(|props| {
            props.total_reward_fund = Asset::zero(AMA);
        });

        // every open comment gets at least a full window from creation
        let open: Vec<ObjectId> = self
            .store
            .comments
            .iter()
            .filter(|(_, comment)| comment.cashout_time != TIMESTAMP_MAX)
            .map(|(id, _)| id)
            .collect();
        for id in open {
            self.store.comments.modify(id, |comment| {
                comment.cashout_time =
                    comment.cashout_time.max(comment.created + CASHOUT_WINDOW_SECS);
            });
        }
        Ok(())
    }

    /// One-shot recount of comment children up every reply chain
    pub(crate) fn retally_comment_children(&mut self) {
        let all: Vec<ObjectId> = self.store.comments.iter().map(|(id, _)| id).collect();
        for id in &all {
            self.store.comments.modify(*id, |comment| {
                comment.children = 0;
            });
        }

        for id in all {
            let comment = self.store.comments.get(id).expect("indexed comment");
            if comment.is_root() {
                continue;
            }
            let mut parent = self.find_comment_id(
                &comment.parent_author.clone(),
                &comment.parent_permlink.clone(),
            );
            while let Some(parent_id) = parent {
                self.store.comments.modify(parent_id, |comment| {
                    comment.children += 1;
                });
                let row = self.store.comments.get(parent_id).expect("indexed comment");
                if row.is_root() {
                    break;
                }
                parent = self
                    .find_comment_id(&row.parent_author.clone(), &row.parent_permlink.clone());
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_fund_split_covers_the_pool() {
        let pool: Share = 1_000_001;
        let post = percent_of(pool, POST_REWARD_FUND_PERCENT);
        let comment = pool - post;
        assert_eq!(post + comment, pool);
        assert!(post > comment);
    }

    #[test]
    fn hardfork_constants_cover_the_gates() {
        assert_eq!(NUM_HARDFORKS, HF_DELEGATION);
    }
}
