// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{Chain, ChainError, ChainResult};
use crate::consensus::*;
use crate::primitives::{Asset, ABD, AMA, VESTS};
use std::collections::HashMap;

impl Chain {
    /// End-of-block audit: conservation of all three supplies, vote totals
    /// and the comment rshares² rollup. Any violation is fatal and unwinds
    /// the block.
    pub(crate) fn validate_invariants(&self) -> ChainResult<()> {
        let props = self.store.props();

        let mut total_supply = Asset::zero(AMA);
        let mut total_abd = Asset::zero(ABD);
        let mut total_vesting = Asset::zero(VESTS);
        let mut total_vsf_votes: Share = 0;

        // no witness may hold more votes than vesting shares exist
        for (_, witness) in self.store.witnesses.iter() {
            if witness.votes > props.total_vesting_shares.amount {
                return Err(ChainError::Fatal(format!(
                    "witness {} holds more votes than total vesting shares",
                    witness.owner
                )));
            }
        }

        for (_, account) in self.store.accounts.iter() {
            total_supply += account.balance;
            total_supply += account.savings_balance;
            total_abd += account.abd_balance;
            total_abd += account.savings_abd_balance;
            total_vesting += account.vesting_shares;
            total_vsf_votes += if !account.has_proxy() {
                account.witness_vote_weight()
            } else {
                account.proxied_vsf_votes[MAX_PROXY_DEPTH - 1]
            };
        }

        for (_, request) in self.store.convert_requests.iter() {
            if request.amount.symbol == AMA {
                total_supply += request.amount;
            } else if request.amount.symbol == ABD {
                total_abd += request.amount;
            } else {
                return Err(ChainError::Fatal(
                    "illegal symbol in a conversion request".into(),
                ));
            }
        }

        for (_, order) in self.store.limit_orders.iter() {
            if order.sell_price.base.symbol == AMA {
                total_supply += Asset::new(order.for_sale, AMA);
            } else if order.sell_price.base.symbol == ABD {
                total_abd += Asset::new(order.for_sale, ABD);
            }
        }

        // margin collateral and settlement funds hold core tokens too
        for (_, call) in self.store.call_orders.iter() {
            if call.collateral.symbol == AMA {
                total_supply += call.collateral;
            } else if call.collateral.symbol == ABD {
                total_abd += call.collateral;
            }
        }
        for (_, bitasset) in self.store.bitassets.iter() {
            if bitasset.settlement_fund > 0 {
                if bitasset.options.short_backing_asset == AMA {
                    total_supply += Asset::new(bitasset.settlement_fund, AMA);
                } else if bitasset.options.short_backing_asset == ABD {
                    total_abd += Asset::new(bitasset.settlement_fund, ABD);
                }
            }
        }
        for (_, dynamic) in self.store.asset_dynamics.iter() {
            total_supply += Asset::new(dynamic.fee_pool, AMA);
        }

        for (_, escrow) in self.store.escrows.iter() {
            total_supply += escrow.ama_balance;
            total_abd += escrow.abd_balance;
            if escrow.pending_fee.symbol == AMA {
                total_supply += escrow.pending_fee;
            } else if escrow.pending_fee.symbol == ABD {
                total_abd += Asset::new(escrow.pending_fee.amount, ABD);
            } else {
                return Err(ChainError::Fatal(
                    "escrow pending fee is neither AMA nor ABD".into(),
                ));
            }
        }

        for (_, withdraw) in self.store.savings_withdraws.iter() {
            if withdraw.amount.symbol == AMA {
                total_supply += withdraw.amount;
            } else if withdraw.amount.symbol == ABD {
                total_abd += withdraw.amount;
            } else {
                return Err(ChainError::Fatal(
                    "savings withdraw is neither AMA nor ABD".into(),
                ));
            }
        }

        for (_, fund) in self.store.reward_funds.iter() {
            total_supply += fund.reward_balance;
        }

        total_supply += props.total_vesting_fund + props.total_reward_fund;

        if props.current_supply != total_supply {
            return Err(ChainError::Fatal(format!(
                "AMA supply does not balance: tracked {} vs summed {}",
                props.current_supply, total_supply
            )));
        }
        if props.current_abd_supply != total_abd {
            return Err(ChainError::Fatal(format!(
                "ABD supply does not balance: tracked {} vs summed {}",
                props.current_abd_supply, total_abd
            )));
        }
        if props.total_vesting_shares != total_vesting {
            return Err(ChainError::Fatal(format!(
                "vesting shares do not balance: tracked {} vs summed {}",
                props.total_vesting_shares, total_vesting
            )));
        }
        if props.total_vesting_shares.amount != total_vsf_votes {
            return Err(ChainError::Fatal(
                "witness vote weight does not match total vesting shares".into(),
            ));
        }

        self.validate_rshares2_rollup()?;

        if props.virtual_supply < props.current_supply {
            return Err(ChainError::Fatal(
                "virtual supply fell below current supply".into(),
            ));
        }
        let median = self.store.feed().current_median_history;
        if !median.is_null() {
            let expected = props.current_supply + median.convert(props.current_abd_supply);
            if props.virtual_supply != expected {
                return Err(ChainError::Fatal(format!(
                    "virtual supply does not balance: tracked {} vs {}",
                    props.virtual_supply, expected
                )));
            }
        }

        Ok(())
    }

    /// `children_rshares2` must equal the sum of each comment's and its
    /// descendants' rshares², and the root total must equal the global sum
    fn validate_rshares2_rollup(&self) -> ChainResult<()> {
        let mut expected: HashMap<u64, u128> = HashMap::new();

        for (id, comment) in self.store.comments.iter() {
            let own = if comment.net_rshares > 0 {
                calculate_vshares(comment.net_rshares as u128, CONTENT_CONSTANT)
            } else {
                0
            };

            // add this comment's shares to itself and every ancestor
            let mut current_id = id;
            loop {
                *expected.entry(current_id).or_default() += own;
                let current = self.store.comments.get(current_id).expect("indexed comment");
                if current.is_root() {
                    break;
                }
                current_id = self
                    .find_comment_id(&current.parent_author, &current.parent_permlink)
                    .ok_or_else(|| {
                        ChainError::Fatal("comment parent is missing from the store".into())
                    })?;
            }
        }

        let mut root_total: u128 = 0;
        for (id, comment) in self.store.comments.iter() {
            let rollup = expected.get(&id).copied().unwrap_or(0);
            if comment.children_rshares2 != rollup {
                return Err(ChainError::Fatal(format!(
                    "children rshares2 rollup broken at {}/{}",
                    comment.author, comment.permlink
                )));
            }
            if comment.is_root() {
                root_total += rollup;
            }
        }

        if root_total != self.store.props().total_reward_shares2 {
            return Err(ChainError::Fatal(
                "root rshares2 rollup does not match the global total".into(),
            ));
        }
        Ok(())
    }
}
