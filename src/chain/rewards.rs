// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{Chain, ChainError, ChainResult};
use crate::chain::state::*;
use crate::chain::store::{KeyPart, ObjectId};
use crate::consensus::*;
use crate::primitives::*;
use log::warn;

/// Per-fund snapshot used while paying a block's cashouts
struct RewardFundContext {
    fund_id: ObjectId,
    recent_rshares2: u128,
    reward_balance: Asset,
    content_constant: u128,
    awarded: Share,
}

struct CommentRewardContext {
    total_reward_shares2: u128,
    total_reward_fund: Asset,
}

impl Chain {
    /// Mint the per-block inflation and split it between content funds, the
    /// vesting pool and the producing witness.
    pub(crate) fn process_funds(&mut self) -> ChainResult<()> {
        let props = self.store.props();
        let rate = current_inflation_rate(props.head_block_number);

        let new_ama = (props.virtual_supply.amount as i128 * rate as i128
            / (PERCENT_100 as i128 * BLOCKS_PER_YEAR as i128)) as Share;

        let mut content_reward = percent_of(new_ama, CONTENT_REWARD_PERCENT);
        if self.has_hardfork(HF_REWARD_FUNDS) {
            content_reward = self.pay_reward_funds(content_reward)?;
        }
        let vesting_reward = percent_of(new_ama, VESTING_FUND_PERCENT);
        let mut witness_reward = new_ama - content_reward - vesting_reward;

        let schedule = self.store.schedule();
        let current_witness = self.store.props().current_witness.clone();
        let witness = self.get_witness(&current_witness)?;
        witness_reward *= MAX_WITNESSES as Share;
        witness_reward *= match witness.schedule {
            WitnessScheduleClass::Timeshare => schedule.timeshare_weight as Share,
            WitnessScheduleClass::Miner => schedule.miner_weight as Share,
            WitnessScheduleClass::Top => schedule.top_weight as Share,
        };
        witness_reward /= schedule.witness_pay_normalization_factor as Share;

        let new_ama = content_reward + vesting_reward + witness_reward;
        let keep_global_pool = !self.has_hardfork(HF_REWARD_FUNDS);
        self.store.props_mut(|props| {
            props.total_vesting_fund += Asset::new(vesting_reward, AMA);
            if keep_global_pool {
                props.total_reward_fund += Asset::new(content_reward, AMA);
            }
            props.current_supply += Asset::new(new_ama, AMA);
            props.virtual_supply += Asset::new(new_ama, AMA);
        });

        let witness_account = self.get_account_id(&current_witness)?;
        self.create_vesting(witness_account, Asset::new(witness_reward, AMA))?;
        Ok(())
    }

    /// Distribute the block's content reward across the named funds by
    /// percentage; returns the amount actually used
    fn pay_reward_funds(&mut self, reward: Share) -> ChainResult<Share> {
        let fund_ids: Vec<ObjectId> = self.store.reward_funds.iter().map(|(id, _)| id).collect();
        let mut used_rewards = 0;

        for id in fund_ids {
            let percent = self
                .store
                .reward_funds
                .get(id)
                .expect("indexed fund")
                .percent_content_rewards;
            let share = percent_of(reward, percent);
            self.store.reward_funds.modify(id, |fund| {
                fund.reward_balance += Asset::new(share, AMA);
            });
            used_rewards += share;
        }

        if used_rewards > reward {
            return Err(ChainError::Fatal(
                "reward fund percentages exceed the content reward".into(),
            ));
        }
        Ok(used_rewards)
    }

    /// The reward fund a comment pays out of: root posts from the post fund,
    /// replies from the comment fund
    fn reward_fund_for(&self, comment: &CommentObject) -> ChainResult<ObjectId> {
        let name = if comment.is_root() {
            POST_REWARD_FUND_NAME
        } else {
            COMMENT_REWARD_FUND_NAME
        };
        self.get_reward_fund_id(name)
    }

    /// Pay every comment whose cashout window has closed
    pub(crate) fn process_comment_cashout(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();

        if self.has_hardfork(HF_REWARD_FUNDS) {
            // decay fund state, then snapshot it for the whole block
            let fund_ids: Vec<ObjectId> =
                self.store.reward_funds.iter().map(|(id, _)| id).collect();
            let mut contexts: Vec<RewardFundContext> = Vec::with_capacity(fund_ids.len());

            for fund_id in fund_ids {
                let last_update = self
                    .store
                    .reward_funds
                    .get(fund_id)
                    .expect("indexed fund")
                    .last_update;
                self.store.reward_funds.modify(fund_id, |fund| {
                    fund.recent_rshares2 -= fund.recent_rshares2
                        * u128::from(now - last_update)
                        / u128::from(RECENT_RSHARES_DECAY_SECS);
                    fund.last_update = now;
                });

                let fund = self.store.reward_funds.get(fund_id).expect("indexed fund");
                contexts.push(RewardFundContext {
                    fund_id,
                    recent_rshares2: fund.recent_rshares2,
                    reward_balance: fund.reward_balance,
                    content_constant: fund.content_constant,
                    awarded: 0,
                });
            }

            // every comment cashing out this block adds its shares first
            for comment_id in self.due_comments(now) {
                let comment = self.store.comments.get(comment_id).expect("indexed comment");
                if comment.net_rshares > 0 {
                    let fund_id = self.reward_fund_for(comment)?;
                    let ctx = contexts
                        .iter_mut()
                        .find(|ctx| ctx.fund_id == fund_id)
                        .expect("fund context");
                    ctx.recent_rshares2 += calculate_vshares(
                        comment.net_rshares as u128,
                        ctx.content_constant,
                    );
                }
            }

            for comment_id in self.due_comments(now) {
                let comment = self.store.comments.get(comment_id).expect("indexed comment");
                let fund_id = self.reward_fund_for(comment)?;
                let ctx = contexts
                    .iter_mut()
                    .find(|ctx| ctx.fund_id == fund_id)
                    .expect("fund context");
                let reward_ctx = CommentRewardContext {
                    total_reward_shares2: ctx.recent_rshares2,
                    total_reward_fund: ctx.reward_balance,
                };
                let content_constant = ctx.content_constant;
                let awarded =
                    self.cashout_comment_helper(comment_id, &reward_ctx, content_constant)?;
                let ctx = contexts
                    .iter_mut()
                    .find(|ctx| ctx.fund_id == fund_id)
                    .expect("fund context");
                ctx.awarded += awarded;
            }

            for ctx in contexts {
                self.store.reward_funds.modify(ctx.fund_id, |fund| {
                    fund.recent_rshares2 = ctx.recent_rshares2;
                    fund.reward_balance -= Asset::new(ctx.awarded, AMA);
                });
            }
        } else {
            // legacy: the whole discussion pays when its root cashes out,
            // against the global pool
            while let Some(root_id) = self.first_due_comment(now) {
                let root = self
                    .store
                    .comments
                    .get(root_id)
                    .expect("indexed comment")
                    .root_comment;

                let replies: Vec<ObjectId> = self
                    .store
                    .comments
                    .iter_prefix(CommentObject::BY_ROOT, vec![KeyPart::U64(root)])
                    .map(|(_, id)| id)
                    .collect();
                for comment_id in replies {
                    let props = self.store.props();
                    let reward_ctx = CommentRewardContext {
                        total_reward_shares2: props.total_reward_shares2,
                        total_reward_fund: props.total_reward_fund,
                    };
                    let awarded = self.cashout_comment_helper(
                        comment_id,
                        &reward_ctx,
                        CONTENT_CONSTANT,
                    )?;
                    if awarded > 0 {
                        self.store.props_mut(|props| {
                            props.total_reward_fund -= Asset::new(awarded, AMA);
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn due_comments(&self, now: Timestamp) -> Vec<ObjectId> {
        self.store
            .comments
            .iter_prefix(CommentObject::BY_CASHOUT_TIME, vec![])
            .take_while(|(key, _)| matches!(key.parts[0], KeyPart::U64(t) if t <= now))
            .map(|(_, id)| id)
            .collect()
    }

    fn first_due_comment(&self, now: Timestamp) -> Option<ObjectId> {
        self.store
            .comments
            .iter_prefix(CommentObject::BY_CASHOUT_TIME, vec![])
            .next()
            .filter(|(key, _)| matches!(key.parts[0], KeyPart::U64(t) if t <= now))
            .map(|(_, id)| id)
    }

    /// Allocate one comment's payout: curators first, then beneficiaries,
    /// then the author split between ABD and vesting. Returns the AMA drawn
    /// from the fund.
    fn cashout_comment_helper(
        &mut self,
        comment_id: ObjectId,
        ctx: &CommentRewardContext,
        content_constant: u128,
    ) -> ChainResult<Share> {
        let now = self.head_block_time();
        let comment = self
            .store
            .comments
            .get(comment_id)
            .expect("indexed comment")
            .clone();
        let mut claimed_reward: Share = 0;

        if comment.net_rshares > 0 && ctx.total_reward_shares2 > 0 {
            let vshares = calculate_vshares(comment.net_rshares as u128, content_constant);
            let mut reward_tokens = (u128::from(ctx.total_reward_fund.amount as u64)
                * vshares
                / ctx.total_reward_shares2) as Share;
            reward_tokens = percent_of(reward_tokens, comment.reward_weight);

            // honor the author's payout cap, measured in ABD
            let abd_value = self.to_abd(Asset::new(reward_tokens, AMA));
            if abd_value.amount > 0 && abd_value > comment.max_accepted_payout {
                let median = self.store.feed().current_median_history;
                reward_tokens = median.convert(comment.max_accepted_payout).amount;
            }

            if reward_tokens > 0 {
                let mut curation_tokens =
                    percent_of(reward_tokens, self.curation_rewards_percent(&comment));
                let mut author_tokens = reward_tokens - curation_tokens;

                let unclaimed = self.pay_curators(comment_id, &mut curation_tokens)?;
                author_tokens += unclaimed;

                claimed_reward = author_tokens + curation_tokens;

                let mut total_beneficiary: Share = 0;
                for route in &comment.beneficiaries {
                    let benefactor_tokens = percent_of(author_tokens, route.weight);
                    let benefactor_id = self.get_account_id(&route.account)?;
                    let vest_created =
                        self.create_vesting(benefactor_id, Asset::new(benefactor_tokens, AMA))?;
                    self.push_virtual_operation(Operation::CommentBenefactorReward(
                        CommentBenefactorRewardOperation {
                            benefactor: route.account.clone(),
                            author: comment.author.clone(),
                            permlink: comment.permlink.clone(),
                            reward: vest_created,
                        },
                    ));
                    total_beneficiary += benefactor_tokens;
                }
                author_tokens -= total_beneficiary;

                let abd_ama = (author_tokens as i128 * comment.percent_amaranth_dollars as i128
                    / (2 * PERCENT_100 as i128)) as Share;
                let vesting_ama = author_tokens - abd_ama;

                let author_id = self.get_account_id(&comment.author)?;
                let vest_created =
                    self.create_vesting(author_id, Asset::new(vesting_ama, AMA))?;
                let (abd_payout, ama_payout) =
                    self.create_abd(author_id, Asset::new(abd_ama, AMA))?;

                self.push_virtual_operation(Operation::AuthorReward(AuthorRewardOperation {
                    author: comment.author.clone(),
                    permlink: comment.permlink.clone(),
                    abd_payout,
                    ama_payout,
                    vesting_payout: vest_created,
                }));
                self.push_virtual_operation(Operation::CommentReward(CommentRewardOperation {
                    author: comment.author.clone(),
                    permlink: comment.permlink.clone(),
                    payout: self.to_abd(Asset::new(claimed_reward, AMA)),
                }));

                let total_payout = self.to_abd(Asset::new(vesting_ama + abd_ama, AMA));
                let curator_payout = self.to_abd(Asset::new(curation_tokens, AMA));
                let beneficiary_payout = self.to_abd(Asset::new(total_beneficiary, AMA));
                self.store.comments.modify(comment_id, |comment| {
                    comment.total_payout_value += total_payout;
                    comment.curator_payout_value += curator_payout;
                    comment.beneficiary_payout_value += beneficiary_payout;
                    comment.author_rewards += author_tokens;
                });
                self.store.accounts.modify(author_id, |account| {
                    account.posting_rewards += author_tokens;
                });
            }

            // drop the paid comment's contribution from the rollup
            let old_rshares2 =
                calculate_vshares(comment.net_rshares as u128, CONTENT_CONSTANT);
            self.adjust_rshares2(comment_id, old_rshares2, 0)?;
        }

        let paid_forever = self.has_hardfork(HF_REWARD_FUNDS)
            || !comment.is_root()
            || comment.last_payout > 0;
        self.store.comments.modify(comment_id, |comment| {
            // negative rshares hang around for the next window
            if comment.net_rshares > 0 {
                comment.net_rshares = 0;
            }
            comment.children_abs_rshares = 0;
            comment.abs_rshares = 0;
            comment.vote_rshares = 0;
            comment.total_vote_weight = 0;
            comment.max_cashout_time = TIMESTAMP_MAX;
            comment.cashout_time = if paid_forever {
                TIMESTAMP_MAX
            } else {
                now + CASHOUT_WINDOW_SECS
            };
            comment.last_payout = now;
        });

        self.push_virtual_operation(Operation::CommentPayoutUpdate(
            CommentPayoutUpdateOperation {
                author: comment.author.clone(),
                permlink: comment.permlink.clone(),
            },
        ));

        // standing votes freeze (or vanish once the comment is done paying)
        let vote_ids: Vec<ObjectId> = self
            .store
            .comment_votes
            .iter_prefix(
                CommentVoteObject::BY_COMMENT_VOTER,
                vec![KeyPart::U64(comment_id)],
            )
            .map(|(_, id)| id)
            .collect();
        for vote_id in vote_ids {
            if paid_forever {
                self.store.comment_votes.remove(vote_id);
            } else {
                self.store.comment_votes.modify(vote_id, |vote| {
                    vote.num_changes = -1;
                });
            }
        }

        Ok(claimed_reward)
    }

    pub(crate) fn curation_rewards_percent(&self, comment: &CommentObject) -> u16 {
        if self.has_hardfork(HF_REWARD_FUNDS) {
            // replies pay their whole reward to the author
            if comment.is_root() {
                CURATION_PERCENT
            } else {
                0
            }
        } else {
            CURATION_PERCENT_LEGACY
        }
    }

    /// Distribute the curator pool pro-rata by recorded vote weight; returns
    /// what nobody claimed (dust and disabled curation), which flows back to
    /// the author.
    fn pay_curators(
        &mut self,
        comment_id: ObjectId,
        max_rewards: &mut Share,
    ) -> ChainResult<Share> {
        let comment = self.store.comments.get(comment_id).expect("indexed comment");
        let total_weight = u128::from(comment.total_vote_weight);
        let allow_curation = comment.allow_curation_rewards;
        let author = comment.author.clone();
        let permlink = comment.permlink.clone();

        let mut unclaimed_rewards = *max_rewards;
        if !allow_curation {
            unclaimed_rewards = 0;
            *max_rewards = 0;
        } else if total_weight > 0 {
            let votes: Vec<(AccountName, u64)> = self
                .store
                .comment_votes
                .iter_prefix(
                    CommentVoteObject::BY_COMMENT_VOTER,
                    vec![KeyPart::U64(comment_id)],
                )
                .map(|(_, id)| {
                    let vote = self.store.comment_votes.get(id).expect("indexed vote");
                    (vote.voter.clone(), vote.weight)
                })
                .collect();

            for (voter, weight) in votes {
                let claim =
                    ((*max_rewards as u128 * u128::from(weight)) / total_weight) as Share;
                if claim > 0 {
                    unclaimed_rewards -= claim;
                    let voter_id = self.get_account_id(&voter)?;
                    let reward = self.create_vesting(voter_id, Asset::new(claim, AMA))?;
                    self.push_virtual_operation(Operation::CurationReward(
                        CurationRewardOperation {
                            curator: voter.clone(),
                            reward,
                            comment_author: author.clone(),
                            comment_permlink: permlink.clone(),
                        },
                    ));
                    self.store.accounts.modify(voter_id, |account| {
                        account.curation_rewards += claim;
                    });
                }
            }
        }

        *max_rewards -= unclaimed_rewards;
        Ok(unclaimed_rewards)
    }

    /// Maintain the children-rshares² rollup from a comment up to its root,
    /// plus the global total
    pub(crate) fn adjust_rshares2(
        &mut self,
        comment_id: ObjectId,
        old_rshares2: u128,
        new_rshares2: u128,
    ) -> ChainResult<()> {
        let mut current = comment_id;
        loop {
            self.store.comments.modify(current, |comment| {
                comment.children_rshares2 =
                    comment.children_rshares2 - old_rshares2 + new_rshares2;
            });
            let comment = self.store.comments.get(current).expect("indexed comment");
            if comment.is_root() {
                break;
            }
            current = self.get_comment_id(
                &comment.parent_author.clone(),
                &comment.parent_permlink.clone(),
            )?;
        }

        self.store.props_mut(|props| {
            props.total_reward_shares2 =
                props.total_reward_shares2 - old_rshares2 + new_rshares2;
        });
        Ok(())
    }

    // --- vesting withdrawals ---

    pub(crate) fn process_vesting_withdrawals(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();

        loop {
            let due = self
                .store
                .accounts
                .first_by_prefix(AccountObject::BY_NEXT_VESTING_WITHDRAWAL, vec![]);
            let from_id = match due {
                Some(id)
                    if self
                        .store
                        .accounts
                        .get(id)
                        .expect("indexed account")
                        .next_vesting_withdrawal
                        <= now =>
                {
                    id
                }
                _ => break,
            };

            let from_account = self
                .store
                .accounts
                .get(from_id)
                .expect("indexed account")
                .clone();
            let share_price = self.store.props().vesting_share_price();

            // the last installment may be a partial one
            let to_withdraw = if from_account.to_withdraw - from_account.withdrawn
                < from_account.vesting_withdraw_rate.amount
            {
                from_account
                    .vesting_shares
                    .amount
                    .min(from_account.to_withdraw % from_account.vesting_withdraw_rate.amount)
            } else {
                from_account
                    .vesting_shares
                    .amount
                    .min(from_account.vesting_withdraw_rate.amount)
            };

            let routes: Vec<WithdrawRouteObject> = self
                .store
                .withdraw_routes
                .iter_prefix(
                    WithdrawRouteObject::BY_ROUTE,
                    vec![KeyPart::Str(from_account.name.clone())],
                )
                .map(|(_, id)| {
                    self.store
                        .withdraw_routes
                        .get(id)
                        .expect("indexed route")
                        .clone()
                })
                .collect();

            let mut vests_deposited_as_ama: Share = 0;
            let mut vests_deposited_as_vests: Share = 0;
            let mut total_ama_converted = Asset::zero(AMA);

            // vesting-preserving routes first, for maximum precision
            for route in routes.iter().filter(|route| route.auto_vest) {
                let to_deposit =
                    (to_withdraw as i128 * route.percent as i128 / PERCENT_100 as i128) as Share;
                vests_deposited_as_vests += to_deposit;

                if to_deposit > 0 {
                    let to_id = self.get_account_id(&route.to_account)?;
                    self.store.accounts.modify(to_id, |account| {
                        account.vesting_shares += Asset::new(to_deposit, VESTS);
                    });
                    self.adjust_proxied_witness_votes_simple(to_id, to_deposit)?;
                    self.push_virtual_operation(Operation::FillVestingWithdraw(
                        FillVestingWithdrawOperation {
                            from_account: from_account.name.clone(),
                            to_account: route.to_account.clone(),
                            withdrawn: Asset::new(to_deposit, VESTS),
                            deposited: Asset::new(to_deposit, VESTS),
                        },
                    ));
                }
            }

            for route in routes.iter().filter(|route| !route.auto_vest) {
                let to_deposit =
                    (to_withdraw as i128 * route.percent as i128 / PERCENT_100 as i128) as Share;
                vests_deposited_as_ama += to_deposit;
                let converted = share_price.convert(Asset::new(to_deposit, VESTS));
                total_ama_converted += converted;

                if to_deposit > 0 {
                    let to_id = self.get_account_id(&route.to_account)?;
                    self.adjust_balance(to_id, converted)?;
                    self.store.props_mut(|props| {
                        props.total_vesting_fund -= converted;
                        props.total_vesting_shares -= Asset::new(to_deposit, VESTS);
                    });
                    self.push_virtual_operation(Operation::FillVestingWithdraw(
                        FillVestingWithdrawOperation {
                            from_account: from_account.name.clone(),
                            to_account: route.to_account.clone(),
                            withdrawn: Asset::new(to_deposit, VESTS),
                            deposited: converted,
                        },
                    ));
                }
            }

            let to_convert = to_withdraw - vests_deposited_as_ama - vests_deposited_as_vests;
            if to_convert < 0 {
                return Err(ChainError::Fatal(
                    "deposited more vests than were scheduled for withdrawal".into(),
                ));
            }
            let converted_ama = share_price.convert(Asset::new(to_convert, VESTS));

            self.adjust_balance(from_id, converted_ama)?;
            self.store.accounts.modify(from_id, |account| {
                account.vesting_shares -= Asset::new(to_withdraw, VESTS);
                account.withdrawn += to_withdraw;

                if account.withdrawn >= account.to_withdraw
                    || account.vesting_shares.amount == 0
                {
                    account.vesting_withdraw_rate.amount = 0;
                    account.next_vesting_withdrawal = TIMESTAMP_MAX;
                } else {
                    account.next_vesting_withdrawal += VESTING_WITHDRAW_INTERVAL_SECS;
                }
            });
            self.store.props_mut(|props| {
                props.total_vesting_fund -= converted_ama;
                props.total_vesting_shares -= Asset::new(to_convert, VESTS);
            });

            if to_withdraw > 0 {
                self.adjust_proxied_witness_votes_simple(from_id, -to_withdraw)?;
            }
            self.push_virtual_operation(Operation::FillVestingWithdraw(
                FillVestingWithdrawOperation {
                    from_account: from_account.name.clone(),
                    to_account: from_account.name.clone(),
                    withdrawn: Asset::new(to_withdraw, VESTS),
                    deposited: converted_ama,
                },
            ));
        }
        Ok(())
    }

    pub(crate) fn process_savings_withdraws(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        loop {
            let due = self
                .store
                .savings_withdraws
                .first_by_prefix(SavingsWithdrawObject::BY_COMPLETE, vec![]);
            let id = match due {
                Some(id)
                    if self
                        .store
                        .savings_withdraws
                        .get(id)
                        .expect("indexed withdraw")
                        .complete
                        <= now =>
                {
                    id
                }
                _ => break,
            };

            let withdraw = self
                .store
                .savings_withdraws
                .get(id)
                .expect("indexed withdraw")
                .clone();
            let to_id = self.get_account_id(&withdraw.to)?;
            self.adjust_balance(to_id, withdraw.amount)?;

            let from_id = self.get_account_id(&withdraw.from)?;
            self.store.accounts.modify(from_id, |account| {
                account.savings_withdraw_requests -= 1;
            });

            self.push_virtual_operation(Operation::FillTransferFromSavings(
                FillTransferFromSavingsOperation {
                    from: withdraw.from.clone(),
                    to: withdraw.to.clone(),
                    amount: withdraw.amount,
                    request_id: withdraw.request_id,
                    memo: withdraw.memo.clone(),
                },
            ));
            self.store.savings_withdraws.remove(id);
        }
        Ok(())
    }

    /// Burn whatever landed on the null account
    pub(crate) fn clear_null_account_balance(&mut self) -> ChainResult<()> {
        let null_id = self.get_account_id(NULL_ACCOUNT)?;
        let null_account = self.store.accounts.get(null_id).expect("indexed account");

        let mut total_ama = Asset::zero(AMA);
        let mut total_abd = Asset::zero(ABD);
        let balance = null_account.balance;
        let savings = null_account.savings_balance;
        let abd = null_account.abd_balance;
        let savings_abd = null_account.savings_abd_balance;
        let vesting = null_account.vesting_shares;

        if balance.amount > 0 {
            total_ama += balance;
            self.adjust_balance(null_id, -balance)?;
        }
        if savings.amount > 0 {
            total_ama += savings;
            self.adjust_savings_balance(null_id, -savings)?;
        }
        if abd.amount > 0 {
            total_abd += abd;
            self.adjust_balance(null_id, -abd)?;
        }
        if savings_abd.amount > 0 {
            total_abd += savings_abd;
            self.adjust_savings_balance(null_id, -savings_abd)?;
        }
        if vesting.amount > 0 {
            let share_price = self.store.props().vesting_share_price();
            let converted = share_price.convert(vesting);

            self.store.props_mut(|props| {
                props.total_vesting_shares -= vesting;
                props.total_vesting_fund -= converted;
            });
            self.store.accounts.modify(null_id, |account| {
                account.vesting_shares = Asset::zero(VESTS);
            });
            total_ama += converted;
        }

        if total_ama.amount > 0 {
            self.adjust_supply(-total_ama, false);
        }
        if total_abd.amount > 0 {
            self.adjust_supply(-total_abd, false);
        }
        Ok(())
    }

    // --- liquidity rewards ---

    fn get_liquidity_reward(&self) -> Asset {
        if self.has_hardfork(HF_REWARD_FUNDS) {
            return Asset::zero(AMA);
        }

        let props = self.store.props();
        let periods_per_year =
            SECONDS_PER_YEAR / (u64::from(LIQUIDITY_REWARD_BLOCKS) * BLOCK_INTERVAL_SECS);
        let percent = (props.virtual_supply.amount as i128 * LIQUIDITY_APR_PERCENT as i128
            / PERCENT_100 as i128
            / periods_per_year as i128) as Share;
        Asset::new(percent.max(MIN_LIQUIDITY_REWARD_AMOUNT), AMA)
    }

    /// Track one side of a fill toward the taker's and maker's liquidity
    /// weights
    pub(crate) fn adjust_liquidity_reward(
        &mut self,
        account_id: ObjectId,
        volume: Asset,
        is_abd: bool,
    ) -> ChainResult<()> {
        let now = self.head_block_time();
        let owner = self
            .store
            .accounts
            .get(account_id)
            .expect("indexed account")
            .name
            .clone();

        let existing = self
            .store
            .liquidity_rewards
            .find_by_key(
                LiquidityRewardBalanceObject::BY_OWNER,
                vec![KeyPart::Str(owner.clone())],
            );
        match existing {
            Some(id) => {
                self.store.liquidity_rewards.modify(id, |row| {
                    if now - row.last_update >= LIQUIDITY_TIMEOUT_SECS {
                        row.abd_volume = 0;
                        row.ama_volume = 0;
                        row.weight = 0;
                    }
                    if is_abd {
                        row.abd_volume += volume.amount;
                    } else {
                        row.ama_volume += volume.amount;
                    }
                    row.update_weight();
                    row.last_update = now;
                });
            }
            None => {
                self.store.liquidity_rewards.create(|row| {
                    row.owner = owner;
                    if is_abd {
                        row.abd_volume = volume.amount;
                    } else {
                        row.ama_volume = volume.amount;
                    }
                    row.update_weight();
                    row.last_update = now;
                });
            }
        }
        Ok(())
    }

    pub(crate) fn pay_liquidity_reward(&mut self) -> ChainResult<()> {
        if self.head_block_num() % LIQUIDITY_REWARD_BLOCKS != 0 {
            return Ok(());
        }

        let reward = self.get_liquidity_reward();
        if reward.amount == 0 {
            return Ok(());
        }

        let best = self
            .store
            .liquidity_rewards
            .last_by_prefix(LiquidityRewardBalanceObject::BY_VOLUME_WEIGHT, vec![]);
        let id = match best {
            Some(id)
                if self
                    .store
                    .liquidity_rewards
                    .get(id)
                    .expect("indexed liquidity row")
                    .weight
                    > 0 =>
            {
                id
            }
            _ => return Ok(()),
        };

        let owner = self
            .store
            .liquidity_rewards
            .get(id)
            .expect("indexed liquidity row")
            .owner
            .clone();
        let owner_id = self.get_account_id(&owner)?;
        let now = self.head_block_time();

        self.adjust_supply(reward, true);
        self.adjust_balance(owner_id, reward)?;
        self.store.liquidity_rewards.modify(id, |row| {
            row.abd_volume = 0;
            row.ama_volume = 0;
            row.last_update = now;
            row.weight = 0;
        });
        self.push_virtual_operation(Operation::LiquidityReward(LiquidityRewardOperation {
            owner,
            payout: reward,
        }));
        Ok(())
    }

    /// One-shot recomputation of all liquidity weights
    pub(crate) fn retally_liquidity_weight(&mut self) {
        let ids: Vec<ObjectId> = self
            .store
            .liquidity_rewards
            .iter()
            .map(|(id, _)| id)
            .collect();
        if !ids.is_empty() {
            warn!("Retallying {} liquidity reward balances", ids.len());
        }
        for id in ids {
            self.store
                .liquidity_rewards
                .modify(id, LiquidityRewardBalanceObject::update_weight);
        }
    }
}
