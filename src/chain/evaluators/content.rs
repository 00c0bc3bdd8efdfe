// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{precondition, Chain, ChainResult};
use crate::chain::state::CommentVoteObject;
use crate::chain::store::{KeyPart, ObjectId};
use crate::consensus::*;
use crate::primitives::*;

pub(super) fn apply_comment(chain: &mut Chain, op: &CommentOperation) -> ChainResult<()> {
    let now = chain.head_block_time();
    let author_id = chain.get_account_id(&op.author)?;

    if let Some(comment_id) = chain.find_comment_id(&op.author, &op.permlink) {
        // edit in place; vote state is untouched
        let comment = chain.store.comments.get(comment_id).expect("indexed comment");
        precondition(
            comment.parent_author == op.parent_author
                && comment.parent_permlink == op.parent_permlink,
            "cannot reparent a comment",
        )?;
        chain.store.comments.modify(comment_id, |comment| {
            comment.title = op.title.clone();
            comment.body = op.body.clone();
            comment.json_metadata = op.json_metadata.clone();
            comment.last_update = now;
            comment.active = now;
        });
        return Ok(());
    }

    let is_root = op.parent_author.is_empty();
    let author = chain.store.accounts.get(author_id).expect("indexed account");

    if is_root {
        precondition(
            author.last_root_post + MIN_ROOT_COMMENT_INTERVAL_SECS <= now
                || author.last_root_post == 0,
            "posting roots faster than once per interval",
        )?;
    } else {
        precondition(
            author.last_post + MIN_REPLY_INTERVAL_SECS <= now || author.last_post == 0,
            "replying faster than once per interval",
        )?;
    }

    let (parent_fields, root_comment, category, depth) = if is_root {
        (None, None, op.parent_permlink.clone(), 0u16)
    } else {
        let parent_id = chain.get_comment_id(&op.parent_author, &op.parent_permlink)?;
        let parent = chain.store.comments.get(parent_id).expect("indexed comment");
        precondition(
            parent.depth < MAX_COMMENT_DEPTH,
            "comment nested too deeply",
        )?;
        precondition(parent.allow_replies, "replies are not allowed here")?;
        (
            Some(parent_id),
            Some(parent.root_comment),
            parent.category.clone(),
            parent.depth + 1,
        )
    };

    // replies only enter their own cashout window once the funds exist;
    // before that the whole discussion pays with its root
    let cashout_time = if is_root || chain.has_hardfork(HF_REWARD_FUNDS) {
        now + CASHOUT_WINDOW_SECS
    } else {
        TIMESTAMP_MAX
    };

    let comment_id = chain.store.comments.create(|comment| {
        comment.parent_author = op.parent_author.clone();
        comment.parent_permlink = op.parent_permlink.clone();
        comment.author = op.author.clone();
        comment.permlink = op.permlink.clone();
        comment.category = category;
        comment.title = op.title.clone();
        comment.body = op.body.clone();
        comment.json_metadata = op.json_metadata.clone();
        comment.depth = depth;
        comment.created = now;
        comment.last_update = now;
        comment.active = now;
        comment.cashout_time = cashout_time;
        comment.max_cashout_time = TIMESTAMP_MAX;
    });

    // roots are their own discussion
    let root = root_comment.unwrap_or(comment_id);
    chain.store.comments.modify(comment_id, |comment| {
        comment.root_comment = root;
    });

    // bump children counters up the reply chain
    let mut parent = parent_fields;
    while let Some(parent_id) = parent {
        chain.store.comments.modify(parent_id, |comment| {
            comment.children += 1;
            comment.active = now;
        });
        let row = chain.store.comments.get(parent_id).expect("indexed comment");
        parent = if row.is_root() {
            None
        } else {
            chain.find_comment_id(&row.parent_author.clone(), &row.parent_permlink.clone())
        };
    }

    chain.store.accounts.modify(author_id, |account| {
        if is_root {
            account.last_root_post = now;
            account.post_count += 1;
        } else {
            account.comment_count += 1;
        }
        account.last_post = now;
    });

    Ok(())
}

pub(super) fn apply_comment_options(
    chain: &mut Chain,
    op: &CommentOptionsOperation,
) -> ChainResult<()> {
    let comment_id = chain.get_comment_id(&op.author, &op.permlink)?;
    let comment = chain.store.comments.get(comment_id).expect("indexed comment");

    precondition(
        comment.abs_rshares == 0,
        "payout options cannot change once votes are cast",
    )?;
    precondition(
        op.max_accepted_payout <= comment.max_accepted_payout,
        "payout cap can only decrease",
    )?;
    precondition(
        op.percent_amaranth_dollars <= comment.percent_amaranth_dollars,
        "stable-dollar share can only decrease",
    )?;
    precondition(
        comment.allow_votes || !op.allow_votes,
        "votes cannot be re-enabled",
    )?;
    precondition(
        comment.allow_curation_rewards || !op.allow_curation_rewards,
        "curation rewards cannot be re-enabled",
    )?;

    let mut beneficiaries: Option<Vec<BeneficiaryRoute>> = None;
    for extension in &op.extensions {
        let CommentOptionsExtension::BeneficiaryRoutes(routes) = extension;
        precondition(
            comment.beneficiaries.is_empty(),
            "beneficiaries may only be set once",
        )?;
        for route in routes {
            chain.get_account_id(&route.account)?;
        }
        beneficiaries = Some(routes.clone());
    }

    chain.store.comments.modify(comment_id, |comment| {
        comment.max_accepted_payout = op.max_accepted_payout;
        comment.percent_amaranth_dollars = op.percent_amaranth_dollars;
        comment.allow_votes = op.allow_votes;
        comment.allow_curation_rewards = op.allow_curation_rewards;
        if let Some(routes) = beneficiaries {
            comment.beneficiaries = routes;
        }
    });
    Ok(())
}

pub(super) fn apply_delete_comment(
    chain: &mut Chain,
    op: &DeleteCommentOperation,
) -> ChainResult<()> {
    let comment_id = chain.get_comment_id(&op.author, &op.permlink)?;
    let comment = chain
        .store
        .comments
        .get(comment_id)
        .expect("indexed comment")
        .clone();

    precondition(comment.children == 0, "cannot delete a comment with replies")?;
    precondition(
        comment.net_rshares <= 0,
        "cannot delete a comment with positive votes",
    )?;

    let votes: Vec<ObjectId> = chain
        .store
        .comment_votes
        .iter_prefix(
            CommentVoteObject::BY_COMMENT_VOTER,
            vec![KeyPart::U64(comment_id)],
        )
        .map(|(_, id)| id)
        .collect();
    for vote_id in votes {
        chain.store.comment_votes.remove(vote_id);
    }

    // walk the reply chain down a child
    if !comment.is_root() {
        let mut parent = chain.find_comment_id(&comment.parent_author, &comment.parent_permlink);
        while let Some(parent_id) = parent {
            chain.store.comments.modify(parent_id, |row| {
                row.children -= 1;
            });
            let row = chain.store.comments.get(parent_id).expect("indexed comment");
            parent = if row.is_root() {
                None
            } else {
                chain.find_comment_id(&row.parent_author.clone(), &row.parent_permlink.clone())
            };
        }
    }

    chain.store.comments.remove(comment_id);
    Ok(())
}

pub(super) fn apply_vote(chain: &mut Chain, op: &VoteOperation) -> ChainResult<()> {
    let now = chain.head_block_time();
    let voter_id = chain.get_account_id(&op.voter)?;
    let comment_id = chain.get_comment_id(&op.author, &op.permlink)?;

    let voter = chain.store.accounts.get(voter_id).expect("indexed account");
    precondition(voter.can_vote, "voter has declined voting rights")?;

    let comment = chain
        .store
        .comments
        .get(comment_id)
        .expect("indexed comment")
        .clone();
    precondition(comment.allow_votes, "votes are not allowed on this comment")?;

    // replies inherit the root's window before the named funds exist
    let payout_time = if chain.has_hardfork(HF_REWARD_FUNDS) || comment.is_root() {
        comment.cashout_time
    } else {
        chain
            .store
            .comments
            .get(comment.root_comment)
            .expect("indexed comment")
            .cashout_time
    };
    precondition(payout_time > now, "the voting window has closed")?;

    // regenerate voting power since the last vote
    let elapsed = now - voter.last_vote_time;
    let regenerated =
        (u64::from(PERCENT_100) * elapsed / VOTE_REGENERATION_SECS).min(u64::from(PERCENT_100));
    let current_power =
        (u64::from(voter.voting_power) + regenerated).min(u64::from(PERCENT_100)) as u16;
    precondition(current_power > 0, "voting power is exhausted")?;

    let abs_weight = op.weight.unsigned_abs();
    // charge enough that a full-power voter lands near the per-period budget
    let max_vote_denom = u64::from(MAX_VOTES_PER_REGENERATION_PERIOD)
        * VOTE_REGENERATION_SECS
        / (60 * 60 * 24);
    let mut used_power = u64::from(current_power) * u64::from(abs_weight) / u64::from(PERCENT_100);
    used_power = (used_power + max_vote_denom - 1) / max_vote_denom;
    precondition(
        used_power <= u64::from(current_power),
        "vote weight exceeds remaining power",
    )?;

    let effective = voter.effective_vesting_shares().amount.max(0);
    let mut abs_rshares = (effective as i128 * used_power as i128
        / u64::from(PERCENT_100) as i128) as Share;
    if abs_rshares <= VOTE_DUST_THRESHOLD {
        abs_rshares = 0;
    }
    let rshares = if op.weight < 0 { -abs_rshares } else { abs_rshares };

    let existing_vote = chain.store.comment_votes.find_by_key(
        CommentVoteObject::BY_COMMENT_VOTER,
        vec![KeyPart::U64(comment_id), KeyPart::Str(op.voter.clone())],
    );

    let old_vshares = calculate_vshares(comment.net_rshares.max(0) as u128, CONTENT_CONSTANT);

    match existing_vote {
        None => {
            precondition(op.weight != 0, "cannot cast a null vote")?;

            chain.store.accounts.modify(voter_id, |account| {
                account.voting_power = current_power - used_power as u16;
                account.last_vote_time = now;
            });

            // curation claim: the square-root delta of accumulated upvote
            // rshares, discounted inside the reverse-auction window
            let mut weight: u64 = 0;
            if rshares > 0 && comment.allow_curation_rewards {
                let before = isqrt(comment.vote_rshares.max(0) as u128);
                let after = isqrt((comment.vote_rshares.max(0) + rshares) as u128);
                let raw = (after - before) as u64;
                let age = (now - comment.created).min(REVERSE_AUCTION_WINDOW_SECS);
                weight = raw * age / REVERSE_AUCTION_WINDOW_SECS;
            }

            chain.store.comments.modify(comment_id, |row| {
                row.net_rshares += rshares;
                row.abs_rshares += abs_rshares;
                if rshares > 0 {
                    row.vote_rshares += rshares;
                    row.net_votes += 1;
                } else {
                    row.net_votes -= 1;
                }
                row.total_vote_weight += weight;
            });

            chain.store.comment_votes.create(|vote| {
                vote.voter = op.voter.clone();
                vote.comment = comment_id;
                vote.rshares = rshares;
                vote.vote_percent = op.weight;
                vote.last_update = now;
                vote.weight = weight;
            });
        }
        Some(vote_id) => {
            let vote = chain
                .store
                .comment_votes
                .get(vote_id)
                .expect("indexed vote")
                .clone();
            precondition(vote.num_changes >= 0, "this vote has already paid out")?;
            precondition(
                vote.num_changes < MAX_VOTE_CHANGES as i8,
                "vote changed too many times",
            )?;
            precondition(
                vote.vote_percent != op.weight,
                "the vote already carries this weight",
            )?;

            chain.store.accounts.modify(voter_id, |account| {
                account.voting_power = current_power - used_power as u16;
                account.last_vote_time = now;
            });

            chain.store.comments.modify(comment_id, |row| {
                row.net_rshares += rshares - vote.rshares;
                row.abs_rshares += abs_rshares;
                if vote.rshares < 0 && rshares >= 0 {
                    row.net_votes += 2;
                } else if vote.rshares >= 0 && rshares < 0 {
                    row.net_votes -= 2;
                }
                // edited votes abandon their curation claim
                row.total_vote_weight -= vote.weight;
            });

            chain.store.comment_votes.modify(vote_id, |vote| {
                vote.rshares = rshares;
                vote.vote_percent = op.weight;
                vote.last_update = now;
                vote.weight = 0;
                vote.num_changes += 1;
            });
        }
    }

    let comment = chain.store.comments.get(comment_id).expect("indexed comment");
    let new_vshares = calculate_vshares(comment.net_rshares.max(0) as u128, CONTENT_CONSTANT);
    chain.adjust_rshares2(comment_id, old_vshares, new_vshares)?;

    Ok(())
}
