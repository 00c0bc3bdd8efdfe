// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{precondition, protocol, Chain, ChainResult};
use crate::chain::state::{WitnessScheduleClass, WitnessVoteObject};
use crate::chain::store::KeyPart;
use crate::consensus::*;
use crate::primitives::*;

pub(super) fn apply_witness_update(
    chain: &mut Chain,
    op: &WitnessUpdateOperation,
) -> ChainResult<()> {
    let owner_id = chain.get_account_id(&op.owner)?;
    precondition(
        op.fee.symbol == AMA && op.fee.amount >= 0,
        "witness fee must be non-negative AMA",
    )?;

    match chain.find_witness_id(&op.owner) {
        Some(witness_id) => {
            chain.store.witnesses.modify(witness_id, |witness| {
                witness.url = op.url.clone();
                witness.signing_key = op.block_signing_key;
                witness.props = op.props.clone();
            });
        }
        None => {
            // declaring a witness burns the fee
            if op.fee.amount > 0 {
                chain.adjust_balance(owner_id, -op.fee)?;
                chain.adjust_supply(-op.fee, false);
            }
            let now = chain.head_block_time();
            chain.store.witnesses.create(|witness| {
                witness.owner = op.owner.clone();
                witness.created = now;
                witness.url = op.url.clone();
                witness.signing_key = op.block_signing_key;
                witness.props = op.props.clone();
                witness.schedule = WitnessScheduleClass::Timeshare;
            });
        }
    }
    Ok(())
}

pub(super) fn apply_account_witness_vote(
    chain: &mut Chain,
    op: &AccountWitnessVoteOperation,
) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account)?;
    let account = chain.store.accounts.get(account_id).expect("indexed account");
    precondition(account.can_vote, "account has declined its voting rights")?;
    precondition(
        !account.has_proxy(),
        "a proxy is set; witness votes flow through it",
    )?;
    let weight = account.witness_vote_weight();

    let witness_id = chain.get_witness_id(&op.witness)?;
    let existing = chain.store.witness_votes.find_by_key(
        WitnessVoteObject::BY_ACCOUNT_WITNESS,
        vec![KeyPart::Str(op.account.clone()), KeyPart::Str(op.witness.clone())],
    );

    if op.approve {
        precondition(existing.is_none(), "witness already approved")?;
        precondition(
            account.witnesses_voted_for < MAX_ACCOUNT_WITNESS_VOTES,
            "too many witness approvals",
        )?;

        chain.store.witness_votes.create(|vote| {
            vote.account = op.account.clone();
            vote.witness = op.witness.clone();
        });
        chain.store.accounts.modify(account_id, |account| {
            account.witnesses_voted_for += 1;
        });
        chain.adjust_witness_vote(witness_id, weight)?;
    } else {
        let vote_id = existing.ok_or_else(|| {
            crate::chain::chain::ChainError::Precondition("witness is not approved".into())
        })?;
        chain.store.witness_votes.remove(vote_id);
        chain.store.accounts.modify(account_id, |account| {
            account.witnesses_voted_for -= 1;
        });
        chain.adjust_witness_vote(witness_id, -weight)?;
    }
    Ok(())
}

pub(super) fn apply_account_witness_proxy(
    chain: &mut Chain,
    op: &AccountWitnessProxyOperation,
) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account)?;
    let account = chain.store.accounts.get(account_id).expect("indexed account");
    precondition(account.can_vote, "account has declined its voting rights")?;
    precondition(account.proxy != op.proxy, "proxy is unchanged")?;

    // pull the current weight out from wherever it flows today
    let mut delta = [0 as Share; MAX_PROXY_DEPTH + 1];
    delta[0] = account.vesting_shares.amount;
    for (i, proxied) in account.proxied_vsf_votes.iter().enumerate() {
        delta[i + 1] = *proxied;
    }
    let negative: [Share; MAX_PROXY_DEPTH + 1] = delta.map(|v| -v);
    chain.adjust_proxied_witness_votes(account_id, negative)?;

    if op.proxy.is_empty() {
        chain.store.accounts.modify(account_id, |account| {
            account.proxy = PROXY_TO_SELF.to_owned();
        });
    } else {
        let proxy_id = chain.get_account_id(&op.proxy)?;

        // walking the new chain may not loop back here
        let mut cursor = proxy_id;
        for _ in 0..=MAX_PROXY_DEPTH {
            let row = chain.store.accounts.get(cursor).expect("indexed account");
            precondition(row.name != op.account, "proxy chain forms a cycle")?;
            if !row.has_proxy() {
                break;
            }
            cursor = chain.get_account_id(&row.proxy.clone())?;
        }

        chain.store.accounts.modify(account_id, |account| {
            account.proxy = op.proxy.clone();
        });
    }

    chain.adjust_proxied_witness_votes(account_id, delta)?;
    Ok(())
}

pub(super) fn apply_feed_publish(
    chain: &mut Chain,
    op: &FeedPublishOperation,
) -> ChainResult<()> {
    let witness_id = chain.get_witness_id(&op.publisher)?;
    let now = chain.head_block_time();
    chain.store.witnesses.modify(witness_id, |witness| {
        witness.abd_exchange_rate = op.exchange_rate;
        witness.last_abd_exchange_update = now;
    });
    Ok(())
}

fn pow_target(num_pow_witnesses: u32) -> u32 {
    if num_pow_witnesses >= 1_004 {
        return 0;
    }
    (0xFE00 - 0x0040 * num_pow_witnesses) << 0x10
}

fn check_work(chain: &Chain, block_id: &BlockId, nonce: u64, worker: &str, work: &Hash256)
    -> ChainResult<()> {
    protocol(
        *block_id == chain.head_block_id(),
        "proof of work must reference the head block",
    )?;

    let mut input = Vec::with_capacity(64);
    input.extend_from_slice(&block_id.0);
    input.extend_from_slice(&nonce.to_le_bytes());
    input.extend_from_slice(worker.as_bytes());
    let expected = Hash256::hash_from_slice(input);
    protocol(expected == *work, "proof of work does not match its inputs")?;

    let summary = u32::from_le_bytes(work.0[..4].try_into().unwrap());
    let target = pow_target(chain.store.props().num_pow_witnesses);
    protocol(summary < target, "insufficient work difficulty")?;
    Ok(())
}

fn enqueue_pow_worker(chain: &mut Chain, worker: &str, props: &ChainProperties) -> ChainResult<()> {
    props.validate()?;
    let queue_position = chain.store.props().total_pow + 1;

    match chain.find_witness_id(worker) {
        Some(witness_id) => {
            precondition(
                chain
                    .store
                    .witnesses
                    .get(witness_id)
                    .expect("indexed witness")
                    .pow_worker
                    == 0,
                "worker is already in the mining queue",
            )?;
            chain.store.witnesses.modify(witness_id, |witness| {
                witness.pow_worker = queue_position;
                witness.props = props.clone();
            });
        }
        None => {
            let now = chain.head_block_time();
            let key = chain
                .store
                .accounts
                .get(chain.get_account_id(worker)?)
                .expect("indexed account")
                .memo_key;
            chain.store.witnesses.create(|witness| {
                witness.owner = worker.to_owned();
                witness.created = now;
                witness.signing_key = key;
                witness.schedule = WitnessScheduleClass::Miner;
                witness.pow_worker = queue_position;
                witness.props = props.clone();
            });
        }
    }

    chain.store.props_mut(|chain_props| {
        chain_props.total_pow += 1;
        chain_props.num_pow_witnesses += 1;
    });
    Ok(())
}

pub(super) fn apply_pow(chain: &mut Chain, op: &PowOperation) -> ChainResult<()> {
    chain.get_account_id(&op.worker_account)?;
    check_work(chain, &op.block_id, op.nonce, &op.worker_account, &op.work)?;
    enqueue_pow_worker(chain, &op.worker_account, &op.props)
}

pub(super) fn apply_pow2(chain: &mut Chain, op: &Pow2Operation) -> ChainResult<()> {
    chain.get_account_id(&op.worker_account)?;
    protocol(
        op.block_id == chain.head_block_id(),
        "proof of work must reference the head block",
    )?;
    let target = pow_target(chain.store.props().num_pow_witnesses);
    protocol(op.pow_summary < target, "insufficient work difficulty")?;
    enqueue_pow_worker(chain, &op.worker_account, &op.props)
}

pub(super) fn apply_report_over_production(
    chain: &mut Chain,
    op: &ReportOverProductionOperation,
) -> ChainResult<()> {
    let first = &op.first_block;
    let second = &op.second_block;

    protocol(first.id()? != second.id()?, "the reported blocks are identical")?;

    let witness_id = chain.get_witness_id(&first.witness)?;
    let key = chain
        .store
        .witnesses
        .get(witness_id)
        .expect("indexed witness")
        .signing_key;
    protocol(
        first.validate_signee(&key) && second.validate_signee(&key),
        "reported blocks are not both signed by the witness",
    )?;

    // double production proven: the witness goes dark
    chain.shutdown_witness(witness_id);
    Ok(())
}
