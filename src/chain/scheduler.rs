// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{Chain, ChainError, ChainResult};
use crate::chain::state::{WitnessObject, WitnessScheduleClass, WitnessVoteObject};
use crate::chain::store::{KeyPart, ObjectId};
use crate::consensus::*;
use crate::primitives::{AccountName, Hash256, PublicKey};
use std::collections::BTreeMap;

/// Witnesses that must agree on a hardfork vote before it arms
pub const HARDFORK_REQUIRED_WITNESSES: usize = MAX_WITNESSES * 2 / 3 + 1;

impl Chain {
    /// Apply a vote delta to one witness, advancing its position on the
    /// virtual timeline so timeshare selection stays fair.
    pub(crate) fn adjust_witness_vote(
        &mut self,
        witness_id: ObjectId,
        delta: Share,
    ) -> ChainResult<()> {
        let current_virtual_time = self.store.schedule().current_virtual_time;
        let total_vesting = self.store.props().total_vesting_shares.amount;
        let clamp_overflow = self.has_hardfork(HF_VOTE_RETALLY);

        let mut overflow = Ok(());
        self.store.witnesses.modify(witness_id, |witness| {
            let delta_pos = (witness.votes.max(0) as u128)
                .wrapping_mul(current_virtual_time.wrapping_sub(witness.virtual_last_update));
            witness.virtual_position = witness.virtual_position.wrapping_add(delta_pos);
            witness.virtual_last_update = current_virtual_time;

            witness.votes += delta;
            if witness.votes > total_vesting {
                overflow = Err(ChainError::Fatal(format!(
                    "witness {} has more votes than vesting shares exist",
                    witness.owner
                )));
            }

            witness.virtual_scheduled_time = witness.virtual_last_update.wrapping_add(
                VIRTUAL_SCHEDULE_LAP_LENGTH.wrapping_sub(witness.virtual_position)
                    / (witness.votes.max(0) as u128 + 1),
            );

            // low-vote witnesses can wrap the timeline into the past
            if clamp_overflow && witness.virtual_scheduled_time < current_virtual_time {
                witness.virtual_scheduled_time = u128::MAX;
            }
        });
        overflow
    }

    /// Apply a vote delta to every witness an account approves
    pub(crate) fn adjust_witness_votes(
        &mut self,
        account_id: ObjectId,
        delta: Share,
    ) -> ChainResult<()> {
        let account_name = self
            .store
            .accounts
            .get(account_id)
            .expect("indexed account")
            .name
            .clone();

        let witnesses: Vec<AccountName> = self
            .store
            .witness_votes
            .iter_prefix(
                WitnessVoteObject::BY_ACCOUNT_WITNESS,
                vec![KeyPart::Str(account_name)],
            )
            .map(|(key, _)| match &key.parts[1] {
                KeyPart::Str(witness) => witness.clone(),
                _ => unreachable!(),
            })
            .collect();

        for witness in witnesses {
            let witness_id = self.get_witness_id(&witness)?;
            self.adjust_witness_vote(witness_id, delta)?;
        }
        Ok(())
    }

    /// Propagate a flat vote delta up the proxy chain, or apply it directly
    /// when the account votes for itself
    pub(crate) fn adjust_proxied_witness_votes_simple(
        &mut self,
        account_id: ObjectId,
        delta: Share,
    ) -> ChainResult<()> {
        let mut depth = 0;
        let mut current = account_id;

        loop {
            let account = self.store.accounts.get(current).expect("indexed account");
            if !account.has_proxy() {
                return self.adjust_witness_votes(current, delta);
            }
            if depth >= MAX_PROXY_DEPTH {
                // chains longer than the bucket count do not propagate
                return Ok(());
            }

            let proxy_id = self.get_account_id(&account.proxy.clone())?;
            self.store.accounts.modify(proxy_id, |proxy| {
                proxy.proxied_vsf_votes[depth] += delta;
            });
            current = proxy_id;
            depth += 1;
        }
    }

    /// Propagate per-depth vote deltas up the proxy chain; used when an
    /// account's own stake and its proxied buckets change together
    pub(crate) fn adjust_proxied_witness_votes(
        &mut self,
        account_id: ObjectId,
        delta: [Share; MAX_PROXY_DEPTH + 1],
    ) -> ChainResult<()> {
        let account = self.store.accounts.get(account_id).expect("indexed account");
        if account.has_proxy() {
            let mut depth = 0;
            let mut current = account_id;
            loop {
                let account = self.store.accounts.get(current).expect("indexed account");
                if !account.has_proxy() || depth >= MAX_PROXY_DEPTH {
                    break;
                }
                let proxy_id = self.get_account_id(&account.proxy.clone())?;
                self.store.accounts.modify(proxy_id, |proxy| {
                    for i in (0..MAX_PROXY_DEPTH - depth).rev() {
                        proxy.proxied_vsf_votes[i + depth] += delta[i];
                    }
                });
                current = proxy_id;
                depth += 1;
            }
            if depth >= MAX_PROXY_DEPTH {
                return Ok(());
            }
            let total: Share = delta[..=MAX_PROXY_DEPTH - depth].iter().sum();
            self.adjust_witness_votes(current, total)
        } else {
            let total: Share = delta.iter().sum();
            self.adjust_witness_votes(account_id, total)
        }
    }

    /// Remove every witness approval an account holds
    pub(crate) fn clear_witness_votes(&mut self, account_id: ObjectId) -> ChainResult<()> {
        let account_name = self
            .store
            .accounts
            .get(account_id)
            .expect("indexed account")
            .name
            .clone();

        let votes: Vec<ObjectId> = self
            .store
            .witness_votes
            .iter_prefix(
                WitnessVoteObject::BY_ACCOUNT_WITNESS,
                vec![KeyPart::Str(account_name)],
            )
            .map(|(_, id)| id)
            .collect();
        for id in votes {
            self.store.witness_votes.remove(id);
        }

        self.store.accounts.modify(account_id, |account| {
            account.witnesses_voted_for = 0;
        });
        Ok(())
    }

    pub(crate) fn reset_virtual_schedule_time(&mut self) {
        self.store.schedule_mut(|schedule| {
            schedule.current_virtual_time = 0;
        });

        let witness_ids: Vec<ObjectId> = self.store.witnesses.iter().map(|(id, _)| id).collect();
        for id in witness_ids {
            self.store.witnesses.modify(id, |witness| {
                witness.virtual_position = 0;
                witness.virtual_last_update = 0;
                witness.virtual_scheduled_time =
                    VIRTUAL_SCHEDULE_LAP_LENGTH / (witness.votes.max(0) as u128 + 1);
            });
        }
    }

    /// Active witnesses: top-voted plus the timeshare pick plus a miner
    /// queue slot; reshuffled every round.
    pub(crate) fn update_witness_schedule(&mut self) -> ChainResult<()> {
        let props = self.store.props();
        let schedule = self.store.schedule();
        let num = schedule.num_scheduled_witnesses.max(1) as u64;
        if (props.current_aslot % num) != 0 {
            return Ok(());
        }

        let mut active: Vec<AccountName> = Vec::with_capacity(MAX_WITNESSES);

        // top-voted witnesses, ties by name
        let mut by_vote: Vec<(Share, AccountName)> = self
            .store
            .witnesses
            .iter_prefix(WitnessObject::BY_VOTE, vec![])
            .map(|(key, _)| match (&key.parts[0], &key.parts[1]) {
                (KeyPart::I64(votes), KeyPart::Str(owner)) => (*votes, owner.clone()),
                _ => unreachable!(),
            })
            .collect();
        by_vote.reverse();
        for (_, owner) in by_vote.iter().take(TOP_WITNESSES) {
            active.push(owner.clone());
        }
        let top_count = active.len();

        // one miner-queue slot
        let mut miner_count = 0usize;
        if self.store.props().num_pow_witnesses > 0 {
            if let Some(worker_id) = self
                .store
                .witnesses
                .first_by_prefix(WitnessObject::BY_WORK, vec![])
            {
                let owner = self
                    .store
                    .witnesses
                    .get(worker_id)
                    .expect("indexed witness")
                    .owner
                    .clone();
                self.store.witnesses.modify(worker_id, |witness| {
                    witness.pow_worker = 0;
                });
                self.store.props_mut(|props| {
                    props.num_pow_witnesses -= 1;
                });
                if !active.contains(&owner) {
                    active.push(owner);
                    miner_count = 1;
                }
            }
        }

        // one timeshare slot by smallest virtual scheduled time
        let mut timeshare_count = 0usize;
        let mut new_virtual_time = self.store.schedule().current_virtual_time;
        let timeshare_pick = self
            .store
            .witnesses
            .iter_prefix(WitnessObject::BY_SCHEDULE_TIME, vec![])
            .map(|(key, id)| match (&key.parts[0], &key.parts[1]) {
                (KeyPart::U128(vtime), KeyPart::Str(owner)) => (*vtime, owner.clone(), id),
                _ => unreachable!(),
            })
            .find(|(_, owner, _)| !active.contains(owner));
        if let Some((vtime, owner, witness_id)) = timeshare_pick {
            new_virtual_time = vtime;
            self.store.witnesses.modify(witness_id, |witness| {
                witness.virtual_position = 0;
                witness.virtual_last_update = vtime;
                witness.virtual_scheduled_time = vtime.wrapping_add(
                    VIRTUAL_SCHEDULE_LAP_LENGTH / (witness.votes.max(0) as u128 + 1),
                );
            });
            active.push(owner);
            timeshare_count = 1;
        }

        if active.is_empty() {
            return Err(ChainError::Fatal("no active witnesses".into()));
        }

        // classify
        for (i, owner) in active.iter().enumerate() {
            let witness_id = self.get_witness_id(owner)?;
            let class = if i < top_count {
                WitnessScheduleClass::Top
            } else if miner_count > 0 && i == top_count {
                WitnessScheduleClass::Miner
            } else {
                WitnessScheduleClass::Timeshare
            };
            self.store.witnesses.modify(witness_id, |witness| {
                witness.schedule = class;
            });
        }

        self.update_median_witness_props(&active)?;
        self.update_majority_hardfork_vote(&active)?;

        // deterministic shuffle keyed on the head block id
        let head_id = self.head_block_id();
        let mut shuffled = active;
        let n = shuffled.len();
        for i in 0..n {
            let mut seed = Vec::with_capacity(24);
            seed.extend_from_slice(&head_id.0);
            seed.extend_from_slice(&(i as u32).to_le_bytes());
            let digest = Hash256::hash_from_slice(seed);
            let pick = u64::from_le_bytes(digest.0[..8].try_into().unwrap()) as usize;
            shuffled.swap(i, i + pick % (n - i));
        }

        let top = self.store.schedule().top_weight as u32;
        let timeshare = self.store.schedule().timeshare_weight as u32;
        let miner = self.store.schedule().miner_weight as u32;
        let normalization = top * top_count as u32
            + miner * miner_count as u32
            + timeshare * timeshare_count as u32;
        let head_block_num = self.current_block_num;

        self.store.schedule_mut(|schedule| {
            schedule.current_shuffled_witnesses = shuffled;
            schedule.num_scheduled_witnesses =
                schedule.current_shuffled_witnesses.len() as u8;
            schedule.witness_pay_normalization_factor = normalization.max(1);
            schedule.current_virtual_time = new_virtual_time;
            schedule.next_shuffle_block_num =
                head_block_num + schedule.num_scheduled_witnesses as u32;
        });

        Ok(())
    }

    /// Median of the witness-voted chain properties; takes effect for the
    /// coming round
    fn update_median_witness_props(&mut self, active: &[AccountName]) -> ChainResult<()> {
        let mut creation_fees = Vec::with_capacity(active.len());
        let mut block_sizes = Vec::with_capacity(active.len());
        let mut interest_rates = Vec::with_capacity(active.len());

        for owner in active {
            let witness = self.get_witness(owner)?;
            creation_fees.push(witness.props.account_creation_fee);
            block_sizes.push(witness.props.maximum_block_size);
            interest_rates.push(witness.props.abd_interest_rate);
        }

        creation_fees.sort_by_key(|fee| fee.amount);
        block_sizes.sort_unstable();
        interest_rates.sort_unstable();

        let median_fee = creation_fees[creation_fees.len() / 2];
        let median_block_size = block_sizes[block_sizes.len() / 2];
        let median_interest = interest_rates[interest_rates.len() / 2];

        self.store.schedule_mut(|schedule| {
            schedule.median_props.account_creation_fee = median_fee;
            schedule.median_props.maximum_block_size = median_block_size;
            schedule.median_props.abd_interest_rate = median_interest;
        });
        self.store.props_mut(|props| {
            props.maximum_block_size = median_block_size;
            props.abd_interest_rate = median_interest;
        });
        Ok(())
    }

    /// Arm the next hardfork once a supermajority of the scheduled witnesses
    /// votes for the same (version, time) pair
    fn update_majority_hardfork_vote(&mut self, active: &[AccountName]) -> ChainResult<()> {
        if !self.has_hardfork(HF_VERSION_REPORTING) {
            return Ok(());
        }

        let mut votes: BTreeMap<(ProtocolVersion, Timestamp), usize> = BTreeMap::new();
        let mut majority_version = ProtocolVersion::default();
        for owner in active {
            let witness = self.get_witness(owner)?;
            *votes
                .entry((witness.hardfork_version_vote, witness.hardfork_time_vote))
                .or_default() += 1;
            if witness.running_version > majority_version {
                majority_version = witness.running_version;
            }
        }

        let current = self.store.hardforks().current_hardfork_version;
        let mut armed = None;
        for ((version, time), count) in votes {
            if count >= HARDFORK_REQUIRED_WITNESSES.min(active.len()) && version > current {
                armed = Some((version, time));
            }
        }

        if let Some((version, time)) = armed {
            self.store.hardforks_mut(|hardforks| {
                hardforks.next_hardfork = version;
                hardforks.next_hardfork_time = time;
            });
        }

        self.store.schedule_mut(|schedule| {
            schedule.majority_version = majority_version;
        });
        Ok(())
    }

    /// One-shot retally of witness vote totals from the vote table
    pub(crate) fn retally_witness_votes(&mut self) -> ChainResult<()> {
        let witness_ids: Vec<ObjectId> = self.store.witnesses.iter().map(|(id, _)| id).collect();
        for id in witness_ids {
            self.store.witnesses.modify(id, |witness| {
                witness.votes = 0;
                witness.virtual_position = 0;
            });
        }

        let accounts: Vec<(ObjectId, Share, bool)> = self
            .store
            .accounts
            .iter()
            .map(|(id, account)| (id, account.witness_vote_weight(), account.has_proxy()))
            .collect();
        for (account_id, weight, has_proxy) in accounts {
            if has_proxy {
                continue;
            }
            self.adjust_witness_votes(account_id, weight)?;
        }
        Ok(())
    }

    /// One-shot retally of per-account approval counts
    pub(crate) fn retally_witness_vote_counts(&mut self, force: bool) -> ChainResult<()> {
        let accounts: Vec<(ObjectId, AccountName, bool, u16)> = self
            .store
            .accounts
            .iter()
            .map(|(id, account)| {
                (
                    id,
                    account.name.clone(),
                    account.has_proxy(),
                    account.witnesses_voted_for,
                )
            })
            .collect();

        for (account_id, name, has_proxy, recorded) in accounts {
            let mut count = 0u16;
            if force || has_proxy {
                count = self
                    .store
                    .witness_votes
                    .iter_prefix(WitnessVoteObject::BY_ACCOUNT_WITNESS, vec![KeyPart::Str(name)])
                    .count() as u16;
            }
            if recorded != count {
                self.store.accounts.modify(account_id, |account| {
                    account.witnesses_voted_for = count;
                });
            }
        }
        Ok(())
    }

    /// Disable a witness that proved double production
    pub(crate) fn shutdown_witness(&mut self, witness_id: ObjectId) {
        self.store.witnesses.modify(witness_id, |witness| {
            witness.signing_key = PublicKey::null();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardfork_majority_needs_two_thirds() {
        assert!(HARDFORK_REQUIRED_WITNESSES > MAX_WITNESSES / 2);
        assert!(HARDFORK_REQUIRED_WITNESSES <= MAX_WITNESSES);
    }
}
