// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{Chain, ChainError, ChainResult};
use crate::chain::state::{AccountBandwidthObject, BandwidthClass};
use crate::chain::store::{KeyPart, ObjectId};
use crate::consensus::{BANDWIDTH_AVERAGE_WINDOW_SECS, BANDWIDTH_PRECISION};

impl Chain {
    fn bandwidth_row(&mut self, account_id: ObjectId, class: BandwidthClass) -> ObjectId {
        let name = self
            .store
            .accounts
            .get(account_id)
            .expect("indexed account")
            .name
            .clone();
        let key = vec![KeyPart::Str(name.clone()), KeyPart::U8(class.as_u8())];
        match self
            .store
            .bandwidth
            .find_by_key(AccountBandwidthObject::BY_ACCOUNT_CLASS, key)
        {
            Some(id) => id,
            None => self.store.bandwidth.create(|row| {
                row.account = name;
                row.class = class;
            }),
        }
    }

    /// Rolling-window average: the old average decays over the window, the
    /// new transaction's contribution adds on top. Admission requires
    /// `account_vshares × max_virtual_bandwidth > average × total_vshares`,
    /// enforced while producing.
    pub(crate) fn update_account_bandwidth(
        &mut self,
        account_id: ObjectId,
        trx_size: u32,
        class: BandwidthClass,
    ) -> ChainResult<bool> {
        if self.store.props().total_vesting_shares.amount <= 0 {
            return Ok(true);
        }

        let now = self.head_block_time();
        let row_id = self.bandwidth_row(account_id, class);
        let row = self.store.bandwidth.get(row_id).expect("indexed bandwidth");

        let trx_bandwidth = u128::from(trx_size) * u128::from(BANDWIDTH_PRECISION);
        let delta_time = now - row.last_bandwidth_update;
        let decayed = if delta_time > BANDWIDTH_AVERAGE_WINDOW_SECS {
            0
        } else {
            row.average_bandwidth * u128::from(BANDWIDTH_AVERAGE_WINDOW_SECS - delta_time)
                / u128::from(BANDWIDTH_AVERAGE_WINDOW_SECS)
        };
        let new_average = decayed + trx_bandwidth;

        self.store.bandwidth.modify(row_id, |row| {
            row.average_bandwidth = new_average;
            row.lifetime_bandwidth += trx_bandwidth;
            row.last_bandwidth_update = now;
        });

        let props = self.store.props();
        let account = self.store.accounts.get(account_id).expect("indexed account");
        let account_vshares = account.vesting_shares.amount.max(0) as u128;
        let total_vshares = props.total_vesting_shares.amount.max(0) as u128;

        let has_bandwidth =
            account_vshares * props.max_virtual_bandwidth > new_average * total_vshares;

        if self.is_producing() && !has_bandwidth {
            return Err(ChainError::Precondition(format!(
                "account {} exceeded maximum allowed bandwidth per vesting share",
                account.name
            )));
        }

        Ok(has_bandwidth)
    }

    /// Legacy accounting retained until `HF_REWARD_FUNDS`: positive stake is
    /// required outright and the window decay weighs old and new traffic.
    pub(crate) fn update_account_bandwidth_old(
        &mut self,
        account_id: ObjectId,
        trx_size: u32,
        class: BandwidthClass,
    ) -> ChainResult<()> {
        if self.store.props().total_vesting_shares.amount <= 0 {
            return Ok(());
        }

        let account = self.store.accounts.get(account_id).expect("indexed account");
        if account.effective_vesting_shares().amount <= 0 {
            return Err(ChainError::Precondition(format!(
                "only accounts with a positive vesting balance may transact ({})",
                account.name
            )));
        }

        let now = self.head_block_time();
        let row_id = self.bandwidth_row(account_id, class);
        let row = self.store.bandwidth.get(row_id).expect("indexed bandwidth");

        let contribution = u128::from(trx_size) * u128::from(BANDWIDTH_PRECISION);
        let delta_time = now - row.last_bandwidth_update;
        let new_average = if delta_time >= BANDWIDTH_AVERAGE_WINDOW_SECS {
            contribution
        } else {
            let old_weight =
                row.average_bandwidth * u128::from(BANDWIDTH_AVERAGE_WINDOW_SECS - delta_time);
            let new_weight = u128::from(delta_time) * contribution;
            (old_weight + new_weight) / u128::from(BANDWIDTH_AVERAGE_WINDOW_SECS)
        };

        self.store.bandwidth.modify(row_id, |row| {
            row.average_bandwidth = new_average;
            row.lifetime_bandwidth += contribution;
            row.last_bandwidth_update = now;
        });

        let props = self.store.props();
        let account = self.store.accounts.get(account_id).expect("indexed account");
        let account_vshares = account.effective_vesting_shares().amount.max(0) as u128;
        let total_vshares = props.total_vesting_shares.amount.max(0) as u128;

        if account_vshares * props.max_virtual_bandwidth <= new_average * total_vshares {
            return Err(ChainError::Precondition(format!(
                "account {} exceeded maximum allowed bandwidth per vesting share",
                account.name
            )));
        }
        Ok(())
    }
}
