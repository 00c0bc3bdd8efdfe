// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{precondition, Chain, ChainError, ChainResult};
use crate::chain::store::{KeyPart, ObjectId};
use crate::consensus::*;
use crate::primitives::*;

fn create_account_record(
    chain: &mut Chain,
    name: &str,
    creator: &str,
    op_owner: &Authority,
    op_active: &Authority,
    op_posting: &Authority,
    memo_key: PublicKey,
    json_metadata: &str,
) -> ChainResult<ObjectId> {
    precondition(
        chain.find_account_id(name).is_none(),
        format!("account {name} already exists"),
    )?;
    for auth in [op_owner, op_active, op_posting] {
        for referenced in auth.account_auths.keys() {
            chain.get_account_id(referenced)?;
        }
    }

    let now = chain.head_block_time();
    let id = chain.store.accounts.create(|account| {
        account.name = name.to_owned();
        account.created = now;
        account.memo_key = memo_key;
        account.json_metadata = json_metadata.to_owned();
        account.recovery_account = creator.to_owned();
        account.owner = op_owner.clone();
        account.active = op_active.clone();
        account.posting = op_posting.clone();
    });
    Ok(id)
}

pub(super) fn apply_account_create(
    chain: &mut Chain,
    op: &AccountCreateOperation,
) -> ChainResult<()> {
    let creator_id = chain.get_account_id(&op.creator)?;

    let required_fee = chain.store.schedule().median_props.account_creation_fee;
    precondition(
        op.fee >= required_fee,
        format!("insufficient account creation fee, {required_fee} required"),
    )?;

    chain.adjust_balance(creator_id, -op.fee)?;
    let new_id = create_account_record(
        chain,
        &op.new_account_name,
        &op.creator,
        &op.owner,
        &op.active,
        &op.posting,
        op.memo_key,
        &op.json_metadata,
    )?;

    // the fee seeds the new account's stake
    if op.fee.amount > 0 {
        chain.create_vesting(new_id, op.fee)?;
    }
    Ok(())
}

pub(super) fn apply_account_create_with_delegation(
    chain: &mut Chain,
    op: &AccountCreateWithDelegationOperation,
) -> ChainResult<()> {
    precondition(
        chain.has_hardfork(HF_DELEGATION),
        "delegated account creation is not enabled yet",
    )?;

    let creator_id = chain.get_account_id(&op.creator)?;
    let creator = chain.store.accounts.get(creator_id).expect("indexed account");
    let available = creator.vesting_shares
        - creator.delegated_vesting_shares
        - Asset::new(creator.to_withdraw - creator.withdrawn, VESTS);
    precondition(
        available >= op.delegation,
        "insufficient vesting shares to delegate",
    )?;

    let required_fee = chain.store.schedule().median_props.account_creation_fee;
    precondition(
        op.fee >= required_fee,
        format!("insufficient account creation fee, {required_fee} required"),
    )?;

    chain.adjust_balance(creator_id, -op.fee)?;
    let new_id = create_account_record(
        chain,
        &op.new_account_name,
        &op.creator,
        &op.owner,
        &op.active,
        &op.posting,
        op.memo_key,
        &op.json_metadata,
    )?;

    if op.delegation.amount > 0 {
        let now = chain.head_block_time();
        chain.store.accounts.modify(creator_id, |account| {
            account.delegated_vesting_shares += op.delegation;
        });
        chain.store.accounts.modify(new_id, |account| {
            account.received_vesting_shares = op.delegation;
        });
        chain.store.delegations.create(|row| {
            row.delegator = op.creator.clone();
            row.delegatee = op.new_account_name.clone();
            row.vesting_shares = op.delegation;
            row.min_delegation_time = now + DELEGATION_RETURN_SECS;
        });
    }

    if op.fee.amount > 0 {
        chain.create_vesting(new_id, op.fee)?;
    }
    Ok(())
}

pub(super) fn apply_account_update(
    chain: &mut Chain,
    op: &AccountUpdateOperation,
) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account)?;
    let now = chain.head_block_time();

    if let Some(owner) = &op.owner {
        let last_update = chain
            .store
            .accounts
            .get(account_id)
            .expect("indexed account")
            .last_owner_update;
        precondition(
            last_update + OWNER_UPDATE_LIMIT_SECS <= now || last_update == 0,
            "owner authority may only change once per hour",
        )?;
        chain.update_owner_authority(account_id, owner.clone())?;
    }

    chain.store.accounts.modify(account_id, |account| {
        if let Some(active) = &op.active {
            account.active = active.clone();
        }
        if let Some(posting) = &op.posting {
            account.posting = posting.clone();
        }
        if !op.memo_key.is_null() {
            account.memo_key = op.memo_key;
        }
        if !op.json_metadata.is_empty() {
            account.json_metadata = op.json_metadata.clone();
        }
    });
    Ok(())
}

pub(super) fn apply_challenge_authority(
    chain: &mut Chain,
    op: &ChallengeAuthorityOperation,
) -> ChainResult<()> {
    chain.get_account_id(&op.challenger)?;
    let challenged_id = chain.get_account_id(&op.challenged)?;
    let challenged = chain.store.accounts.get(challenged_id).expect("indexed account");

    if op.require_owner {
        precondition(!challenged.owner_challenged, "account is already challenged")?;
    } else {
        precondition(!challenged.challenged, "account is already challenged")?;
    }

    chain.store.accounts.modify(challenged_id, |account| {
        if op.require_owner {
            account.owner_challenged = true;
        } else {
            account.challenged = true;
        }
    });
    Ok(())
}

pub(super) fn apply_prove_authority(
    chain: &mut Chain,
    op: &ProveAuthorityOperation,
) -> ChainResult<()> {
    let challenged_id = chain.get_account_id(&op.challenged)?;
    let challenged = chain.store.accounts.get(challenged_id).expect("indexed account");
    precondition(
        challenged.challenged || challenged.owner_challenged,
        "account is not challenged",
    )?;

    chain.store.accounts.modify(challenged_id, |account| {
        account.challenged = false;
        if op.require_owner {
            account.owner_challenged = false;
        }
    });
    Ok(())
}

pub(super) fn apply_request_account_recovery(
    chain: &mut Chain,
    op: &RequestAccountRecoveryOperation,
) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account_to_recover)?;
    let account = chain.store.accounts.get(account_id).expect("indexed account");
    precondition(
        account.recovery_account == op.recovery_account,
        "only the recovery partner may request recovery",
    )?;
    for referenced in op.new_owner_authority.account_auths.keys() {
        chain.get_account_id(referenced)?;
    }

    let existing = chain.store.recovery_requests.find_by_key(
        crate::chain::state::AccountRecoveryRequestObject::BY_ACCOUNT,
        vec![KeyPart::Str(op.account_to_recover.clone())],
    );
    let expires = chain.head_block_time() + ACCOUNT_RECOVERY_REQUEST_SECS;

    match existing {
        Some(request_id) if op.new_owner_authority.is_impossible() => {
            // an impossible authority withdraws the request
            chain.store.recovery_requests.remove(request_id);
        }
        Some(request_id) => {
            chain.store.recovery_requests.modify(request_id, |request| {
                request.new_owner_authority = op.new_owner_authority.clone();
                request.expires = expires;
            });
        }
        None => {
            precondition(
                !op.new_owner_authority.is_impossible(),
                "cannot recover into an impossible authority",
            )?;
            chain.store.recovery_requests.create(|request| {
                request.account_to_recover = op.account_to_recover.clone();
                request.new_owner_authority = op.new_owner_authority.clone();
                request.expires = expires;
            });
        }
    }
    Ok(())
}

pub(super) fn apply_recover_account(
    chain: &mut Chain,
    op: &RecoverAccountOperation,
) -> ChainResult<()> {
    let now = chain.head_block_time();
    let account_id = chain.get_account_id(&op.account_to_recover)?;
    let account = chain.store.accounts.get(account_id).expect("indexed account");

    precondition(
        now > account.last_account_recovery + OWNER_UPDATE_LIMIT_SECS,
        "an account may only be recovered once per hour",
    )?;

    let request_id = chain
        .store
        .recovery_requests
        .find_by_key(
            crate::chain::state::AccountRecoveryRequestObject::BY_ACCOUNT,
            vec![KeyPart::Str(op.account_to_recover.clone())],
        )
        .ok_or_else(|| {
            ChainError::Precondition("no active recovery request for this account".into())
        })?;
    let request = chain
        .store
        .recovery_requests
        .get(request_id)
        .expect("indexed request");
    precondition(
        request.new_owner_authority == op.new_owner_authority,
        "the recovery request covers a different authority",
    )?;

    // the proof of identity is a recently valid owner authority
    let recent_is_valid = chain
        .store
        .owner_histories
        .iter_prefix(
            crate::chain::state::OwnerAuthorityHistoryObject::BY_ACCOUNT,
            vec![KeyPart::Str(op.account_to_recover.clone())],
        )
        .any(|(_, id)| {
            let row = chain.store.owner_histories.get(id).expect("indexed history");
            row.previous_owner_authority == op.recent_owner_authority
                && row.last_valid_time + OWNER_AUTH_RECOVERY_SECS > now
        });
    precondition(
        recent_is_valid,
        "recent owner authority is not in the recovery window",
    )?;

    chain.update_owner_authority(account_id, op.new_owner_authority.clone())?;
    chain.store.accounts.modify(account_id, |account| {
        account.last_account_recovery = now;
    });
    chain.store.recovery_requests.remove(request_id);
    Ok(())
}

pub(super) fn apply_change_recovery_account(
    chain: &mut Chain,
    op: &ChangeRecoveryAccountOperation,
) -> ChainResult<()> {
    chain.get_account_id(&op.new_recovery_account)?;
    chain.get_account_id(&op.account_to_recover)?;

    let existing = chain.store.change_recovery_requests.find_by_key(
        crate::chain::state::ChangeRecoveryAccountRequestObject::BY_ACCOUNT,
        vec![KeyPart::Str(op.account_to_recover.clone())],
    );
    let effective_on = chain.head_block_time() + RECOVERY_ACCOUNT_CHANGE_SECS;

    match existing {
        Some(request_id) => {
            chain
                .store
                .change_recovery_requests
                .modify(request_id, |request| {
                    request.recovery_account = op.new_recovery_account.clone();
                    request.effective_on = effective_on;
                });
        }
        None => {
            chain.store.change_recovery_requests.create(|request| {
                request.account_to_recover = op.account_to_recover.clone();
                request.recovery_account = op.new_recovery_account.clone();
                request.effective_on = effective_on;
            });
        }
    }
    Ok(())
}

pub(super) fn apply_decline_voting_rights(
    chain: &mut Chain,
    op: &DeclineVotingRightsOperation,
) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account)?;
    precondition(
        chain
            .store
            .accounts
            .get(account_id)
            .expect("indexed account")
            .can_vote,
        "voting rights are already declined",
    )?;

    let existing = chain.store.decline_voting_requests.find_by_key(
        crate::chain::state::DeclineVotingRightsRequestObject::BY_ACCOUNT,
        vec![KeyPart::Str(op.account.clone())],
    );

    if op.decline {
        precondition(existing.is_none(), "a decline request is already pending")?;
        let effective_date = chain.head_block_time() + OWNER_AUTH_RECOVERY_SECS;
        chain.store.decline_voting_requests.create(|request| {
            request.account = op.account.clone();
            request.effective_date = effective_date;
        });
    } else {
        let request_id = existing.ok_or_else(|| {
            ChainError::Precondition("no decline request is pending".into())
        })?;
        chain.store.decline_voting_requests.remove(request_id);
    }
    Ok(())
}

pub(super) fn apply_reset_account(
    chain: &mut Chain,
    op: &ResetAccountOperation,
) -> ChainResult<()> {
    chain.get_account_id(&op.reset_account)?;
    let account_id = chain.get_account_id(&op.account_to_reset)?;
    let account = chain.store.accounts.get(account_id).expect("indexed account");

    precondition(
        account.reset_account == op.reset_account,
        "not the designated reset account",
    )?;
    // only abandoned accounts may be reset
    precondition(
        account.last_post + OWNER_AUTH_RECOVERY_SECS < chain.head_block_time()
            && account.last_vote_time + OWNER_AUTH_RECOVERY_SECS < chain.head_block_time(),
        "account has been active too recently to reset",
    )?;

    chain.update_owner_authority(account_id, op.new_owner_authority.clone())
}

pub(super) fn apply_set_reset_account(
    chain: &mut Chain,
    op: &SetResetAccountOperation,
) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account)?;
    chain.get_account_id(&op.reset_account)?;

    let account = chain.store.accounts.get(account_id).expect("indexed account");
    precondition(
        account.reset_account == op.current_reset_account,
        "current reset account does not match",
    )?;

    chain.store.accounts.modify(account_id, |account| {
        account.reset_account = op.reset_account.clone();
    });
    Ok(())
}

impl Chain {
    /// Swap in a new owner authority, archiving the old one for the
    /// recovery window
    pub(crate) fn update_owner_authority(
        &mut self,
        account_id: ObjectId,
        owner: Authority,
    ) -> ChainResult<()> {
        let now = self.head_block_time();
        let account = self.store.accounts.get(account_id).expect("indexed account");
        let name = account.name.clone();
        let previous = account.owner.clone();

        self.store.owner_histories.create(|history| {
            history.account = name;
            history.previous_owner_authority = previous;
            history.last_valid_time = now;
        });

        self.store.accounts.modify(account_id, |account| {
            account.owner = owner;
            account.last_owner_update = now;
        });
        Ok(())
    }
}
