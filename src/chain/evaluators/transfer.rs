// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{precondition, Chain, ChainResult};
use crate::chain::state::{
    EscrowObject, SavingsWithdrawObject, VestingDelegationObject, WithdrawRouteObject,
};
use crate::chain::store::KeyPart;
use crate::consensus::*;
use crate::primitives::*;

pub(super) fn apply_transfer(chain: &mut Chain, op: &TransferOperation) -> ChainResult<()> {
    let from_id = chain.get_account_id(&op.from)?;
    let to_id = chain.get_account_id(&op.to)?;

    chain.adjust_balance(from_id, -op.amount)?;
    chain.adjust_balance(to_id, op.amount)?;
    Ok(())
}

pub(super) fn apply_transfer_to_vesting(
    chain: &mut Chain,
    op: &TransferToVestingOperation,
) -> ChainResult<()> {
    let from_id = chain.get_account_id(&op.from)?;
    let to_id = if op.to.is_empty() {
        from_id
    } else {
        chain.get_account_id(&op.to)?
    };

    chain.adjust_balance(from_id, -op.amount)?;
    chain.create_vesting(to_id, op.amount)?;
    Ok(())
}

pub(super) fn apply_withdraw_vesting(
    chain: &mut Chain,
    op: &WithdrawVestingOperation,
) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account)?;
    let account = chain.store.accounts.get(account_id).expect("indexed account");

    precondition(
        account.vesting_shares - account.delegated_vesting_shares >= op.vesting_shares,
        "insufficient undelegated vesting shares",
    )?;

    if op.vesting_shares.amount == 0 {
        precondition(
            account.vesting_withdraw_rate.amount != 0,
            "no withdrawal in progress to cancel",
        )?;
        chain.store.accounts.modify(account_id, |account| {
            account.vesting_withdraw_rate = Asset::zero(VESTS);
            account.next_vesting_withdrawal = TIMESTAMP_MAX;
            account.to_withdraw = 0;
            account.withdrawn = 0;
        });
        return Ok(());
    }

    let now = chain.head_block_time();
    chain.store.accounts.modify(account_id, |account| {
        let mut rate = op.vesting_shares.amount / VESTING_WITHDRAW_INTERVALS as Share;
        if rate == 0 {
            rate = 1;
        }
        account.vesting_withdraw_rate = Asset::new(rate, VESTS);
        account.next_vesting_withdrawal = now + VESTING_WITHDRAW_INTERVAL_SECS;
        account.to_withdraw = op.vesting_shares.amount;
        account.withdrawn = 0;
    });
    Ok(())
}

pub(super) fn apply_set_withdraw_vesting_route(
    chain: &mut Chain,
    op: &SetWithdrawVestingRouteOperation,
) -> ChainResult<()> {
    chain.get_account_id(&op.from_account)?;
    chain.get_account_id(&op.to_account)?;
    let from_id = chain.get_account_id(&op.from_account)?;

    let key = vec![
        KeyPart::Str(op.from_account.clone()),
        KeyPart::Str(op.to_account.clone()),
    ];
    let existing = chain
        .store
        .withdraw_routes
        .find_by_key(WithdrawRouteObject::BY_ROUTE, key);

    match (existing, op.percent) {
        (None, 0) => {
            return Err(crate::chain::chain::ChainError::Precondition(
                "cannot remove a route that does not exist".into(),
            ));
        }
        (None, _) => {
            let count = chain.store.accounts.get(from_id).expect("indexed account").withdraw_routes;
            precondition(
                (count as usize) < MAX_WITHDRAW_ROUTES,
                "too many withdraw routes",
            )?;
            chain.store.withdraw_routes.create(|route| {
                route.from_account = op.from_account.clone();
                route.to_account = op.to_account.clone();
                route.percent = op.percent;
                route.auto_vest = op.auto_vest;
            });
            chain.store.accounts.modify(from_id, |account| {
                account.withdraw_routes += 1;
            });
        }
        (Some(route_id), 0) => {
            chain.store.withdraw_routes.remove(route_id);
            chain.store.accounts.modify(from_id, |account| {
                account.withdraw_routes -= 1;
            });
        }
        (Some(route_id), _) => {
            chain.store.withdraw_routes.modify(route_id, |route| {
                route.percent = op.percent;
                route.auto_vest = op.auto_vest;
            });
        }
    }

    // the routes for one account may never overcommit
    let total: u32 = chain
        .store
        .withdraw_routes
        .iter_prefix(
            WithdrawRouteObject::BY_ROUTE,
            vec![KeyPart::Str(op.from_account.clone())],
        )
        .map(|(_, id)| {
            u32::from(
                chain
                    .store
                    .withdraw_routes
                    .get(id)
                    .expect("indexed route")
                    .percent,
            )
        })
        .sum();
    precondition(
        total <= u32::from(PERCENT_100),
        "withdraw routes exceed 100%",
    )?;
    Ok(())
}

pub(super) fn apply_transfer_to_savings(
    chain: &mut Chain,
    op: &TransferToSavingsOperation,
) -> ChainResult<()> {
    let from_id = chain.get_account_id(&op.from)?;
    let to_id = chain.get_account_id(&op.to)?;

    chain.adjust_balance(from_id, -op.amount)?;
    chain.adjust_savings_balance(to_id, op.amount)?;
    Ok(())
}

pub(super) fn apply_transfer_from_savings(
    chain: &mut Chain,
    op: &TransferFromSavingsOperation,
) -> ChainResult<()> {
    let from_id = chain.get_account_id(&op.from)?;
    chain.get_account_id(&op.to)?;

    let requests = chain
        .store
        .accounts
        .get(from_id)
        .expect("indexed account")
        .savings_withdraw_requests;
    precondition(
        requests < SAVINGS_WITHDRAW_REQUEST_LIMIT,
        "too many open savings withdrawals",
    )?;

    let key = vec![KeyPart::Str(op.from.clone()), KeyPart::U32(op.request_id)];
    precondition(
        chain
            .store
            .savings_withdraws
            .find_by_key(SavingsWithdrawObject::BY_FROM_RID, key)
            .is_none(),
        "request id already in use",
    )?;

    chain.adjust_savings_balance(from_id, -op.amount)?;

    let complete = chain.head_block_time() + SAVINGS_WITHDRAW_SECS;
    chain.store.savings_withdraws.create(|withdraw| {
        withdraw.from = op.from.clone();
        withdraw.to = op.to.clone();
        withdraw.amount = op.amount;
        withdraw.memo = op.memo.clone();
        withdraw.request_id = op.request_id;
        withdraw.complete = complete;
    });
    chain.store.accounts.modify(from_id, |account| {
        account.savings_withdraw_requests += 1;
    });
    Ok(())
}

pub(super) fn apply_cancel_transfer_from_savings(
    chain: &mut Chain,
    op: &CancelTransferFromSavingsOperation,
) -> ChainResult<()> {
    let from_id = chain.get_account_id(&op.from)?;
    let key = vec![KeyPart::Str(op.from.clone()), KeyPart::U32(op.request_id)];
    let withdraw_id = chain
        .store
        .savings_withdraws
        .find_by_key(SavingsWithdrawObject::BY_FROM_RID, key)
        .ok_or_else(|| {
            crate::chain::chain::ChainError::Precondition("unknown savings withdrawal".into())
        })?;

    let amount = chain
        .store
        .savings_withdraws
        .get(withdraw_id)
        .expect("indexed withdraw")
        .amount;
    chain.adjust_savings_balance(from_id, amount)?;
    chain.store.savings_withdraws.remove(withdraw_id);
    chain.store.accounts.modify(from_id, |account| {
        account.savings_withdraw_requests -= 1;
    });
    Ok(())
}

fn find_escrow(chain: &Chain, from: &str, escrow_id: u32) -> ChainResult<crate::chain::store::ObjectId> {
    chain
        .store
        .escrows
        .find_by_key(
            EscrowObject::BY_FROM_ID,
            vec![KeyPart::Str(from.to_owned()), KeyPart::U32(escrow_id)],
        )
        .ok_or_else(|| {
            crate::chain::chain::ChainError::Precondition(format!(
                "unknown escrow {from}/{escrow_id}"
            ))
        })
}

pub(super) fn apply_escrow_transfer(
    chain: &mut Chain,
    op: &EscrowTransferOperation,
) -> ChainResult<()> {
    let now = chain.head_block_time();
    let from_id = chain.get_account_id(&op.from)?;
    chain.get_account_id(&op.to)?;
    chain.get_account_id(&op.agent)?;

    precondition(op.ratification_deadline > now, "ratification deadline already passed")?;
    precondition(
        chain
            .store
            .escrows
            .find_by_key(
                EscrowObject::BY_FROM_ID,
                vec![KeyPart::Str(op.from.clone()), KeyPart::U32(op.escrow_id)],
            )
            .is_none(),
        "escrow id already in use",
    )?;

    chain.adjust_balance(from_id, -op.ama_amount)?;
    chain.adjust_balance(from_id, -op.abd_amount)?;
    chain.adjust_balance(from_id, -op.fee)?;

    chain.store.escrows.create(|escrow| {
        escrow.escrow_id = op.escrow_id;
        escrow.from = op.from.clone();
        escrow.to = op.to.clone();
        escrow.agent = op.agent.clone();
        escrow.ratification_deadline = op.ratification_deadline;
        escrow.escrow_expiration = op.escrow_expiration;
        escrow.ama_balance = op.ama_amount;
        escrow.abd_balance = op.abd_amount;
        escrow.pending_fee = op.fee;
    });
    Ok(())
}

pub(super) fn apply_escrow_approve(
    chain: &mut Chain,
    op: &EscrowApproveOperation,
) -> ChainResult<()> {
    let escrow_id = find_escrow(chain, &op.from, op.escrow_id)?;
    let escrow = chain.store.escrows.get(escrow_id).expect("indexed escrow").clone();

    precondition(escrow.to == op.to && escrow.agent == op.agent, "escrow party mismatch")?;
    precondition(!escrow.is_approved(), "escrow is already fully approved")?;

    if !op.approve {
        // a single rejection dissolves the escrow
        let from_id = chain.get_account_id(&escrow.from)?;
        chain.adjust_balance(from_id, escrow.ama_balance)?;
        chain.adjust_balance(from_id, escrow.abd_balance)?;
        chain.adjust_balance(from_id, escrow.pending_fee)?;
        chain.store.escrows.remove(escrow_id);
        return Ok(());
    }

    if op.who == escrow.to {
        precondition(!escrow.to_approved, "recipient already approved")?;
        chain.store.escrows.modify(escrow_id, |escrow| {
            escrow.to_approved = true;
        });
    } else {
        precondition(!escrow.agent_approved, "agent already approved")?;
        chain.store.escrows.modify(escrow_id, |escrow| {
            escrow.agent_approved = true;
        });
    }

    // the agent earns the fee the moment both parties have ratified
    let escrow = chain.store.escrows.get(escrow_id).expect("indexed escrow").clone();
    if escrow.is_approved() && escrow.pending_fee.amount > 0 {
        let agent_id = chain.get_account_id(&escrow.agent)?;
        chain.adjust_balance(agent_id, escrow.pending_fee)?;
        chain.store.escrows.modify(escrow_id, |escrow| {
            escrow.pending_fee.amount = 0;
        });
    }
    Ok(())
}

pub(super) fn apply_escrow_dispute(
    chain: &mut Chain,
    op: &EscrowDisputeOperation,
) -> ChainResult<()> {
    let escrow_id = find_escrow(chain, &op.from, op.escrow_id)?;
    let escrow = chain.store.escrows.get(escrow_id).expect("indexed escrow");

    precondition(escrow.to == op.to && escrow.agent == op.agent, "escrow party mismatch")?;
    precondition(escrow.is_approved(), "escrow must be approved before disputes")?;
    precondition(!escrow.disputed, "escrow is already disputed")?;
    precondition(
        chain.head_block_time() < escrow.escrow_expiration,
        "escrow has expired",
    )?;

    chain.store.escrows.modify(escrow_id, |escrow| {
        escrow.disputed = true;
    });
    Ok(())
}

pub(super) fn apply_escrow_release(
    chain: &mut Chain,
    op: &EscrowReleaseOperation,
) -> ChainResult<()> {
    let now = chain.head_block_time();
    let escrow_id = find_escrow(chain, &op.from, op.escrow_id)?;
    let escrow = chain.store.escrows.get(escrow_id).expect("indexed escrow").clone();

    precondition(escrow.to == op.to, "escrow recipient mismatch")?;
    precondition(escrow.is_approved(), "escrow must be approved before release")?;
    precondition(
        escrow.ama_balance >= op.ama_amount && escrow.abd_balance >= op.abd_amount,
        "release exceeds escrow balance",
    )?;

    if escrow.disputed {
        // only the agent arbitrates a dispute
        precondition(op.who == escrow.agent, "only the agent may release a disputed escrow")?;
    } else if now < escrow.escrow_expiration {
        // before expiration each party may only release to the other
        precondition(
            op.who == escrow.from || op.who == escrow.to,
            "only the escrow parties may release",
        )?;
        precondition(
            (op.who == escrow.from && op.receiver == escrow.to)
                || (op.who == escrow.to && op.receiver == escrow.from),
            "funds may only release to the other party",
        )?;
    } else {
        precondition(
            op.who == escrow.from || op.who == escrow.to,
            "only the escrow parties may release",
        )?;
    }

    let receiver_id = chain.get_account_id(&op.receiver)?;
    chain.adjust_balance(receiver_id, op.ama_amount)?;
    chain.adjust_balance(receiver_id, op.abd_amount)?;

    chain.store.escrows.modify(escrow_id, |escrow| {
        escrow.ama_balance -= op.ama_amount;
        escrow.abd_balance -= op.abd_amount;
    });

    let escrow = chain.store.escrows.get(escrow_id).expect("indexed escrow");
    if escrow.ama_balance.amount == 0 && escrow.abd_balance.amount == 0 {
        chain.store.escrows.remove(escrow_id);
    }
    Ok(())
}

pub(super) fn apply_delegate_vesting_shares(
    chain: &mut Chain,
    op: &DelegateVestingSharesOperation,
) -> ChainResult<()> {
    precondition(
        chain.has_hardfork(HF_DELEGATION),
        "vesting delegation is not enabled yet",
    )?;

    let delegator_id = chain.get_account_id(&op.delegator)?;
    let delegatee_id = chain.get_account_id(&op.delegatee)?;
    let now = chain.head_block_time();

    let key = vec![
        KeyPart::Str(op.delegator.clone()),
        KeyPart::Str(op.delegatee.clone()),
    ];
    let existing = chain
        .store
        .delegations
        .find_by_key(VestingDelegationObject::BY_DELEGATION, key);

    let previous = existing
        .and_then(|id| chain.store.delegations.get(id))
        .map_or(Asset::zero(VESTS), |row| row.vesting_shares);
    let delta = op.vesting_shares - previous;

    if delta.amount > 0 {
        let delegator = chain.store.accounts.get(delegator_id).expect("indexed account");
        let available = delegator.vesting_shares
            - delegator.delegated_vesting_shares
            - Asset::new(delegator.to_withdraw - delegator.withdrawn, VESTS);
        precondition(available >= delta, "insufficient vesting shares to delegate")?;

        chain.store.accounts.modify(delegator_id, |account| {
            account.delegated_vesting_shares += delta;
        });
        chain.store.accounts.modify(delegatee_id, |account| {
            account.received_vesting_shares += delta;
        });
    } else if delta.amount < 0 {
        // the returned shares cool down before the delegator can reuse them
        let returned = -delta;
        chain.store.accounts.modify(delegatee_id, |account| {
            account.received_vesting_shares -= returned;
        });
        chain.store.delegation_expirations.create(|expiration| {
            expiration.delegator = op.delegator.clone();
            expiration.vesting_shares = returned;
            expiration.expiration = now + DELEGATION_RETURN_SECS;
        });
    }

    match existing {
        Some(id) if op.vesting_shares.amount == 0 => {
            chain.store.delegations.remove(id);
        }
        Some(id) => {
            chain.store.delegations.modify(id, |row| {
                row.vesting_shares = op.vesting_shares;
            });
        }
        None => {
            precondition(op.vesting_shares.amount > 0, "cannot remove an empty delegation")?;
            chain.store.delegations.create(|row| {
                row.delegator = op.delegator.clone();
                row.delegatee = op.delegatee.clone();
                row.vesting_shares = op.vesting_shares;
                row.min_delegation_time = now;
            });
        }
    }
    Ok(())
}
