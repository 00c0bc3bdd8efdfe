// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{precondition, Chain, ChainResult};
use crate::chain::state::{CallOrderObject, ConvertRequestObject};
use crate::chain::store::KeyPart;
use crate::consensus::*;
use crate::primitives::*;

pub(super) fn apply_convert(chain: &mut Chain, op: &ConvertOperation) -> ChainResult<()> {
    let owner_id = chain.get_account_id(&op.owner)?;
    chain.adjust_balance(owner_id, -op.amount)?;

    precondition(
        chain
            .store
            .convert_requests
            .find_by_key(
                ConvertRequestObject::BY_OWNER_ID,
                vec![KeyPart::Str(op.owner.clone()), KeyPart::U32(op.request_id)],
            )
            .is_none(),
        "conversion request id already in use",
    )?;

    let conversion_date = chain.head_block_time() + CONVERSION_DELAY_SECS;
    chain.store.convert_requests.create(|request| {
        request.owner = op.owner.clone();
        request.request_id = op.request_id;
        request.amount = op.amount;
        request.conversion_date = conversion_date;
    });
    Ok(())
}

fn book_limit_order(
    chain: &mut Chain,
    owner: &str,
    order_id: u32,
    amount_to_sell: Asset,
    sell_price: Price,
    fill_or_kill: bool,
    expiration: Timestamp,
) -> ChainResult<()> {
    let now = chain.head_block_time();
    precondition(expiration > now, "order would expire immediately")?;
    precondition(
        chain
            .store
            .limit_orders
            .find_by_key(
                crate::chain::state::LimitOrderObject::BY_ACCOUNT,
                vec![KeyPart::Str(owner.to_owned()), KeyPart::U32(order_id)],
            )
            .is_none(),
        "order id already in use",
    )?;

    let owner_account = chain.get_account_id(owner)?;
    chain.adjust_balance(owner_account, -amount_to_sell)?;

    let order_ref = chain.store.limit_orders.create(|order| {
        order.created = now;
        order.expiration = expiration;
        order.seller = owner.to_owned();
        order.order_id = order_id;
        order.for_sale = amount_to_sell.amount;
        order.sell_price = sell_price;
    });

    let filled = chain.apply_order(order_ref, true)?;
    precondition(!fill_or_kill || filled, "fill-or-kill order was not filled")?;
    Ok(())
}

pub(super) fn apply_limit_order_create(
    chain: &mut Chain,
    op: &LimitOrderCreateOperation,
) -> ChainResult<()> {
    book_limit_order(
        chain,
        &op.owner,
        op.order_id,
        op.amount_to_sell,
        op.sell_price(),
        op.fill_or_kill,
        op.expiration,
    )
}

pub(super) fn apply_limit_order_create2(
    chain: &mut Chain,
    op: &LimitOrderCreate2Operation,
) -> ChainResult<()> {
    book_limit_order(
        chain,
        &op.owner,
        op.order_id,
        op.amount_to_sell,
        op.exchange_rate,
        op.fill_or_kill,
        op.expiration,
    )
}

pub(super) fn apply_limit_order_cancel(
    chain: &mut Chain,
    op: &LimitOrderCancelOperation,
) -> ChainResult<()> {
    let order_ref = chain.get_limit_order_id(&op.owner, op.order_id)?;
    chain.cancel_limit_order(order_ref)
}

/// Add collateral, cover debt, or borrow more against a margin position.
/// Fails rather than leaving the position instantly callable.
pub(super) fn apply_call_order_update(
    chain: &mut Chain,
    op: &CallOrderUpdateOperation,
) -> ChainResult<()> {
    precondition(
        chain.has_hardfork(HF_COLLATERAL_MARKETS),
        "collateralized markets are not enabled yet",
    )?;

    let debt_symbol = op.delta_debt.symbol;
    let funding_id = chain.get_account_id(&op.funding_account)?;
    let bitasset_id = chain.get_bitasset_id(debt_symbol)?;
    let bitasset = chain.store.bitassets.get(bitasset_id).expect("indexed bitasset");

    precondition(!bitasset.has_settlement(), "asset has been globally settled")?;
    precondition(
        !bitasset.current_feed.is_null(),
        "no valid price feed for this asset",
    )?;
    precondition(
        op.delta_collateral.symbol == bitasset.options.short_backing_asset,
        "collateral must be the backing asset",
    )?;
    let mcr = bitasset
        .current_feed
        .maintenance_collateral_ratio
        .max(COLLATERAL_RATIO_DENOM);
    let feed_price = bitasset.current_feed.settlement_price;

    // collateral moves from the funding account into the position
    if op.delta_collateral.amount > 0 {
        chain.adjust_balance(funding_id, -op.delta_collateral)?;
    }
    // newly issued debt lands in the funding account; covered debt burns
    let dynamic_id = chain.get_asset_dynamic_id(debt_symbol)?;
    chain.adjust_balance(funding_id, op.delta_debt)?;
    chain.store.asset_dynamics.modify(dynamic_id, |dynamic| {
        dynamic.current_supply += op.delta_debt.amount;
    });

    let existing = chain.store.call_orders.find_by_key(
        CallOrderObject::BY_ACCOUNT,
        vec![
            KeyPart::Str(op.funding_account.clone()),
            KeyPart::U64(debt_symbol.0),
        ],
    );

    let (old_collateral, old_debt) = existing
        .and_then(|id| chain.store.call_orders.get(id))
        .map_or(
            (
                Asset::zero(op.delta_collateral.symbol),
                Asset::zero(debt_symbol),
            ),
            |call| (call.collateral, call.debt),
        );

    let new_collateral = old_collateral + op.delta_collateral;
    let new_debt = old_debt + op.delta_debt;
    precondition(new_collateral.amount >= 0, "collateral cannot go negative")?;
    precondition(new_debt.amount >= 0, "debt cannot go negative")?;

    if new_debt.amount == 0 {
        // position closed; withdraw whatever collateral remains
        if new_collateral.amount > 0 {
            chain.adjust_balance(funding_id, new_collateral)?;
        }
        if let Some(call_ref) = existing {
            chain.store.call_orders.remove(call_ref);
        }
        return Ok(());
    }

    precondition(
        new_collateral.amount > 0,
        "an open position requires collateral",
    )?;

    // the position must come out at or above the maintenance ratio
    let collateral_value = feed_price.convert(new_collateral);
    let required = (new_debt.amount as i128 * mcr as i128
        / COLLATERAL_RATIO_DENOM as i128) as Share;
    precondition(
        collateral_value.amount >= required,
        "update would leave the position below the maintenance collateral ratio",
    )?;

    let call_price = CallOrderObject::derive_call_price(&new_collateral, &new_debt, mcr);
    match existing {
        Some(call_ref) => {
            chain.store.call_orders.modify(call_ref, |call| {
                call.collateral = new_collateral;
                call.debt = new_debt;
                call.call_price = call_price;
            });
        }
        None => {
            precondition(op.delta_debt.amount > 0, "no position to adjust")?;
            chain.store.call_orders.create(|call| {
                call.borrower = op.funding_account.clone();
                call.collateral = new_collateral;
                call.debt = new_debt;
                call.call_price = call_price;
            });
        }
    }

    // margin calls triggered by this update are forbidden from cascading
    // into a black swan
    chain.check_call_orders(debt_symbol, false)?;
    Ok(())
}
