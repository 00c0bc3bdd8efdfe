// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{precondition, Chain, ChainError, ChainResult};
use crate::chain::store::KeyPart;
use crate::consensus::*;
use crate::primitives::*;

fn core_symbol(symbol: Symbol) -> bool {
    symbol == AMA || symbol == ABD || symbol == VESTS
}

fn require_issuer(chain: &Chain, symbol: Symbol, issuer: &str) -> ChainResult<()> {
    let asset_id = chain.get_asset_id(symbol)?;
    let asset = chain.store.assets.get(asset_id).expect("indexed asset");
    precondition(
        asset.issuer == issuer,
        format!("{issuer} does not issue {symbol}"),
    )
}

pub(super) fn apply_asset_create(
    chain: &mut Chain,
    op: &AssetCreateOperation,
) -> ChainResult<()> {
    precondition(
        chain.has_hardfork(HF_COLLATERAL_MARKETS),
        "user-issued assets are not enabled yet",
    )?;
    chain.get_account_id(&op.issuer)?;

    let symbol = Symbol::parse(&op.symbol, op.precision)
        .map_err(|_| ChainError::Precondition("malformed asset symbol".into()))?;
    precondition(!core_symbol(symbol), "symbol is reserved")?;
    precondition(
        chain
            .store
            .assets
            .find_by_key(crate::chain::state::AssetObject::BY_SYMBOL, vec![KeyPart::U64(symbol.0)])
            .is_none(),
        format!("asset {symbol} already exists"),
    )?;

    if let Some(bitasset_options) = &op.bitasset_options {
        let backing = bitasset_options.short_backing_asset;
        precondition(
            backing == AMA || backing == ABD || chain.get_asset_id(backing).is_ok(),
            "backing asset does not exist",
        )?;
        precondition(backing != symbol, "an asset cannot back itself")?;
    }

    let now = chain.head_block_time();
    chain.store.assets.create(|asset| {
        asset.symbol = symbol;
        asset.issuer = op.issuer.clone();
        asset.options = op.common_options.clone();
        asset.market_issued = op.bitasset_options.is_some();
        asset.is_prediction_market = op.is_prediction_market;
        asset.created = now;
    });
    chain.store.asset_dynamics.create(|dynamic| {
        dynamic.symbol = symbol;
    });
    if let Some(bitasset_options) = &op.bitasset_options {
        chain.store.bitassets.create(|bitasset| {
            bitasset.symbol = symbol;
            bitasset.options = bitasset_options.clone();
        });
    }
    Ok(())
}

pub(super) fn apply_asset_issue(chain: &mut Chain, op: &AssetIssueOperation) -> ChainResult<()> {
    let symbol = op.asset_to_issue.symbol;
    require_issuer(chain, symbol, &op.issuer)?;

    let asset_id = chain.get_asset_id(symbol)?;
    let asset = chain.store.assets.get(asset_id).expect("indexed asset");
    precondition(
        !asset.market_issued,
        "market-issued assets are minted against collateral",
    )?;
    let max_supply = asset.options.max_supply;

    let dynamic_id = chain.get_asset_dynamic_id(symbol)?;
    let supply = chain
        .store
        .asset_dynamics
        .get(dynamic_id)
        .expect("indexed dynamic data")
        .current_supply;
    precondition(
        supply + op.asset_to_issue.amount <= max_supply,
        "issuance exceeds the maximum supply",
    )?;

    let to_id = chain.get_account_id(&op.issue_to_account)?;
    chain.adjust_balance(to_id, op.asset_to_issue)?;
    chain.store.asset_dynamics.modify(dynamic_id, |dynamic| {
        dynamic.current_supply += op.asset_to_issue.amount;
    });
    Ok(())
}

pub(super) fn apply_asset_reserve(
    chain: &mut Chain,
    op: &AssetReserveOperation,
) -> ChainResult<()> {
    let symbol = op.amount_to_reserve.symbol;
    precondition(!core_symbol(symbol), "core assets cannot be reserved")?;
    let asset_id = chain.get_asset_id(symbol)?;
    precondition(
        !chain
            .store
            .assets
            .get(asset_id)
            .expect("indexed asset")
            .market_issued,
        "market-issued assets are reserved through settlement",
    )?;

    let payer_id = chain.get_account_id(&op.payer)?;
    chain.adjust_balance(payer_id, -op.amount_to_reserve)?;

    let dynamic_id = chain.get_asset_dynamic_id(symbol)?;
    chain.store.asset_dynamics.modify(dynamic_id, |dynamic| {
        dynamic.current_supply -= op.amount_to_reserve.amount;
    });
    Ok(())
}

pub(super) fn apply_asset_update(chain: &mut Chain, op: &AssetUpdateOperation) -> ChainResult<()> {
    require_issuer(chain, op.asset_to_update, &op.issuer)?;
    if let Some(new_issuer) = &op.new_issuer {
        chain.get_account_id(new_issuer)?;
    }

    let dynamic_id = chain.get_asset_dynamic_id(op.asset_to_update)?;
    let supply = chain
        .store
        .asset_dynamics
        .get(dynamic_id)
        .expect("indexed dynamic data")
        .current_supply;
    precondition(
        op.new_options.max_supply >= supply,
        "cannot cap supply below what is outstanding",
    )?;

    let asset_id = chain.get_asset_id(op.asset_to_update)?;
    chain.store.assets.modify(asset_id, |asset| {
        if let Some(new_issuer) = &op.new_issuer {
            asset.issuer = new_issuer.clone();
        }
        asset.options = op.new_options.clone();
    });
    Ok(())
}

pub(super) fn apply_asset_update_bitasset(
    chain: &mut Chain,
    op: &AssetUpdateBitassetOperation,
) -> ChainResult<()> {
    require_issuer(chain, op.asset_to_update, &op.issuer)?;
    let bitasset_id = chain.get_bitasset_id(op.asset_to_update)?;
    let bitasset = chain.store.bitassets.get(bitasset_id).expect("indexed bitasset");
    precondition(
        !bitasset.has_settlement(),
        "a globally settled asset cannot be updated",
    )?;
    precondition(
        op.new_options.short_backing_asset == bitasset.options.short_backing_asset,
        "the backing asset cannot change",
    )?;

    let now = chain.head_block_time();
    chain.store.bitassets.modify(bitasset_id, |bitasset| {
        bitasset.options = op.new_options.clone();
        bitasset.update_median_feeds(now);
    });
    Ok(())
}

pub(super) fn apply_asset_update_feed_producers(
    chain: &mut Chain,
    op: &AssetUpdateFeedProducersOperation,
) -> ChainResult<()> {
    require_issuer(chain, op.asset_to_update, &op.issuer)?;
    for producer in &op.new_feed_producers {
        chain.get_account_id(producer)?;
    }

    let bitasset_id = chain.get_bitasset_id(op.asset_to_update)?;
    let now = chain.head_block_time();
    chain.store.bitassets.modify(bitasset_id, |bitasset| {
        bitasset.feed_producers = op.new_feed_producers.clone();
        bitasset
            .feeds
            .retain(|(producer, _, _)| bitasset.feed_producers.contains(producer));
        bitasset.update_median_feeds(now);
    });
    Ok(())
}

pub(super) fn apply_asset_fund_fee_pool(
    chain: &mut Chain,
    op: &AssetFundFeePoolOperation,
) -> ChainResult<()> {
    let from_id = chain.get_account_id(&op.from_account)?;
    let dynamic_id = chain.get_asset_dynamic_id(op.asset_symbol)?;

    chain.adjust_balance(from_id, -op.amount)?;
    chain.store.asset_dynamics.modify(dynamic_id, |dynamic| {
        dynamic.fee_pool += op.amount.amount;
    });
    Ok(())
}

pub(super) fn apply_asset_global_settle(
    chain: &mut Chain,
    op: &AssetGlobalSettleOperation,
) -> ChainResult<()> {
    require_issuer(chain, op.asset_to_settle, &op.issuer)?;
    let asset_id = chain.get_asset_id(op.asset_to_settle)?;
    let asset = chain.store.assets.get(asset_id).expect("indexed asset");
    precondition(
        asset.market_issued && asset.is_prediction_market,
        "only prediction markets settle at the issuer's word",
    )?;

    chain.globally_settle_asset(op.asset_to_settle, op.settle_price)
}

pub(super) fn apply_asset_settle(chain: &mut Chain, op: &AssetSettleOperation) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account)?;
    let bitasset_id = chain.get_bitasset_id(op.amount.symbol)?;
    precondition(
        chain
            .store
            .bitassets
            .get(bitasset_id)
            .expect("indexed bitasset")
            .has_settlement(),
        "instant settlement requires a globally settled asset",
    )?;

    let receives = chain.settle_from_fund(account_id, op.amount)?;
    chain.push_virtual_operation(Operation::FillAssetOrder(FillAssetOrderOperation {
        order_id: 0,
        owner: op.account.clone(),
        pays: op.amount,
        receives,
        fee: Asset::zero(receives.symbol),
    }));
    Ok(())
}

pub(super) fn apply_asset_force_settle(
    chain: &mut Chain,
    op: &AssetForceSettleOperation,
) -> ChainResult<()> {
    let account_id = chain.get_account_id(&op.account)?;
    let bitasset_id = chain.get_bitasset_id(op.amount.symbol)?;
    let bitasset = chain.store.bitassets.get(bitasset_id).expect("indexed bitasset");

    if bitasset.has_settlement() {
        // after a black swan, settlement is immediate
        let receives = chain.settle_from_fund(account_id, op.amount)?;
        chain.push_virtual_operation(Operation::FillAssetOrder(FillAssetOrderOperation {
            order_id: op.settlement_id,
            owner: op.account.clone(),
            pays: op.amount,
            receives,
            fee: Asset::zero(receives.symbol),
        }));
        return Ok(());
    }

    precondition(
        !bitasset.current_feed.is_null(),
        "cannot force settle without a price feed",
    )?;
    precondition(
        chain
            .store
            .force_settlements
            .find_by_key(
                crate::chain::state::ForceSettlementObject::BY_ACCOUNT,
                vec![KeyPart::Str(op.account.clone()), KeyPart::U32(op.settlement_id)],
            )
            .is_none(),
        "settlement id already in use",
    )?;

    let delay = bitasset.options.force_settlement_delay_secs;
    chain.adjust_balance(account_id, -op.amount)?;

    let settlement_date = chain.head_block_time() + delay;
    chain.store.force_settlements.create(|settlement| {
        settlement.owner = op.account.clone();
        settlement.balance = op.amount;
        settlement.settlement_date = settlement_date;
        settlement.settlement_id = op.settlement_id;
    });
    Ok(())
}

pub(super) fn apply_asset_publish_feed(
    chain: &mut Chain,
    op: &AssetPublishFeedOperation,
) -> ChainResult<()> {
    precondition(
        chain.has_hardfork(HF_COLLATERAL_MARKETS),
        "price feeds are not enabled yet",
    )?;
    chain.get_account_id(&op.publisher)?;

    let bitasset_id = chain.get_bitasset_id(op.asset)?;
    let bitasset = chain.store.bitassets.get(bitasset_id).expect("indexed bitasset");
    precondition(
        !bitasset.has_settlement(),
        "feeds close after a global settlement",
    )?;
    precondition(
        bitasset.feed_producers.contains(&op.publisher),
        format!("{} is not a feed producer for {}", op.publisher, op.asset),
    )?;
    if !op.feed.is_null() {
        precondition(
            op.feed.settlement_price.quote.symbol == bitasset.options.short_backing_asset,
            "feed must price against the backing asset",
        )?;
    }

    let now = chain.head_block_time();
    chain.store.bitassets.modify(bitasset_id, |bitasset| {
        bitasset.feeds.retain(|(producer, _, _)| producer != &op.publisher);
        bitasset.feeds.push((op.publisher.clone(), now, op.feed.clone()));
        bitasset.update_median_feeds(now);
    });

    // a feed move can put positions under water
    chain.check_call_orders(op.asset, true)?;
    Ok(())
}

pub(super) fn apply_asset_claim_fees(
    chain: &mut Chain,
    op: &AssetClaimFeesOperation,
) -> ChainResult<()> {
    let symbol = op.amount_to_claim.symbol;
    require_issuer(chain, symbol, &op.issuer)?;

    let dynamic_id = chain.get_asset_dynamic_id(symbol)?;
    let accumulated = chain
        .store
        .asset_dynamics
        .get(dynamic_id)
        .expect("indexed dynamic data")
        .accumulated_fees;
    precondition(
        op.amount_to_claim.amount <= accumulated,
        "claim exceeds accumulated fees",
    )?;

    let issuer_id = chain.get_account_id(&op.issuer)?;
    chain.adjust_balance(issuer_id, op.amount_to_claim)?;
    chain.store.asset_dynamics.modify(dynamic_id, |dynamic| {
        dynamic.accumulated_fees -= op.amount_to_claim.amount;
    });
    Ok(())
}
