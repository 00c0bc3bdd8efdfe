// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{precondition, Chain, ChainError, ChainResult};
use crate::chain::state::*;
use crate::chain::store::{KeyPart, ObjectId};
use crate::consensus::*;
use crate::primitives::*;
use log::error;

impl Chain {
    fn find_limit_order_id(&self, seller: &str, order_id: u32) -> Option<ObjectId> {
        self.store.limit_orders.find_by_key(
            LimitOrderObject::BY_ACCOUNT,
            vec![KeyPart::Str(seller.to_owned()), KeyPart::U32(order_id)],
        )
    }

    pub(crate) fn get_limit_order_id(&self, seller: &str, order_id: u32) -> ChainResult<ObjectId> {
        self.find_limit_order_id(seller, order_id).ok_or_else(|| {
            ChainError::Precondition(format!("unknown limit order {seller}/{order_id}"))
        })
    }

    /// Best opposing order on the book for someone selling `sell` and
    /// receiving `receive`: the opposing order with the highest price.
    fn best_opposing_order(&self, sell: Symbol, receive: Symbol) -> Option<ObjectId> {
        self.store.limit_orders.last_by_prefix(
            LimitOrderObject::BY_PRICE,
            vec![KeyPart::U128(market_pair(receive, sell))],
        )
    }

    /// The least-collateralized open call in a debt asset
    fn least_collateralized_call(&self, debt: Symbol) -> Option<ObjectId> {
        self.store
            .call_orders
            .first_by_prefix(CallOrderObject::BY_COLLATERAL, vec![KeyPart::U64(debt.0)])
    }

    /// Work a freshly booked order against the opposing book, triggering
    /// margin checks on both assets. Returns true when the order left the
    /// book entirely.
    pub(crate) fn apply_order(
        &mut self,
        order_ref: ObjectId,
        allow_black_swan: bool,
    ) -> ChainResult<bool> {
        let order = self
            .store
            .limit_orders
            .get(order_ref)
            .expect("indexed order")
            .clone();
        let sell_symbol = order.sell_price.base.symbol;
        let receive_symbol = order.sell_price.quote.symbol;

        if self.has_hardfork(HF_COLLATERAL_MARKETS) {
            let called_some = self.check_call_orders(sell_symbol, allow_black_swan)?
                | self.check_call_orders(receive_symbol, allow_black_swan)?;
            if called_some && self.store.limit_orders.get(order_ref).is_none() {
                // filled by a margin call
                return Ok(true);
            }
        }

        // the opposing order must price at or better than our limit
        let min_price = order.sell_price.invert();

        loop {
            if self.store.limit_orders.get(order_ref).is_none() {
                break;
            }
            let Some(opposing_ref) = self.best_opposing_order(sell_symbol, receive_symbol) else {
                break;
            };
            let opposing = self
                .store
                .limit_orders
                .get(opposing_ref)
                .expect("indexed order");
            if !matches!(
                opposing.sell_price.partial_cmp(&min_price),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ) {
                break;
            }

            let match_price = opposing.sell_price;
            let filled = self.match_orders(order_ref, opposing_ref, match_price)?;
            if filled & 0x1 != 0 {
                break;
            }
        }

        if self.has_hardfork(HF_COLLATERAL_MARKETS) {
            self.check_call_orders(sell_symbol, allow_black_swan)?;
            self.check_call_orders(receive_symbol, allow_black_swan)?;
        }

        Ok(self.store.limit_orders.get(order_ref).is_none())
    }

    /// Match two opposing orders at `match_price`. The order with less on
    /// offer fills completely; the other may fill partially.
    ///
    /// Bit 1 of the result: the new order filled. Bit 2: the old one did.
    fn match_orders(
        &mut self,
        new_ref: ObjectId,
        old_ref: ObjectId,
        match_price: Price,
    ) -> ChainResult<u8> {
        let new_order = self
            .store
            .limit_orders
            .get(new_ref)
            .expect("indexed order")
            .clone();
        let old_order = self
            .store
            .limit_orders
            .get(old_ref)
            .expect("indexed order")
            .clone();

        assert_eq!(
            new_order.sell_price.base.symbol,
            old_order.sell_price.quote.symbol
        );
        assert_eq!(
            new_order.sell_price.quote.symbol,
            old_order.sell_price.base.symbol
        );
        assert!(new_order.for_sale > 0 && old_order.for_sale > 0);

        let new_for_sale = new_order.amount_for_sale();
        let old_for_sale = old_order.amount_for_sale();

        let new_receives;
        let old_receives;
        if new_for_sale <= match_price.convert(old_for_sale) {
            old_receives = new_for_sale;
            new_receives = match_price.convert(new_for_sale);
        } else {
            // The old order's full inventory moves; no asset is created or
            // destroyed by the rounding.
            new_receives = old_for_sale;
            old_receives = match_price.convert(old_for_sale);
        }
        let old_pays = new_receives;
        let new_pays = old_receives;

        assert!(new_pays == new_order.amount_for_sale() || old_pays == old_order.amount_for_sale());

        let age = self.head_block_time() - old_order.created;
        if !self.has_hardfork(HF_REWARD_FUNDS) && age >= MIN_LIQUIDITY_REWARD_PERIOD_SECS {
            let old_seller = self.get_account_id(&old_order.seller)?;
            let new_seller = self.get_account_id(&new_order.seller)?;
            if old_receives.symbol == AMA {
                self.adjust_liquidity_reward(old_seller, old_receives, false)?;
                self.adjust_liquidity_reward(new_seller, -old_receives, false)?;
            } else {
                self.adjust_liquidity_reward(old_seller, new_receives, true)?;
                self.adjust_liquidity_reward(new_seller, -new_receives, true)?;
            }
        }

        self.push_virtual_operation(Operation::FillOrder(FillOrderOperation {
            current_owner: new_order.seller.clone(),
            current_order_id: new_order.order_id,
            current_pays: new_pays,
            open_owner: old_order.seller.clone(),
            open_order_id: old_order.order_id,
            open_pays: old_pays,
        }));

        let mut result = 0u8;
        result |= u8::from(self.fill_limit_order(new_ref, new_pays, new_receives)?);
        result |= u8::from(self.fill_limit_order(old_ref, old_pays, old_receives)?) << 1;
        assert!(result != 0, "match must fill at least one order");
        Ok(result)
    }

    /// Settle one side of a fill. Returns true when the order is gone from
    /// the book.
    fn fill_limit_order(
        &mut self,
        order_ref: ObjectId,
        pays: Asset,
        receives: Asset,
    ) -> ChainResult<bool> {
        let order = self
            .store
            .limit_orders
            .get(order_ref)
            .expect("indexed order")
            .clone();
        assert_eq!(order.amount_for_sale().symbol, pays.symbol);
        assert!(pays.symbol != receives.symbol);

        let seller_id = self.get_account_id(&order.seller)?;
        let issuer_fees = self.pay_market_fees(receives)?;
        self.adjust_balance(seller_id, receives - issuer_fees)?;

        if pays == order.amount_for_sale() {
            self.store.limit_orders.remove(order_ref);
            Ok(true)
        } else {
            self.store.limit_orders.modify(order_ref, |order| {
                order.for_sale -= pays.amount;
            });
            // an order asking for nothing at its price is dust; refund it
            let remaining = self
                .store
                .limit_orders
                .get(order_ref)
                .expect("indexed order");
            if remaining.amount_to_receive().amount == 0 {
                self.cancel_limit_order(order_ref)?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    /// Reduce a call position. Fully covered positions return their freed
    /// collateral to the borrower; the received debt burns out of supply.
    fn fill_call_order(
        &mut self,
        call_ref: ObjectId,
        pays: Asset,
        receives: Asset,
    ) -> ChainResult<bool> {
        let call = self
            .store
            .call_orders
            .get(call_ref)
            .expect("indexed call")
            .clone();
        precondition(call.debt.symbol == receives.symbol, "call fill symbol mismatch")?;
        precondition(
            call.collateral.symbol == pays.symbol,
            "call fill collateral mismatch",
        )?;
        precondition(call.collateral >= pays, "call fill exceeds collateral")?;

        let bitasset_id = self.get_bitasset_id(call.debt.symbol)?;
        let mcr = self
            .store
            .bitassets
            .get(bitasset_id)
            .expect("indexed bitasset")
            .current_feed
            .maintenance_collateral_ratio
            .max(COLLATERAL_RATIO_DENOM);

        let mut collateral_freed: Option<Asset> = None;
        self.store.call_orders.modify(call_ref, |call| {
            call.debt -= receives;
            call.collateral -= pays;
            if call.debt.amount == 0 {
                collateral_freed = Some(call.collateral);
                call.collateral.amount = 0;
            } else {
                call.call_price =
                    CallOrderObject::derive_call_price(&call.collateral, &call.debt, mcr);
            }
        });

        let dynamic_id = self.get_asset_dynamic_id(receives.symbol)?;
        self.store.asset_dynamics.modify(dynamic_id, |dynamic| {
            dynamic.current_supply -= receives.amount;
        });

        let borrower_id = self.get_account_id(&call.borrower)?;
        if let Some(freed) = collateral_freed {
            self.adjust_balance(borrower_id, freed)?;
        }

        self.push_virtual_operation(Operation::FillAssetOrder(FillAssetOrderOperation {
            order_id: call_ref as u32,
            owner: call.borrower.clone(),
            pays,
            receives,
            fee: Asset::zero(pays.symbol),
        }));

        if collateral_freed.is_some() {
            self.store.call_orders.remove(call_ref);
        }
        Ok(collateral_freed.is_some())
    }

    /// Fill a force settlement from gathered collateral
    fn fill_settlement(
        &mut self,
        settle_ref: ObjectId,
        pays: Asset,
        receives: Asset,
    ) -> ChainResult<bool> {
        let settle = self
            .store
            .force_settlements
            .get(settle_ref)
            .expect("indexed settlement")
            .clone();

        let issuer_fees = self.pay_market_fees(receives)?;
        let filled = pays >= settle.balance;
        if !filled {
            self.store.force_settlements.modify(settle_ref, |settle| {
                settle.balance -= pays;
            });
        }

        let owner_id = self.get_account_id(&settle.owner)?;
        self.adjust_balance(owner_id, receives - issuer_fees)?;

        self.push_virtual_operation(Operation::FillAssetOrder(FillAssetOrderOperation {
            order_id: settle.settlement_id,
            owner: settle.owner.clone(),
            pays,
            receives,
            fee: issuer_fees,
        }));

        if filled {
            self.store.force_settlements.remove(settle_ref);
        }
        Ok(filled)
    }

    /// Fee charged by a market-issued asset on the receiving side of a fill
    fn calculate_market_fee(&self, trade_amount: Asset) -> Asset {
        let Some(asset_id) = self
            .store
            .assets
            .find_by_key(AssetObject::BY_SYMBOL, vec![KeyPart::U64(trade_amount.symbol.0)])
        else {
            return Asset::zero(trade_amount.symbol);
        };
        let asset = self.store.assets.get(asset_id).expect("indexed asset");
        if !asset.charges_market_fees() {
            return Asset::zero(trade_amount.symbol);
        }

        let mut fee = percent_of(trade_amount.amount, asset.options.market_fee_percent);
        if asset.options.max_market_fee > 0 {
            fee = fee.min(asset.options.max_market_fee);
        }
        Asset::new(fee, trade_amount.symbol)
    }

    fn pay_market_fees(&mut self, receives: Asset) -> ChainResult<Asset> {
        let issuer_fees = self.calculate_market_fee(receives);
        assert!(issuer_fees <= receives);

        if issuer_fees.amount > 0 {
            let dynamic_id = self.get_asset_dynamic_id(receives.symbol)?;
            self.store.asset_dynamics.modify(dynamic_id, |dynamic| {
                dynamic.accumulated_fees += issuer_fees.amount;
            });
        }
        Ok(issuer_fees)
    }

    pub(crate) fn cancel_limit_order(&mut self, order_ref: ObjectId) -> ChainResult<()> {
        let order = self
            .store
            .limit_orders
            .get(order_ref)
            .expect("indexed order")
            .clone();
        let seller_id = self.get_account_id(&order.seller)?;
        self.adjust_balance(seller_id, order.amount_for_sale())?;
        self.store.limit_orders.remove(order_ref);
        Ok(())
    }

    pub(crate) fn cancel_settlement(&mut self, settle_ref: ObjectId) -> ChainResult<()> {
        let settle = self
            .store
            .force_settlements
            .get(settle_ref)
            .expect("indexed settlement")
            .clone();
        let owner_id = self.get_account_id(&settle.owner)?;
        self.adjust_balance(owner_id, settle.balance)?;
        self.push_virtual_operation(Operation::AssetSettleCancel(AssetSettleCancelOperation {
            settlement_id: settle.settlement_id,
            account: settle.owner.clone(),
            amount: settle.balance,
        }));
        self.store.force_settlements.remove(settle_ref);
        Ok(())
    }

    /// Starting with the least collateralized position, fill margin calls
    /// against the order book while bids beat the short-squeeze cap.
    /// Returns true when a call executed.
    pub(crate) fn check_call_orders(
        &mut self,
        symbol: Symbol,
        enable_black_swan: bool,
    ) -> ChainResult<bool> {
        let Some(asset_id) = self
            .store
            .assets
            .find_by_key(AssetObject::BY_SYMBOL, vec![KeyPart::U64(symbol.0)])
        else {
            return Ok(false);
        };
        if !self
            .store
            .assets
            .get(asset_id)
            .expect("indexed asset")
            .market_issued
        {
            return Ok(false);
        }

        if self.check_for_blackswan(symbol, enable_black_swan)? {
            return Ok(false);
        }

        if self
            .store
            .assets
            .get(asset_id)
            .expect("indexed asset")
            .is_prediction_market
        {
            return Ok(false);
        }
        let bitasset_id = self.get_bitasset_id(symbol)?;
        let bitasset = self.store.bitassets.get(bitasset_id).expect("indexed bitasset");
        if bitasset.current_feed.is_null() {
            return Ok(false);
        }

        let backing = bitasset.options.short_backing_asset;
        let settlement_price = bitasset.current_feed.settlement_price;
        let min_price = bitasset.current_feed.max_short_squeeze_price();

        let mut margin_called = false;

        loop {
            if self.check_for_blackswan(symbol, enable_black_swan)? {
                break;
            }

            let Some(call_ref) = self.least_collateralized_call(symbol) else {
                break;
            };
            let call = self
                .store
                .call_orders
                .get(call_ref)
                .expect("indexed call")
                .clone();

            // orders selling the debt asset for the backing asset
            let Some(limit_ref) = self.best_opposing_order(backing, symbol) else {
                return Ok(margin_called);
            };
            let limit = self
                .store
                .limit_orders
                .get(limit_ref)
                .expect("indexed order")
                .clone();
            let match_price = limit.sell_price;
            let usd_for_sale = limit.amount_for_sale();

            // book has run past the short-squeeze cap
            if !matches!(
                match_price.partial_cmp(&min_price),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ) {
                return Ok(margin_called);
            }

            let trigger = call.call_price.invert();
            // healthy per the feed: no margin call
            if matches!(
                settlement_price.partial_cmp(&trigger),
                Some(std::cmp::Ordering::Greater)
            ) {
                return Ok(margin_called);
            }
            // best bid sits above the trigger: nothing to call against
            if matches!(
                match_price.partial_cmp(&trigger),
                Some(std::cmp::Ordering::Greater)
            ) {
                return Ok(margin_called);
            }

            margin_called = true;

            let usd_to_buy = call.debt;
            if match_price.convert(usd_to_buy) > call.collateral {
                error!("Black swan detected on asset {symbol}");
                if !enable_black_swan {
                    return Err(ChainError::BlackSwan);
                }
                let swan_price = call.collateralization().invert();
                self.globally_settle_asset(symbol, swan_price)?;
                return Ok(true);
            }

            let call_receives;
            let order_receives;
            if usd_to_buy >= usd_for_sale {
                // fill the order
                call_receives = usd_for_sale;
                order_receives = match_price.convert(usd_for_sale);
            } else {
                // fill the call
                call_receives = usd_to_buy;
                order_receives = match_price.convert(usd_to_buy);
            }
            let call_pays = order_receives;
            let order_pays = call_receives;

            self.fill_call_order(call_ref, call_pays, call_receives)?;
            self.fill_limit_order(limit_ref, order_pays, order_receives)?;
        }

        Ok(margin_called)
    }

    /// A black swan occurs when even the best bid (or the feed) prices the
    /// least-collateralized position's debt above its collateral.
    fn check_for_blackswan(
        &mut self,
        symbol: Symbol,
        enable_black_swan: bool,
    ) -> ChainResult<bool> {
        let Some(asset_id) = self
            .store
            .assets
            .find_by_key(AssetObject::BY_SYMBOL, vec![KeyPart::U64(symbol.0)])
        else {
            return Ok(false);
        };
        if !self
            .store
            .assets
            .get(asset_id)
            .expect("indexed asset")
            .market_issued
        {
            return Ok(false);
        }

        let bitasset_id = self.get_bitasset_id(symbol)?;
        let bitasset = self.store.bitassets.get(bitasset_id).expect("indexed bitasset");
        if bitasset.has_settlement() {
            return Ok(true);
        }

        let settle_price = bitasset.current_feed.settlement_price;
        if settle_price.is_null() {
            return Ok(false);
        }
        let backing = bitasset.options.short_backing_asset;

        let Some(call_ref) = self.least_collateralized_call(symbol) else {
            return Ok(false);
        };
        let call = self
            .store
            .call_orders
            .get(call_ref)
            .expect("indexed call")
            .clone();

        let mut highest = settle_price;
        if let Some(limit_ref) = self.best_opposing_order(backing, symbol) {
            let bid = self
                .store
                .limit_orders
                .get(limit_ref)
                .expect("indexed order")
                .sell_price;
            if matches!(
                bid.partial_cmp(&highest),
                Some(std::cmp::Ordering::Greater)
            ) {
                highest = bid;
            }
        }

        let least_collateral = call.collateralization();
        let swan = least_collateral.invert();
        if matches!(
            swan.partial_cmp(&highest),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ) {
            error!(
                "Black swan detected on {symbol}: least collateralized call cannot cover at the best bid"
            );
            if !enable_black_swan {
                return Err(ChainError::BlackSwan);
            }
            self.globally_settle_asset(symbol, swan)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Force-close every margin position at the swan price. Gathered
    /// collateral becomes the settlement fund; supply is restored so holders
    /// settle against the fund without delay.
    pub(crate) fn globally_settle_asset(
        &mut self,
        symbol: Symbol,
        settlement_price: Price,
    ) -> ChainResult<()> {
        let bitasset_id = self.get_bitasset_id(symbol)?;
        precondition(
            !self
                .store
                .bitassets
                .get(bitasset_id)
                .expect("indexed bitasset")
                .has_settlement(),
            "black swan already occurred, it should not happen again",
        )?;

        let backing = self
            .store
            .bitassets
            .get(bitasset_id)
            .expect("indexed bitasset")
            .options
            .short_backing_asset;

        let dynamic_id = self.get_asset_dynamic_id(symbol)?;
        let original_supply = self
            .store
            .asset_dynamics
            .get(dynamic_id)
            .expect("indexed dynamic data")
            .current_supply;

        let mut collateral_gathered = Asset::zero(backing);
        while let Some(call_ref) = self.least_collateralized_call(symbol) {
            let call = self
                .store
                .call_orders
                .get(call_ref)
                .expect("indexed call")
                .clone();
            let mut pays = settlement_price.convert(call.debt);
            if pays > call.collateral {
                pays = call.collateral;
            }
            collateral_gathered += pays;

            let filled = self.fill_call_order(call_ref, pays, call.debt)?;
            if !filled {
                return Err(ChainError::Fatal(
                    "global settlement failed to close a call order".into(),
                ));
            }
        }

        self.store.bitassets.modify(bitasset_id, |bitasset| {
            bitasset.settlement_price = Price::new(
                Asset::new(original_supply, symbol),
                collateral_gathered,
            );
            bitasset.settlement_fund = collateral_gathered.amount;
        });

        // Closing the calls burned the debt supply, but the tokens are
        // still out there; restore and let settlement burn for real.
        self.store.asset_dynamics.modify(dynamic_id, |dynamic| {
            dynamic.current_supply = original_supply;
        });
        Ok(())
    }

    /// Draw a settlement from the fund of a globally settled asset
    pub(crate) fn settle_from_fund(
        &mut self,
        account_id: ObjectId,
        amount: Asset,
    ) -> ChainResult<Asset> {
        let bitasset_id = self.get_bitasset_id(amount.symbol)?;
        let bitasset = self.store.bitassets.get(bitasset_id).expect("indexed bitasset");
        precondition(bitasset.has_settlement(), "asset is not globally settled")?;

        let settlement_price = bitasset.settlement_price;
        let mut receives = settlement_price.convert(amount);
        let fund = bitasset.settlement_fund;
        if receives.amount > fund {
            receives.amount = fund;
        }

        self.adjust_balance(account_id, -amount)?;
        self.adjust_balance(account_id, receives)?;

        self.store.bitassets.modify(bitasset_id, |bitasset| {
            bitasset.settlement_fund -= receives.amount;
        });
        let dynamic_id = self.get_asset_dynamic_id(amount.symbol)?;
        self.store.asset_dynamics.modify(dynamic_id, |dynamic| {
            dynamic.current_supply -= amount.amount;
        });
        Ok(receives)
    }

    // --- housekeeping hooks ---

    pub(crate) fn clear_expired_orders(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        loop {
            let due = self
                .store
                .limit_orders
                .first_by_prefix(LimitOrderObject::BY_EXPIRATION, vec![]);
            let id = match due {
                Some(id)
                    if self
                        .store
                        .limit_orders
                        .get(id)
                        .expect("indexed order")
                        .expiration
                        < now =>
                {
                    id
                }
                _ => break,
            };
            self.cancel_limit_order(id)?;
        }
        Ok(())
    }

    /// Re-median feeds that have gone stale and re-check their margin books
    pub(crate) fn update_expired_feeds(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        let expired: Vec<ObjectId> = self
            .store
            .bitassets
            .iter()
            .filter(|(_, bitasset)| bitasset.feed_is_expired(now))
            .map(|(id, _)| id)
            .collect();

        for bitasset_id in expired {
            self.store.bitassets.modify(bitasset_id, |bitasset| {
                bitasset.update_median_feeds(now);
            });
            let symbol = self
                .store
                .bitassets
                .get(bitasset_id)
                .expect("indexed bitasset")
                .symbol;
            self.check_call_orders(symbol, true)?;
        }
        Ok(())
    }

    /// Execute matured force settlements against the least-collateralized
    /// calls at the feed price; settled assets draw from their fund instead
    pub(crate) fn process_force_settlements(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        loop {
            let due = self
                .store
                .force_settlements
                .first_by_prefix(ForceSettlementObject::BY_EXPIRATION, vec![]);
            let settle_ref = match due {
                Some(id)
                    if self
                        .store
                        .force_settlements
                        .get(id)
                        .expect("indexed settlement")
                        .settlement_date
                        <= now =>
                {
                    id
                }
                _ => break,
            };

            let settle = self
                .store
                .force_settlements
                .get(settle_ref)
                .expect("indexed settlement")
                .clone();
            let symbol = settle.balance.symbol;

            let bitasset_id = self.get_bitasset_id(symbol)?;
            let bitasset = self.store.bitassets.get(bitasset_id).expect("indexed bitasset");

            if bitasset.has_settlement() {
                let owner_id = self.get_account_id(&settle.owner)?;
                // the settlement escrow still holds the tokens; hand them
                // back so the fund path burns them uniformly
                self.adjust_balance(owner_id, settle.balance)?;
                let receives = self.settle_from_fund(owner_id, settle.balance)?;
                self.push_virtual_operation(Operation::FillAssetOrder(
                    FillAssetOrderOperation {
                        order_id: settle.settlement_id,
                        owner: settle.owner.clone(),
                        pays: settle.balance,
                        receives,
                        fee: Asset::zero(receives.symbol),
                    },
                ));
                self.store.force_settlements.remove(settle_ref);
                continue;
            }

            if bitasset.current_feed.is_null() {
                // no feed to price against; give the request back
                self.cancel_settlement(settle_ref)?;
                continue;
            }
            let feed_price = bitasset.current_feed.settlement_price;

            loop {
                let Some(settle_row) = self.store.force_settlements.get(settle_ref) else {
                    break;
                };
                let remaining = settle_row.balance;
                let Some(call_ref) = self.least_collateralized_call(symbol) else {
                    // nothing left to settle against
                    self.cancel_settlement(settle_ref)?;
                    break;
                };
                let call = self
                    .store
                    .call_orders
                    .get(call_ref)
                    .expect("indexed call")
                    .clone();

                let call_receives = if remaining <= call.debt {
                    remaining
                } else {
                    call.debt
                };
                let call_pays = feed_price.convert(call_receives);

                if call_pays > call.collateral {
                    // the least-collateralized position cannot cover: swan
                    self.globally_settle_asset(symbol, call.collateralization().invert())?;
                    break;
                }

                self.fill_call_order(call_ref, call_pays, call_receives)?;
                self.fill_settlement(settle_ref, call_receives, call_pays)?;
            }
        }
        Ok(())
    }

    /// Convert matured ABD conversion requests at the historical median
    pub(crate) fn process_conversions(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        let median = self.store.feed().current_median_history;
        if median.is_null() {
            return Ok(());
        }

        let mut net_abd = Asset::zero(ABD);
        let mut net_ama = Asset::zero(AMA);

        loop {
            let due = self
                .store
                .convert_requests
                .first_by_prefix(ConvertRequestObject::BY_CONVERSION_DATE, vec![]);
            let id = match due {
                Some(id)
                    if self
                        .store
                        .convert_requests
                        .get(id)
                        .expect("indexed request")
                        .conversion_date
                        <= now =>
                {
                    id
                }
                _ => break,
            };

            let request = self
                .store
                .convert_requests
                .get(id)
                .expect("indexed request")
                .clone();
            let owner_id = self.get_account_id(&request.owner)?;
            let amount_to_issue = median.convert(request.amount);

            self.adjust_balance(owner_id, amount_to_issue)?;
            net_abd += request.amount;
            net_ama += amount_to_issue;

            self.push_virtual_operation(Operation::FillConvertRequest(
                FillConvertRequestOperation {
                    owner: request.owner.clone(),
                    request_id: request.request_id,
                    amount_in: request.amount,
                    amount_out: amount_to_issue,
                },
            ));
            self.store.convert_requests.remove(id);
        }

        let abd_value = median.convert(net_abd);
        self.store.props_mut(|props| {
            props.current_supply += net_ama;
            props.current_abd_supply -= net_abd;
            props.virtual_supply += net_ama;
            props.virtual_supply -= abd_value;
        });
        Ok(())
    }
}
