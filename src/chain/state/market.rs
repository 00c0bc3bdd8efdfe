// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::store::{IndexKey, KeyPart, ObjectId, StoreObject};
use crate::consensus::{Share, Timestamp};
use crate::primitives::{
    AccountName, Asset, AssetOptions, BitassetOptions, Price, PriceFeed, Symbol,
};
use bincode::{Decode, Encode};

/// Packs an ordered (sell, receive) market pair into one index part
#[must_use]
pub fn market_pair(sell: Symbol, receive: Symbol) -> u128 {
    ((sell.0 as u128) << 64) | receive.0 as u128
}

/// An open order on the book, selling `sell_price.base` for
/// `sell_price.quote`
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct LimitOrderObject {
    pub created: Timestamp,
    pub expiration: Timestamp,
    pub seller: AccountName,
    pub order_id: u32,
    pub for_sale: Share,
    pub sell_price: Price,
}

impl LimitOrderObject {
    pub const BY_ACCOUNT: u8 = 0;
    pub const BY_EXPIRATION: u8 = 1;
    pub const BY_PRICE: u8 = 2;

    #[must_use]
    pub fn amount_for_sale(&self) -> Asset {
        Asset::new(self.for_sale, self.sell_price.base.symbol)
    }

    #[must_use]
    pub fn amount_to_receive(&self) -> Asset {
        self.sell_price.convert(self.amount_for_sale())
    }
}

impl StoreObject for LimitOrderObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_ACCOUNT,
                vec![KeyPart::Str(self.seller.clone()), KeyPart::U32(self.order_id)],
            ),
            IndexKey::new(Self::BY_EXPIRATION, vec![KeyPart::U64(self.expiration)]),
            IndexKey::new(
                Self::BY_PRICE,
                vec![
                    KeyPart::U128(market_pair(
                        self.sell_price.base.symbol,
                        self.sell_price.quote.symbol,
                    )),
                    KeyPart::Ratio(
                        self.sell_price.base.amount,
                        self.sell_price.quote.amount.max(1),
                    ),
                ],
            ),
        ]
    }
}

/// A collateralized debt position in a market-issued asset
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct CallOrderObject {
    pub borrower: AccountName,
    pub collateral: Asset,
    pub debt: Asset,
    /// Trigger price derived from debt, collateral and the maintenance
    /// collateral ratio
    pub call_price: Price,
}

impl CallOrderObject {
    pub const BY_ACCOUNT: u8 = 0;
    pub const BY_COLLATERAL: u8 = 1;

    /// Collateral per unit of debt
    #[must_use]
    pub fn collateralization(&self) -> Price {
        Price::new(self.collateral, self.debt)
    }

    /// Recompute the trigger price after a collateral or debt change
    #[must_use]
    pub fn derive_call_price(collateral: &Asset, debt: &Asset, mcr: u16) -> Price {
        let base = (collateral.amount as i128 * 1_000)
            .min(Share::MAX as i128)
            .max(1) as Share;
        let quote = (debt.amount as i128 * mcr as i128)
            .min(Share::MAX as i128)
            .max(1) as Share;
        Price::new(
            Asset::new(base, collateral.symbol),
            Asset::new(quote, debt.symbol),
        )
    }
}

impl StoreObject for CallOrderObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_ACCOUNT,
                vec![
                    KeyPart::Str(self.borrower.clone()),
                    KeyPart::U64(self.debt.symbol.0),
                ],
            ),
            IndexKey::new(
                Self::BY_COLLATERAL,
                vec![
                    KeyPart::U64(self.debt.symbol.0),
                    KeyPart::Ratio(self.collateral.amount, self.debt.amount.max(1)),
                ],
            ),
        ]
    }
}

/// A pending request to settle a market-issued asset against its collateral
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct ForceSettlementObject {
    pub owner: AccountName,
    pub balance: Asset,
    pub settlement_date: Timestamp,
    pub settlement_id: u32,
}

impl ForceSettlementObject {
    pub const BY_ACCOUNT: u8 = 0;
    pub const BY_EXPIRATION: u8 = 1;
}

impl StoreObject for ForceSettlementObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_ACCOUNT,
                vec![
                    KeyPart::Str(self.owner.clone()),
                    KeyPart::U32(self.settlement_id),
                ],
            ),
            IndexKey::new(
                Self::BY_EXPIRATION,
                vec![KeyPart::U64(self.settlement_date)],
            ),
        ]
    }
}

/// An ABD→AMA conversion waiting out its delay
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct ConvertRequestObject {
    pub owner: AccountName,
    pub request_id: u32,
    pub amount: Asset,
    pub conversion_date: Timestamp,
}

impl ConvertRequestObject {
    pub const BY_OWNER_ID: u8 = 0;
    pub const BY_CONVERSION_DATE: u8 = 1;
}

impl StoreObject for ConvertRequestObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(
                Self::BY_OWNER_ID,
                vec![KeyPart::Str(self.owner.clone()), KeyPart::U32(self.request_id)],
            ),
            IndexKey::new(
                Self::BY_CONVERSION_DATE,
                vec![KeyPart::U64(self.conversion_date)],
            ),
        ]
    }
}

/// Static description of an asset
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct AssetObject {
    pub symbol: Symbol,
    pub issuer: AccountName,
    pub options: AssetOptions,
    pub market_issued: bool,
    pub is_prediction_market: bool,
    pub created: Timestamp,
}

impl AssetObject {
    pub const BY_SYMBOL: u8 = 0;
    pub const BY_TYPE: u8 = 1;

    #[must_use]
    pub fn charges_market_fees(&self) -> bool {
        self.options.market_fee_percent > 0
    }
}

impl StoreObject for AssetObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(Self::BY_SYMBOL, vec![KeyPart::U64(self.symbol.0)]),
            IndexKey::new(
                Self::BY_TYPE,
                vec![KeyPart::Bool(self.market_issued), KeyPart::U64(self.symbol.0)],
            ),
        ]
    }
}

/// Supply and fee counters of an asset
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct AssetDynamicDataObject {
    pub symbol: Symbol,
    pub current_supply: Share,
    pub accumulated_fees: Share,
    pub fee_pool: Share,
}

impl AssetDynamicDataObject {
    pub const BY_SYMBOL: u8 = 0;
}

impl StoreObject for AssetDynamicDataObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![IndexKey::new(Self::BY_SYMBOL, vec![KeyPart::U64(self.symbol.0)])]
    }
}

/// Collateral state of a market-issued asset
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct BitassetDataObject {
    pub symbol: Symbol,
    pub options: BitassetOptions,
    pub feed_producers: Vec<AccountName>,
    /// (producer, published-at, feed)
    pub feeds: Vec<(AccountName, Timestamp, PriceFeed)>,
    pub current_feed: PriceFeed,
    pub current_feed_publication_time: Timestamp,

    /// Set once a black swan globally settles the asset
    pub settlement_price: Price,
    pub settlement_fund: Share,
}

impl BitassetDataObject {
    pub const BY_SYMBOL: u8 = 0;

    #[must_use]
    pub fn has_settlement(&self) -> bool {
        !self.settlement_price.is_null()
    }

    #[must_use]
    pub fn feed_is_expired(&self, now: Timestamp) -> bool {
        self.current_feed_publication_time + self.options.feed_lifetime_secs < now
    }

    /// Recompute the effective feed as the median live feed by settlement
    /// price
    pub fn update_median_feeds(&mut self, now: Timestamp) {
        self.feeds
            .retain(|(_, at, _)| *at + self.options.feed_lifetime_secs >= now);

        if self.feeds.len() < self.options.minimum_feeds as usize {
            self.current_feed = PriceFeed::default();
            return;
        }

        let mut live: Vec<&PriceFeed> = self.feeds.iter().map(|(_, _, feed)| feed).collect();
        live.sort_by(|a, b| {
            a.settlement_price
                .partial_cmp(&b.settlement_price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.current_feed = live[live.len() / 2].clone();
        self.current_feed_publication_time = now;
    }
}

impl StoreObject for BitassetDataObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![IndexKey::new(Self::BY_SYMBOL, vec![KeyPart::U64(self.symbol.0)])]
    }
}

/// Decaying trade-volume weight backing the liquidity reward
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct LiquidityRewardBalanceObject {
    pub owner: AccountName,
    pub ama_volume: Share,
    pub abd_volume: Share,
    pub weight: u128,
    pub last_update: Timestamp,
}

impl LiquidityRewardBalanceObject {
    pub const BY_OWNER: u8 = 0;
    pub const BY_VOLUME_WEIGHT: u8 = 1;

    /// Favors balanced two-sided volume
    pub fn update_weight(&mut self) {
        let min = self.ama_volume.min(self.abd_volume).max(0) as u128;
        self.weight = min * min;
    }
}

impl StoreObject for LiquidityRewardBalanceObject {
    fn index_keys(&self, _id: ObjectId) -> Vec<IndexKey> {
        vec![
            IndexKey::new(Self::BY_OWNER, vec![KeyPart::Str(self.owner.clone())]),
            IndexKey::new(
                Self::BY_VOLUME_WEIGHT,
                vec![KeyPart::U128(self.weight), KeyPart::Str(self.owner.clone())],
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{ABD, AMA};

    #[test]
    fn order_amounts_round_down() {
        let order = LimitOrderObject {
            seller: "alice".into(),
            order_id: 1,
            for_sale: 100,
            sell_price: Price::new(Asset::new(100, ABD), Asset::new(120, AMA)),
            ..Default::default()
        };
        assert_eq!(order.amount_for_sale(), Asset::new(100, ABD));
        assert_eq!(order.amount_to_receive(), Asset::new(120, AMA));
    }

    #[test]
    fn call_price_scales_with_mcr() {
        let collateral = Asset::new(150_000, AMA);
        let debt = Asset::new(100_000, ABD);
        let call_price = CallOrderObject::derive_call_price(&collateral, &debt, 1_750);

        // collateral/debt below MCR means the trigger is above the feed
        let trigger = call_price.invert();
        let feed = Price::new(Asset::new(1_000, ABD), Asset::new(1_000, AMA));
        assert!(trigger > feed);
    }

    #[test]
    fn median_feed_needs_minimum_publishers() {
        let mut bitasset = BitassetDataObject {
            symbol: Symbol::pack(b"USD", 3),
            options: BitassetOptions {
                minimum_feeds: 2,
                feed_lifetime_secs: 100,
                ..Default::default()
            },
            ..Default::default()
        };

        let feed = PriceFeed::with_price(
            Price::new(Asset::new(1_000, ABD), Asset::new(1_000, AMA)),
            Price::new(Asset::new(1_000, ABD), Asset::new(1_000, AMA)),
        );
        bitasset.feeds.push(("alice".into(), 10, feed.clone()));
        bitasset.update_median_feeds(20);
        assert!(bitasset.current_feed.is_null());

        bitasset.feeds.push(("bob".into(), 15, feed));
        bitasset.update_median_feeds(20);
        assert!(!bitasset.current_feed.is_null());

        // Both expire
        bitasset.update_median_feeds(500);
        assert!(bitasset.current_feed.is_null());
    }
}
