// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Share;
use bincode::{Decode, Encode};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Asset symbol packed into a u64: the low byte holds the decimal precision,
/// the upper seven bytes the right-padded ASCII ticker.
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default, Encode, Decode,
)]
pub struct Symbol(pub u64);

/// Liquid core token
pub const AMA: Symbol = Symbol::pack(b"AMA", 3);

/// Collateralized stable token
pub const ABD: Symbol = Symbol::pack(b"ABD", 3);

/// Staked, non-transferable shares
pub const VESTS: Symbol = Symbol::pack(b"VESTS", 6);

impl Symbol {
    #[must_use]
    pub const fn pack(name: &[u8], precision: u8) -> Self {
        let mut v = precision as u64;
        let mut i = 0;
        while i < name.len() && i < 7 {
            v |= (name[i] as u64) << (8 * (i + 1));
            i += 1;
        }
        Self(v)
    }

    pub fn parse(name: &str, precision: u8) -> Result<Self, AssetError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > 7 || precision > 12 {
            return Err(AssetError::BadSymbol);
        }
        if !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(AssetError::BadSymbol);
        }
        Ok(Self::pack(bytes, precision))
    }

    #[must_use]
    pub const fn precision(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    #[must_use]
    pub fn name(&self) -> String {
        let mut out = String::with_capacity(7);
        for i in 1..8 {
            let b = ((self.0 >> (8 * i)) & 0xFF) as u8;
            if b == 0 {
                break;
            }
            out.push(b as char);
        }
        out
    }

    /// One whole unit in satoshis
    #[must_use]
    pub fn unit(&self) -> Share {
        (10 as Share).pow(self.precision() as u32)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug)]
pub enum AssetError {
    /// Symbol is not 1-7 uppercase ASCII characters
    BadSymbol,

    /// Amount out of range or of the wrong sign
    BadAmount,

    /// Operands carry different symbols
    SymbolMismatch,
}

/// An amount of a concrete asset
#[derive(PartialEq, Eq, Hash, Clone, Copy, Default, Encode, Decode)]
pub struct Asset {
    pub amount: Share,
    pub symbol: Symbol,
}

impl Asset {
    #[must_use]
    pub const fn new(amount: Share, symbol: Symbol) -> Self {
        Self { amount, symbol }
    }

    #[must_use]
    pub const fn zero(symbol: Symbol) -> Self {
        Self { amount: 0, symbol }
    }
}

impl Add for Asset {
    type Output = Asset;

    fn add(self, other: Asset) -> Asset {
        assert_eq!(self.symbol, other.symbol, "asset symbol mismatch");
        Asset::new(self.amount.checked_add(other.amount).unwrap(), self.symbol)
    }
}

impl Sub for Asset {
    type Output = Asset;

    fn sub(self, other: Asset) -> Asset {
        assert_eq!(self.symbol, other.symbol, "asset symbol mismatch");
        Asset::new(self.amount.checked_sub(other.amount).unwrap(), self.symbol)
    }
}

impl Neg for Asset {
    type Output = Asset;

    fn neg(self) -> Asset {
        Asset::new(-self.amount, self.symbol)
    }
}

impl AddAssign for Asset {
    fn add_assign(&mut self, other: Asset) {
        *self = *self + other;
    }
}

impl SubAssign for Asset {
    fn sub_assign(&mut self, other: Asset) {
        *self = *self - other;
    }
}

impl PartialOrd for Asset {
    fn partial_cmp(&self, other: &Asset) -> Option<Ordering> {
        if self.symbol != other.symbol {
            return None;
        }
        Some(self.amount.cmp(&other.amount))
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.symbol.unit();
        let whole = self.amount / unit;
        let frac = (self.amount % unit).abs();
        write!(
            f,
            "{whole}.{frac:0width$} {}",
            self.symbol,
            width = self.symbol.precision() as usize
        )
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An exchange rate between two assets, kept as the exact pair of amounts.
/// Comparison cross-multiplies in 128 bits so ordering is exact.
#[derive(PartialEq, Eq, Clone, Copy, Default, Encode, Decode)]
pub struct Price {
    pub base: Asset,
    pub quote: Asset,
}

impl Price {
    #[must_use]
    pub const fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }

    /// The null price carries zero amounts and compares to nothing
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.base.amount == 0 && self.quote.amount == 0
    }

    pub fn validate(&self) -> Result<(), AssetError> {
        if self.base.amount <= 0 || self.quote.amount <= 0 {
            return Err(AssetError::BadAmount);
        }
        if self.base.symbol == self.quote.symbol {
            return Err(AssetError::SymbolMismatch);
        }
        Ok(())
    }

    /// Swap base and quote
    #[must_use]
    pub fn invert(&self) -> Price {
        Price::new(self.quote, self.base)
    }

    /// The highest representable price selling `base` for `quote`
    #[must_use]
    pub fn max(base: Symbol, quote: Symbol) -> Price {
        Price::new(Asset::new(Share::MAX, base), Asset::new(1, quote))
    }

    /// The lowest representable price selling `base` for `quote`
    #[must_use]
    pub fn min(base: Symbol, quote: Symbol) -> Price {
        Price::new(Asset::new(1, base), Asset::new(Share::MAX, quote))
    }

    /// Convert an amount of either side into the other, rounding down
    #[must_use]
    pub fn convert(&self, a: Asset) -> Asset {
        if a.symbol == self.base.symbol {
            assert!(self.base.amount > 0);
            let result = a.amount as i128 * self.quote.amount as i128 / self.base.amount as i128;
            Asset::new(result as Share, self.quote.symbol)
        } else {
            assert_eq!(a.symbol, self.quote.symbol, "price symbol mismatch");
            assert!(self.quote.amount > 0);
            let result = a.amount as i128 * self.base.amount as i128 / self.quote.amount as i128;
            Asset::new(result as Share, self.base.symbol)
        }
    }
}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Price) -> Option<Ordering> {
        if self.base.symbol != other.base.symbol || self.quote.symbol != other.quote.symbol {
            return None;
        }
        let lhs = self.base.amount as i128 * other.quote.amount as i128;
        let rhs = other.base.amount as i128 * self.quote.amount as i128;
        Some(lhs.cmp(&rhs))
    }
}

impl fmt::Debug for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} / {:?}", self.base, self.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_packs_symbols() {
        assert_eq!(AMA.precision(), 3);
        assert_eq!(AMA.name(), "AMA");
        assert_eq!(VESTS.precision(), 6);
        assert_eq!(VESTS.name(), "VESTS");
        assert_ne!(AMA, ABD);
    }

    #[test]
    fn it_rejects_bad_symbols() {
        assert!(Symbol::parse("", 3).is_err());
        assert!(Symbol::parse("toolongsym", 3).is_err());
        assert!(Symbol::parse("abc", 3).is_err());
        assert!(Symbol::parse("GOLD", 3).is_ok());
    }

    #[test]
    fn asset_arithmetic_checks_symbols() {
        let a = Asset::new(10_000, AMA);
        let b = Asset::new(2_500, AMA);
        assert_eq!((a - b).amount, 7_500);
        assert_eq!((a + b).amount, 12_500);
        assert!(a > b);
        assert_eq!(Asset::new(1, AMA).partial_cmp(&Asset::new(1, ABD)), None);
    }

    #[test]
    fn prices_convert_both_ways() {
        // 100 ABD buys 120 AMA
        let p = Price::new(Asset::new(100_000, ABD), Asset::new(120_000, AMA));
        assert_eq!(p.convert(Asset::new(100_000, ABD)), Asset::new(120_000, AMA));
        assert_eq!(p.convert(Asset::new(120_000, AMA)), Asset::new(100_000, ABD));
        // Rounds down
        assert_eq!(p.convert(Asset::new(1, ABD)).amount, 1);
        assert_eq!(p.convert(Asset::new(1, AMA)).amount, 0);
    }

    #[test]
    fn price_ordering_is_exact() {
        let cheap = Price::new(Asset::new(1, ABD), Asset::new(3, AMA));
        let rich = Price::new(
            Asset::new(333_333_333_333_333, ABD),
            Asset::new(999_999_999_999_998, AMA),
        );
        // 1/3 > 333.../999...8 by an epsilon far below f64 resolution
        assert!(cheap > rich);
        assert_eq!(cheap.partial_cmp(&cheap), Some(Ordering::Equal));
    }

    #[test]
    fn inverted_prices_compare_the_other_way() {
        let a = Price::new(Asset::new(1, ABD), Asset::new(2, AMA));
        let b = Price::new(Asset::new(1, ABD), Asset::new(4, AMA));
        assert!(a > b);
        assert!(a.invert() < b.invert());
    }
}
