//! Minimal standalone depth book for a single feed.
//!
//! Used where a full [`crate::book::types::FullOrderBook`] is overkill: an
//! exchange source that only needs top-of-book depth to produce a mid price
//! keeps one of these per connection.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::types::{RawLevel, Side};

/// Depth state maintained from a single feed's updates.
#[derive(Debug, Clone, Default)]
pub struct DepthBook {
    /// Bid levels: price -> size.
    bids: HashMap<Decimal, Decimal>,
    /// Ask levels: price -> size.
    asks: HashMap<Decimal, Decimal>,
}

impl DepthBook {
    /// Create an empty depth book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole book with a snapshot. Zero-size levels are dropped.
    pub fn apply_snapshot(&mut self, bids: &[RawLevel], asks: &[RawLevel]) {
        self.bids.clear();
        self.asks.clear();

        for level in bids {
            if level.size > Decimal::ZERO {
                self.bids.insert(level.price, level.size);
            }
        }
        for level in asks {
            if level.size > Decimal::ZERO {
                self.asks.insert(level.price, level.size);
            }
        }
    }

    /// Patch one level; size zero removes it.
    pub fn apply_level(&mut self, side: Side, price: Decimal, size: Decimal) {
        let book = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };

        if size <= Decimal::ZERO {
            book.remove(&price);
        } else {
            book.insert(price, size);
        }
    }

    /// Best bid price, if any.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().max().copied()
    }

    /// Best ask price, if any.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().min().copied()
    }

    /// Midpoint of best bid and ask.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// True when either side holds a level.
    pub fn has_depth(&self) -> bool {
        !self.bids.is_empty() || !self.asks.is_empty()
    }

    /// Sorted level vectors: bids descending, asks ascending.
    pub fn to_levels(&self) -> (Vec<RawLevel>, Vec<RawLevel>) {
        let mut bids: Vec<RawLevel> = self
            .bids
            .iter()
            .map(|(&price, &size)| RawLevel::new(price, size))
            .collect();
        bids.sort_by(|a, b| b.price.cmp(&a.price));

        let mut asks: Vec<RawLevel> = self
            .asks
            .iter()
            .map(|(&price, &size)| RawLevel::new(price, size))
            .collect();
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        (bids, asks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn snapshot_then_mid() {
        let mut book = DepthBook::new();
        book.apply_snapshot(
            &[RawLevel::new(dec!(64000), dec!(2)), RawLevel::new(dec!(63990), dec!(1))],
            &[RawLevel::new(dec!(64010), dec!(3))],
        );

        assert_eq!(book.best_bid(), Some(dec!(64000)));
        assert_eq!(book.best_ask(), Some(dec!(64010)));
        assert_eq!(book.mid(), Some(dec!(64005)));
    }

    #[test]
    fn level_patch_and_removal() {
        let mut book = DepthBook::new();
        book.apply_level(Side::Buy, dec!(100), dec!(5));
        assert_eq!(book.best_bid(), Some(dec!(100)));

        book.apply_level(Side::Buy, dec!(100), dec!(0));
        assert_eq!(book.best_bid(), None);
        assert!(!book.has_depth());
    }

    #[test]
    fn to_levels_sorted() {
        let mut book = DepthBook::new();
        book.apply_level(Side::Buy, dec!(99), dec!(1));
        book.apply_level(Side::Buy, dec!(100), dec!(1));
        book.apply_level(Side::Sell, dec!(102), dec!(1));
        book.apply_level(Side::Sell, dec!(101), dec!(1));

        let (bids, asks) = book.to_levels();
        assert_eq!(bids[0].price, dec!(100));
        assert_eq!(asks[0].price, dec!(101));
    }

    #[test]
    fn snapshot_replaces_prior_state() {
        let mut book = DepthBook::new();
        book.apply_level(Side::Buy, dec!(100), dec!(5));
        book.apply_snapshot(&[RawLevel::new(dec!(90), dec!(1))], &[]);

        assert_eq!(book.best_bid(), Some(dec!(90)));
    }
}
