//! Order book types and data structures.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumString};

/// Order side as streamed by the feed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Bid side.
    #[strum(serialize = "BUY", serialize = "buy", serialize = "bid")]
    #[default]
    Buy,
    /// Ask side.
    #[strum(serialize = "SELL", serialize = "sell", serialize = "ask")]
    Sell,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Raw price level as carried on the wire and returned from snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLevel {
    /// Price at this level.
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    /// Total size available at this price.
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
}

impl RawLevel {
    /// Create a new raw level.
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// A single price-level patch from a delta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceChange {
    /// Price of the level being patched.
    pub price: Decimal,
    /// New size; exactly zero deletes the level.
    pub size: Decimal,
    /// Which side the level lives on.
    pub side: Side,
}

/// One asset's resting liquidity: price -> size per side.
///
/// A level with size zero never appears; it is deleted on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceMap {
    /// Bid levels keyed by price.
    pub bids: BTreeMap<Decimal, Decimal>,
    /// Ask levels keyed by price.
    pub asks: BTreeMap<Decimal, Decimal>,
}

impl PriceMap {
    /// True when neither side holds a level.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Borrow one side's levels.
    pub fn side(&self, side: Side) -> &BTreeMap<Decimal, Decimal> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Mutably borrow one side's levels.
    pub fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, Decimal> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Finest decimal precision observed across all level prices.
    pub fn max_price_precision(&self) -> u32 {
        self.bids
            .keys()
            .chain(self.asks.keys())
            .map(|p| p.normalize().scale())
            .max()
            .unwrap_or(0)
    }
}

/// Depth-ranked level with cumulative bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total size at this price (or bucket).
    pub size: Decimal,
    /// Notional value: price x size.
    pub value: Decimal,
    /// Cumulative size from the best price inward.
    pub net_size: Decimal,
    /// Cumulative value from the best price inward.
    pub net_value: Decimal,
    /// Raw source prices folded into this level; non-empty only after
    /// aggregation.
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub source_prices: SmallVec<[Decimal; 4]>,
}

impl ProcessedLevel {
    /// Create a level with cumulative fields zeroed; the builder fills them
    /// during the depth walk.
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self {
            price,
            size,
            value: price * size,
            net_size: Decimal::ZERO,
            net_value: Decimal::ZERO,
            source_prices: SmallVec::new(),
        }
    }
}

/// One token's two-sided view within a [`FullOrderBook`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BookView {
    /// Bid levels sorted by price descending.
    pub bids: Vec<ProcessedLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<ProcessedLevel>,
    /// Best bid price, if any bids exist.
    pub best_bid: Option<Decimal>,
    /// Best ask price, if any asks exist.
    pub best_ask: Option<Decimal>,
    /// Best ask minus best bid, floored at zero.
    pub spread: Option<Decimal>,
    /// Average of best bid and best ask.
    pub midpoint: Option<Decimal>,
}

impl BookView {
    /// True when at least one level exists on either side.
    pub fn has_liquidity(&self) -> bool {
        !self.bids.is_empty() || !self.asks.is_empty()
    }
}

/// Two-sided book for a binary market: the side as streamed plus the
/// algebraically derived complement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullOrderBook {
    /// Book for the streamed token.
    pub native: BookView,
    /// Book for the complementary token, derived via price' = 1 - price.
    pub complementary: BookView,
    /// Tick size this book was built (or re-bucketed) at.
    pub tick_size: Decimal,
}

/// Display row: plain numerics for UI consumption.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedRow {
    /// Level price.
    pub price: f64,
    /// Level size.
    pub size: f64,
    /// Running total size from the best price inward.
    pub total: f64,
}

/// One side of a projected view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectedSide {
    /// Display rows, best price first.
    pub rows: Vec<ProjectedRow>,
    /// True when the side has at least one row before truncation.
    pub has_liquidity: bool,
    /// Total size across all rows before truncation.
    pub total_size: f64,
}

/// Projected two-sided view for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectedView {
    /// Bid rows.
    pub bids: ProjectedSide,
    /// Ask rows.
    pub asks: ProjectedSide,
    /// Best executable buy price (best ask) formatted to tick precision.
    pub best_buy: Option<String>,
    /// Best executable sell price (best bid) formatted to tick precision.
    pub best_sell: Option<String>,
}

/// UI-ready projection of a [`FullOrderBook`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedBook {
    /// Projection of the streamed token.
    pub native: ProjectedView,
    /// Projection of the complementary token.
    pub complementary: ProjectedView,
    /// Tick size the projection was formatted at.
    pub tick_size: Decimal,
    /// Event timestamp in milliseconds.
    pub ts: i64,
}

/// Decimal precision implied by a tick size (0.01 -> 2).
pub fn tick_precision(tick: Decimal) -> u32 {
    tick.normalize().scale()
}

/// Tick size for a decimal precision (2 -> 0.01).
pub fn tick_for_precision(precision: u32) -> Decimal {
    Decimal::new(1, precision)
}

/// Format a price at exactly the tick size's decimal precision.
pub fn format_price(price: Decimal, tick: Decimal) -> String {
    let mut rounded = price.round_dp(tick_precision(tick));
    rounded.rescale(tick_precision(tick));
    rounded.to_string()
}
