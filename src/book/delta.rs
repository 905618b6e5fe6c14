//! Pure snapshot and delta application.
//!
//! No ordering or timestamp logic lives here; staleness filtering is the
//! queue's responsibility. Both functions return a fresh [`PriceMap`] and
//! the set of touched prices, never mutating the caller's map.

use rust_decimal::Decimal;

use super::types::{PriceChange, PriceMap, RawLevel, Side};

/// Build a brand-new price map from a full snapshot, discarding any prior
/// state. Every snapshot level counts as touched. Zero-size levels are
/// dropped on entry.
pub fn snapshot(bids: &[RawLevel], asks: &[RawLevel]) -> (PriceMap, Vec<Decimal>) {
    let mut map = PriceMap::default();
    let mut touched = Vec::with_capacity(bids.len() + asks.len());

    for level in bids {
        touched.push(level.price);
        if level.size > Decimal::ZERO {
            map.bids.insert(level.price, level.size);
        }
    }

    for level in asks {
        touched.push(level.price);
        if level.size > Decimal::ZERO {
            map.asks.insert(level.price, level.size);
        }
    }

    (map, touched)
}

/// Clone the current map and patch it with a set of price-level changes.
///
/// A reported size of exactly zero deletes the level (buy -> bid side,
/// otherwise ask side); any other size sets or overwrites it.
pub fn apply_deltas(current: &PriceMap, changes: &[PriceChange]) -> (PriceMap, Vec<Decimal>) {
    let mut map = current.clone();
    let mut touched = Vec::with_capacity(changes.len());

    for change in changes {
        touched.push(change.price);
        let side = map.side_mut(change.side);
        if change.size.is_zero() {
            side.remove(&change.price);
        } else {
            side.insert(change.price, change.size);
        }
    }

    (map, touched)
}
