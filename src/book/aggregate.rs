//! Tick-size re-bucketing of an already-built book.
//!
//! Bids round down and asks round up to the target tick, so a bucket never
//! advertises a better price than its contents. Aggregating at the native
//! tick size reproduces the unaggregated build exactly.

use rust_decimal::Decimal;
use smallvec::SmallVec;

use super::builder::{invert_price_floored, make_view};
use super::types::{tick_precision, FullOrderBook, ProcessedLevel};

/// Rounding direction for bucket assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundDir {
    /// Round down to the nearest tick multiple (bid side).
    Down,
    /// Round up to the nearest tick multiple (ask side).
    Up,
}

/// Re-bucket a built book to a coarser tick size, re-deriving the
/// complementary side at the new granularity. `market_tick` is the tick the
/// book was streamed at; it bounds the finest representable price when the
/// complementary side is floored.
pub fn aggregate(
    book: &FullOrderBook,
    target_tick: Decimal,
    market_tick: Decimal,
) -> FullOrderBook {
    let min_price = Decimal::new(1, tick_precision(market_tick));

    let bids = bucket_levels(&book.native.bids, target_tick, RoundDir::Down);
    let asks = bucket_levels(&book.native.asks, target_tick, RoundDir::Up);

    // Complementary side re-derived from the aggregated native side,
    // bucketed by inverted price rather than by raw level.
    let comp_bids = invert_buckets(&asks, target_tick, min_price, RoundDir::Down);
    let comp_asks = invert_buckets(&bids, target_tick, min_price, RoundDir::Up);

    FullOrderBook {
        native: make_view(bids, asks),
        complementary: make_view(comp_bids, comp_asks),
        tick_size: target_tick,
    }
}

/// Round a price to a tick multiple in the given direction, rescaled to the
/// tick's precision.
fn round_to_tick(price: Decimal, tick: Decimal, dir: RoundDir) -> Decimal {
    let steps = match dir {
        RoundDir::Down => (price / tick).floor(),
        RoundDir::Up => (price / tick).ceil(),
    };
    let mut bucket = steps * tick;
    bucket.rescale(tick_precision(tick));
    bucket
}

/// Fold ranked levels into tick buckets, summing size and notional value and
/// recording the contributing raw prices. Input is best-first and rounding
/// is monotone, so consecutive levels land in consecutive buckets.
fn bucket_levels(
    levels: &[ProcessedLevel],
    tick: Decimal,
    dir: RoundDir,
) -> Vec<ProcessedLevel> {
    let mut buckets: Vec<ProcessedLevel> = Vec::new();

    for level in levels {
        let price = round_to_tick(level.price, tick, dir);
        let sources: SmallVec<[Decimal; 4]> = if level.source_prices.is_empty() {
            SmallVec::from_slice(&[level.price])
        } else {
            level.source_prices.clone()
        };

        match buckets.last_mut() {
            Some(last) if last.price == price => {
                last.size += level.size;
                last.value += level.value;
                last.source_prices.extend(sources);
            }
            _ => {
                let mut bucket = ProcessedLevel::new(price, level.size);
                bucket.value = level.value;
                bucket.source_prices = sources;
                buckets.push(bucket);
            }
        }
    }

    let mut net_size = Decimal::ZERO;
    let mut net_value = Decimal::ZERO;
    for bucket in &mut buckets {
        net_size += bucket.size;
        net_value += bucket.value;
        bucket.net_size = net_size;
        bucket.net_value = net_value;
    }

    buckets
}

/// Invert aggregated native buckets into the complementary side, merging
/// buckets that collapse onto the same inverted price.
fn invert_buckets(
    levels: &[ProcessedLevel],
    tick: Decimal,
    min_price: Decimal,
    dir: RoundDir,
) -> Vec<ProcessedLevel> {
    let mut buckets: Vec<ProcessedLevel> = Vec::new();

    for level in levels {
        let price = round_to_tick(
            invert_price_floored(level.price, tick, min_price),
            tick,
            dir,
        )
        .max(min_price);

        let sources: SmallVec<[Decimal; 4]> = level
            .source_prices
            .iter()
            .map(|p| Decimal::ONE - p)
            .collect();

        match buckets.iter_mut().find(|b| b.price == price) {
            Some(existing) => {
                existing.size += level.size;
                existing.source_prices.extend(sources);
            }
            None => {
                let mut bucket = ProcessedLevel::new(price, level.size);
                bucket.source_prices = sources;
                buckets.push(bucket);
            }
        }
    }

    match dir {
        RoundDir::Down => buckets.sort_by(|a, b| b.price.cmp(&a.price)),
        RoundDir::Up => buckets.sort_by(|a, b| a.price.cmp(&b.price)),
    }

    // Value and cumulatives are recomputed at the inverted prices.
    let mut net_size = Decimal::ZERO;
    let mut net_value = Decimal::ZERO;
    for bucket in &mut buckets {
        bucket.value = bucket.price * bucket.size;
        net_size += bucket.size;
        net_value += bucket.value;
        bucket.net_size = net_size;
        bucket.net_value = net_value;
    }

    buckets
}
