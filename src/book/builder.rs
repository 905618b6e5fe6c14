//! Book construction: depth ranking, cumulative bookkeeping, and the
//! complementary-side inversion for binary markets.

use rust_decimal::Decimal;

use super::types::{tick_precision, BookView, FullOrderBook, PriceMap, ProcessedLevel};

/// Derive the complementary price for a native price at the given tick:
/// `clamp(1 - price, tick, 1 - tick)` rounded to the tick's precision.
pub fn invert_price(price: Decimal, tick: Decimal) -> Decimal {
    invert_price_floored(price, tick, tick)
}

/// Inversion with an explicit lower bound, used by the aggregator where the
/// floor is the finest representable source price rather than the tick.
pub fn invert_price_floored(price: Decimal, tick: Decimal, floor: Decimal) -> Decimal {
    let inverted = (Decimal::ONE - price).min(Decimal::ONE - tick);
    inverted.round_dp(tick_precision(tick)).max(floor)
}

/// Build a two-sided, depth-ranked book from a price map at the given tick
/// size. The complementary side is derived by inversion with its cumulative
/// fields recomputed, never copied.
pub fn build(map: &PriceMap, tick: Decimal) -> FullOrderBook {
    // Bids descending, asks ascending by numeric price.
    let bids = rank(map.bids.iter().rev().map(|(p, s)| (*p, *s)));
    let asks = rank(map.asks.iter().map(|(p, s)| (*p, *s)));

    // Complementary bids mirror native asks and vice versa; the clamp can
    // disturb ordering at the boundaries, so both are re-sorted.
    let mut comp_bids: Vec<(Decimal, Decimal)> = asks
        .iter()
        .map(|l| (invert_price(l.price, tick), l.size))
        .collect();
    comp_bids.sort_by(|a, b| b.0.cmp(&a.0));

    let mut comp_asks: Vec<(Decimal, Decimal)> = bids
        .iter()
        .map(|l| (invert_price(l.price, tick), l.size))
        .collect();
    comp_asks.sort_by(|a, b| a.0.cmp(&b.0));

    FullOrderBook {
        native: make_view(bids, asks),
        complementary: make_view(rank(comp_bids.into_iter()), rank(comp_asks.into_iter())),
        tick_size: tick,
    }
}

/// Walk levels from the best price outward, filling cumulative size/value.
pub(crate) fn rank(levels: impl Iterator<Item = (Decimal, Decimal)>) -> Vec<ProcessedLevel> {
    let mut net_size = Decimal::ZERO;
    let mut net_value = Decimal::ZERO;

    levels
        .map(|(price, size)| {
            let mut level = ProcessedLevel::new(price, size);
            net_size += level.size;
            net_value += level.value;
            level.net_size = net_size;
            level.net_value = net_value;
            level
        })
        .collect()
}

/// Attach best prices, spread (floored at zero), and midpoint to a pair of
/// ranked sides. Empty sides yield `None`, never an error.
pub(crate) fn make_view(bids: Vec<ProcessedLevel>, asks: Vec<ProcessedLevel>) -> BookView {
    let best_bid = bids.first().map(|l| l.price);
    let best_ask = asks.first().map(|l| l.price);

    let spread = match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => Some((ask - bid).max(Decimal::ZERO)),
        _ => None,
    };
    let midpoint = match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
        _ => None,
    };

    BookView { bids, asks, best_bid, best_ask, spread, midpoint }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::delta;
    use crate::book::types::{PriceChange, RawLevel, Side};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn sample_map() -> PriceMap {
        let (map, _) = delta::snapshot(
            &[RawLevel::new(dec!(0.60), dec!(100))],
            &[RawLevel::new(dec!(0.65), dec!(50))],
        );
        map
    }

    #[test]
    fn scenario_single_level_snapshot() {
        let book = build(&sample_map(), dec!(0.01));

        assert_eq!(book.native.best_bid, Some(dec!(0.60)));
        assert_eq!(book.native.best_ask, Some(dec!(0.65)));
        assert_eq!(book.native.spread, Some(dec!(0.05)));
        assert_eq!(book.native.midpoint, Some(dec!(0.625)));

        assert_eq!(book.complementary.best_bid, Some(dec!(0.35)));
        assert_eq!(book.complementary.best_ask, Some(dec!(0.40)));
        assert_eq!(book.complementary.midpoint, Some(dec!(0.375)));
        assert_eq!(book.complementary.spread, book.native.spread);
    }

    #[test]
    fn scenario_zero_size_delta_removes_best_bid() {
        let (patched, _) = delta::apply_deltas(
            &sample_map(),
            &[PriceChange { price: dec!(0.60), size: dec!(0), side: Side::Buy }],
        );
        let book = build(&patched, dec!(0.01));

        assert_eq!(book.native.best_bid, None);
        assert_eq!(book.native.spread, None);
        assert_eq!(book.native.best_ask, Some(dec!(0.65)));
        // No native bids means no complementary asks either.
        assert!(book.complementary.asks.is_empty());
    }

    #[test]
    fn bids_descend_and_asks_ascend() {
        let (map, _) = delta::snapshot(
            &[
                RawLevel::new(dec!(0.58), dec!(10)),
                RawLevel::new(dec!(0.60), dec!(20)),
                RawLevel::new(dec!(0.59), dec!(30)),
            ],
            &[
                RawLevel::new(dec!(0.66), dec!(10)),
                RawLevel::new(dec!(0.65), dec!(20)),
            ],
        );
        let book = build(&map, dec!(0.01));

        let bid_prices: Vec<Decimal> = book.native.bids.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![dec!(0.60), dec!(0.59), dec!(0.58)]);

        let ask_prices: Vec<Decimal> = book.native.asks.iter().map(|l| l.price).collect();
        assert_eq!(ask_prices, vec![dec!(0.65), dec!(0.66)]);

        // Complementary ordering mirrors the native opposite side.
        let comp_bid_prices: Vec<Decimal> =
            book.complementary.bids.iter().map(|l| l.price).collect();
        assert_eq!(comp_bid_prices, vec![dec!(0.35), dec!(0.34)]);
    }

    #[test]
    fn cumulative_fields_are_monotonic() {
        let (map, _) = delta::snapshot(
            &[
                RawLevel::new(dec!(0.60), dec!(100)),
                RawLevel::new(dec!(0.59), dec!(50)),
                RawLevel::new(dec!(0.58), dec!(200)),
            ],
            &[],
        );
        let book = build(&map, dec!(0.01));

        let mut prev_size = Decimal::ZERO;
        let mut prev_value = Decimal::ZERO;
        for level in &book.native.bids {
            assert!(level.net_size >= prev_size);
            assert!(level.net_value >= prev_value);
            prev_size = level.net_size;
            prev_value = level.net_value;
        }
        assert_eq!(prev_size, dec!(350));
    }

    #[test]
    fn complementary_cumulatives_are_recomputed_not_copied() {
        let (map, _) = delta::snapshot(
            &[],
            &[
                RawLevel::new(dec!(0.65), dec!(50)),
                RawLevel::new(dec!(0.70), dec!(30)),
            ],
        );
        let book = build(&map, dec!(0.01));

        // Native asks cumulate 50 then 80; complementary bids walk from the
        // best (0.35, inverted 0.65) so the same sizes appear in the same
        // order, but value uses the inverted price.
        let comp = &book.complementary.bids;
        assert_eq!(comp[0].price, dec!(0.35));
        assert_eq!(comp[0].value, dec!(0.35) * dec!(50));
        assert_eq!(comp[1].net_size, dec!(80));
        assert_eq!(comp[1].net_value, dec!(0.35) * dec!(50) + dec!(0.30) * dec!(30));
    }

    #[test]
    fn inversion_clamps_to_tick_bounds() {
        assert_eq!(invert_price(dec!(0.999), dec!(0.01)), dec!(0.01));
        assert_eq!(invert_price(dec!(0.001), dec!(0.01)), dec!(0.99));
        assert_eq!(invert_price(dec!(0.65), dec!(0.01)), dec!(0.35));
        // Floored variant may go below the tick.
        assert_eq!(invert_price_floored(dec!(0.999), dec!(0.01), dec!(0.001)), dec!(0.001));
    }

    #[test]
    fn empty_map_builds_empty_views() {
        let book = build(&PriceMap::default(), dec!(0.01));
        assert_eq!(book.native.best_bid, None);
        assert_eq!(book.native.midpoint, None);
        assert!(!book.complementary.has_liquidity());
    }
}
