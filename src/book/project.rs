//! Display projection of a built book.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::types::{
    format_price, BookView, FullOrderBook, ProcessedLevel, ProjectedBook, ProjectedRow,
    ProjectedSide, ProjectedView,
};

/// Minimum rows a side keeps in minified mode.
const MIN_ROWS: usize = 5;
/// Target combined row count for a minified two-sided view.
const MAX_COMBINED_ROWS: usize = 10;

/// Projection options.
#[derive(Debug, Clone, Copy)]
pub struct ProjectOptions {
    /// Tick size used for best-price formatting.
    pub tick_size: Decimal,
    /// Truncate each side toward a bounded combined view.
    pub minified: bool,
    /// Timestamp (milliseconds) stamped onto the projection.
    pub ts: i64,
}

/// Convert an internal book into a UI-shaped projection.
pub fn project(book: &FullOrderBook, opts: &ProjectOptions) -> ProjectedBook {
    ProjectedBook {
        native: project_view(&book.native, opts),
        complementary: project_view(&book.complementary, opts),
        tick_size: opts.tick_size,
        ts: opts.ts,
    }
}

fn project_view(view: &BookView, opts: &ProjectOptions) -> ProjectedView {
    let (bid_rows, ask_rows) = if opts.minified {
        minified_budget(view.bids.len(), view.asks.len())
    } else {
        (view.bids.len(), view.asks.len())
    };

    ProjectedView {
        bids: project_side(&view.bids, bid_rows),
        asks: project_side(&view.asks, ask_rows),
        best_buy: view.best_ask.map(|p| format_price(p, opts.tick_size)),
        best_sell: view.best_bid.map(|p| format_price(p, opts.tick_size)),
    }
}

/// Row budget per side in minified mode: each side keeps at least
/// [`MIN_ROWS`], expanded up to [`MAX_COMBINED_ROWS`] minus the opposite
/// side's row count, so the combined view stays near ten rows without
/// starving either side.
fn minified_budget(bids: usize, asks: usize) -> (usize, usize) {
    let bid_rows = bids.min(MIN_ROWS.max(MAX_COMBINED_ROWS.saturating_sub(asks)));
    let ask_rows = asks.min(MIN_ROWS.max(MAX_COMBINED_ROWS.saturating_sub(bids)));
    (bid_rows, ask_rows)
}

fn project_side(levels: &[ProcessedLevel], rows: usize) -> ProjectedSide {
    let total_size = levels
        .last()
        .map(|l| l.net_size.to_f64().unwrap_or(0.0))
        .unwrap_or(0.0);

    ProjectedSide {
        rows: levels
            .iter()
            .take(rows)
            .map(|l| ProjectedRow {
                price: l.price.to_f64().unwrap_or(0.0),
                size: l.size.to_f64().unwrap_or(0.0),
                total: l.net_size.to_f64().unwrap_or(0.0),
            })
            .collect(),
        has_liquidity: !levels.is_empty(),
        total_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::builder::build;
    use crate::book::delta;
    use crate::book::types::RawLevel;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn book_with_depth(bid_levels: usize, ask_levels: usize) -> FullOrderBook {
        let bids: Vec<RawLevel> = (0..bid_levels)
            .map(|i| RawLevel::new(Decimal::new(50 - i as i64, 2), dec!(10)))
            .collect();
        let asks: Vec<RawLevel> = (0..ask_levels)
            .map(|i| RawLevel::new(Decimal::new(55 + i as i64, 2), dec!(10)))
            .collect();
        let (map, _) = delta::snapshot(&bids, &asks);
        build(&map, dec!(0.01))
    }

    fn opts(minified: bool) -> ProjectOptions {
        ProjectOptions { tick_size: dec!(0.01), minified, ts: 1_700_000_000_000 }
    }

    #[test]
    fn full_projection_keeps_every_row() {
        let book = book_with_depth(8, 3);
        let projected = project(&book, &opts(false));

        assert_eq!(projected.native.bids.rows.len(), 8);
        assert_eq!(projected.native.asks.rows.len(), 3);
        assert_eq!(projected.ts, 1_700_000_000_000);
    }

    #[test]
    fn projection_formats_best_prices_at_tick_precision() {
        let book = book_with_depth(1, 1);
        let projected = project(&book, &opts(false));

        assert_eq!(projected.native.best_sell.as_deref(), Some("0.50"));
        assert_eq!(projected.native.best_buy.as_deref(), Some("0.55"));
        // Complementary best buy is 1 - native best sell.
        assert_eq!(projected.complementary.best_buy.as_deref(), Some("0.50"));
        assert_eq!(projected.complementary.best_sell.as_deref(), Some("0.45"));
    }

    #[test]
    fn rows_carry_running_totals() {
        let book = book_with_depth(3, 0);
        let projected = project(&book, &opts(false));

        let rows = &projected.native.bids.rows;
        assert_eq!(rows[0].total, 10.0);
        assert_eq!(rows[1].total, 20.0);
        assert_eq!(rows[2].total, 30.0);
        assert_eq!(projected.native.bids.total_size, 30.0);
        assert!(projected.native.bids.has_liquidity);
        assert!(!projected.native.asks.has_liquidity);
    }

    #[test]
    fn minified_budget_balances_both_sides() {
        // Deep on both sides: five rows each.
        assert_eq!(minified_budget(20, 20), (5, 5));
        // Shallow bid side frees room for asks.
        assert_eq!(minified_budget(2, 20), (2, 8));
        // Neither side is starved below its own depth.
        assert_eq!(minified_budget(3, 4), (3, 4));
        // A side never drops below five rows when it has them.
        assert_eq!(minified_budget(7, 6), (5, 5));
    }

    #[test]
    fn minified_projection_truncates_deep_books() {
        let book = book_with_depth(20, 20);
        let projected = project(&book, &opts(true));

        assert_eq!(projected.native.bids.rows.len(), 5);
        assert_eq!(projected.native.asks.rows.len(), 5);
        // Totals still reflect the untruncated depth.
        assert_eq!(projected.native.bids.total_size, 200.0);
    }
}
