//! Wire event shapes and the typed event union.
//!
//! Frames arrive as a single JSON object or an array of objects; both are
//! accepted. Unknown event types are skipped, malformed frames are dropped
//! for that message only.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::book::types::{PriceChange, ProjectedBook, RawLevel, Side};
use crate::error::FeedError;

/// One price-level patch as carried on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct WireChange {
    /// Price as a decimal string.
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    /// Size as a decimal string; zero deletes the level.
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    /// Side: "BUY" or "SELL".
    pub side: Side,
}

impl From<&WireChange> for PriceChange {
    fn from(change: &WireChange) -> Self {
        PriceChange { price: change.price, size: change.size, side: change.side }
    }
}

/// Raw inbound event before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    /// Event type: "book", "price_change", "last_trade_price", or
    /// "tick_size_change".
    pub event_type: Option<String>,
    /// Asset ID the event applies to.
    pub asset_id: Option<String>,
    /// Bid levels (book events).
    pub bids: Option<Vec<RawLevel>>,
    /// Ask levels (book events).
    pub asks: Option<Vec<RawLevel>>,
    /// Level patches (price_change events).
    pub changes: Option<Vec<WireChange>>,
    /// Trade price (last_trade_price events).
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    /// Trade side (last_trade_price events).
    pub side: Option<Side>,
    /// New tick size (tick_size_change events).
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub new_tick_size: Option<Decimal>,
    /// Old tick size (tick_size_change events).
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub old_tick_size: Option<Decimal>,
    /// Timestamp in milliseconds.
    pub timestamp: Option<i64>,
    /// Book hash for debugging.
    pub hash: Option<String>,
}

/// Typed inbound event. Only snapshots and deltas mutate price maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Full replacement of one asset's book state.
    BookSnapshot {
        /// Asset the snapshot applies to.
        asset_id: String,
        /// Event timestamp in milliseconds.
        timestamp: i64,
        /// Bid levels.
        bids: Vec<RawLevel>,
        /// Ask levels.
        asks: Vec<RawLevel>,
        /// Feed-side book hash, kept for debugging parity.
        hash: Option<String>,
    },
    /// Incremental level patches.
    PriceDelta {
        /// Asset the patches apply to.
        asset_id: String,
        /// Event timestamp in milliseconds.
        timestamp: i64,
        /// Level patches.
        changes: Vec<PriceChange>,
    },
    /// Pass-through trade print.
    LastTradePrice {
        /// Asset that traded.
        asset_id: String,
        /// Trade price.
        price: Decimal,
        /// Aggressor side.
        side: Side,
    },
    /// Pass-through tick-size change.
    TickSizeChange {
        /// Asset whose tick changed.
        asset_id: String,
        /// New tick size.
        new_tick_size: Decimal,
        /// Previous tick size, if reported.
        old_tick_size: Option<Decimal>,
    },
    /// Internal trigger for the lower-frequency minified projection.
    MinifiedRefresh {
        /// Asset to re-project.
        asset_id: String,
        /// Trigger timestamp in milliseconds.
        timestamp: i64,
    },
}

/// Event kind used for per-asset grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Book snapshot.
    Snapshot,
    /// Price delta.
    Delta,
    /// Last trade price.
    LastTrade,
    /// Tick size change.
    TickChange,
    /// Minified projection trigger.
    MinifiedRefresh,
}

impl Event {
    /// Asset this event belongs to.
    pub fn asset_id(&self) -> &str {
        match self {
            Event::BookSnapshot { asset_id, .. }
            | Event::PriceDelta { asset_id, .. }
            | Event::LastTradePrice { asset_id, .. }
            | Event::TickSizeChange { asset_id, .. }
            | Event::MinifiedRefresh { asset_id, .. } => asset_id,
        }
    }

    /// Grouping kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::BookSnapshot { .. } => EventKind::Snapshot,
            Event::PriceDelta { .. } => EventKind::Delta,
            Event::LastTradePrice { .. } => EventKind::LastTrade,
            Event::TickSizeChange { .. } => EventKind::TickChange,
            Event::MinifiedRefresh { .. } => EventKind::MinifiedRefresh,
        }
    }
}

/// Result event delivered to the manager's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum BookEvent {
    /// Fresh full projection after snapshot/delta work.
    Book {
        /// Asset that changed.
        asset_id: String,
        /// The projection.
        book: ProjectedBook,
    },
    /// Size-limited projection from the minified path.
    MinifiedBook {
        /// Asset that was re-projected.
        asset_id: String,
        /// The truncated projection.
        book: ProjectedBook,
    },
    /// Forwarded trade print.
    LastTradePrice {
        /// Asset that traded.
        asset_id: String,
        /// Trade price.
        price: Decimal,
        /// Aggressor side.
        side: Side,
    },
    /// Forwarded tick-size change.
    TickSizeChange {
        /// Asset whose tick changed.
        asset_id: String,
        /// New tick size.
        tick_size: Decimal,
    },
}

/// Subscription message sent on connection open.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    /// Message type.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Asset IDs to subscribe to.
    pub assets_ids: Vec<String>,
}

impl SubscribeMessage {
    /// Market-channel subscription for the given assets.
    pub fn market(assets_ids: Vec<String>) -> Self {
        Self { msg_type: "MARKET".to_string(), assets_ids }
    }
}

/// Parse one frame into zero or more typed events.
///
/// A frame may be a single object or an array; events of unknown type are
/// skipped with a debug log.
pub fn parse_frame(text: &str) -> Result<Vec<Event>, FeedError> {
    let wire_events: Vec<WireEvent> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text).map_err(|e| FeedError::MalformedFrame(e.to_string()))?
    } else {
        vec![serde_json::from_str(text).map_err(|e| FeedError::MalformedFrame(e.to_string()))?]
    };

    Ok(wire_events.into_iter().filter_map(classify).collect())
}

fn classify(wire: WireEvent) -> Option<Event> {
    let event_type = wire.event_type.as_deref()?;
    let asset_id = wire.asset_id.clone()?;

    match event_type {
        "book" => Some(Event::BookSnapshot {
            asset_id,
            timestamp: wire.timestamp.unwrap_or(0),
            bids: wire.bids.unwrap_or_default(),
            asks: wire.asks.unwrap_or_default(),
            hash: wire.hash,
        }),
        "price_change" => Some(Event::PriceDelta {
            asset_id,
            timestamp: wire.timestamp.unwrap_or(0),
            changes: wire.changes.unwrap_or_default().iter().map(PriceChange::from).collect(),
        }),
        "last_trade_price" => Some(Event::LastTradePrice {
            asset_id,
            price: wire.price?,
            side: wire.side.unwrap_or_default(),
        }),
        "tick_size_change" => Some(Event::TickSizeChange {
            asset_id,
            new_tick_size: wire.new_tick_size?,
            old_tick_size: wire.old_tick_size,
        }),
        other => {
            debug!(event_type = other, "Skipping unknown event type");
            None
        }
    }
}
