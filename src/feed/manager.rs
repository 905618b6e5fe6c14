//! Order book manager for one binary market's token pair.
//!
//! Owns the market-data connection, the message queue, and per-asset price
//! maps. The primary token is subscribed and streamed; the complementary
//! token's book is derived algebraically on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::book::types::{FullOrderBook, ProjectedBook, RawLevel, Side};
use crate::book::{aggregate, builder, project, ProjectOptions};
use crate::config::Config;
use crate::error::{BookError, FeedError};
use crate::feed::connection::{
    ConnectionEvent, WsConfig, WsConnection, KEEPALIVE_PING,
};
use crate::feed::events::{parse_frame, BookEvent, Event, SubscribeMessage};
use crate::feed::queue::{AssetState, MessageQueue, ProjectionMode};
use crate::metrics;

/// Market metadata supplied once at construction by an external lookup.
#[derive(Debug, Clone)]
pub struct MarketInfo {
    /// Market slug, for logging.
    pub slug: String,
    /// Token ID of the streamed outcome.
    pub primary_token_id: String,
    /// Token ID of the derived complementary outcome.
    pub complementary_token_id: String,
    /// Outcome label of the primary token (e.g. "Yes").
    pub primary_outcome: String,
    /// Outcome label of the complementary token (e.g. "No").
    pub complementary_outcome: String,
    /// Tick size reported by the metadata service, when known.
    pub initial_tick_size: Option<Decimal>,
}

/// Manages one market's live order book synchronization.
pub struct OrderBookManager {
    market: MarketInfo,
    config: Config,
    states: Arc<DashMap<String, AssetState>>,
    connection: Option<WsConnection>,
    tasks: Vec<JoinHandle<()>>,
    destroyed: AtomicBool,
    initialized: AtomicBool,
}

impl OrderBookManager {
    /// Create a manager for a token pair. No network activity until
    /// [`initialize`](Self::initialize).
    pub fn new(market: MarketInfo, config: Config) -> Self {
        let states = Arc::new(DashMap::new());
        if let Some(tick) = market.initial_tick_size {
            states.insert(market.primary_token_id.clone(), AssetState::new(tick));
        }

        Self {
            market,
            config,
            states,
            connection: None,
            tasks: Vec::new(),
            destroyed: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        }
    }

    /// Open the feed connection, subscribe to the primary token, and start
    /// the processing loop. Every result event is delivered to `on_event`.
    pub fn initialize<F>(&mut self, on_event: F) -> Result<(), FeedError>
    where
        F: FnMut(BookEvent) + Send + 'static,
    {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(FeedError::Destroyed);
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!(slug = %self.market.slug, "initialize() called twice; ignoring");
            return Ok(());
        }

        let url = format!("{}/ws/market", self.config.market_ws_url.trim_end_matches('/'));
        let (connection, events) = WsConnection::new(WsConfig::from_config(&self.config, url));
        connection.connect();

        info!(
            slug = %self.market.slug,
            token = %self.market.primary_token_id,
            outcome = %self.market.primary_outcome,
            "Order book manager starting"
        );

        let loop_task = tokio::spawn(processing_loop(ProcessingLoop {
            market: self.market.clone(),
            config: self.config.clone(),
            states: Arc::clone(&self.states),
            connection: connection.clone(),
            events,
            on_event: Box::new(on_event),
        }));

        self.tasks.push(loop_task);
        self.connection = Some(connection);
        Ok(())
    }

    /// Raw levels for either token of the pair. The complementary token's
    /// levels are derived by price inversion from the primary map.
    pub fn order_book_snapshot_by_token_id(
        &self,
        token_id: &str,
        side: Side,
    ) -> Result<Vec<RawLevel>, BookError> {
        let state = self
            .states
            .get(&self.market.primary_token_id)
            .ok_or_else(|| BookError::UnknownToken { token_id: token_id.to_string() })?;

        if token_id == self.market.primary_token_id {
            let levels = state.map.side(side);
            let mut out: Vec<RawLevel> = levels
                .iter()
                .map(|(&price, &size)| RawLevel::new(price, size))
                .collect();
            if side == Side::Buy {
                out.reverse(); // best bid first
            }
            return Ok(out);
        }

        if token_id == self.market.complementary_token_id {
            // Complementary bids come from native asks and vice versa.
            let tick = state.detected_tick;
            let native = state.map.side(side.opposite());
            let mut out: Vec<RawLevel> = native
                .iter()
                .map(|(&price, &size)| RawLevel::new(builder::invert_price(price, tick), size))
                .collect();
            match side {
                Side::Buy => out.sort_by(|a, b| b.price.cmp(&a.price)),
                Side::Sell => out.sort_by(|a, b| a.price.cmp(&b.price)),
            }
            return Ok(out);
        }

        Err(BookError::UnknownToken { token_id: token_id.to_string() })
    }

    /// Both tokens' built books at the currently detected tick size, or
    /// `None` before the first snapshot has been applied.
    pub fn complete_order_book_snapshot(&self) -> Option<FullOrderBook> {
        let state = self.states.get(&self.market.primary_token_id)?;
        if state.map.is_empty() {
            return None;
        }
        Some(builder::build(&state.map, state.detected_tick))
    }

    /// Tear down the connection and all timers. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(slug = %self.market.slug, "Order book manager shutting down");
        if let Some(connection) = &self.connection {
            connection.destroy();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for OrderBookManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct ProcessingLoop {
    market: MarketInfo,
    config: Config,
    states: Arc<DashMap<String, AssetState>>,
    connection: WsConnection,
    events: tokio::sync::mpsc::UnboundedReceiver<ConnectionEvent>,
    on_event: Box<dyn FnMut(BookEvent) + Send>,
}

async fn processing_loop(mut ctx: ProcessingLoop) {
    let mut queue = MessageQueue::new();
    let mut keepalive = tokio::time::interval(Duration::from_secs(ctx.config.keepalive_interval_s));
    let mut minified = tokio::time::interval(Duration::from_secs(ctx.config.minified_refresh_s));
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    minified.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = ctx.events.recv() => match event {
                None => {
                    debug!("Connection event stream ended; processing loop exiting");
                    return;
                }
                Some(ConnectionEvent::Open) => {
                    let subscribe =
                        SubscribeMessage::market(vec![ctx.market.primary_token_id.clone()]);
                    match serde_json::to_string(&subscribe) {
                        Ok(json) => {
                            if ctx.connection.send_message(&json) {
                                info!(token = %ctx.market.primary_token_id, "Subscribed to market feed");
                            } else {
                                warn!("Subscription send failed; will retry on next open");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to encode subscription"),
                    }
                }
                Some(ConnectionEvent::Message(text)) => {
                    let start = Instant::now();
                    handle_frame(&mut ctx, &mut queue, &text);
                    metrics::record_ws_message_latency(start);
                }
                Some(ConnectionEvent::Closed { code, reason }) => {
                    warn!(code = ?code, reason = %reason, "Market feed connection closed");
                }
                Some(ConnectionEvent::Error(error)) => {
                    warn!(error = %error, "Market feed connection error");
                }
                Some(ConnectionEvent::Reconnecting { attempt, delay }) => {
                    debug!(attempt, delay_ms = delay.as_millis(), "Market feed reconnecting");
                }
                Some(ConnectionEvent::StateChange(state)) => {
                    debug!(state = %state, "Market feed state change");
                }
                Some(ConnectionEvent::ReconnectExhausted) => {
                    warn!(slug = %ctx.market.slug, "Market feed gave up reconnecting");
                }
            },

            // Transport keepalive, distinct from the connection's own
            // heartbeat clock.
            _ = keepalive.tick() => {
                ctx.connection.send_message(KEEPALIVE_PING);
            }

            _ = minified.tick() => {
                queue.push(Event::MinifiedRefresh {
                    asset_id: ctx.market.primary_token_id.clone(),
                    timestamp: now_ms(),
                });
                drive_queue(&mut ctx, &mut queue);
            }
        }
    }
}

fn handle_frame(ctx: &mut ProcessingLoop, queue: &mut MessageQueue, text: &str) {
    match parse_frame(text) {
        Ok(events) => {
            for event in events {
                queue.push(event);
            }
            drive_queue(ctx, queue);
        }
        Err(e) => {
            metrics::inc_malformed_frames();
            warn!(error = %e, "Dropping malformed frame");
        }
    }
}

fn drive_queue(ctx: &mut ProcessingLoop, queue: &mut MessageQueue) {
    let preferred = ctx.config.preferred_tick_size;
    let default_tick = ctx.config.default_tick_size;
    let states = Arc::clone(&ctx.states);
    let on_event = &mut ctx.on_event;

    queue.process(
        &states,
        default_tick,
        |_asset_id, state, mode| Some(project_state(state, preferred, mode)),
        |event| (on_event)(event),
    );
}

/// Resolve the effective tick size and produce a projection: the detected
/// tick wins unless the user prefers a coarser one, in which case the book
/// is re-bucketed before projection.
fn project_state(
    state: &AssetState,
    preferred: Option<Decimal>,
    mode: ProjectionMode,
) -> ProjectedBook {
    let start = Instant::now();
    let detected = state.detected_tick;
    let book = builder::build(&state.map, detected);

    let (book, effective_tick) = match preferred {
        Some(tick) if tick > detected => (aggregate::aggregate(&book, tick, detected), tick),
        _ => (book, detected),
    };

    let projected = project(
        &book,
        &ProjectOptions {
            tick_size: effective_tick,
            minified: mode == ProjectionMode::Minified,
            ts: now_ms(),
        },
    );
    metrics::record_book_build_latency(start);
    projected
}

fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::delta;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn market() -> MarketInfo {
        MarketInfo {
            slug: "btc-updown-15m-test".to_string(),
            primary_token_id: "token-up".to_string(),
            complementary_token_id: "token-down".to_string(),
            primary_outcome: "Up".to_string(),
            complementary_outcome: "Down".to_string(),
            initial_tick_size: Some(dec!(0.01)),
        }
    }

    fn seeded_manager() -> OrderBookManager {
        let manager = OrderBookManager::new(market(), Config::default());
        let (map, _) = delta::snapshot(
            &[RawLevel::new(dec!(0.60), dec!(100)), RawLevel::new(dec!(0.59), dec!(50))],
            &[RawLevel::new(dec!(0.65), dec!(40))],
        );
        manager.states.entry("token-up".to_string()).and_modify(|state| {
            state.map = map;
            state.last_applied_ts = 1;
        });
        manager
    }

    #[test]
    fn primary_snapshot_returns_levels_best_first() {
        let manager = seeded_manager();

        let bids = manager.order_book_snapshot_by_token_id("token-up", Side::Buy).unwrap();
        assert_eq!(bids[0].price, dec!(0.60));
        assert_eq!(bids[1].price, dec!(0.59));

        let asks = manager.order_book_snapshot_by_token_id("token-up", Side::Sell).unwrap();
        assert_eq!(asks[0].price, dec!(0.65));
    }

    #[test]
    fn complementary_snapshot_is_derived_by_inversion() {
        let manager = seeded_manager();

        // Complementary bids mirror native asks: 1 - 0.65 = 0.35.
        let bids = manager.order_book_snapshot_by_token_id("token-down", Side::Buy).unwrap();
        assert_eq!(bids[0].price, dec!(0.35));
        assert_eq!(bids[0].size, dec!(40));

        // Complementary asks mirror native bids, ascending: 0.40 then 0.41.
        let asks = manager.order_book_snapshot_by_token_id("token-down", Side::Sell).unwrap();
        assert_eq!(asks[0].price, dec!(0.40));
        assert_eq!(asks[1].price, dec!(0.41));
    }

    #[test]
    fn unknown_token_fails_loudly() {
        let manager = seeded_manager();
        let result = manager.order_book_snapshot_by_token_id("token-other", Side::Buy);
        assert!(matches!(result, Err(BookError::UnknownToken { .. })));
    }

    #[test]
    fn complete_snapshot_is_none_until_seeded() {
        let manager = OrderBookManager::new(market(), Config::default());
        assert!(manager.complete_order_book_snapshot().is_none());

        let manager = seeded_manager();
        let book = manager.complete_order_book_snapshot().unwrap();
        assert_eq!(book.native.best_bid, Some(dec!(0.60)));
        assert_eq!(book.complementary.best_bid, Some(dec!(0.35)));
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_blocks_initialize() {
        let mut manager = OrderBookManager::new(market(), Config::default());
        manager.destroy();
        manager.destroy();

        let result = manager.initialize(|_| {});
        assert!(matches!(result, Err(FeedError::Destroyed)));
    }
}
