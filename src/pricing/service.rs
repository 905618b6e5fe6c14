//! Multi-exchange aggregated price service.
//!
//! Runs one connection per source, caches each source's latest mid price,
//! and recomputes a quorum-gated median on every update. USDT-quoted
//! sources convert through the latest USDT/USD rate and are excluded while
//! no rate has been observed. Updates are emitted only when the median
//! moves by more than the configured epsilon.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::book::DepthBook;
use crate::config::Config;
use crate::error::PricingError;
use crate::feed::connection::{ConnectionEvent, WsConfig, WsConnection};
use crate::metrics;
use crate::pricing::sources::{default_sources, ExchangeSource, QuoteKind};

/// One aggregated price update.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceData {
    /// Median USD price across active convertible sources.
    pub price: Decimal,
    /// Emission timestamp in milliseconds.
    pub timestamp: i64,
    /// Number of sources that contributed to this median.
    pub active_sources: usize,
    /// USDT/USD rate in effect, when one has been observed.
    pub usdt_rate: Option<Decimal>,
}

/// A cached per-source observation.
#[derive(Debug, Clone, Copy)]
struct SourcePrice {
    /// Mid price in the source's quote currency.
    price: Decimal,
    /// When it was observed.
    at: Instant,
}

/// Aggregates a reference price from several exchange feeds.
pub struct AggregatedPriceService {
    config: Config,
    sources: Vec<ExchangeSource>,
    prices: Arc<DashMap<String, SourcePrice>>,
    fx_rate: Arc<RwLock<Option<SourcePrice>>>,
    latest: Arc<RwLock<Option<PriceData>>>,
    connections: Vec<WsConnection>,
    tasks: Vec<JoinHandle<()>>,
    running: AtomicBool,
}

impl AggregatedPriceService {
    /// Create a service over the built-in source set.
    pub fn new(config: Config) -> Self {
        Self::with_sources(config, default_sources().to_vec())
    }

    /// Create a service over a custom source set.
    pub fn with_sources(config: Config, sources: Vec<ExchangeSource>) -> Self {
        Self {
            config,
            sources,
            prices: Arc::new(DashMap::new()),
            fx_rate: Arc::new(RwLock::new(None)),
            latest: Arc::new(RwLock::new(None)),
            connections: Vec::new(),
            tasks: Vec::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Connect every source and start aggregating. Returns the update
    /// stream; each item is a median that moved by more than epsilon.
    pub fn start(&mut self) -> Result<UnboundedReceiver<PriceData>, PricingError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PricingError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        info!(sources = self.sources.len(), "Aggregated price service starting");

        for source in &self.sources {
            let (connection, events) =
                WsConnection::new(WsConfig::from_config(&self.config, source.endpoint.clone()));
            connection.connect();

            let task = tokio::spawn(source_loop(
                source.clone(),
                connection.clone(),
                events,
                SharedState {
                    sources: self.sources.clone(),
                    prices: Arc::clone(&self.prices),
                    fx_rate: Arc::clone(&self.fx_rate),
                    latest: Arc::clone(&self.latest),
                    tx: tx.clone(),
                    quorum: self.config.price_quorum,
                    epsilon: self.config.price_epsilon,
                    staleness: Duration::from_secs(self.config.price_staleness_s),
                },
            ));

            self.connections.push(connection);
            self.tasks.push(task);
        }

        Ok(rx)
    }

    /// Tear down every connection and task. The service can be started
    /// again afterwards; cached prices are discarded.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Aggregated price service stopping");
        for connection in self.connections.drain(..) {
            connection.destroy();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.prices.clear();
        if let Ok(mut fx) = self.fx_rate.write() {
            *fx = None;
        }
    }

    /// Latest emitted aggregate, if any.
    pub fn price_data(&self) -> Option<PriceData> {
        self.latest.read().ok().and_then(|guard| guard.clone())
    }

    /// Current per-source USD prices, converted and staleness-filtered.
    pub fn source_prices(&self) -> Vec<(String, Decimal)> {
        let staleness = Duration::from_secs(self.config.price_staleness_s);
        let fx = fresh_fx_rate(&self.fx_rate, staleness);

        self.sources
            .iter()
            .filter_map(|source| {
                let cached = self.prices.get(&source.name)?;
                if cached.at.elapsed() > staleness {
                    return None;
                }
                match source.quote {
                    QuoteKind::DirectUsd => Some((source.name.clone(), cached.price)),
                    QuoteKind::UsdtQuoted => fx.map(|rate| (source.name.clone(), cached.price * rate)),
                    QuoteKind::FxRateOnly => None,
                }
            })
            .collect()
    }

    /// True when an aggregate has been emitted within the staleness window.
    pub fn has_valid_price(&self) -> bool {
        match self.price_data() {
            Some(data) => {
                let age_ms = now_ms().saturating_sub(data.timestamp);
                age_ms <= (self.config.price_staleness_s as i64) * 1000
            }
            None => false,
        }
    }
}

impl Drop for AggregatedPriceService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything a source task shares with its siblings.
#[derive(Clone)]
struct SharedState {
    sources: Vec<ExchangeSource>,
    prices: Arc<DashMap<String, SourcePrice>>,
    fx_rate: Arc<RwLock<Option<SourcePrice>>>,
    latest: Arc<RwLock<Option<PriceData>>>,
    tx: UnboundedSender<PriceData>,
    quorum: usize,
    epsilon: Decimal,
    staleness: Duration,
}

async fn source_loop(
    source: ExchangeSource,
    connection: WsConnection,
    mut events: UnboundedReceiver<ConnectionEvent>,
    shared: SharedState,
) {
    let mut depth = DepthBook::new();

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Open => {
                if let Some(payload) = &source.subscribe {
                    if connection.send_message(payload) {
                        debug!(source = %source.name, "Subscribed");
                    } else {
                        warn!(source = %source.name, "Subscription send failed");
                    }
                }
            }
            ConnectionEvent::Message(text) => {
                let Some(mid) = source.venue.parse_message(&text, &mut depth) else {
                    continue;
                };
                let observed = SourcePrice { price: mid, at: Instant::now() };
                match source.quote {
                    QuoteKind::FxRateOnly => {
                        if let Ok(mut fx) = shared.fx_rate.write() {
                            *fx = Some(observed);
                        }
                    }
                    _ => {
                        shared.prices.insert(source.name.clone(), observed);
                    }
                }
                recompute(&shared);
            }
            ConnectionEvent::Closed { code, reason } => {
                warn!(source = %source.name, code = ?code, reason = %reason, "Source closed");
            }
            ConnectionEvent::Error(error) => {
                warn!(source = %source.name, error = %error, "Source error");
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                debug!(source = %source.name, attempt, delay_ms = delay.as_millis(), "Source reconnecting");
            }
            ConnectionEvent::StateChange(state) => {
                debug!(source = %source.name, state = %state, "Source state change");
            }
            ConnectionEvent::ReconnectExhausted => {
                warn!(source = %source.name, "Source gave up reconnecting");
            }
        }
    }
}

/// Re-derive the aggregate from the current caches, emitting if it moved.
fn recompute(shared: &SharedState) {
    let fx = fresh_fx_rate(&shared.fx_rate, shared.staleness);
    let samples = convertible_samples(&shared.sources, &shared.prices, fx, shared.staleness);

    if samples.len() < shared.quorum {
        debug!(
            active = samples.len(),
            quorum = shared.quorum,
            "Skipping aggregation pass below quorum"
        );
        metrics::inc_price_quorum_failures();
        return;
    }

    let Some(price) = median(samples.clone()) else {
        return;
    };

    let Ok(mut latest) = shared.latest.write() else {
        return;
    };

    let moved = match latest.as_ref() {
        Some(prev) => (price - prev.price).abs() > shared.epsilon,
        None => true,
    };
    if !moved {
        return;
    }

    let data = PriceData {
        price,
        timestamp: now_ms(),
        active_sources: samples.len(),
        usdt_rate: fx,
    };
    *latest = Some(data.clone());
    metrics::inc_price_updates_emitted();
    let _ = shared.tx.send(data);
}

/// The FX rate, when observed within the staleness window.
fn fresh_fx_rate(fx_rate: &RwLock<Option<SourcePrice>>, staleness: Duration) -> Option<Decimal> {
    fx_rate
        .read()
        .ok()
        .and_then(|guard| *guard)
        .filter(|rate| rate.at.elapsed() <= staleness)
        .map(|rate| rate.price)
}

/// USD-converted samples from every active convertible source.
///
/// USDT-quoted sources are excluded while `fx` is `None`; a 1:1 rate is
/// never assumed.
fn convertible_samples(
    sources: &[ExchangeSource],
    prices: &DashMap<String, SourcePrice>,
    fx: Option<Decimal>,
    staleness: Duration,
) -> Vec<Decimal> {
    sources
        .iter()
        .filter_map(|source| {
            let cached = prices.get(&source.name)?;
            if cached.at.elapsed() > staleness {
                return None;
            }
            match source.quote {
                QuoteKind::DirectUsd => Some(cached.price),
                QuoteKind::UsdtQuoted => fx.map(|rate| cached.price * rate),
                QuoteKind::FxRateOnly => None,
            }
        })
        .collect()
}

/// Arithmetic median; an even count averages the two middle values.
fn median(mut samples: Vec<Decimal>) -> Option<Decimal> {
    if samples.is_empty() {
        return None;
    }
    samples.sort();
    let n = samples.len();
    if n % 2 == 1 {
        Some(samples[n / 2])
    } else {
        Some((samples[n / 2 - 1] + samples[n / 2]) / Decimal::TWO)
    }
}

fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
