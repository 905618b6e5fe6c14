//! Inbound event buffering and batch application.
//!
//! The queue owns the ordering rules: snapshots within a batch apply
//! unconditionally (their max timestamp becomes the new baseline), deltas
//! apply only when strictly newer than the baseline, and everything else
//! passes through annotated per asset.

use std::collections::{HashMap, VecDeque};

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use crate::book::types::{tick_for_precision, PriceMap, ProjectedBook, RawLevel};
use crate::book::delta;
use crate::feed::events::{BookEvent, Event};
use crate::metrics;

/// Which projection path a rebuild serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Full-depth projection after snapshot/delta work.
    Full,
    /// Lower-frequency, size-limited projection.
    Minified,
}

/// Per-asset synchronization state owned by a manager.
#[derive(Debug, Clone)]
pub struct AssetState {
    /// Current price map; replaced on snapshot, patched on delta.
    pub map: PriceMap,
    /// Timestamp of the last applied mutation; deltas at or below this are
    /// discarded.
    pub last_applied_ts: i64,
    /// Finest tick size observed for this asset. Upgrades only; a session
    /// never downgrades a detected tick.
    pub detected_tick: Decimal,
    /// Feed-side book hash from the most recent snapshot.
    pub last_hash: Option<String>,
}

impl AssetState {
    /// Fresh state at the given default tick.
    pub fn new(default_tick: Decimal) -> Self {
        Self {
            map: PriceMap::default(),
            last_applied_ts: i64::MIN,
            detected_tick: default_tick,
            last_hash: None,
        }
    }

    /// Record a precision hint observed in a snapshot. Finer precision
    /// upgrades the detected tick; coarser hints are ignored.
    pub fn note_precision_hint(&mut self, precision: u32) {
        let hinted = tick_for_precision(precision);
        if hinted < self.detected_tick && !hinted.is_zero() {
            debug!(from = %self.detected_tick, to = %hinted, "Upgrading detected tick size");
            self.detected_tick = hinted;
        }
    }
}

/// FIFO buffer of inbound events with batch processing.
#[derive(Debug, Default)]
pub struct MessageQueue {
    events: VecDeque<Event>,
}

impl MessageQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one event.
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drain every buffered event in arrival order.
    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Drain only one asset's events, leaving the rest buffered.
    pub fn drain_for_asset(&mut self, asset_id: &str) -> Vec<Event> {
        let mut kept = VecDeque::with_capacity(self.events.len());
        let mut drained = Vec::new();

        for event in self.events.drain(..) {
            if event.asset_id() == asset_id {
                drained.push(event);
            } else {
                kept.push_back(event);
            }
        }

        self.events = kept;
        drained
    }

    /// Drain the queue, group events per asset and kind, and drive the
    /// synchronization rules against `states`.
    ///
    /// `project` is invoked once per asset whose map changed (full mode) and
    /// once per minified-refresh trigger; `emit` receives every result
    /// event. Neither callback is invoked while a state lock is held.
    pub fn process<P, E>(
        &mut self,
        states: &DashMap<String, AssetState>,
        default_tick: Decimal,
        mut project: P,
        mut emit: E,
    ) where
        P: FnMut(&str, &AssetState, ProjectionMode) -> Option<ProjectedBook>,
        E: FnMut(BookEvent),
    {
        let mut asset_order: Vec<String> = Vec::new();
        let mut by_asset: HashMap<String, Vec<Event>> = HashMap::new();

        for event in self.events.drain(..) {
            let asset_id = event.asset_id().to_string();
            if !by_asset.contains_key(&asset_id) {
                asset_order.push(asset_id.clone());
            }
            by_asset.entry(asset_id).or_default().push(event);
        }

        for asset_id in asset_order {
            let events = match by_asset.remove(&asset_id) {
                Some(events) => events,
                None => continue,
            };
            process_asset(&asset_id, events, states, default_tick, &mut project, &mut emit);
        }
    }
}

fn process_asset<P, E>(
    asset_id: &str,
    events: Vec<Event>,
    states: &DashMap<String, AssetState>,
    default_tick: Decimal,
    project: &mut P,
    emit: &mut E,
) where
    P: FnMut(&str, &AssetState, ProjectionMode) -> Option<ProjectedBook>,
    E: FnMut(BookEvent),
{
    let mut snapshots: Vec<(i64, Vec<RawLevel>, Vec<RawLevel>, Option<String>)> = Vec::new();
    let mut deltas: Vec<(i64, Vec<crate::book::types::PriceChange>)> = Vec::new();
    let mut pass_through: Vec<Event> = Vec::new();
    let mut wants_minified = false;

    for event in events {
        match event {
            Event::BookSnapshot { timestamp, bids, asks, hash, .. } => {
                snapshots.push((timestamp, bids, asks, hash));
            }
            Event::PriceDelta { timestamp, changes, .. } => {
                deltas.push((timestamp, changes));
            }
            Event::MinifiedRefresh { .. } => wants_minified = true,
            other => pass_through.push(other),
        }
    }

    let mut changed = false;

    // All snapshots apply first; their max timestamp becomes the baseline
    // the batch's deltas are filtered against.
    if !snapshots.is_empty() {
        let mut entry = states
            .entry(asset_id.to_string())
            .or_insert_with(|| AssetState::new(default_tick));

        let mut max_ts = i64::MIN;
        for (timestamp, bids, asks, hash) in snapshots {
            let precision = bids
                .iter()
                .chain(asks.iter())
                .map(|l| l.price.normalize().scale())
                .max()
                .unwrap_or(0);
            entry.note_precision_hint(precision);

            let (map, _) = delta::snapshot(&bids, &asks);
            entry.map = map;
            entry.last_hash = hash;
            max_ts = max_ts.max(timestamp);
        }
        entry.last_applied_ts = max_ts;
        changed = true;
    }

    if !deltas.is_empty() {
        match states.get_mut(asset_id) {
            Some(mut entry) => {
                for (timestamp, changes) in deltas {
                    if timestamp > entry.last_applied_ts {
                        let (map, _) = delta::apply_deltas(&entry.map, &changes);
                        entry.map = map;
                        entry.last_applied_ts = timestamp;
                        changed = true;
                    } else {
                        debug!(
                            asset_id,
                            timestamp,
                            baseline = entry.last_applied_ts,
                            "Discarding stale delta"
                        );
                        metrics::inc_stale_deltas_dropped();
                    }
                }
            }
            None => {
                debug!(asset_id, "Dropping delta for unseeded asset");
            }
        }
    }

    if changed {
        if let Some(state) = states.get(asset_id).map(|entry| entry.clone()) {
            if let Some(book) = project(asset_id, &state, ProjectionMode::Full) {
                emit(BookEvent::Book { asset_id: asset_id.to_string(), book });
            }
        }
    }

    for event in pass_through {
        match event {
            Event::LastTradePrice { asset_id, price, side } => {
                emit(BookEvent::LastTradePrice { asset_id, price, side });
            }
            Event::TickSizeChange { asset_id, new_tick_size, .. } => {
                emit(BookEvent::TickSizeChange { asset_id, tick_size: new_tick_size });
            }
            _ => {}
        }
    }

    if wants_minified {
        if let Some(state) = states.get(asset_id).map(|entry| entry.clone()) {
            if let Some(book) = project(asset_id, &state, ProjectionMode::Minified) {
                emit(BookEvent::MinifiedBook { asset_id: asset_id.to_string(), book });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::types::{PriceChange, Side};
    use crate::book::{builder, project as projector, ProjectOptions};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn snapshot_event(asset: &str, ts: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Event {
        Event::BookSnapshot {
            asset_id: asset.to_string(),
            timestamp: ts,
            bids: bids
                .iter()
                .map(|(p, s)| RawLevel::new(p.parse().unwrap(), s.parse().unwrap()))
                .collect(),
            asks: asks
                .iter()
                .map(|(p, s)| RawLevel::new(p.parse().unwrap(), s.parse().unwrap()))
                .collect(),
            hash: None,
        }
    }

    fn delta_event(asset: &str, ts: i64, price: &str, size: &str, side: Side) -> Event {
        Event::PriceDelta {
            asset_id: asset.to_string(),
            timestamp: ts,
            changes: vec![PriceChange {
                price: price.parse().unwrap(),
                size: size.parse().unwrap(),
                side,
            }],
        }
    }

    fn run(queue: &mut MessageQueue, states: &DashMap<String, AssetState>) -> Vec<BookEvent> {
        let mut emitted = Vec::new();
        queue.process(
            states,
            dec!(0.01),
            |_, state, mode| {
                let book = builder::build(&state.map, state.detected_tick);
                Some(projector::project(
                    &book,
                    &ProjectOptions {
                        tick_size: state.detected_tick,
                        minified: mode == ProjectionMode::Minified,
                        ts: state.last_applied_ts,
                    },
                ))
            },
            |event| emitted.push(event),
        );
        emitted
    }

    #[test]
    fn snapshot_seeds_state_and_projects() {
        let states = DashMap::new();
        let mut queue = MessageQueue::new();
        queue.push(snapshot_event("a", 10, &[("0.60", "100")], &[("0.65", "50")]));

        let emitted = run(&mut queue, &states);

        assert_eq!(emitted.len(), 1);
        assert!(matches!(&emitted[0], BookEvent::Book { asset_id, .. } if asset_id == "a"));
        let state = states.get("a").unwrap();
        assert_eq!(state.last_applied_ts, 10);
        assert_eq!(state.map.bids.get(&dec!(0.60)), Some(&dec!(100)));
    }

    #[test]
    fn stale_delta_leaves_map_unchanged() {
        let states = DashMap::new();
        let mut queue = MessageQueue::new();
        queue.push(snapshot_event("a", 10, &[("0.60", "100")], &[]));
        run(&mut queue, &states);

        // Timestamp equal to the baseline is stale too.
        queue.push(delta_event("a", 10, "0.60", "0", Side::Buy));
        let emitted = run(&mut queue, &states);

        assert!(emitted.is_empty());
        assert_eq!(states.get("a").unwrap().map.bids.get(&dec!(0.60)), Some(&dec!(100)));
    }

    #[test]
    fn fresh_delta_applies_and_advances_baseline() {
        let states = DashMap::new();
        let mut queue = MessageQueue::new();
        queue.push(snapshot_event("a", 10, &[("0.60", "100")], &[]));
        run(&mut queue, &states);

        queue.push(delta_event("a", 11, "0.60", "0", Side::Buy));
        let emitted = run(&mut queue, &states);

        assert_eq!(emitted.len(), 1);
        let state = states.get("a").unwrap();
        assert!(state.map.bids.is_empty());
        assert_eq!(state.last_applied_ts, 11);
    }

    #[test]
    fn batch_applies_all_snapshots_then_filters_deltas() {
        let states = DashMap::new();
        let mut queue = MessageQueue::new();
        // Delta arrives between two snapshots but is older than the second
        // snapshot; the literal rule filters it against the max timestamp.
        queue.push(snapshot_event("a", 5, &[("0.50", "10")], &[]));
        queue.push(delta_event("a", 8, "0.50", "20", Side::Buy));
        queue.push(snapshot_event("a", 9, &[("0.55", "10")], &[]));

        run(&mut queue, &states);

        let state = states.get("a").unwrap();
        assert_eq!(state.last_applied_ts, 9);
        assert_eq!(state.map.bids.get(&dec!(0.55)), Some(&dec!(10)));
        assert!(!state.map.bids.contains_key(&dec!(0.50)));
    }

    #[test]
    fn tick_size_upgrades_but_never_downgrades() {
        let states = DashMap::new();
        let mut queue = MessageQueue::new();
        queue.push(snapshot_event("a", 1, &[("0.605", "10")], &[]));
        run(&mut queue, &states);
        assert_eq!(states.get("a").unwrap().detected_tick, dec!(0.001));

        // A later coarser snapshot does not downgrade the detected tick.
        queue.push(snapshot_event("a", 2, &[("0.60", "10")], &[]));
        run(&mut queue, &states);
        assert_eq!(states.get("a").unwrap().detected_tick, dec!(0.001));
    }

    #[test]
    fn deltas_for_unseeded_assets_are_dropped() {
        let states: DashMap<String, AssetState> = DashMap::new();
        let mut queue = MessageQueue::new();
        queue.push(delta_event("ghost", 5, "0.50", "10", Side::Buy));

        let emitted = run(&mut queue, &states);

        assert!(emitted.is_empty());
        assert!(!states.contains_key("ghost"));
    }

    #[test]
    fn pass_through_events_are_forwarded_per_asset() {
        let states = DashMap::new();
        let mut queue = MessageQueue::new();
        queue.push(Event::LastTradePrice {
            asset_id: "a".to_string(),
            price: dec!(0.61),
            side: Side::Sell,
        });
        queue.push(Event::TickSizeChange {
            asset_id: "a".to_string(),
            new_tick_size: dec!(0.001),
            old_tick_size: Some(dec!(0.01)),
        });

        let emitted = run(&mut queue, &states);

        assert_eq!(emitted.len(), 2);
        assert!(matches!(&emitted[0], BookEvent::LastTradePrice { price, .. } if *price == dec!(0.61)));
        assert!(
            matches!(&emitted[1], BookEvent::TickSizeChange { tick_size, .. } if *tick_size == dec!(0.001))
        );
    }

    #[test]
    fn minified_refresh_uses_its_own_path() {
        let states = DashMap::new();
        let mut queue = MessageQueue::new();
        queue.push(snapshot_event("a", 1, &[("0.60", "100")], &[]));
        run(&mut queue, &states);

        queue.push(Event::MinifiedRefresh { asset_id: "a".to_string(), timestamp: 2 });
        let emitted = run(&mut queue, &states);

        assert_eq!(emitted.len(), 1);
        assert!(matches!(&emitted[0], BookEvent::MinifiedBook { .. }));
    }

    #[test]
    fn drain_for_asset_keeps_other_assets_buffered() {
        let mut queue = MessageQueue::new();
        queue.push(snapshot_event("a", 1, &[], &[]));
        queue.push(snapshot_event("b", 2, &[], &[]));
        queue.push(snapshot_event("a", 3, &[], &[]));

        let drained = queue.drain_for_asset("a");
        assert_eq!(drained.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain()[0].asset_id(), "b");
    }
}
