//! Market-data feed: transport, wire events, queueing, and the manager.
//!
//! This module handles:
//! - Resilient WebSocket connections with heartbeat and backoff
//! - Frame parsing into typed events
//! - Ordered snapshot/delta application through the message queue
//! - Per-market orchestration via [`OrderBookManager`]

pub mod connection;
pub mod events;
pub mod manager;
pub mod queue;

pub use connection::{ConnectionEvent, ConnectionState, WsConfig, WsConnection};
pub use events::{parse_frame, BookEvent, Event, EventKind, SubscribeMessage};
pub use manager::{MarketInfo, OrderBookManager};
pub use queue::{AssetState, MessageQueue, ProjectionMode};
