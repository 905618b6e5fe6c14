//! Real-time market-state synchronization for binary CLOB prediction markets.
//!
//! This library keeps local order books for binary outcome pairs in lockstep
//! with an exchange's WebSocket feed, and maintains an aggregated external
//! reference price from several spot exchanges.
//!
//! # How it works
//!
//! One outcome of a binary market is streamed; the other is never fetched.
//! Because the two outcomes are complementary, the second book is derived
//! algebraically:
//!
//! ```text
//! UP bid at $0.60  ⇔  DOWN ask at $0.40   (1 − p, clamped to tick bounds)
//! ```
//!
//! Snapshots replace book state, deltas patch it, and anything older than
//! the last applied mutation is discarded. Books re-bucket to a coarser
//! display tick on request and project into ranked rows with cumulative
//! depth.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`book`]: Price maps, book construction, aggregation, projection
//! - [`feed`]: WebSocket transport, event parsing, queueing, the manager
//! - [`pricing`]: Multi-exchange median reference pricing
//! - [`metrics`]: Counters and latency histograms
//! - [`telemetry`]: Tracing subscriber setup

pub mod book;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod pricing;
pub mod telemetry;

pub use config::Config;
pub use error::{EngineError, Result};
