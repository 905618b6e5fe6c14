//! Aggregated reference pricing from multiple exchanges.
//!
//! This module handles:
//! - Exchange source definitions and wire parsers
//! - Quorum-gated median aggregation with USDT/USD conversion

pub mod service;
pub mod sources;

pub use service::{AggregatedPriceService, PriceData};
pub use sources::{default_sources, ExchangeSource, QuoteKind, Venue};
