//! Order book state, construction, and projection.
//!
//! This module handles:
//! - Price maps and book data structures
//! - Pure snapshot/delta application
//! - Depth ranking with complementary-side inversion
//! - Tick-size re-bucketing and display projection

pub mod aggregate;
pub mod builder;
pub mod delta;
pub mod depth;
pub mod project;
pub mod types;

pub use aggregate::aggregate;
pub use builder::{build, invert_price};
pub use depth::DepthBook;
pub use project::{project, ProjectOptions};
pub use types::{
    format_price, tick_for_precision, tick_precision, BookView, FullOrderBook, PriceChange,
    PriceMap, ProcessedLevel, ProjectedBook, RawLevel, Side,
};
