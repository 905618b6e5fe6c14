//! Unified error types for the synchronization engine.

use thiserror::Error;

/// Unified error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Order book error.
    #[error("book error: {0}")]
    Book(#[from] BookError),

    /// Feed processing error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Price aggregation error.
    #[error("pricing error: {0}")]
    Pricing(#[from] PricingError),
}

/// Order book construction and query errors.
#[derive(Error, Debug)]
pub enum BookError {
    /// No price map has been seeded for the requested token.
    ///
    /// Querying before the first snapshot is a caller programming error,
    /// not a transient condition.
    #[error("no order book for token {token_id}")]
    UnknownToken {
        /// The token ID that has no price map.
        token_id: String,
    },
}

/// Inbound feed and event processing errors.
#[derive(Error, Debug)]
pub enum FeedError {
    /// A frame could not be parsed into any known event shape.
    #[error("unparseable frame: {0}")]
    MalformedFrame(String),

    /// The manager has already been torn down.
    #[error("manager destroyed")]
    Destroyed,
}

/// Aggregated price service errors.
#[derive(Error, Debug)]
pub enum PricingError {
    /// A source endpoint URL failed to parse.
    #[error("invalid endpoint for {venue}: {reason}")]
    InvalidEndpoint {
        /// Venue name.
        venue: String,
        /// Reason for failure.
        reason: String,
    },

    /// The service was started twice without an intervening stop.
    #[error("price service already running")]
    AlreadyRunning,
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;
