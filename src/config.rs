//! Engine configuration loaded from environment variables.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Market Feed ===
    /// CLOB market-data WebSocket base URL.
    #[serde(default = "default_market_ws_url")]
    pub market_ws_url: String,

    /// Default tick size assumed before any precision is observed.
    #[serde(default = "default_tick_size")]
    pub default_tick_size: Decimal,

    /// User-preferred display tick size. When coarser than the detected
    /// market tick the book is re-bucketed before projection.
    #[serde(default)]
    pub preferred_tick_size: Option<Decimal>,

    // === Transport ===
    /// Heartbeat ping interval in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_s: u64,

    /// Initial reconnect backoff delay in milliseconds.
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_ms: u64,

    /// Maximum reconnect backoff delay in milliseconds.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,

    /// Maximum reconnect attempts before giving up (0 = unlimited).
    #[serde(default)]
    pub reconnect_max_attempts: u32,

    /// Transport-level keepalive interval in seconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_s: u64,

    /// Minified projection refresh period in seconds.
    #[serde(default = "default_minified_refresh")]
    pub minified_refresh_s: u64,

    // === Price Aggregation ===
    /// Minimum number of active convertible sources for a valid aggregate.
    #[serde(default = "default_quorum")]
    pub price_quorum: usize,

    /// Minimum median movement (USD) that triggers an update.
    #[serde(default = "default_epsilon")]
    pub price_epsilon: Decimal,

    /// Seconds after which a source price is considered stale.
    #[serde(default = "default_staleness")]
    pub price_staleness_s: u64,

    // === Logging ===
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_market_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com".to_string()
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_reconnect_base() -> u64 {
    1000
}

fn default_reconnect_max() -> u64 {
    30_000
}

fn default_keepalive_interval() -> u64 {
    10
}

fn default_minified_refresh() -> u64 {
    2
}

fn default_quorum() -> usize {
    3
}

fn default_epsilon() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_staleness() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market_ws_url: default_market_ws_url(),
            default_tick_size: default_tick_size(),
            preferred_tick_size: None,
            heartbeat_interval_s: default_heartbeat_interval(),
            reconnect_base_ms: default_reconnect_base(),
            reconnect_max_ms: default_reconnect_max(),
            reconnect_max_attempts: 0,
            keepalive_interval_s: default_keepalive_interval(),
            minified_refresh_s: default_minified_refresh(),
            price_quorum: default_quorum(),
            price_epsilon: default_epsilon(),
            price_staleness_s: default_staleness(),
            rust_log: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_tick_size <= Decimal::ZERO || self.default_tick_size >= Decimal::ONE {
            return Err("DEFAULT_TICK_SIZE must be in (0, 1)".to_string());
        }

        if let Some(tick) = self.preferred_tick_size {
            if tick <= Decimal::ZERO || tick >= Decimal::ONE {
                return Err("PREFERRED_TICK_SIZE must be in (0, 1)".to_string());
            }
        }

        if self.heartbeat_interval_s == 0 {
            return Err("HEARTBEAT_INTERVAL_S must be positive".to_string());
        }

        if self.reconnect_base_ms == 0 || self.reconnect_max_ms < self.reconnect_base_ms {
            return Err("reconnect delays must satisfy 0 < base <= max".to_string());
        }

        if self.price_quorum == 0 {
            return Err("PRICE_QUORUM must be positive".to_string());
        }

        Ok(())
    }
}
