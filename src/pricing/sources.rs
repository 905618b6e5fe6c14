//! Exchange price sources and their wire parsers.
//!
//! Each source is a WebSocket endpoint plus a venue-specific parser that
//! reduces one inbound message to a single mid price. Parsers are total:
//! anything unrecognized (subscription acks, heartbeats, error frames)
//! yields `None` and is skipped.

use once_cell::sync::Lazy;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use strum::Display;
use url::Url;

use crate::book::types::RawLevel;
use crate::book::DepthBook;
use crate::error::PricingError;

/// Quote currency handling for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    /// Quoted directly in USD; usable as-is.
    DirectUsd,
    /// Quoted in USDT; convertible only while an FX rate is known.
    UsdtQuoted,
    /// Supplies the USDT/USD rate itself and never contributes a sample.
    FxRateOnly,
}

/// Wire dialect a source speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Venue {
    /// Binance partial depth snapshots; maintains a [`DepthBook`].
    BinanceDepth,
    /// OKX tickers channel.
    OkxTicker,
    /// Coinbase Exchange ticker channel.
    CoinbaseTicker,
    /// Kraken v2 ticker channel.
    KrakenTicker,
}

impl Venue {
    /// Reduce one inbound text frame to a mid price.
    ///
    /// `depth` is this source's private depth state; only the Binance depth
    /// dialect touches it, the ticker dialects read bid/ask straight off the
    /// frame.
    pub fn parse_message(&self, text: &str, depth: &mut DepthBook) -> Option<Decimal> {
        match self {
            Venue::BinanceDepth => parse_binance_depth(text, depth),
            Venue::OkxTicker => parse_okx_ticker(text),
            Venue::CoinbaseTicker => parse_coinbase_ticker(text),
            Venue::KrakenTicker => parse_kraken_ticker(text),
        }
    }
}

/// One immutable exchange price source.
#[derive(Debug, Clone)]
pub struct ExchangeSource {
    /// Unique source name, used as the price-cache key.
    pub name: String,
    /// Wire dialect.
    pub venue: Venue,
    /// WebSocket endpoint URL.
    pub endpoint: String,
    /// Quote currency handling.
    pub quote: QuoteKind,
    /// Subscription payload to send on open, when the venue needs one.
    pub subscribe: Option<String>,
}

impl ExchangeSource {
    /// Build a source, validating the endpoint URL.
    pub fn new(
        name: impl Into<String>,
        venue: Venue,
        endpoint: impl Into<String>,
        quote: QuoteKind,
        subscribe: Option<String>,
    ) -> Result<Self, PricingError> {
        let name = name.into();
        let endpoint = endpoint.into();
        Url::parse(&endpoint).map_err(|e| PricingError::InvalidEndpoint {
            venue: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { name, venue, endpoint, quote, subscribe })
    }
}

static DEFAULT_SOURCES: Lazy<Vec<ExchangeSource>> = Lazy::new(|| {
    vec![
        ExchangeSource {
            name: "binance".to_string(),
            venue: Venue::BinanceDepth,
            endpoint: "wss://stream.binance.com:9443/ws/btcusdt@depth20@100ms".to_string(),
            quote: QuoteKind::UsdtQuoted,
            subscribe: None,
        },
        ExchangeSource {
            name: "okx".to_string(),
            venue: Venue::OkxTicker,
            endpoint: "wss://ws.okx.com:8443/ws/v5/public".to_string(),
            quote: QuoteKind::UsdtQuoted,
            subscribe: Some(
                r#"{"op":"subscribe","args":[{"channel":"tickers","instId":"BTC-USDT"}]}"#
                    .to_string(),
            ),
        },
        ExchangeSource {
            name: "coinbase".to_string(),
            venue: Venue::CoinbaseTicker,
            endpoint: "wss://ws-feed.exchange.coinbase.com".to_string(),
            quote: QuoteKind::DirectUsd,
            subscribe: Some(
                r#"{"type":"subscribe","product_ids":["BTC-USD"],"channels":["ticker"]}"#
                    .to_string(),
            ),
        },
        ExchangeSource {
            name: "kraken".to_string(),
            venue: Venue::KrakenTicker,
            endpoint: "wss://ws.kraken.com/v2".to_string(),
            quote: QuoteKind::DirectUsd,
            subscribe: Some(
                r#"{"method":"subscribe","params":{"channel":"ticker","symbol":["BTC/USD"]}}"#
                    .to_string(),
            ),
        },
        ExchangeSource {
            name: "kraken_usdt_usd".to_string(),
            venue: Venue::KrakenTicker,
            endpoint: "wss://ws.kraken.com/v2".to_string(),
            quote: QuoteKind::FxRateOnly,
            subscribe: Some(
                r#"{"method":"subscribe","params":{"channel":"ticker","symbol":["USDT/USD"]}}"#
                    .to_string(),
            ),
        },
    ]
});

/// The built-in source set: Binance and OKX in USDT, Coinbase and Kraken in
/// USD, plus Kraken's USDT/USD pair as the FX feed.
pub fn default_sources() -> &'static [ExchangeSource] {
    &DEFAULT_SOURCES
}

#[derive(Debug, Deserialize)]
struct BinanceDepthFrame {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

fn parse_binance_depth(text: &str, depth: &mut DepthBook) -> Option<Decimal> {
    let frame: BinanceDepthFrame = serde_json::from_str(text).ok()?;
    let bids: Vec<RawLevel> =
        frame.bids.into_iter().map(|(price, size)| RawLevel::new(price, size)).collect();
    let asks: Vec<RawLevel> =
        frame.asks.into_iter().map(|(price, size)| RawLevel::new(price, size)).collect();
    depth.apply_snapshot(&bids, &asks);
    depth.mid()
}

#[derive(Debug, Deserialize)]
struct OkxFrame {
    data: Option<Vec<OkxTickerData>>,
}

#[derive(Debug, Deserialize)]
struct OkxTickerData {
    #[serde(rename = "bidPx")]
    bid_px: Decimal,
    #[serde(rename = "askPx")]
    ask_px: Decimal,
}

fn parse_okx_ticker(text: &str) -> Option<Decimal> {
    let frame: OkxFrame = serde_json::from_str(text).ok()?;
    let ticker = frame.data?.into_iter().next()?;
    Some((ticker.bid_px + ticker.ask_px) / Decimal::TWO)
}

#[derive(Debug, Deserialize)]
struct CoinbaseTickerFrame {
    #[serde(rename = "type")]
    msg_type: String,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
}

fn parse_coinbase_ticker(text: &str) -> Option<Decimal> {
    let frame: CoinbaseTickerFrame = serde_json::from_str(text).ok()?;
    if frame.msg_type != "ticker" {
        return None;
    }
    Some((frame.best_bid? + frame.best_ask?) / Decimal::TWO)
}

// Kraken v2 carries bid/ask as JSON numbers, not strings.
#[derive(Debug, Deserialize)]
struct KrakenFrame {
    channel: Option<String>,
    data: Option<Vec<KrakenTickerData>>,
}

#[derive(Debug, Deserialize)]
struct KrakenTickerData {
    bid: f64,
    ask: f64,
}

fn parse_kraken_ticker(text: &str) -> Option<Decimal> {
    let frame: KrakenFrame = serde_json::from_str(text).ok()?;
    if frame.channel.as_deref() != Some("ticker") {
        return None;
    }
    let ticker = frame.data?.into_iter().next()?;
    let bid = Decimal::from_f64(ticker.bid)?;
    let ask = Decimal::from_f64(ticker.ask)?;
    Some((bid + ask) / Decimal::TWO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn binance_depth_snapshot_yields_mid() {
        let mut depth = DepthBook::new();
        let frame = r#"{
            "lastUpdateId": 12345,
            "bids": [["64000.00", "1.5"], ["63990.00", "2.0"]],
            "asks": [["64010.00", "0.5"]]
        }"#;

        let mid = Venue::BinanceDepth.parse_message(frame, &mut depth);
        assert_eq!(mid, Some(dec!(64005.00)));
        assert!(depth.has_depth());
    }

    #[test]
    fn binance_one_sided_book_has_no_mid() {
        let mut depth = DepthBook::new();
        let frame = r#"{"lastUpdateId": 1, "bids": [["64000.00", "1"]], "asks": []}"#;
        assert_eq!(Venue::BinanceDepth.parse_message(frame, &mut depth), None);
    }

    #[test]
    fn okx_ticker_yields_mid_and_skips_acks() {
        let mut depth = DepthBook::new();
        let ack = r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"}}"#;
        assert_eq!(Venue::OkxTicker.parse_message(ack, &mut depth), None);

        let frame = r#"{
            "arg": {"channel": "tickers", "instId": "BTC-USDT"},
            "data": [{"bidPx": "64000", "askPx": "64002", "last": "64001"}]
        }"#;
        assert_eq!(Venue::OkxTicker.parse_message(frame, &mut depth), Some(dec!(64001)));
    }

    #[test]
    fn coinbase_ticker_yields_mid_and_skips_other_types() {
        let mut depth = DepthBook::new();
        let sub = r#"{"type":"subscriptions","channels":[]}"#;
        assert_eq!(Venue::CoinbaseTicker.parse_message(sub, &mut depth), None);

        let frame = r#"{
            "type": "ticker",
            "product_id": "BTC-USD",
            "best_bid": "63998.50",
            "best_ask": "64001.50"
        }"#;
        assert_eq!(Venue::CoinbaseTicker.parse_message(frame, &mut depth), Some(dec!(64000.00)));
    }

    #[test]
    fn kraken_ticker_yields_mid_and_skips_heartbeats() {
        let mut depth = DepthBook::new();
        let heartbeat = r#"{"channel":"heartbeat"}"#;
        assert_eq!(Venue::KrakenTicker.parse_message(heartbeat, &mut depth), None);

        let frame = r#"{
            "channel": "ticker",
            "type": "update",
            "data": [{"symbol": "USDT/USD", "bid": 0.9998, "ask": 1.0002}]
        }"#;
        assert_eq!(Venue::KrakenTicker.parse_message(frame, &mut depth), Some(dec!(1.0000)));
    }

    #[test]
    fn garbage_frames_are_skipped_not_fatal() {
        let mut depth = DepthBook::new();
        for venue in [
            Venue::BinanceDepth,
            Venue::OkxTicker,
            Venue::CoinbaseTicker,
            Venue::KrakenTicker,
        ] {
            assert_eq!(venue.parse_message("not json", &mut depth), None);
        }
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let result = ExchangeSource::new(
            "bad",
            Venue::CoinbaseTicker,
            "not a url",
            QuoteKind::DirectUsd,
            None,
        );
        assert!(matches!(result, Err(PricingError::InvalidEndpoint { .. })));
    }

    #[test]
    fn default_set_has_quorum_capacity_and_one_fx_feed() {
        let sources = default_sources();
        assert_eq!(sources.len(), 5);

        let fx = sources.iter().filter(|s| s.quote == QuoteKind::FxRateOnly).count();
        let usd = sources.iter().filter(|s| s.quote == QuoteKind::DirectUsd).count();
        let usdt = sources.iter().filter(|s| s.quote == QuoteKind::UsdtQuoted).count();
        assert_eq!((fx, usd, usdt), (1, 2, 2));
    }
}
