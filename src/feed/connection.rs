//! Resilient WebSocket connection.
//!
//! One connection owns one socket, one heartbeat clock, and one reconnect
//! schedule; nothing is shared across connections. The public handle talks
//! to a driver task over a command channel, and the driver reports back on
//! an event channel. A consumer that stops reading events (or drops its
//! receiver) never stalls reconnection bookkeeping.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::metrics;

/// Textual keepalive token exchanged alongside protocol ping/pong frames.
pub const KEEPALIVE_PING: &str = "PING";
/// Expected textual keepalive reply.
pub const KEEPALIVE_PONG: &str = "PONG";

/// Pong deadline as a multiple of the heartbeat interval.
const PONG_TIMEOUT_FACTOR: f64 = 2.5;
/// Upper bound of the uniform reconnect jitter.
const JITTER_MAX_MS: u64 = 1000;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    /// No socket; reusable via `connect()`.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Socket open and heartbeating.
    Connected,
    /// Waiting out a backoff delay before redialing.
    Reconnecting,
    /// Terminal until `reset()`.
    Closed,
}

/// Notifications delivered to the connection's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Socket opened (fires on every successful dial, including re-dials).
    Open,
    /// Inbound text frame, keepalive replies filtered out.
    Message(String),
    /// Socket closed by the peer or the stream ended.
    Closed {
        /// Close code, when the peer sent one.
        code: Option<u16>,
        /// Close reason or a description of how the stream ended.
        reason: String,
    },
    /// Transport error; reconnection follows unless destroyed.
    Error(String),
    /// Backoff wait started before the given re-dial attempt.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
        /// Delay being waited out.
        delay: Duration,
    },
    /// Lifecycle transition.
    StateChange(ConnectionState),
    /// The attempt cap was exhausted; settled in Disconnected.
    ReconnectExhausted,
}

/// Transport tuning for one connection.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Endpoint URL.
    pub url: String,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Initial backoff delay.
    pub reconnect_base: Duration,
    /// Backoff cap.
    pub reconnect_max: Duration,
    /// Attempt cap; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl WsConfig {
    /// Build transport settings for an endpoint from engine configuration.
    pub fn from_config(config: &Config, url: String) -> Self {
        Self {
            url,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_s),
            reconnect_base: Duration::from_millis(config.reconnect_base_ms),
            reconnect_max: Duration::from_millis(config.reconnect_max_ms),
            max_attempts: (config.reconnect_max_attempts > 0)
                .then_some(config.reconnect_max_attempts),
        }
    }

    /// Exponential backoff delay for an attempt count, before jitter:
    /// `min(base * 2^attempts, max)`.
    pub fn backoff_base_delay(&self, attempts: u32) -> Duration {
        let base_ms = self.reconnect_base.as_millis() as u64;
        let max_ms = self.reconnect_max.as_millis() as u64;
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Backoff delay with uniform jitter, capped at the maximum:
    /// `min(base * 2^attempts + jitter(0..1s), max)`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MAX_MS));
        (self.backoff_base_delay(attempts) + jitter).min(self.reconnect_max)
    }

    fn pong_timeout(&self) -> Duration {
        self.heartbeat_interval.mul_f64(PONG_TIMEOUT_FACTOR)
    }
}

enum Command {
    Connect,
    Send(String),
    Disconnect,
    Destroy,
    Reset,
}

/// Handle to a resilient WebSocket connection.
///
/// Handles are cheap to clone; all clones drive the same driver task.
/// Dropping every handle ends the driver once any live socket closes.
#[derive(Clone)]
pub struct WsConnection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl WsConnection {
    /// Spawn the driver task for an endpoint. Returns the handle and the
    /// event stream; the connection stays Disconnected until `connect()`.
    pub fn new(config: WsConfig) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        tokio::spawn(
            Driver { config, cmd_rx, event_tx, state_tx, attempts: 0 }.run(),
        );

        (Self { cmd_tx, state_rx }, event_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel for state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Open the connection. No-op while already live; refused while Closed.
    pub fn connect(&self) {
        match self.state() {
            ConnectionState::Connected
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting => {
                debug!(state = %self.state(), "connect() ignored; connection already live");
            }
            ConnectionState::Closed => {
                warn!("connect() refused: connection is closed; call reset() first");
            }
            ConnectionState::Disconnected => {
                let _ = self.cmd_tx.send(Command::Connect);
            }
        }
    }

    /// Send a text payload. Returns false when not Connected.
    pub fn send_message(&self, payload: &str) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        self.cmd_tx.send(Command::Send(payload.to_string())).is_ok()
    }

    /// Stop heartbeating and reconnecting; settle in Disconnected.
    /// The connection stays reusable via `connect()`.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// Terminal teardown: cancels all timers, no further reconnection.
    /// Idempotent.
    pub fn destroy(&self) {
        let _ = self.cmd_tx.send(Command::Destroy);
    }

    /// Leave the terminal Closed state, returning to Disconnected.
    /// Only valid from Closed.
    pub fn reset(&self) {
        if self.state() != ConnectionState::Closed {
            warn!(state = %self.state(), "reset() ignored; connection is not closed");
            return;
        }
        let _ = self.cmd_tx.send(Command::Reset);
    }
}

/// Why `drive_socket` returned.
enum SocketExit {
    /// Socket died; the reconnect schedule takes over.
    Dropped,
    /// Owner asked to disconnect.
    Disconnected,
    /// Owner asked to destroy (or dropped the handle).
    Destroyed,
}

/// Why the connect/reconnect loop returned.
enum SessionExit {
    Disconnected,
    Destroyed,
    Exhausted,
}

struct Driver {
    config: WsConfig,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    attempts: u32,
}

impl Driver {
    fn emit(&self, event: ConnectionEvent) {
        // A gone consumer must not abort connection bookkeeping.
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() != state {
            let _ = self.state_tx.send(state);
            self.emit(ConnectionEvent::StateChange(state));
        }
    }

    async fn run(mut self) {
        loop {
            let state = *self.state_tx.borrow();
            match self.cmd_rx.recv().await {
                None => return,
                Some(Command::Connect) => {
                    if state == ConnectionState::Closed {
                        warn!("connect command ignored in closed state");
                        continue;
                    }
                    match self.session().await {
                        SessionExit::Disconnected | SessionExit::Exhausted => {
                            self.set_state(ConnectionState::Disconnected);
                        }
                        SessionExit::Destroyed => self.set_state(ConnectionState::Closed),
                    }
                }
                Some(Command::Disconnect) => self.set_state(ConnectionState::Disconnected),
                Some(Command::Destroy) => self.set_state(ConnectionState::Closed),
                Some(Command::Reset) => {
                    if state == ConnectionState::Closed {
                        info!("connection reset");
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
                // Not connected; send_message() already reported false.
                Some(Command::Send(_)) => {}
            }
        }
    }

    /// Connect/reconnect loop. Runs until told to stop or the attempt cap
    /// is exhausted.
    async fn session(&mut self) -> SessionExit {
        self.attempts = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            debug!(url = %self.config.url, "Dialing WebSocket");

            match connect_async(&self.config.url).await {
                Ok((stream, _)) => {
                    self.attempts = 0;
                    self.set_state(ConnectionState::Connected);
                    self.emit(ConnectionEvent::Open);

                    match self.drive_socket(stream).await {
                        SocketExit::Dropped => {}
                        SocketExit::Disconnected => return SessionExit::Disconnected,
                        SocketExit::Destroyed => return SessionExit::Destroyed,
                    }
                }
                Err(e) => {
                    error!(error = %e, url = %self.config.url, "WebSocket dial failed");
                    self.emit(ConnectionEvent::Error(e.to_string()));
                }
            }

            if let Some(cap) = self.config.max_attempts {
                if self.attempts >= cap {
                    warn!(attempts = self.attempts, "Reconnect attempts exhausted; giving up");
                    self.emit(ConnectionEvent::ReconnectExhausted);
                    return SessionExit::Exhausted;
                }
            }

            let delay = self.config.backoff_delay(self.attempts);
            self.attempts = self.attempts.saturating_add(1);
            metrics::inc_ws_reconnects();
            self.set_state(ConnectionState::Reconnecting);
            self.emit(ConnectionEvent::Reconnecting { attempt: self.attempts, delay });
            info!(attempt = self.attempts, delay_ms = delay.as_millis(), "Reconnecting after delay");

            // Stay responsive to owner commands while waiting out the delay.
            let deadline = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    cmd = self.cmd_rx.recv() => match cmd {
                        None | Some(Command::Destroy) => return SessionExit::Destroyed,
                        Some(Command::Disconnect) => return SessionExit::Disconnected,
                        _ => {}
                    },
                }
            }
        }
    }

    /// Pump one live socket until it dies or the owner intervenes.
    async fn drive_socket(
        &mut self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> SocketExit {
        let (mut write, mut read) = stream.split();

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        heartbeat.tick().await;

        let mut pong_deadline = Instant::now() + self.config.pong_timeout();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Destroy) => {
                        let _ = write.close().await;
                        return SocketExit::Destroyed;
                    }
                    Some(Command::Disconnect) => {
                        let _ = write.close().await;
                        return SocketExit::Disconnected;
                    }
                    Some(Command::Send(payload)) => {
                        if let Err(e) = write.send(Message::Text(payload)).await {
                            error!(error = %e, "Send failed");
                            self.emit(ConnectionEvent::Error(e.to_string()));
                            return SocketExit::Dropped;
                        }
                    }
                    // Already live; connect() is a no-op here.
                    Some(Command::Connect) | Some(Command::Reset) => {}
                },

                _ = heartbeat.tick() => {
                    if write.send(Message::Text(KEEPALIVE_PING.to_string())).await.is_err()
                        || write.send(Message::Ping(Vec::new())).await.is_err()
                    {
                        warn!("Heartbeat send failed; tearing down");
                        return SocketExit::Dropped;
                    }
                }

                _ = tokio::time::sleep_until(pong_deadline) => {
                    warn!(
                        timeout_ms = self.config.pong_timeout().as_millis(),
                        "No liveness response within pong timeout; tearing down"
                    );
                    let _ = write.close().await;
                    self.emit(ConnectionEvent::Closed {
                        code: None,
                        reason: "pong timeout".to_string(),
                    });
                    return SocketExit::Dropped;
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::inc_ws_messages_received();
                        if text == KEEPALIVE_PONG {
                            pong_deadline = Instant::now() + self.config.pong_timeout();
                        } else {
                            self.emit(ConnectionEvent::Message(text));
                        }
                    }
                    // A pinging peer is a live peer; its pings reset the
                    // liveness clock just like pongs do.
                    Some(Ok(Message::Ping(data))) => {
                        pong_deadline = Instant::now() + self.config.pong_timeout();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = Instant::now() + self.config.pong_timeout();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(frame = ?frame, "WebSocket closed by peer");
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, "closed".to_string()));
                        self.emit(ConnectionEvent::Closed { code, reason });
                        return SocketExit::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        self.emit(ConnectionEvent::Error(e.to_string()));
                        return SocketExit::Dropped;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        self.emit(ConnectionEvent::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                        return SocketExit::Dropped;
                    }
                },
            }
        }
    }
}
