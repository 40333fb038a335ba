use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tether_protocol::{ToolResult, limits};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::auth::TokenProvider;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::state::AppState;

/// Application close code the server sends when the session credential is no
/// longer valid. Distinct from a plain close so the daemon knows to try a
/// refresh before backing off.
const AUTH_FAILURE_CLOSE_CODE: u16 = 4401;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Exponential reconnect policy: the base delay doubles per attempt up to a
/// cap, and ±25% jitter is applied so a fleet of daemons does not retry in
/// lockstep.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before jitter for a given attempt number.
    pub fn base_delay(attempt: u32) -> Duration {
        let doubled = limits::RECONNECT_BASE_DELAY_MS
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        Duration::from_millis(doubled.min(limits::RECONNECT_MAX_DELAY_MS))
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = Self::base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }
}

enum SessionEnd {
    AuthFailure,
    Closed,
}

enum ConnectError {
    AuthRejected,
    Other(anyhow::Error),
}

/// Owns the socket lifecycle. States are implicit in the run loop:
/// disconnected (no token), connecting, connected (pump), and backing off;
/// explicit shutdown exits from any of them.
pub struct Daemon {
    cfg: Config,
    tokens: Arc<dyn TokenProvider>,
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
}

impl Daemon {
    pub fn new(
        cfg: Config,
        tokens: Arc<dyn TokenProvider>,
        state: Arc<AppState>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            tokens,
            state,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut backoff = Backoff::new();
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let Some(token) = self.tokens.token() else {
                tracing::info!("no credential available; staying disconnected");
                if self.wait_or_shutdown(Duration::from_secs(5)).await {
                    break;
                }
                continue;
            };

            match self.connect(&token).await {
                Ok(ws) => {
                    backoff.reset();
                    self.state.connected.store(true, Ordering::Relaxed);
                    tracing::info!(server=%self.cfg.server_url, "connected");
                    let end = self.pump(ws).await;
                    self.state.connected.store(false, Ordering::Relaxed);
                    match end {
                        Ok(SessionEnd::AuthFailure) => {
                            if self.tokens.refresh() {
                                tracing::info!("credential refreshed; reconnecting");
                                backoff.reset();
                                continue;
                            }
                            tracing::warn!("session closed for auth and no fresh credential");
                        }
                        Ok(SessionEnd::Closed) => {
                            if *self.shutdown.borrow() {
                                break;
                            }
                            tracing::warn!("server connection closed");
                        }
                        Err(err) => tracing::warn!(error=%err, "connection error"),
                    }
                }
                Err(ConnectError::AuthRejected) => {
                    if self.tokens.refresh() {
                        tracing::info!("credential refreshed; reconnecting");
                        backoff.reset();
                        continue;
                    }
                    tracing::warn!("authentication rejected and no fresh credential");
                }
                Err(ConnectError::Other(err)) => {
                    tracing::warn!(error=%err, "failed to connect");
                }
            }

            if *self.shutdown.borrow() {
                break;
            }
            let delay = backoff.next_delay();
            tracing::info!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );
            if self.wait_or_shutdown(delay).await {
                break;
            }
        }
        tracing::info!("daemon stopped");
        Ok(())
    }

    /// Returns true when shutdown was requested during the wait.
    async fn wait_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            changed = self.shutdown.changed() => {
                changed.is_err() || *self.shutdown.borrow()
            }
        }
    }

    async fn connect(&self, token: &str) -> Result<WsStream, ConnectError> {
        let mut url = url::Url::parse(&format!(
            "{}/ws/agent",
            self.cfg.server_url.trim_end_matches('/')
        ))
        .map_err(|e| ConnectError::Other(e.into()))?;
        url.query_pairs_mut()
            .append_pair("host_id", &self.cfg.host_id)
            .append_pair("token", token);

        match tokio_tungstenite::connect_async(url.to_string()).await {
            Ok((ws, _response)) => Ok(ws),
            Err(tokio_tungstenite::tungstenite::Error::Http(resp))
                if resp.status().as_u16() == 401 =>
            {
                Err(ConnectError::AuthRejected)
            }
            Err(err) => Err(ConnectError::Other(err.into())),
        }
    }

    async fn pump(&mut self, ws: WsStream) -> anyhow::Result<SessionEnd> {
        let (mut sender, mut receiver) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ToolResult>(256);
        let dispatcher = Dispatcher::new(self.state.clone());
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(limits::HEARTBEAT_INTERVAL_SECS));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    sender.send(Message::Ping(Vec::new().into())).await?;
                }
                Some(frame) = out_rx.recv() => {
                    let text = serde_json::to_string(&frame)?;
                    sender.send(Message::Text(text.into())).await?;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        let _ = sender.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Closed);
                    }
                }
                incoming = receiver.next() => {
                    let Some(incoming) = incoming else {
                        return Ok(SessionEnd::Closed);
                    };
                    match incoming? {
                        Message::Text(text) => {
                            dispatcher.dispatch_frame(text.as_str(), out_tx.clone());
                        }
                        Message::Ping(payload) => {
                            sender.send(Message::Pong(payload)).await?;
                        }
                        Message::Close(Some(frame))
                            if u16::from(frame.code) == AUTH_FAILURE_CLOSE_CODE =>
                        {
                            return Ok(SessionEnd::AuthFailure);
                        }
                        Message::Close(_) => return Ok(SessionEnd::Closed),
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;

    struct StaticTokens(Option<String>);

    impl TokenProvider for StaticTokens {
        fn token(&self) -> Option<String> {
            self.0.clone()
        }
        fn refresh(&self) -> bool {
            false
        }
    }

    #[test]
    fn base_delay_doubles_and_caps() {
        let delays: Vec<u64> = (0..8)
            .map(|a| Backoff::base_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays[0], limits::RECONNECT_BASE_DELAY_MS);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(delays[7], limits::RECONNECT_MAX_DELAY_MS);
        // Extreme attempt counts must not overflow.
        assert_eq!(
            Backoff::base_delay(200).as_millis() as u64,
            limits::RECONNECT_MAX_DELAY_MS
        );
    }

    #[test]
    fn jittered_delay_stays_within_a_quarter_of_base() {
        let mut backoff = Backoff::new();
        for attempt in 0..6 {
            let base = Backoff::base_delay(attempt).as_millis() as f64;
            let jittered = backoff.next_delay().as_millis() as f64;
            assert!(jittered >= base * 0.75 - 1.0, "attempt {attempt}: {jittered} < {base}*0.75");
            assert!(jittered <= base * 1.25 + 1.0, "attempt {attempt}: {jittered} > {base}*1.25");
        }
        assert_eq!(backoff.attempt(), 6);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[tokio::test]
    async fn without_a_credential_the_daemon_stays_disconnected() {
        let (state, _data) = test_state();
        let cfg = state.cfg.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let daemon = Daemon::new(
            cfg,
            Arc::new(StaticTokens(None)),
            state.clone(),
            shutdown_rx,
        );

        let handle = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!state.connected.load(Ordering::Relaxed));
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon did not stop")
            .unwrap()
            .unwrap();
    }
}
