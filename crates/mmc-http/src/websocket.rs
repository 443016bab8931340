//! Event socket: authenticates, keeps the connection alive and forwards parsed frames.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use mmc_core::{config::Config, errors::Error, events::Frame, Result};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// How a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    /// The frame receiver was dropped; nobody is listening any more.
    ConsumerGone,
    Closed,
}

pub struct WsListener {
    url: String,
    token: String,
    ping_interval: Duration,
    reconnect_max: Duration,
}

impl WsListener {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            ping_interval: Duration::from_secs(30),
            reconnect_max: Duration::from_secs(60),
        }
    }

    pub fn from_config(cfg: &Config, token: impl Into<String>) -> Self {
        Self::new(cfg.websocket_url(), token)
            .with_ping_interval(cfg.ping_interval)
            .with_reconnect_max(cfg.reconnect_max)
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_max(mut self, max: Duration) -> Self {
        self.reconnect_max = max.max(INITIAL_BACKOFF);
        self
    }

    /// Connect and forward frames into `frames` until cancelled or the receiver is dropped.
    ///
    /// Runs in a reconnection loop with exponential backoff.
    pub async fn run(&self, frames: mpsc::Sender<Frame>, cancel: CancellationToken) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            info!(url = %self.url, "connecting to event socket");
            let mut connected = false;
            match self.session(&frames, &cancel, &mut connected).await {
                Ok(SessionEnd::Cancelled) => {
                    info!("event socket shutting down");
                    return Ok(());
                }
                Ok(SessionEnd::ConsumerGone) => {
                    info!("frame receiver dropped, closing event socket");
                    return Ok(());
                }
                Ok(SessionEnd::Closed) => warn!("event socket closed by server, reconnecting"),
                Err(e) => error!(error = %e, "event socket error, reconnecting"),
            }

            if connected {
                backoff = INITIAL_BACKOFF;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(backoff) => {}
            }

            backoff = (backoff * 2).min(self.reconnect_max);
        }
    }

    async fn session(
        &self,
        frames: &mpsc::Sender<Frame>,
        cancel: &CancellationToken,
        connected: &mut bool,
    ) -> Result<SessionEnd> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ws_error("connection failed", e))?;
        *connected = true;

        let (mut write, mut read) = stream.split();
        let mut seq: i64 = 1;
        write
            .send(Message::Text(authentication_challenge(seq, &self.token)))
            .await
            .map_err(|e| ws_error("authentication send failed", e))?;
        info!("event socket connected");

        let mut ticker = tokio::time::interval(self.ping_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Cancelled);
                }

                _ = ticker.tick() => {
                    seq += 1;
                    write
                        .send(Message::Text(ping(seq)))
                        .await
                        .map_err(|e| ws_error("ping send failed", e))?;
                    trace!(seq, "ping sent");
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                        Ok(frame) => {
                            if frames.send(frame).await.is_err() {
                                return Ok(SessionEnd::ConsumerGone);
                            }
                        }
                        Err(e) => debug!(error = %e, "skipping unparseable frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    // tungstenite answers protocol pings itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ws_error("read error", e)),
                },
            }
        }
    }
}

fn ws_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::External(format!("websocket {context}: {e}"))
}

fn authentication_challenge(seq: i64, token: &str) -> String {
    json!({
        "seq": seq,
        "action": "authentication_challenge",
        "data": { "token": token },
    })
    .to_string()
}

fn ping(seq: i64) -> String {
    json!({ "seq": seq, "action": "ping" }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn action_payloads() {
        let auth: Value = serde_json::from_str(&authentication_challenge(1, "tok")).unwrap();
        assert_eq!(auth["seq"], 1);
        assert_eq!(auth["action"], "authentication_challenge");
        assert_eq!(auth["data"]["token"], "tok");

        let p: Value = serde_json::from_str(&ping(7)).unwrap();
        assert_eq!(p["action"], "ping");
        assert_eq!(p["seq"], 7);
    }

    #[test]
    fn reconnect_cap_never_drops_below_initial_backoff() {
        let l = WsListener::new("ws://x", "t").with_reconnect_max(Duration::ZERO);
        assert_eq!(l.reconnect_max, INITIAL_BACKOFF);
    }

    #[tokio::test]
    async fn authenticates_and_forwards_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let auth: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
            ws.send(Message::Text("not json".to_string())).await.unwrap();
            ws.send(Message::Text(
                json!({
                    "event": "posted",
                    "data": { "post": "{}" },
                    "broadcast": { "channel_id": "c1" },
                    "seq": 1
                })
                .to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                json!({ "status": "OK", "seq_reply": 2, "data": { "text": "pong" } }).to_string(),
            ))
            .await
            .unwrap();
            // keep the socket open until the client leaves
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
            auth
        });

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let ws = WsListener::new(format!("ws://{addr}"), "secret");
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { ws.run(tx, cancel).await })
        };

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            Frame::Event(ev) => assert_eq!(ev.event, "posted"),
            other => panic!("expected event, got {other:?}"),
        }
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match second {
            Frame::Response(r) => assert!(r.is_pong()),
            other => panic!("expected response, got {other:?}"),
        }

        cancel.cancel();
        run.await.unwrap().unwrap();

        let auth = server.await.unwrap();
        assert_eq!(auth["action"], "authentication_challenge");
        assert_eq!(auth["data"]["token"], "secret");
    }

    #[tokio::test]
    async fn cancelled_before_start_returns_immediately() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        WsListener::new("ws://127.0.0.1:1", "t")
            .run(tx, cancel)
            .await
            .unwrap();
    }
}
