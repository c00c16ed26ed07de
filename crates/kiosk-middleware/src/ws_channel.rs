//! WebSocket-backed [`RemoteChannel`].
//!
//! [`WsRemoteChannel`] keeps a persistent connection to a value-streaming
//! server and speaks a minimal JSON protocol:
//!
//! | Direction | Frame |
//! |---|---|
//! | client → server | `{"op":"subscribe","path":"kiosk_mode","auth":"<token>"}` |
//! | server → client | `{"path":"kiosk_mode","data":true}` (no `data` = absent) |
//! | server → client | `{"path":"kiosk_mode","error":"Permission denied"}` |
//!
//! The server answers a subscribe with the current value, so a reconnect
//! always re-delivers it.  A lost connection is reported once per outage
//! as a [`KioskError::Channel`] item and retried with exponential backoff
//! ([`INITIAL_BACKOFF`] doubling up to [`MAX_BACKOFF`]); connection attempts
//! are additionally throttled by a [`governor`] rate limiter.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{SinkExt, StreamExt};
use governor::{Quota, RateLimiter};
use kiosk_types::KioskError;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::channel::{ChannelItem, RemoteChannel};

/// Delay before the first reconnect attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
/// Upper bound for the reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Minimum spacing between two connection attempts, whatever the backoff.
const MIN_CONNECT_INTERVAL: Duration = Duration::from_millis(250);

const ITEM_BUFFER: usize = 32;

/// A [`RemoteChannel`] that watches paths over a WebSocket.
#[derive(Clone)]
pub struct WsRemoteChannel {
    url: String,
    token: Option<String>,
}

impl WsRemoteChannel {
    /// `url` is the server endpoint, e.g. `"ws://localhost:9400"`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    /// Attach a bearer token to every subscribe frame.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the subscribe frame sent right after connecting.
    pub fn build_subscribe_frame(path: &str, token: Option<&str>) -> String {
        let mut frame = json!({ "op": "subscribe", "path": path });
        if let Some(token) = token {
            frame["auth"] = Value::String(token.to_string());
        }
        frame.to_string()
    }

    /// Decode a server frame for `path`.
    ///
    /// Returns `None` for frames about other paths and for text that is not
    /// a JSON object.
    pub fn parse_frame(text: &str, path: &str) -> Option<ChannelItem> {
        let json = match serde_json::from_str::<Value>(text) {
            Ok(json @ Value::Object(_)) => json,
            Ok(_) | Err(_) => {
                warn!(frame = %text, "ignoring malformed channel frame");
                return None;
            }
        };
        if json.get("path").and_then(Value::as_str) != Some(path) {
            return None;
        }
        if let Some(message) = json.get("error") {
            let message = message
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| message.to_string());
            return Some(Err(KioskError::Channel(message)));
        }
        Some(Ok(json.get("data").cloned()))
    }
}

#[async_trait]
impl RemoteChannel for WsRemoteChannel {
    async fn watch(&self, path: &str) -> BoxStream<'static, ChannelItem> {
        let (tx, rx) = mpsc::channel(ITEM_BUFFER);
        tokio::spawn(run_connection(
            self.url.clone(),
            path.to_string(),
            self.token.clone(),
            tx,
        ));
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }
}

/// Next reconnect delay after `current`.
pub fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

/// Connection supervisor: connect, subscribe, forward frames, and reconnect
/// until the watcher side of `tx` goes away.
async fn run_connection(
    url: String,
    path: String,
    token: Option<String>,
    tx: mpsc::Sender<ChannelItem>,
) {
    let quota = Quota::with_period(MIN_CONNECT_INTERVAL)
        .unwrap_or_else(|| Quota::per_second(std::num::NonZeroU32::MIN));
    let limiter = RateLimiter::direct(quota);
    let mut backoff = INITIAL_BACKOFF;
    let mut outage_reported = false;

    while !tx.is_closed() {
        limiter.until_ready().await;

        let lost = match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %url, path = %path, "remote channel connected");
                backoff = INITIAL_BACKOFF;
                outage_reported = false;
                let (mut sink, mut frames) = ws.split();

                let subscribe = WsRemoteChannel::build_subscribe_frame(&path, token.as_deref());
                if let Err(e) = sink.send(Message::Text(subscribe.into())).await {
                    format!("subscribe failed: {e}")
                } else {
                    loop {
                        match frames.next().await {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(item) = WsRemoteChannel::parse_frame(text.as_str(), &path)
                                    && tx.send(item).await.is_err()
                                {
                                    debug!(path = %path, "watcher gone; closing remote channel");
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                            Some(Err(e)) => break e.to_string(),
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
            Err(e) => format!("connect to {url} failed: {e}"),
        };

        warn!(url = %url, reason = %lost, retry_in = ?backoff, "remote channel unavailable");
        if !outage_reported {
            outage_reported = true;
            let item = Err(KioskError::Channel(format!("connection lost: {lost}")));
            if tx.send(item).await.is_err() {
                return;
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn subscribe_frame_without_token() {
        let frame: Value =
            serde_json::from_str(&WsRemoteChannel::build_subscribe_frame("kiosk_mode", None)).unwrap();
        assert_eq!(frame["op"], "subscribe");
        assert_eq!(frame["path"], "kiosk_mode");
        assert!(frame.get("auth").is_none());
    }

    #[test]
    fn subscribe_frame_with_token() {
        let frame: Value = serde_json::from_str(&WsRemoteChannel::build_subscribe_frame(
            "kiosk_mode",
            Some("s3cret"),
        ))
        .unwrap();
        assert_eq!(frame["auth"], "s3cret");
    }

    #[test]
    fn empty_token_is_not_sent() {
        let channel = WsRemoteChannel::new("ws://localhost:9400").with_token("");
        assert!(channel.token.is_none());
    }

    #[test]
    fn parse_value_frames() {
        assert_eq!(
            WsRemoteChannel::parse_frame(r#"{"path":"kiosk_mode","data":true}"#, "kiosk_mode"),
            Some(Ok(Some(Value::Bool(true))))
        );
        assert_eq!(
            WsRemoteChannel::parse_frame(r#"{"path":"kiosk_mode"}"#, "kiosk_mode"),
            Some(Ok(None))
        );
        assert_eq!(
            WsRemoteChannel::parse_frame(r#"{"path":"kiosk_mode","data":null}"#, "kiosk_mode"),
            Some(Ok(Some(Value::Null)))
        );
    }

    #[test]
    fn parse_error_frame() {
        assert_eq!(
            WsRemoteChannel::parse_frame(
                r#"{"path":"kiosk_mode","error":"Permission denied"}"#,
                "kiosk_mode"
            ),
            Some(Err(KioskError::Channel("Permission denied".into())))
        );
    }

    #[test]
    fn parse_ignores_other_paths_and_garbage() {
        assert_eq!(
            WsRemoteChannel::parse_frame(r#"{"path":"other","data":true}"#, "kiosk_mode"),
            None
        );
        assert_eq!(WsRemoteChannel::parse_frame("not json", "kiosk_mode"), None);
        assert_eq!(WsRemoteChannel::parse_frame("[true]", "kiosk_mode"), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(next_backoff(INITIAL_BACKOFF), Duration::from_secs(1));
        assert_eq!(next_backoff(Duration::from_secs(20)), MAX_BACKOFF);
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn unreachable_server_reports_one_channel_error() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = WsRemoteChannel::new(format!("ws://{addr}"));
        let mut stream = channel.watch("kiosk_mode").await;
        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("an outage must be reported");
        assert!(matches!(first, Some(Err(KioskError::Channel(msg))) if msg.contains("connection lost")));
    }

    async fn next_item(stream: &mut BoxStream<'static, ChannelItem>) -> Option<ChannelItem> {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("frame in time")
    }

    #[tokio::test]
    async fn streams_values_from_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let subscribe = ws.next().await.unwrap().unwrap();
            let frame: Value = serde_json::from_str(subscribe.to_text().unwrap()).unwrap();
            assert_eq!(frame["path"], "kiosk_mode");
            assert_eq!(frame["auth"], "tok");

            for text in [
                r#"{"path":"kiosk_mode","data":true}"#,
                r#"{"path":"other","data":false}"#,
                r#"{"path":"kiosk_mode","error":"Permission denied"}"#,
                r#"{"path":"kiosk_mode","data":false}"#,
            ] {
                ws.send(Message::Text(text.to_string().into())).await.unwrap();
            }
            // Keep the connection open until the client hangs up.
            while ws.next().await.is_some() {}
        });

        let channel = WsRemoteChannel::new(format!("ws://{addr}")).with_token("tok");
        let mut stream = channel.watch("kiosk_mode").await;
        assert_eq!(next_item(&mut stream).await, Some(Ok(Some(Value::Bool(true)))));
        assert_eq!(
            next_item(&mut stream).await,
            Some(Err(KioskError::Channel("Permission denied".into())))
        );
        assert_eq!(next_item(&mut stream).await, Some(Ok(Some(Value::Bool(false)))));
    }
}
