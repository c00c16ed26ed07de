//! In-process [`RemoteChannel`] for tests and offline runs.
//!
//! [`MemoryChannel`] keeps a map of path → value and fans every change out
//! to its watchers over a [`tokio::sync::broadcast`] channel.  It can also
//! inject read failures and simulate a reconnect, which re-delivers the
//! current value to every watcher.
//!
//! # Example
//!
//! ```rust
//! use futures_util::StreamExt;
//! use kiosk_middleware::{MemoryChannel, RemoteChannel};
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let channel = MemoryChannel::new();
//! channel.set("kiosk_mode", json!(true));
//!
//! let mut stream = channel.watch("kiosk_mode").await;
//! assert_eq!(stream.next().await, Some(Ok(Some(json!(true)))));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use kiosk_types::KioskError;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::channel::{ChannelItem, RemoteChannel};

const FRAME_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
enum Frame {
    Changed(String),
    Fault { path: String, message: String },
    Reconnected,
    Closed,
}

struct Inner {
    values: Mutex<HashMap<String, Value>>,
    frames: broadcast::Sender<Frame>,
}

impl Inner {
    fn current(&self, path: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    fn emit(&self, frame: Frame) {
        // No watchers yet is fine; they read the current value on subscribe.
        let _ = self.frames.send(frame);
    }
}

/// Shared in-memory remote store.  Clones share the same values and
/// watchers.
#[derive(Clone)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(FRAME_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                values: Mutex::new(HashMap::new()),
                frames,
            }),
        }
    }

    /// Store `value` at `path` and notify watchers.
    pub fn set(&self, path: &str, value: Value) {
        self.inner
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), value);
        self.inner.emit(Frame::Changed(path.to_string()));
    }

    /// Remove the value at `path` and notify watchers.
    pub fn clear(&self, path: &str) {
        self.inner
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
        self.inner.emit(Frame::Changed(path.to_string()));
    }

    /// Current value at `path`, if any.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.inner.current(path)
    }

    /// Deliver a read failure to watchers of `path`.
    pub fn fail(&self, path: &str, message: impl Into<String>) {
        self.inner.emit(Frame::Fault {
            path: path.to_string(),
            message: message.into(),
        });
    }

    /// Simulate a reconnect: every watcher receives its current value again.
    pub fn reconnect(&self) {
        self.inner.emit(Frame::Reconnected);
    }

    /// End every watcher's stream.
    pub fn close(&self) {
        self.inner.emit(Frame::Closed);
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

struct WatchState {
    inner: Arc<Inner>,
    rx: broadcast::Receiver<Frame>,
    path: String,
    first: bool,
}

#[async_trait]
impl RemoteChannel for MemoryChannel {
    async fn watch(&self, path: &str) -> BoxStream<'static, ChannelItem> {
        let state = WatchState {
            inner: Arc::clone(&self.inner),
            rx: self.inner.frames.subscribe(),
            path: path.to_string(),
            first: true,
        };

        stream::unfold(state, |mut st| async move {
            if st.first {
                st.first = false;
                let value = st.inner.current(&st.path);
                return Some((Ok(value), st));
            }
            loop {
                match st.rx.recv().await {
                    Ok(Frame::Changed(p)) if p == st.path => {
                        let value = st.inner.current(&st.path);
                        return Some((Ok(value), st));
                    }
                    Ok(Frame::Fault { path, message }) if path == st.path => {
                        return Some((Err(KioskError::Channel(message)), st));
                    }
                    Ok(Frame::Reconnected) => {
                        let value = st.inner.current(&st.path);
                        return Some((Ok(value), st));
                    }
                    Ok(Frame::Closed) => return None,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed frames: resynchronise from the stored value.
                        warn!(path = %st.path, lagged_by = n, "memory channel watcher lagged");
                        let value = st.inner.current(&st.path);
                        return Some((Ok(value), st));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn watch_yields_absent_value_first() {
        let channel = MemoryChannel::new();
        let mut stream = channel.watch("kiosk_mode").await;
        assert_eq!(stream.next().await, Some(Ok(None)));
    }

    #[tokio::test]
    async fn watch_follows_changes_on_its_path_only() {
        let channel = MemoryChannel::new();
        let mut stream = channel.watch("kiosk_mode").await;
        assert_eq!(stream.next().await, Some(Ok(None)));

        channel.set("other", json!(1));
        channel.set("kiosk_mode", json!(true));
        assert_eq!(stream.next().await, Some(Ok(Some(json!(true)))));

        channel.clear("kiosk_mode");
        assert_eq!(stream.next().await, Some(Ok(None)));
    }

    #[tokio::test]
    async fn reconnect_redelivers_unchanged_value() {
        let channel = MemoryChannel::new();
        channel.set("kiosk_mode", json!(false));
        let mut stream = channel.watch("kiosk_mode").await;
        assert_eq!(stream.next().await, Some(Ok(Some(json!(false)))));

        channel.reconnect();
        assert_eq!(stream.next().await, Some(Ok(Some(json!(false)))));
    }

    #[tokio::test]
    async fn failure_is_delivered_in_band() {
        let channel = MemoryChannel::new();
        let mut stream = channel.watch("kiosk_mode").await;
        stream.next().await;

        channel.fail("kiosk_mode", "Permission denied");
        assert_eq!(
            stream.next().await,
            Some(Err(KioskError::Channel("Permission denied".into())))
        );

        channel.set("kiosk_mode", json!(true));
        assert_eq!(stream.next().await, Some(Ok(Some(json!(true)))));
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let channel = MemoryChannel::new();
        let mut stream = channel.watch("kiosk_mode").await;
        stream.next().await;
        channel.close();
        assert_eq!(stream.next().await, None);
    }
}
