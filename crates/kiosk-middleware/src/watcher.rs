//! [`RemoteFlagWatcher`] – turns a watched remote path into [`FlagUpdate`]s.
//!
//! The watcher is the normalization boundary: raw JSON from the
//! [`RemoteChannel`] becomes an explicit [`LockSignal`], and channel
//! failures become [`FlagUpdate::ChannelError`] so that nothing downstream
//! can mistake "no value" or "no connection" for `false`.
//!
//! | Remote value | Delivered |
//! |---|---|
//! | `true` | `Signal(Locked)` |
//! | `false` | `Signal(Unlocked)` |
//! | absent / `null` | `Signal(Invalid(..))` |
//! | any other JSON | `Signal(Invalid(..))` |
//! | read failure | `ChannelError(..)` |
//!
//! Updates are pushed into a [`tokio::sync::mpsc`] queue rather than a
//! callback, so the consumer decides ordering and re-entrancy.

use std::sync::Arc;

use futures_util::StreamExt;
use kiosk_types::{FlagUpdate, KioskError, LockSignal};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelItem, RemoteChannel};

/// Watches one remote boolean flag.
pub struct RemoteFlagWatcher {
    channel: Arc<dyn RemoteChannel>,
    path: String,
}

impl RemoteFlagWatcher {
    pub fn new(channel: Arc<dyn RemoteChannel>, path: impl Into<String>) -> Self {
        Self {
            channel,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Map a raw remote value to a [`LockSignal`].
    pub fn normalize(value: Option<&Value>) -> LockSignal {
        match value {
            Some(Value::Bool(true)) => LockSignal::Locked,
            Some(Value::Bool(false)) => LockSignal::Unlocked,
            None | Some(Value::Null) => LockSignal::Invalid("value is absent".to_string()),
            Some(other) => {
                LockSignal::Invalid(format!("expected a boolean, got {}", json_kind(other)))
            }
        }
    }

    /// Map one channel delivery to a [`FlagUpdate`].
    pub fn translate(item: ChannelItem) -> FlagUpdate {
        match item {
            Ok(value) => FlagUpdate::Signal(Self::normalize(value.as_ref())),
            Err(KioskError::Channel(message)) => FlagUpdate::ChannelError(message),
            Err(other) => FlagUpdate::ChannelError(other.to_string()),
        }
    }

    /// Start a persistent subscription that forwards every update into
    /// `sink`.
    ///
    /// Must be called from within a Tokio runtime.  The subscription lives
    /// until the channel stream ends or `sink` is closed; dropping the
    /// returned handle does not cancel it.
    pub fn subscribe<T>(self, sink: mpsc::Sender<T>) -> SubscriptionHandle
    where
        T: From<FlagUpdate> + Send + 'static,
    {
        let path = self.path.clone();
        let task = tokio::spawn(async move {
            let mut stream = self.channel.watch(&self.path).await;
            info!(path = %self.path, "watching remote kiosk flag");

            while let Some(item) = stream.next().await {
                let update = Self::translate(item);
                match &update {
                    FlagUpdate::Signal(LockSignal::Invalid(reason)) => {
                        warn!(path = %self.path, %reason, "invalid kiosk mode value");
                    }
                    FlagUpdate::Signal(signal) => {
                        debug!(path = %self.path, ?signal, "kiosk mode value received");
                    }
                    FlagUpdate::ChannelError(message) => {
                        error!(path = %self.path, %message, "failed to read kiosk mode");
                    }
                }
                if sink.send(T::from(update)).await.is_err() {
                    debug!(path = %self.path, "update sink closed; ending subscription");
                    return;
                }
            }
            info!(path = %self.path, "remote channel stream ended");
        });
        SubscriptionHandle { path, task }
    }
}

/// Handle to a running subscription.
pub struct SubscriptionHandle {
    path: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `true` once the subscription has stopped delivering.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the subscription stops delivering.
    pub async fn closed(self) {
        if let Err(e) = self.task.await {
            error!(path = %self.path, error = %e, "subscription task failed");
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
