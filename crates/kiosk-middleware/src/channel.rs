//! The remote-channel seam.
//!
//! The agent never speaks directly to a remote data store.  It watches one
//! path through a [`RemoteChannel`], and the implementation owns transport,
//! authentication and reconnection.
//!
//! # Overview
//!
//! - [`RemoteChannel`] – the trait every backing transport implements.
//! - [`MemoryChannel`][crate::memory_channel::MemoryChannel] – in-process
//!   channel for tests and offline runs.
//! - [`WsRemoteChannel`][crate::ws_channel::WsRemoteChannel] – JSON frames
//!   over a WebSocket with automatic reconnection.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use kiosk_types::KioskError;
use serde_json::Value;

/// One delivery from a watched path.
///
/// * `Ok(Some(value))` – the current value at the path.
/// * `Ok(None)` – the path holds no value.
/// * `Err(KioskError::Channel(_))` – a read or permission failure.
pub type ChannelItem = Result<Option<Value>, KioskError>;

/// A read-only push source of JSON values.
///
/// # Contract
///
/// * `watch` – returns a stream that yields the current value of `path` as
///   soon as the channel is (re)connected, then every subsequent change.  A
///   reconnect re-delivers the current value even when it did not change.
///   Failures are yielded in-band and do not end the stream.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    async fn watch(&self, path: &str) -> BoxStream<'static, ChannelItem>;
}
