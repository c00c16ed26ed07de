//! `kiosk-middleware` – The Nervous System
//!
//! Moves data between the remote flag, the agent, and whatever presentation
//! layer is attached, without caring about what the data means.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe [`EventBus`] for operator
//!   notices and state changes, built on Tokio broadcast channels.
//! - [`channel`] – the [`RemoteChannel`] trait every remote transport
//!   implements.
//! - [`memory_channel`] – [`MemoryChannel`], an in-process remote store.
//! - [`ws_channel`] – [`WsRemoteChannel`], JSON frames over a WebSocket with
//!   backoff-driven reconnection.
//! - [`watcher`] – [`RemoteFlagWatcher`], which normalizes raw values into
//!   [`LockSignal`][kiosk_types::LockSignal]s and feeds a single-consumer
//!   queue.

pub mod bus;
pub mod channel;
pub mod memory_channel;
pub mod watcher;
pub mod ws_channel;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use channel::{ChannelItem, RemoteChannel};
pub use memory_channel::MemoryChannel;
pub use watcher::{RemoteFlagWatcher, SubscriptionHandle};
pub use ws_channel::WsRemoteChannel;
