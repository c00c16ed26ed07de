//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  This is how the agent surfaces status to whatever
//! presentation layer is attached; nothing here parses the messages.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Notices`] | One-line operator notifications (success, diagnostics, errors) |
//! | [`Topic::StateChanges`] | Applied lock states and privilege transitions |

use kiosk_types::{Event, EventPayload, KioskError, Notice};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Human-readable notices for the operator.
    Notices,
    /// Machine-readable state transitions.
    StateChanges,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    notices: broadcast::Sender<Event>,
    state_changes: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (notices, _) = broadcast::channel(capacity);
        let (state_changes, _) = broadcast::channel(capacity);
        Self {
            notices,
            state_changes,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// Returns [`KioskError::Bus`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, KioskError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| KioskError::Bus(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Best-effort operator notification on [`Topic::Notices`].
    ///
    /// Having no presentation layer attached is a normal condition, so a
    /// missing subscriber is only logged at debug level.
    pub fn notify(&self, source: &str, notice: Notice) {
        let event = Event::new(source, EventPayload::Notice(notice));
        if let Err(e) = self.publish_to(Topic::Notices, event) {
            debug!(source, error = %e, "notice dropped");
        }
    }

    /// Best-effort publish on [`Topic::StateChanges`].
    pub fn announce(&self, source: &str, payload: EventPayload) {
        let event = Event::new(source, payload);
        if let Err(e) = self.publish_to(Topic::StateChanges, event) {
            debug!(source, error = %e, "state change dropped");
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Notices => &self.notices,
            Topic::StateChanges => &self.state_changes,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Take the next already-buffered event without waiting.
    ///
    /// Lagged gaps are skipped with a warning; `None` means nothing is
    /// buffered (or the bus is closed).
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
