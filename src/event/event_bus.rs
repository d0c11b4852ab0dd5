//! # Event Bus
//!
//! The EventBus delivers twin [`Notification`]s to northbound subscribers.
//! It is a topic-addressed layer over Tokio's broadcast channel: every
//! notification is sent once and each receiver filters on its own
//! [`TopicFilter`].
//!
//! ## Design Decisions
//!
//! A broadcast channel (rather than one MPSC channel per subscriber):
//!
//! 1. lets any number of subscribers observe the same notification
//! 2. bounds memory through the channel capacity; slow receivers lag instead
//!    of stalling the publisher
//! 3. keeps `publish` synchronous, so the worker never awaits a subscriber
//!
//! The bus keeps an internal receiver, so publishing with no subscribers is
//! not an error.
//!
//! ## Topic Filters
//!
//! Topics are `/`-separated: a prefix (`LIFECYCLE`, `DATA`, `METADATA` or
//! `ACTION`), the model, the provider, then service and resource where they
//! apply. A filter segment `*` matches exactly one segment;
//! a trailing `*` matches one or more remaining segments, so `DATA/*`
//! matches every data notification and `*` matches everything.

use std::fmt;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace};

use super::Notification;

pub type EventResult<T> = Result<T, EventError>;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event send failed: {message}")]
    SendFailed { message: String },

    #[error("Event receive failed: {message}")]
    ReceiveFailed { message: String },

    #[error("Event lagged: {count}")]
    Lagged { count: u64 },

    #[error("Invalid topic filter: {0}")]
    InvalidFilter(String),
}

/// Pattern over notification topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    segments: Vec<String>,
}

impl TopicFilter {
    pub fn parse(pattern: &str) -> EventResult<Self> {
        let segments: Vec<String> = pattern.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(EventError::InvalidFilter(pattern.to_string()));
        }
        Ok(Self { segments })
    }

    /// Matches every topic.
    pub fn all() -> Self {
        Self {
            segments: vec!["*".to_string()],
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        let topic: Vec<&str> = topic.split('/').collect();
        let last = self.segments.len() - 1;
        for (i, pattern) in self.segments.iter().enumerate() {
            if i == last && pattern == "*" {
                return topic.len() > i;
            }
            match topic.get(i) {
                Some(segment) if pattern == "*" || pattern == segment => continue,
                _ => return false,
            }
        }
        topic.len() == self.segments.len()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl TryFrom<&str> for TopicFilter {
    type Error = EventError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        TopicFilter::parse(value)
    }
}

/// # EventBus
///
/// Broadcast hub for twin notifications. See the module docs for the topic
/// scheme.
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
    capacity: usize,
    /// Internal receiver to keep the broadcast channel active
    _internal_receiver: broadcast::Receiver<Notification>,
}

impl EventBus {
    /// Creates a bus buffering at most `capacity` undelivered notifications
    /// per receiver.
    ///
    /// # Example
    ///
    /// ```rust
    /// use twin_gateway::event::EventBus;
    /// let bus = EventBus::new(100);
    /// assert_eq!(bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            _internal_receiver: receiver,
        }
    }

    /// Subscribes to notifications whose topic matches `filter`.
    pub fn subscribe(&self, filter: TopicFilter) -> EventReceiver {
        debug!(%filter, "subscribing");
        EventReceiver::new(self.sender.subscribe(), filter)
    }

    /// Subscribes with a string pattern such as `DATA/*`.
    pub fn subscribe_pattern(&self, pattern: &str) -> EventResult<EventReceiver> {
        Ok(self.subscribe(TopicFilter::parse(pattern)?))
    }

    /// Publishes one notification to every subscriber.
    pub fn publish(&self, notification: Notification) -> EventResult<()> {
        trace_notification("Publishing", &notification);
        self.sender
            .send(notification)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Number of external subscribers.
    pub fn subscribers_size(&self) -> usize {
        self.sender.receiver_count().saturating_sub(1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscribers_size())
            .finish()
    }
}

fn trace_notification(prefix: &str, notification: &Notification) {
    match notification {
        Notification::Data(_) => trace!("{} {}", prefix, notification.topic()),
        _ => debug!("{} {}", prefix, notification.topic()),
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<Notification>,
    filter: TopicFilter,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<Notification>, filter: TopicFilter) -> Self {
        Self { receiver, filter }
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Waits for the next matching notification.
    ///
    /// A receiver that fell behind gets [`EventError::Lagged`] once and then
    /// resumes with the oldest notification still buffered.
    pub async fn recv(&mut self) -> EventResult<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if self.filter.matches(&notification.topic()) => {
                    return Ok(notification)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Err(EventError::Lagged { count: n })
                }
                Err(e) => {
                    return Err(EventError::ReceiveFailed {
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    /// Returns an already buffered matching notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) if self.filter.matches(&notification.topic()) => {
                    return Some(notification)
                }
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Converts the receiver into a stream of matching notifications,
    /// silently skipping lag gaps.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = Notification> + Send>> {
        let filter = self.filter;
        Box::pin(
            BroadcastStream::new(self.receiver).filter_map(move |item| {
                let matched = match item {
                    Ok(notification) if filter.matches(&notification.topic()) => {
                        Some(notification)
                    }
                    _ => None,
                };
                futures::future::ready(matched)
            }),
        )
    }
}
