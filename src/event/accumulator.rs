//! Notification accumulators.
//!
//! Mutations record notifications into an accumulator instead of publishing
//! them. A [`NotificationBatch`] belongs to one command: it is flushed to the
//! bus, in recorded order, only when the command returns normally, and
//! discarded otherwise. The [`ImmediateNotifier`] publishes on record and is
//! used outside of any command.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

use super::{
    DataNotification, EventBus, LifecycleNotification, MetadataNotification, Notification,
};
use crate::error::{GatewayError, GatewayResult};
use crate::event::ActionNotification;

pub trait NotificationAccumulator: Send + Sync + fmt::Debug {
    fn record(&self, notification: Notification) -> GatewayResult<()>;

    fn record_lifecycle(&self, event: LifecycleNotification) -> GatewayResult<()> {
        self.record(Notification::Lifecycle(event))
    }

    fn record_data_change(&self, change: DataNotification) -> GatewayResult<()> {
        self.record(Notification::Data(change))
    }

    fn record_metadata_change(&self, change: MetadataNotification) -> GatewayResult<()> {
        self.record(Notification::Metadata(change))
    }

    fn record_action(&self, action: ActionNotification) -> GatewayResult<()> {
        self.record(Notification::Action(action))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Open,
    Flushed,
    Discarded,
}

#[derive(Debug)]
struct BatchInner {
    state: BatchState,
    pending: Vec<Notification>,
}

/// Notifications recorded by one command.
pub struct NotificationBatch {
    bus: Arc<EventBus>,
    inner: Mutex<BatchInner>,
}

/// Outcome of flushing a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub published: usize,
    pub failed: usize,
}

impl NotificationBatch {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            inner: Mutex::new(BatchInner {
                state: BatchState::Open,
                pending: Vec::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publishes every recorded notification in order and closes the batch.
    ///
    /// A notification the bus refuses is logged and skipped; the rest are
    /// still delivered.
    pub fn flush(&self) -> FlushReport {
        let pending = {
            let mut inner = self.lock();
            if inner.state != BatchState::Open {
                return FlushReport::default();
            }
            inner.state = BatchState::Flushed;
            std::mem::take(&mut inner.pending)
        };

        let mut report = FlushReport::default();
        for notification in pending {
            let topic = notification.topic();
            match self.bus.publish(notification) {
                Ok(()) => report.published += 1,
                Err(e) => {
                    error!(%topic, "failed to publish notification: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Drops every recorded notification and closes the batch.
    pub fn discard(&self) -> usize {
        let mut inner = self.lock();
        if inner.state != BatchState::Open {
            return 0;
        }
        inner.state = BatchState::Discarded;
        let dropped = inner.pending.len();
        inner.pending.clear();
        if dropped > 0 {
            debug!(dropped, "discarded notification batch");
        }
        dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BatchInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationAccumulator for NotificationBatch {
    fn record(&self, notification: Notification) -> GatewayResult<()> {
        let mut inner = self.lock();
        match inner.state {
            BatchState::Open => {
                inner.pending.push(notification);
                Ok(())
            }
            _ => Err(GatewayError::InvalidScope(format!(
                "notification batch already completed, dropping {}",
                notification.topic()
            ))),
        }
    }
}

impl fmt::Debug for NotificationBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("NotificationBatch")
            .field("state", &inner.state)
            .field("pending", &inner.pending.len())
            .finish()
    }
}

/// Publishes each notification as soon as it is recorded.
#[derive(Debug, Clone)]
pub struct ImmediateNotifier {
    bus: Arc<EventBus>,
}

impl ImmediateNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl NotificationAccumulator for ImmediateNotifier {
    fn record(&self, notification: Notification) -> GatewayResult<()> {
        self.bus.publish(notification)?;
        Ok(())
    }
}
