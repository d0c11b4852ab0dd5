//! Northbound notifications: types, topic-filtered bus and accumulators.

mod accumulator;
mod event_bus;
mod notification;

pub use accumulator::{FlushReport, ImmediateNotifier, NotificationAccumulator, NotificationBatch};
pub use event_bus::{EventBus, EventError, EventReceiver, EventResult, TopicFilter};
pub use notification::{
    ActionNotification, DataNotification, LifecycleNotification, LifecycleStatus,
    MetadataNotification, Notification, ACTION_PREFIX, DATA_PREFIX, LIFECYCLE_PREFIX,
    METADATA_PREFIX,
};
