use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

pub const LIFECYCLE_PREFIX: &str = "LIFECYCLE";
pub const DATA_PREFIX: &str = "DATA";
pub const METADATA_PREFIX: &str = "METADATA";
pub const ACTION_PREFIX: &str = "ACTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    ProviderCreated,
    ProviderDeleted,
    ServiceCreated,
    ResourceCreated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleNotification {
    pub status: LifecycleStatus,
    pub model: String,
    pub provider: String,
    pub service: Option<String>,
    pub resource: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNotification {
    pub model: String,
    pub provider: String,
    pub service: String,
    pub resource: String,
    pub value_type: ValueType,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataNotification {
    pub model: String,
    pub provider: String,
    pub service: String,
    pub resource: String,
    pub old_metadata: BTreeMap<String, Value>,
    pub new_metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNotification {
    pub model: String,
    pub provider: String,
    pub service: String,
    pub resource: String,
    pub arguments: BTreeMap<String, Value>,
    pub result: Value,
    pub timestamp: DateTime<Utc>,
}

/// A change to the twin, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    Lifecycle(LifecycleNotification),
    Data(DataNotification),
    Metadata(MetadataNotification),
    Action(ActionNotification),
}

impl Notification {
    /// Topic under which the notification is published, e.g.
    /// `DATA/thermostat/sensor-1/env/temperature`.
    pub fn topic(&self) -> String {
        match self {
            Notification::Lifecycle(n) => {
                let mut topic = format!("{}/{}/{}", LIFECYCLE_PREFIX, n.model, n.provider);
                if let Some(service) = &n.service {
                    topic.push('/');
                    topic.push_str(service);
                    if let Some(resource) = &n.resource {
                        topic.push('/');
                        topic.push_str(resource);
                    }
                }
                topic
            }
            Notification::Data(n) => format!(
                "{}/{}/{}/{}/{}",
                DATA_PREFIX, n.model, n.provider, n.service, n.resource
            ),
            Notification::Metadata(n) => format!(
                "{}/{}/{}/{}/{}",
                METADATA_PREFIX, n.model, n.provider, n.service, n.resource
            ),
            Notification::Action(n) => format!(
                "{}/{}/{}/{}/{}",
                ACTION_PREFIX, n.model, n.provider, n.service, n.resource
            ),
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Notification::Lifecycle(n) => &n.provider,
            Notification::Data(n) => &n.provider,
            Notification::Metadata(n) => &n.provider,
            Notification::Action(n) => &n.provider,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Notification::Lifecycle(n) => n.timestamp,
            Notification::Data(n) => n.timestamp,
            Notification::Metadata(n) => n.timestamp,
            Notification::Action(n) => n.timestamp,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Notification::Data(_))
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Notification::Lifecycle(_))
    }
}
