//! # Model schema
//!
//! A model is a property bag describing which services and resources a
//! provider of that model carries. Schemas grow on demand: writing to an
//! unknown resource through
//! [`TwinHandle::get_or_create_resource`](crate::twin::TwinHandle::get_or_create_resource)
//! creates the model, service and resource definitions with configured
//! defaults. Explicit declarations go through [`ModelHandle::resource_builder`].

mod handle;
mod registry;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

pub use handle::{ModelHandle, ResourceBuilder};
pub use registry::ModelRegistry;

/// Per-read consistency request.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConsistencyLevel {
    /// Return the cache, never consult the device.
    Weak,
    /// Return the cache while it is younger than the cache duration.
    #[default]
    Normal,
    /// Always consult the device when a getter exists.
    Strong,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    /// Holds a value that may change over time.
    #[default]
    Sensor,
    /// Holds a value that is not expected to change after it is first set.
    Property,
    /// Has no value; invoked through `act`.
    Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub default_consistency: ConsistencyLevel,
    #[serde(with = "crate::config::duration_ms")]
    pub cache_duration: Duration,
}

impl CachePolicy {
    pub fn new(default_consistency: ConsistencyLevel, cache_duration: Duration) -> Self {
        Self {
            default_consistency,
            cache_duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    pub value_type: ValueType,
    pub kind: ResourceKind,
    pub default_value: Option<Value>,
    pub cache: CachePolicy,
    /// Static metadata copied onto every resource instance at creation.
    pub metadata: BTreeMap<String, Value>,
    /// Declared arguments of an action resource.
    pub arguments: Vec<(String, ValueType)>,
}

impl ResourceDef {
    pub fn new(value_type: ValueType, cache: CachePolicy) -> Self {
        Self {
            value_type,
            kind: ResourceKind::default(),
            default_value: None,
            cache,
            metadata: BTreeMap::new(),
            arguments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
    pub resources: BTreeMap<String, ResourceDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    pub services: BTreeMap<String, ServiceDef>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: BTreeMap::new(),
        }
    }

    pub fn resource(&self, service: &str, resource: &str) -> Option<&ResourceDef> {
        self.services.get(service)?.resources.get(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_serde() {
        assert_eq!(
            serde_json::to_string(&ConsistencyLevel::Weak).unwrap(),
            r#""WEAK""#
        );
        let level: ConsistencyLevel = serde_json::from_str(r#""STRONG""#).unwrap();
        assert_eq!(level, ConsistencyLevel::Strong);
        assert_eq!(ConsistencyLevel::default(), ConsistencyLevel::Normal);
    }

    #[test]
    fn test_cache_policy_serde() {
        let policy = CachePolicy::new(ConsistencyLevel::Normal, Duration::from_millis(1500));
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(
            json,
            r#"{"default_consistency":"NORMAL","cache_duration":1500}"#
        );
    }
}
