use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::registry::{ProviderState, ResourceState, ServiceState};
use crate::model::ResourceKind;
use crate::value::{TimedValue, Value, ValueType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub name: String,
    pub value_type: ValueType,
    pub kind: ResourceKind,
    pub value: TimedValue,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub resources: Vec<ResourceSnapshot>,
}

/// Owned, read-only copy of a provider taken inside a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSnapshot {
    pub model: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub services: Vec<ServiceSnapshot>,
}

impl ResourceSnapshot {
    fn capture(name: &str, state: &ResourceState) -> Self {
        Self {
            name: name.to_string(),
            value_type: state.value_type,
            kind: state.kind,
            value: state.value.clone(),
            metadata: state.metadata_values(),
        }
    }
}

impl ServiceSnapshot {
    fn capture(name: &str, state: &ServiceState) -> Self {
        Self {
            name: name.to_string(),
            resources: state
                .resources
                .iter()
                .map(|(name, r)| ResourceSnapshot::capture(name, r))
                .collect(),
        }
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSnapshot> {
        self.resources.iter().find(|r| r.name == name)
    }
}

impl ProviderSnapshot {
    pub(crate) fn capture(name: &str, state: &ProviderState) -> Self {
        Self {
            model: state.model.clone(),
            name: name.to_string(),
            created: state.created,
            services: state
                .services
                .iter()
                .map(|(name, s)| ServiceSnapshot::capture(name, s))
                .collect(),
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSnapshot> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn resource(&self, service: &str, resource: &str) -> Option<&ResourceSnapshot> {
        self.service(service)?.resource(resource)
    }
}

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Predicates applied to snapshots, innermost first: resources, then
/// services, then providers. A service left without resources, or a provider
/// left without services, is dropped once a narrower predicate is set.
#[derive(Default)]
pub struct SnapshotFilter {
    provider: Option<Predicate<ProviderSnapshot>>,
    service: Option<Predicate<ServiceSnapshot>>,
    resource: Option<Predicate<ResourceSnapshot>>,
}

impl SnapshotFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ProviderSnapshot) -> bool + Send + Sync + 'static,
    {
        self.provider = Some(Box::new(predicate));
        self
    }

    pub fn service<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ServiceSnapshot) -> bool + Send + Sync + 'static,
    {
        self.service = Some(Box::new(predicate));
        self
    }

    pub fn resource<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ResourceSnapshot) -> bool + Send + Sync + 'static,
    {
        self.resource = Some(Box::new(predicate));
        self
    }

    pub(crate) fn apply(&self, mut snapshot: ProviderSnapshot) -> Option<ProviderSnapshot> {
        if let Some(keep) = &self.resource {
            for service in &mut snapshot.services {
                service.resources.retain(|r| keep(r));
            }
            snapshot.services.retain(|s| !s.resources.is_empty());
        }
        if let Some(keep) = &self.service {
            snapshot.services.retain(|s| keep(s));
        }
        if (self.resource.is_some() || self.service.is_some()) && snapshot.services.is_empty() {
            return None;
        }
        match &self.provider {
            Some(keep) if !keep(&snapshot) => None,
            _ => Some(snapshot),
        }
    }
}

impl fmt::Debug for SnapshotFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotFilter")
            .field("provider", &self.provider.is_some())
            .field("service", &self.service.is_some())
            .field("resource", &self.resource.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str, value: i64) -> ResourceSnapshot {
        ResourceSnapshot {
            name: name.into(),
            value_type: ValueType::Integer,
            kind: ResourceKind::Sensor,
            value: TimedValue::new(value, Utc::now()),
            metadata: BTreeMap::new(),
        }
    }

    fn provider(name: &str) -> ProviderSnapshot {
        ProviderSnapshot {
            model: "m".into(),
            name: name.into(),
            created: Utc::now(),
            services: vec![
                ServiceSnapshot {
                    name: "env".into(),
                    resources: vec![resource("temperature", 21), resource("humidity", 40)],
                },
                ServiceSnapshot {
                    name: "admin".into(),
                    resources: vec![resource("uptime", 9)],
                },
            ],
        }
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let snapshot = provider("p");
        assert_eq!(SnapshotFilter::new().apply(snapshot.clone()), Some(snapshot));
    }

    #[test]
    fn test_resource_filter_trims_services() {
        let filter = SnapshotFilter::new().resource(|r| r.name == "temperature");
        let filtered = filter.apply(provider("p")).unwrap();
        assert_eq!(filtered.services.len(), 1);
        assert!(filtered.resource("env", "temperature").is_some());
        assert!(filtered.resource("env", "humidity").is_none());

        let none = SnapshotFilter::new().resource(|r| r.name == "missing");
        assert_eq!(none.apply(provider("p")), None);
    }

    #[test]
    fn test_provider_filter() {
        let filter = SnapshotFilter::new()
            .service(|s| s.name == "admin")
            .provider(|p| p.name.starts_with("sensor"));
        assert!(filter.apply(provider("sensor-1")).is_some());
        assert!(filter.apply(provider("lamp")).is_none());
    }
}
