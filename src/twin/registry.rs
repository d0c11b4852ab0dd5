use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache;
use crate::error::{GatewayError, GatewayResult};
use crate::event::{
    DataNotification, LifecycleNotification, LifecycleStatus, MetadataNotification,
    NotificationAccumulator,
};
use crate::model::{CachePolicy, ResourceDef, ResourceKind};
use crate::value::{TimedValue, Value, ValueType};

/// Coordinates of a resource inside the twin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourcePath {
    pub provider: String,
    pub service: String,
    pub resource: String,
}

impl ResourcePath {
    pub fn new(
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            service: service.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.service, self.resource)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResourceState {
    pub(crate) value_type: ValueType,
    pub(crate) kind: ResourceKind,
    pub(crate) cache: CachePolicy,
    pub(crate) value: TimedValue,
    pub(crate) metadata: BTreeMap<String, TimedValue>,
    pub(crate) arguments: Vec<(String, ValueType)>,
}

impl ResourceState {
    fn from_def(def: &ResourceDef) -> Self {
        Self {
            value_type: def.value_type,
            kind: def.kind,
            cache: def.cache.clone(),
            value: TimedValue::initial(def.default_value.clone()),
            metadata: def
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), TimedValue::initial(Some(v.clone()))))
                .collect(),
            arguments: def.arguments.clone(),
        }
    }

    pub(crate) fn metadata_values(&self) -> BTreeMap<String, Value> {
        self.metadata
            .iter()
            .filter_map(|(k, v)| v.value().map(|value| (k.clone(), value.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ServiceState {
    pub(crate) resources: BTreeMap<String, ResourceState>,
}

#[derive(Debug, Clone)]
pub(crate) struct ProviderState {
    pub(crate) model: String,
    pub(crate) created: DateTime<Utc>,
    pub(crate) services: BTreeMap<String, ServiceState>,
}

/// Result of storing a value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ValueUpdate {
    pub(crate) previous: TimedValue,
    pub(crate) stored: TimedValue,
}

/// In-memory tree of providers, services and resources.
///
/// Provider names are unique across models. Every mutation records its
/// notification into the accumulator it is given.
#[derive(Debug, Default)]
pub(crate) struct TwinRegistry {
    providers: BTreeMap<String, ProviderState>,
}

fn lifecycle(
    status: LifecycleStatus,
    model: &str,
    provider: &str,
    service: Option<&str>,
    resource: Option<&str>,
    now: DateTime<Utc>,
) -> LifecycleNotification {
    LifecycleNotification {
        status,
        model: model.to_string(),
        provider: provider.to_string(),
        service: service.map(str::to_string),
        resource: resource.map(str::to_string),
        timestamp: now,
    }
}

impl TwinRegistry {
    pub(crate) fn provider(&self, name: &str) -> GatewayResult<&ProviderState> {
        self.providers
            .get(name)
            .ok_or_else(|| GatewayError::ProviderNotFound(name.to_string()))
    }

    pub(crate) fn providers(&self) -> impl Iterator<Item = (&String, &ProviderState)> {
        self.providers.iter()
    }

    pub(crate) fn service(&self, provider: &str, service: &str) -> GatewayResult<&ServiceState> {
        self.provider(provider)?
            .services
            .get(service)
            .ok_or_else(|| GatewayError::ServiceNotFound {
                provider: provider.to_string(),
                service: service.to_string(),
            })
    }

    pub(crate) fn resource(&self, path: &ResourcePath) -> GatewayResult<&ResourceState> {
        self.service(&path.provider, &path.service)?
            .resources
            .get(&path.resource)
            .ok_or_else(|| GatewayError::ResourceNotFound(path.to_string()))
    }

    fn resource_mut(&mut self, path: &ResourcePath) -> GatewayResult<(&str, &mut ResourceState)> {
        let provider = self
            .providers
            .get_mut(&path.provider)
            .ok_or_else(|| GatewayError::ProviderNotFound(path.provider.clone()))?;
        let resource = provider
            .services
            .get_mut(&path.service)
            .and_then(|s| s.resources.get_mut(&path.resource))
            .ok_or_else(|| GatewayError::ResourceNotFound(path.to_string()))?;
        Ok((provider.model.as_str(), resource))
    }

    pub(crate) fn model_of(&self, provider: &str) -> GatewayResult<&str> {
        Ok(self.provider(provider)?.model.as_str())
    }

    pub(crate) fn create_provider(
        &mut self,
        model: &str,
        name: &str,
        now: DateTime<Utc>,
        notifications: &dyn NotificationAccumulator,
    ) -> GatewayResult<()> {
        if self.providers.contains_key(name) {
            return Err(GatewayError::ProviderAlreadyExists(name.to_string()));
        }
        self.insert_provider(model, name, now, notifications)
    }

    /// Creates the provider if absent. An existing provider of another model
    /// is an error.
    pub(crate) fn ensure_provider(
        &mut self,
        model: &str,
        name: &str,
        now: DateTime<Utc>,
        notifications: &dyn NotificationAccumulator,
    ) -> GatewayResult<()> {
        match self.providers.get(name) {
            Some(existing) if existing.model == model => Ok(()),
            Some(existing) => Err(GatewayError::ModelMismatch {
                provider: name.to_string(),
                expected: model.to_string(),
                actual: existing.model.clone(),
            }),
            None => self.insert_provider(model, name, now, notifications),
        }
    }

    fn insert_provider(
        &mut self,
        model: &str,
        name: &str,
        now: DateTime<Utc>,
        notifications: &dyn NotificationAccumulator,
    ) -> GatewayResult<()> {
        notifications.record_lifecycle(lifecycle(
            LifecycleStatus::ProviderCreated,
            model,
            name,
            None,
            None,
            now,
        ))?;
        self.providers.insert(
            name.to_string(),
            ProviderState {
                model: model.to_string(),
                created: now,
                services: BTreeMap::new(),
            },
        );
        info!(model, provider = name, "provider created");
        Ok(())
    }

    pub(crate) fn ensure_service(
        &mut self,
        provider: &str,
        service: &str,
        now: DateTime<Utc>,
        notifications: &dyn NotificationAccumulator,
    ) -> GatewayResult<()> {
        let state = self
            .providers
            .get_mut(provider)
            .ok_or_else(|| GatewayError::ProviderNotFound(provider.to_string()))?;
        if state.services.contains_key(service) {
            return Ok(());
        }
        notifications.record_lifecycle(lifecycle(
            LifecycleStatus::ServiceCreated,
            &state.model,
            provider,
            Some(service),
            None,
            now,
        ))?;
        state
            .services
            .insert(service.to_string(), ServiceState::default());
        debug!(provider, service, "service created");
        Ok(())
    }

    /// Creates the resource from `def` if absent. An existing resource must
    /// have a compatible type.
    pub(crate) fn ensure_resource(
        &mut self,
        path: &ResourcePath,
        def: &ResourceDef,
        now: DateTime<Utc>,
        notifications: &dyn NotificationAccumulator,
    ) -> GatewayResult<()> {
        let provider = self
            .providers
            .get_mut(&path.provider)
            .ok_or_else(|| GatewayError::ProviderNotFound(path.provider.clone()))?;
        let service = provider.services.get_mut(&path.service).ok_or_else(|| {
            GatewayError::ServiceNotFound {
                provider: path.provider.clone(),
                service: path.service.clone(),
            }
        })?;

        if let Some(existing) = service.resources.get(&path.resource) {
            if existing.value_type != def.value_type
                && existing.value_type != ValueType::Any
                && def.value_type != ValueType::Any
            {
                return Err(GatewayError::TypeMismatch {
                    resource: path.to_string(),
                    expected: existing.value_type,
                    got: def.value_type,
                });
            }
            return Ok(());
        }

        notifications.record_lifecycle(lifecycle(
            LifecycleStatus::ResourceCreated,
            &provider.model,
            &path.provider,
            Some(&path.service),
            Some(&path.resource),
            now,
        ))?;
        service
            .resources
            .insert(path.resource.clone(), ResourceState::from_def(def));
        debug!(resource = %path, "resource created");
        Ok(())
    }

    /// Removes a provider and everything under it.
    pub(crate) fn delete_provider(
        &mut self,
        name: &str,
        now: DateTime<Utc>,
        notifications: &dyn NotificationAccumulator,
    ) -> GatewayResult<ProviderState> {
        let model = self.model_of(name)?.to_string();
        notifications.record_lifecycle(lifecycle(
            LifecycleStatus::ProviderDeleted,
            &model,
            name,
            None,
            None,
            now,
        ))?;
        let removed = self
            .providers
            .remove(name)
            .ok_or_else(|| GatewayError::ProviderNotFound(name.to_string()))?;
        info!(model, provider = name, "provider deleted");
        Ok(removed)
    }

    /// Stores `value` at `timestamp` if it passes the monotonicity rule,
    /// recording a data change.
    pub(crate) fn apply_value(
        &mut self,
        path: &ResourcePath,
        value: Option<Value>,
        timestamp: DateTime<Utc>,
        notifications: &dyn NotificationAccumulator,
    ) -> GatewayResult<ValueUpdate> {
        let (model, state) = self.resource_mut(path)?;
        if state.kind == ResourceKind::Action {
            return Err(GatewayError::ActionResource(path.to_string()));
        }
        let value = conform(path, state.value_type, value)?;
        cache::check_monotonic(path, state.value.timestamp(), timestamp)?;

        notifications.record_data_change(DataNotification {
            model: model.to_string(),
            provider: path.provider.clone(),
            service: path.service.clone(),
            resource: path.resource.clone(),
            value_type: state.value_type,
            old_value: state.value.value().cloned(),
            new_value: value.clone(),
            timestamp,
        })?;

        let stored = TimedValue::with_parts(value, Some(timestamp));
        let previous = std::mem::replace(&mut state.value, stored.clone());
        Ok(ValueUpdate { previous, stored })
    }

    pub(crate) fn apply_metadata(
        &mut self,
        path: &ResourcePath,
        name: &str,
        value: Option<Value>,
        timestamp: DateTime<Utc>,
        notifications: &dyn NotificationAccumulator,
    ) -> GatewayResult<TimedValue> {
        let (model, state) = self.resource_mut(path)?;
        let current = state.metadata.get(name).and_then(TimedValue::timestamp);
        cache::check_monotonic(path, current, timestamp)?;

        let stored = TimedValue::with_parts(value, Some(timestamp));
        let old_metadata = state.metadata_values();
        state.metadata.insert(name.to_string(), stored.clone());
        let new_metadata = state.metadata_values();

        notifications.record_metadata_change(MetadataNotification {
            model: model.to_string(),
            provider: path.provider.clone(),
            service: path.service.clone(),
            resource: path.resource.clone(),
            old_metadata,
            new_metadata,
            timestamp,
        })?;
        Ok(stored)
    }
}

fn conform(
    path: &ResourcePath,
    expected: ValueType,
    value: Option<Value>,
) -> GatewayResult<Option<Value>> {
    match value {
        None => Ok(None),
        Some(value) => {
            let got = value.value_type();
            value
                .coerce(expected)
                .map(Some)
                .ok_or_else(|| GatewayError::TypeMismatch {
                    resource: path.to_string(),
                    expected,
                    got,
                })
        }
    }
}
