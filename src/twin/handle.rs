use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::registry::ResourcePath;
use super::snapshot::{ProviderSnapshot, SnapshotFilter};
use crate::cache;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{CachePolicy, ConsistencyLevel, ResourceKind};
use crate::scope::CommandScope;
use crate::value::{TimedValue, Value, ValueType};

/// Entry point to the twin for one command.
///
/// Every handle derived from it shares the command's scope: once the command
/// returns, all of them fail with [`GatewayError::InvalidScope`].
#[derive(Clone)]
pub struct TwinHandle {
    scope: Arc<CommandScope>,
}

impl TwinHandle {
    pub(crate) fn new(scope: Arc<CommandScope>) -> Self {
        Self { scope }
    }

    /// False once the owning command has returned.
    pub fn is_valid(&self) -> bool {
        self.scope.is_active()
    }

    pub fn create_provider(&self, model: &str, name: &str) -> GatewayResult<ProviderHandle> {
        self.scope.check("twin")?;
        self.scope.twin().create_provider(
            model,
            name,
            self.scope.now(),
            self.scope.notifications(),
        )?;
        self.scope.models().ensure_model(model);
        Ok(ProviderHandle::new(self.scope.clone(), model, name))
    }

    pub fn get_provider(&self, name: &str) -> GatewayResult<Option<ProviderHandle>> {
        self.scope.check("twin")?;
        let twin = self.scope.twin();
        Ok(twin
            .provider(name)
            .ok()
            .map(|p| ProviderHandle::new(self.scope.clone(), &p.model, name)))
    }

    pub fn providers(&self) -> GatewayResult<Vec<ProviderHandle>> {
        self.scope.check("twin")?;
        let twin = self.scope.twin();
        Ok(twin
            .providers()
            .map(|(name, p)| ProviderHandle::new(self.scope.clone(), &p.model, name))
            .collect())
    }

    pub fn providers_for_model(&self, model: &str) -> GatewayResult<Vec<ProviderHandle>> {
        Ok(self
            .providers()?
            .into_iter()
            .filter(|p| p.model == model)
            .collect())
    }

    /// Returns the resource at the given coordinates, creating the provider,
    /// service, resource and their schema on the way when absent.
    pub fn get_or_create_resource(
        &self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        value_type: ValueType,
    ) -> GatewayResult<ResourceHandle> {
        self.scope.check("twin")?;
        let def = self
            .scope
            .models()
            .resolve_resource(model, service, resource, value_type)?;

        let path = ResourcePath::new(provider, service, resource);
        let now = self.scope.now();
        let notifications = self.scope.notifications();
        {
            let mut twin = self.scope.twin();
            twin.ensure_provider(model, provider, now, notifications)?;
            twin.ensure_service(provider, service, now, notifications)?;
            twin.ensure_resource(&path, &def, now, notifications)?;
        }
        // the schema is only recorded once the twin accepted the coordinates
        self.scope
            .models()
            .ensure_resource(model, service, resource, value_type)?;
        Ok(ResourceHandle::new(self.scope.clone(), model, path))
    }

    pub fn get_resource(
        &self,
        provider: &str,
        service: &str,
        resource: &str,
    ) -> GatewayResult<Option<ResourceHandle>> {
        self.scope.check("twin")?;
        let path = ResourcePath::new(provider, service, resource);
        let twin = self.scope.twin();
        if twin.resource(&path).is_err() {
            return Ok(None);
        }
        let model = twin.model_of(provider)?.to_string();
        Ok(Some(ResourceHandle::new(self.scope.clone(), &model, path)))
    }

    /// Removes a provider and everything below it.
    pub fn delete_provider(&self, name: &str) -> GatewayResult<()> {
        self.scope.check("twin")?;
        self.scope
            .twin()
            .delete_provider(name, self.scope.now(), self.scope.notifications())?;
        Ok(())
    }

    /// Owned copy of one provider, safe to hand out of the command.
    pub fn snapshot_provider(&self, name: &str) -> GatewayResult<Option<ProviderSnapshot>> {
        self.scope.check("twin")?;
        let twin = self.scope.twin();
        Ok(twin
            .provider(name)
            .ok()
            .map(|state| ProviderSnapshot::capture(name, state)))
    }

    pub fn filtered_snapshot(&self, filter: &SnapshotFilter) -> GatewayResult<Vec<ProviderSnapshot>> {
        self.scope.check("twin")?;
        let twin = self.scope.twin();
        Ok(twin
            .providers()
            .map(|(name, state)| ProviderSnapshot::capture(name, state))
            .filter_map(|snapshot| filter.apply(snapshot))
            .collect())
    }
}

impl fmt::Debug for TwinHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwinHandle")
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Clone)]
pub struct ProviderHandle {
    scope: Arc<CommandScope>,
    model: String,
    name: String,
}

impl ProviderHandle {
    fn new(scope: Arc<CommandScope>, model: &str, name: &str) -> Self {
        Self {
            scope,
            model: model.to_string(),
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> GatewayResult<&str> {
        self.scope.check(&self.name)?;
        Ok(&self.name)
    }

    pub fn model(&self) -> GatewayResult<&str> {
        self.scope.check(&self.name)?;
        Ok(&self.model)
    }

    pub fn created(&self) -> GatewayResult<DateTime<Utc>> {
        self.scope.check(&self.name)?;
        Ok(self.scope.twin().provider(&self.name)?.created)
    }

    pub fn services(&self) -> GatewayResult<Vec<ServiceHandle>> {
        self.scope.check(&self.name)?;
        let twin = self.scope.twin();
        Ok(twin
            .provider(&self.name)?
            .services
            .keys()
            .map(|service| ServiceHandle::new(self.scope.clone(), &self.model, &self.name, service))
            .collect())
    }

    pub fn get_service(&self, service: &str) -> GatewayResult<Option<ServiceHandle>> {
        self.scope.check(&self.name)?;
        let twin = self.scope.twin();
        Ok(twin
            .service(&self.name, service)
            .ok()
            .map(|_| ServiceHandle::new(self.scope.clone(), &self.model, &self.name, service)))
    }

    pub fn delete(&self) -> GatewayResult<()> {
        self.scope.check(&self.name)?;
        self.scope
            .twin()
            .delete_provider(&self.name, self.scope.now(), self.scope.notifications())?;
        Ok(())
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("model", &self.model)
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Clone)]
pub struct ServiceHandle {
    scope: Arc<CommandScope>,
    model: String,
    provider: String,
    name: String,
}

impl ServiceHandle {
    fn new(scope: Arc<CommandScope>, model: &str, provider: &str, name: &str) -> Self {
        Self {
            scope,
            model: model.to_string(),
            provider: provider.to_string(),
            name: name.to_string(),
        }
    }

    fn label(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }

    pub fn name(&self) -> GatewayResult<&str> {
        self.scope.check(self.label())?;
        Ok(&self.name)
    }

    pub fn provider(&self) -> GatewayResult<&str> {
        self.scope.check(self.label())?;
        Ok(&self.provider)
    }

    pub fn resources(&self) -> GatewayResult<Vec<ResourceHandle>> {
        self.scope.check(self.label())?;
        let twin = self.scope.twin();
        Ok(twin
            .service(&self.provider, &self.name)?
            .resources
            .keys()
            .map(|resource| {
                ResourceHandle::new(
                    self.scope.clone(),
                    &self.model,
                    ResourcePath::new(&self.provider, &self.name, resource),
                )
            })
            .collect())
    }

    pub fn get_resource(&self, resource: &str) -> GatewayResult<Option<ResourceHandle>> {
        self.scope.check(self.label())?;
        let path = ResourcePath::new(&self.provider, &self.name, resource);
        let exists = self.scope.twin().resource(&path).is_ok();
        Ok(exists.then(|| ResourceHandle::new(self.scope.clone(), &self.model, path)))
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .finish()
    }
}

/// A single resource of the twin, read and written through the cache
/// protocol.
#[derive(Clone)]
pub struct ResourceHandle {
    scope: Arc<CommandScope>,
    model: String,
    path: ResourcePath,
}

impl ResourceHandle {
    fn new(scope: Arc<CommandScope>, model: &str, path: ResourcePath) -> Self {
        Self {
            scope,
            model: model.to_string(),
            path,
        }
    }

    pub fn name(&self) -> GatewayResult<&str> {
        self.scope.check(&self.path)?;
        Ok(&self.path.resource)
    }

    pub fn path(&self) -> GatewayResult<&ResourcePath> {
        self.scope.check(&self.path)?;
        Ok(&self.path)
    }

    pub fn model(&self) -> GatewayResult<&str> {
        self.scope.check(&self.path)?;
        Ok(&self.model)
    }

    pub fn value_type(&self) -> GatewayResult<ValueType> {
        self.scope.check(&self.path)?;
        Ok(self.scope.twin().resource(&self.path)?.value_type)
    }

    pub fn kind(&self) -> GatewayResult<ResourceKind> {
        self.scope.check(&self.path)?;
        Ok(self.scope.twin().resource(&self.path)?.kind)
    }

    /// Declared arguments of an action resource, in declaration order.
    pub fn arguments(&self) -> GatewayResult<Vec<(String, ValueType)>> {
        self.scope.check(&self.path)?;
        Ok(self.scope.twin().resource(&self.path)?.arguments.clone())
    }

    pub fn cache_policy(&self) -> GatewayResult<CachePolicy> {
        self.scope.check(&self.path)?;
        Ok(self.scope.twin().resource(&self.path)?.cache.clone())
    }

    /// Reads the value under the requested consistency level.
    pub async fn get_value(&self, level: ConsistencyLevel) -> GatewayResult<TimedValue> {
        self.scope.check(&self.path)?;
        cache::read_value(&self.scope, &self.model, &self.path, Some(level)).await
    }

    /// Reads the value under the resource's own default consistency level.
    pub async fn value(&self) -> GatewayResult<TimedValue> {
        self.scope.check(&self.path)?;
        cache::read_value(&self.scope, &self.model, &self.path, None).await
    }

    /// Writes a value; `None` stamps it with the current time. Returns what
    /// was stored, which a registered setter may have transformed.
    pub async fn set_value(
        &self,
        value: impl Into<Value>,
        timestamp: Option<DateTime<Utc>>,
    ) -> GatewayResult<TimedValue> {
        self.scope.check(&self.path)?;
        let value = value.into();
        let value = (!value.is_null()).then_some(value);
        cache::write_value(&self.scope, &self.model, &self.path, value, timestamp).await
    }

    pub fn get_metadata_value(&self, name: &str) -> GatewayResult<TimedValue> {
        self.scope.check(&self.path)?;
        let twin = self.scope.twin();
        twin.resource(&self.path)?
            .metadata
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::MetadataNotFound {
                resource: self.path.to_string(),
                name: name.to_string(),
            })
    }

    pub fn metadata(&self) -> GatewayResult<BTreeMap<String, TimedValue>> {
        self.scope.check(&self.path)?;
        Ok(self.scope.twin().resource(&self.path)?.metadata.clone())
    }

    pub fn set_metadata_value(
        &self,
        name: &str,
        value: impl Into<Value>,
        timestamp: Option<DateTime<Utc>>,
    ) -> GatewayResult<TimedValue> {
        self.scope.check(&self.path)?;
        let value = value.into();
        let timestamp = timestamp.unwrap_or_else(|| self.scope.now());
        self.scope.twin().apply_metadata(
            &self.path,
            name,
            (!value.is_null()).then_some(value),
            timestamp,
            self.scope.notifications(),
        )
    }

    pub async fn act(&self, arguments: BTreeMap<String, Value>) -> GatewayResult<Value> {
        self.scope.check(&self.path)?;
        cache::act(&self.scope, &self.model, &self.path, arguments).await
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("model", &self.model)
            .field("path", &self.path)
            .finish()
    }
}
