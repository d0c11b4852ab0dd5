use std::collections::BTreeMap;

use tracing::debug;

use super::{CachePolicy, ModelDef, ResourceDef, ServiceDef};
use crate::config::CacheConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::value::ValueType;

/// Every known model, keyed by name. Owned by the gateway and only touched
/// from the worker.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDef>,
    defaults: CachePolicy,
}

impl ModelRegistry {
    pub fn new(cache: &CacheConfig) -> Self {
        Self {
            models: BTreeMap::new(),
            defaults: CachePolicy::new(cache.default_consistency, cache.default_cache_duration),
        }
    }

    pub fn default_cache_policy(&self) -> &CachePolicy {
        &self.defaults
    }

    pub fn get(&self, model: &str) -> Option<&ModelDef> {
        self.models.get(model)
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn resource(&self, model: &str, service: &str, resource: &str) -> Option<&ResourceDef> {
        self.models.get(model)?.resource(service, resource)
    }

    pub fn ensure_model(&mut self, model: &str) -> &mut ModelDef {
        self.models.entry(model.to_string()).or_insert_with(|| {
            debug!(model, "model created");
            ModelDef::new(model)
        })
    }

    pub fn ensure_service(&mut self, model: &str, service: &str) -> &mut ServiceDef {
        self.ensure_model(model)
            .services
            .entry(service.to_string())
            .or_default()
    }

    /// Returns the definition a resource would be created with, without
    /// recording anything. Unknown resources get the default policy. A known
    /// resource whose type conflicts with `value_type` is rejected;
    /// [`ValueType::Any`] on either side matches everything.
    pub fn resolve_resource(
        &self,
        model: &str,
        service: &str,
        resource: &str,
        value_type: ValueType,
    ) -> GatewayResult<ResourceDef> {
        let def = match self.resource(model, service, resource) {
            Some(def) => def,
            None => return Ok(ResourceDef::new(value_type, self.defaults.clone())),
        };
        if def.value_type != value_type
            && def.value_type != ValueType::Any
            && value_type != ValueType::Any
        {
            return Err(GatewayError::TypeMismatch {
                resource: format!("{}/{}/{}", model, service, resource),
                expected: def.value_type,
                got: value_type,
            });
        }
        Ok(def.clone())
    }

    /// Like [`resolve_resource`](Self::resolve_resource), but records the
    /// model, service and resource when unknown.
    pub fn ensure_resource(
        &mut self,
        model: &str,
        service: &str,
        resource: &str,
        value_type: ValueType,
    ) -> GatewayResult<ResourceDef> {
        let def = self.resolve_resource(model, service, resource, value_type)?;
        if self.resource(model, service, resource).is_none() {
            self.define_resource(model, service, resource, def.clone());
        }
        Ok(def)
    }

    /// Declares or replaces a resource definition.
    pub fn define_resource(
        &mut self,
        model: &str,
        service: &str,
        resource: &str,
        def: ResourceDef,
    ) -> ResourceDef {
        self.ensure_service(model, service)
            .resources
            .insert(resource.to_string(), def.clone());
        def
    }

    pub fn remove_model(&mut self, model: &str) -> Option<ModelDef> {
        self.models.remove(model)
    }
}
