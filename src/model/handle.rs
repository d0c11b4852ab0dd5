use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{ConsistencyLevel, ModelDef, ResourceDef, ResourceKind};
use crate::error::{GatewayError, GatewayResult};
use crate::scope::CommandScope;
use crate::value::{Value, ValueType};

/// Schema view given to a command, alongside its [`TwinHandle`].
///
/// [`TwinHandle`]: crate::twin::TwinHandle
#[derive(Clone)]
pub struct ModelHandle {
    scope: Arc<CommandScope>,
}

impl ModelHandle {
    pub(crate) fn new(scope: Arc<CommandScope>) -> Self {
        Self { scope }
    }

    pub fn models(&self) -> GatewayResult<Vec<String>> {
        self.scope.check("models")?;
        Ok(self.scope.models().names())
    }

    pub fn get_model(&self, name: &str) -> GatewayResult<Option<ModelDef>> {
        self.scope.check("models")?;
        Ok(self.scope.models().get(name).cloned())
    }

    pub fn create_model(&self, name: &str) -> GatewayResult<ModelDef> {
        self.scope.check("models")?;
        Ok(self.scope.models().ensure_model(name).clone())
    }

    /// Removes a model that no provider uses.
    pub fn delete_model(&self, name: &str) -> GatewayResult<bool> {
        self.scope.check("models")?;
        let in_use = self
            .scope
            .twin()
            .providers()
            .any(|(_, provider)| provider.model == name);
        if in_use {
            return Err(GatewayError::command(format!(
                "model {} still has providers",
                name
            )));
        }
        Ok(self.scope.models().remove_model(name).is_some())
    }

    /// Starts the declaration of a resource, pre-filled with the current
    /// definition if there is one.
    pub fn resource_builder(
        &self,
        model: &str,
        service: &str,
        resource: &str,
    ) -> GatewayResult<ResourceBuilder> {
        self.scope.check("models")?;
        let models = self.scope.models();
        let def = match models.resource(model, service, resource) {
            Some(def) => def.clone(),
            None => ResourceDef::new(ValueType::Any, models.default_cache_policy().clone()),
        };
        Ok(ResourceBuilder {
            scope: self.scope.clone(),
            model: model.to_string(),
            service: service.to_string(),
            resource: resource.to_string(),
            def,
        })
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("scope", &self.scope)
            .finish()
    }
}

pub struct ResourceBuilder {
    scope: Arc<CommandScope>,
    model: String,
    service: String,
    resource: String,
    def: ResourceDef,
}

impl ResourceBuilder {
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.def.value_type = value_type;
        self
    }

    pub fn kind(mut self, kind: ResourceKind) -> Self {
        self.def.kind = kind;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.def.default_value = Some(value.into());
        self
    }

    pub fn consistency(mut self, level: ConsistencyLevel) -> Self {
        self.def.cache.default_consistency = level;
        self
    }

    pub fn cache_duration(mut self, duration: Duration) -> Self {
        self.def.cache.cache_duration = duration;
        self
    }

    pub fn metadata(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.def.metadata.insert(name.to_string(), value.into());
        self
    }

    pub fn argument(mut self, name: &str, value_type: ValueType) -> Self {
        self.def.arguments.push((name.to_string(), value_type));
        self
    }

    /// Stores the definition. Resources already present in the twin keep
    /// the definition they were created with.
    pub fn build(self) -> GatewayResult<ResourceDef> {
        self.scope.check("models")?;
        if let Some(default) = &self.def.default_value {
            if default.clone().coerce(self.def.value_type).is_none() {
                return Err(GatewayError::TypeMismatch {
                    resource: format!("{}/{}/{}", self.model, self.service, self.resource),
                    expected: self.def.value_type,
                    got: default.value_type(),
                });
            }
        }
        Ok(self.scope.models().define_resource(
            &self.model,
            &self.service,
            &self.resource,
            self.def,
        ))
    }
}

impl fmt::Debug for ResourceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceBuilder")
            .field("model", &self.model)
            .field("service", &self.service)
            .field("resource", &self.resource)
            .field("def", &self.def)
            .finish()
    }
}
