//! The gateway facade.
//!
//! A [`Gateway`] owns the twin, the event bus, the handler whiteboard and the
//! command worker. Everything that reads or changes the twin goes through
//! [`Gateway::submit`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::command::{Command, GatewayThread, Promise};
use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::event::{
    EventBus, EventReceiver, ImmediateNotifier, NotificationAccumulator, TopicFilter,
};
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use crate::model::{ModelHandle, ModelRegistry};
use crate::scope::GatewayCore;
use crate::twin::TwinHandle;
use crate::value::{TimedValue, Value, ValueType};
use crate::whiteboard::{
    ActionHandler, PullHandler, PushHandler, RegistrationId, ResourceKey, Whiteboard,
};

/// A value reported by a device adapter outside of any command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUpdate {
    pub model: String,
    pub provider: String,
    pub service: String,
    pub resource: String,
    pub value_type: ValueType,
    pub value: Value,
    /// Defaults to the gateway clock when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct Gateway {
    config: GatewayConfig,
    bus: Arc<EventBus>,
    whiteboard: Arc<Whiteboard>,
    clock: Arc<dyn Clock>,
    metrics: Arc<GatewayMetrics>,
    worker: GatewayThread,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Starts a gateway whose timestamps come from `clock`.
    pub fn with_clock(config: GatewayConfig, clock: Arc<dyn Clock>) -> GatewayResult<Self> {
        config.validate()?;
        let bus = Arc::new(EventBus::new(config.event_buffer_size));
        let whiteboard = Arc::new(Whiteboard::new(config.whiteboard.clone()));
        let metrics = Arc::new(GatewayMetrics::new());
        let core = Arc::new(GatewayCore::new(
            ModelRegistry::new(&config.cache),
            whiteboard.clone(),
            clock.clone(),
        ));
        let worker = GatewayThread::start(&config, core, bus.clone(), metrics.clone())?;
        info!("gateway started");
        Ok(Self {
            config,
            bus,
            whiteboard,
            clock,
            metrics,
            worker,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn whiteboard(&self) -> &Whiteboard {
        &self.whiteboard
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Queues a closure command. Never blocks: a full queue fails with
    /// `QueueSaturation`, a stopped gateway with `ShutDown`.
    pub fn submit<F, Fut, T>(&self, command: F) -> GatewayResult<Promise<T>>
    where
        F: FnOnce(TwinHandle, ModelHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = GatewayResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.submit(command)
    }

    pub fn submit_command<C: Command>(&self, command: C) -> GatewayResult<Promise<C::Output>> {
        self.worker.submit(command)
    }

    pub fn schedule<C: Command>(&self, delay: Duration, command: C) -> GatewayResult<Promise<C::Output>> {
        self.worker.schedule(delay, command)
    }

    /// Applies a device-reported value: creates the resource if needed, then
    /// writes it under the usual monotonicity rule.
    pub fn push_update(&self, update: DataUpdate) -> GatewayResult<Promise<TimedValue>> {
        self.submit(move |twin, _| async move {
            let resource = twin.get_or_create_resource(
                &update.model,
                &update.provider,
                &update.service,
                &update.resource,
                update.value_type,
            )?;
            resource.set_value(update.value, update.timestamp).await
        })
    }

    pub fn subscribe(&self, filter: TopicFilter) -> EventReceiver {
        self.bus.subscribe(filter)
    }

    pub fn subscribe_pattern(&self, pattern: &str) -> GatewayResult<EventReceiver> {
        Ok(self.bus.subscribe_pattern(pattern)?)
    }

    /// Accumulator for notifications raised outside the twin API: the batch
    /// of the command running right now, or an immediate publisher when the
    /// worker is idle.
    pub fn notifier(&self) -> Arc<dyn NotificationAccumulator> {
        match self.worker.current_batch() {
            Some(batch) => batch as Arc<dyn NotificationAccumulator>,
            None => Arc::new(ImmediateNotifier::new(self.bus.clone())),
        }
    }

    pub fn register_getter(
        &self,
        model: &str,
        service: &str,
        resource: &str,
        handler: Arc<dyn PullHandler>,
    ) -> RegistrationId {
        self.whiteboard
            .register_pull(ResourceKey::new(model, service, resource), None, handler)
    }

    pub fn register_setter(
        &self,
        model: &str,
        service: &str,
        resource: &str,
        handler: Arc<dyn PushHandler>,
    ) -> RegistrationId {
        self.whiteboard
            .register_push(ResourceKey::new(model, service, resource), None, handler)
    }

    pub fn register_action(
        &self,
        model: &str,
        service: &str,
        resource: &str,
        handler: Arc<dyn ActionHandler>,
    ) -> RegistrationId {
        self.whiteboard
            .register_action(ResourceKey::new(model, service, resource), None, handler)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
        info!("gateway stopped");
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("running", &self.is_running())
            .field("metrics", &self.metrics())
            .finish()
    }
}
