//! # Whiteboard
//!
//! Registry of southbound handlers: getters that pull a fresh value from a
//! device, setters that push a value to it and action handlers. Handlers are
//! keyed by `(model, service, resource)` and may be restricted to a set of
//! providers. Every call is bounded by the timeouts in
//! [`WhiteboardConfig`].
//!
//! Handlers run on the worker while a command is executing, so they must not
//! submit commands to the gateway and wait for them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::WhiteboardConfig;
use crate::value::{TimedValue, Value, ValueType};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("Device unavailable: {0}")]
    Unavailable(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("{0}")]
    Failed(String),
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Failure of a whiteboard call, before it is attributed to a resource.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("no handler registered")]
    NoHandler,
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub model: String,
    pub service: String,
    pub resource: String,
}

impl ResourceKey {
    pub fn new(
        model: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            service: service.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.model, self.service, self.resource)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub model: String,
    pub provider: String,
    pub service: String,
    pub resource: String,
    pub value_type: ValueType,
    /// Value currently held by the twin.
    pub cached: TimedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub model: String,
    pub provider: String,
    pub service: String,
    pub resource: String,
    pub value_type: ValueType,
    pub cached: TimedValue,
    pub value: TimedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActRequest {
    pub model: String,
    pub provider: String,
    pub service: String,
    pub resource: String,
    pub arguments: BTreeMap<String, Value>,
}

/// Reads a fresh value from a device. `Ok(None)` means the device had
/// nothing to report.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PullHandler: Send + Sync {
    async fn pull(&self, request: PullRequest) -> HandlerResult<Option<TimedValue>>;
}

/// Writes a value to a device. The returned value, if any, is what the twin
/// stores; `Ok(None)` stores the requested value unchanged.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn push(&self, request: PushRequest) -> HandlerResult<Option<TimedValue>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn act(&self, request: ActRequest) -> HandlerResult<Value>;
}

struct FnPullHandler<F>(F);

#[async_trait]
impl<F, Fut> PullHandler for FnPullHandler<F>
where
    F: Fn(PullRequest) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<Option<TimedValue>>> + Send,
{
    async fn pull(&self, request: PullRequest) -> HandlerResult<Option<TimedValue>> {
        (self.0)(request).await
    }
}

struct FnPushHandler<F>(F);

#[async_trait]
impl<F, Fut> PushHandler for FnPushHandler<F>
where
    F: Fn(PushRequest) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<Option<TimedValue>>> + Send,
{
    async fn push(&self, request: PushRequest) -> HandlerResult<Option<TimedValue>> {
        (self.0)(request).await
    }
}

struct FnActionHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnActionHandler<F>
where
    F: Fn(ActRequest) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<Value>> + Send,
{
    async fn act(&self, request: ActRequest) -> HandlerResult<Value> {
        (self.0)(request).await
    }
}

/// Wraps an async closure as a [`PullHandler`].
pub fn pull_fn<F, Fut>(f: F) -> Arc<dyn PullHandler>
where
    F: Fn(PullRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Option<TimedValue>>> + Send + 'static,
{
    Arc::new(FnPullHandler(f))
}

/// Wraps an async closure as a [`PushHandler`].
pub fn push_fn<F, Fut>(f: F) -> Arc<dyn PushHandler>
where
    F: Fn(PushRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Option<TimedValue>>> + Send + 'static,
{
    Arc::new(FnPushHandler(f))
}

/// Wraps an async closure as an [`ActionHandler`].
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(ActRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Value>> + Send + 'static,
{
    Arc::new(FnActionHandler(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(Uuid);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Registration<H: ?Sized> {
    id: RegistrationId,
    providers: Option<HashSet<String>>,
    handler: Arc<H>,
}

impl<H: ?Sized> Registration<H> {
    fn accepts(&self, provider: &str) -> bool {
        match &self.providers {
            None => true,
            Some(providers) => providers.is_empty() || providers.contains(provider),
        }
    }
}

type Registry<H> = DashMap<ResourceKey, Vec<Registration<H>>>;

fn register<H: ?Sized>(
    registry: &Registry<H>,
    key: ResourceKey,
    providers: Option<Vec<String>>,
    handler: Arc<H>,
) -> RegistrationId {
    let id = RegistrationId(Uuid::new_v4());
    registry.entry(key).or_default().push(Registration {
        id,
        providers: providers.map(|p| p.into_iter().collect()),
        handler,
    });
    id
}

fn find<H: ?Sized>(registry: &Registry<H>, key: &ResourceKey, provider: &str) -> Option<Arc<H>> {
    // clone the handler out so no map shard stays locked across an await
    registry.get(key).and_then(|registrations| {
        registrations
            .iter()
            .find(|r| r.accepts(provider))
            .map(|r| r.handler.clone())
    })
}

fn remove<H: ?Sized>(registry: &Registry<H>, id: RegistrationId) -> bool {
    let mut removed = false;
    registry.retain(|_, registrations| {
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        removed |= registrations.len() != before;
        !registrations.is_empty()
    });
    removed
}

pub struct Whiteboard {
    pulls: Registry<dyn PullHandler>,
    pushes: Registry<dyn PushHandler>,
    actions: Registry<dyn ActionHandler>,
    config: WhiteboardConfig,
}

impl Whiteboard {
    pub fn new(config: WhiteboardConfig) -> Self {
        Self {
            pulls: DashMap::new(),
            pushes: DashMap::new(),
            actions: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &WhiteboardConfig {
        &self.config
    }

    /// Registers a getter. `providers` restricts it to the named providers;
    /// `None` accepts every provider of the model.
    pub fn register_pull(
        &self,
        key: ResourceKey,
        providers: Option<Vec<String>>,
        handler: Arc<dyn PullHandler>,
    ) -> RegistrationId {
        debug!(%key, "registering pull handler");
        register(&self.pulls, key, providers, handler)
    }

    pub fn register_push(
        &self,
        key: ResourceKey,
        providers: Option<Vec<String>>,
        handler: Arc<dyn PushHandler>,
    ) -> RegistrationId {
        debug!(%key, "registering push handler");
        register(&self.pushes, key, providers, handler)
    }

    pub fn register_action(
        &self,
        key: ResourceKey,
        providers: Option<Vec<String>>,
        handler: Arc<dyn ActionHandler>,
    ) -> RegistrationId {
        debug!(%key, "registering action handler");
        register(&self.actions, key, providers, handler)
    }

    pub fn unregister(&self, id: RegistrationId) -> bool {
        remove(&self.pulls, id) || remove(&self.pushes, id) || remove(&self.actions, id)
    }

    pub fn has_pull(&self, key: &ResourceKey, provider: &str) -> bool {
        find(&self.pulls, key, provider).is_some()
    }

    pub fn has_push(&self, key: &ResourceKey, provider: &str) -> bool {
        find(&self.pushes, key, provider).is_some()
    }

    pub async fn pull(&self, request: PullRequest) -> Result<Option<TimedValue>, CallError> {
        let key = ResourceKey::new(&request.model, &request.service, &request.resource);
        let handler = find(&self.pulls, &key, &request.provider).ok_or(CallError::NoHandler)?;
        bounded(self.config.pull_timeout, &key, handler.pull(request)).await
    }

    pub async fn push(&self, request: PushRequest) -> Result<Option<TimedValue>, CallError> {
        let key = ResourceKey::new(&request.model, &request.service, &request.resource);
        let handler = find(&self.pushes, &key, &request.provider).ok_or(CallError::NoHandler)?;
        bounded(self.config.push_timeout, &key, handler.push(request)).await
    }

    pub async fn act(&self, request: ActRequest) -> Result<Value, CallError> {
        let key = ResourceKey::new(&request.model, &request.service, &request.resource);
        let handler = find(&self.actions, &key, &request.provider).ok_or(CallError::NoHandler)?;
        bounded(self.config.act_timeout, &key, handler.act(request)).await
    }
}

async fn bounded<T>(
    limit: Duration,
    key: &ResourceKey,
    call: impl Future<Output = HandlerResult<T>>,
) -> Result<T, CallError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(%key, ?limit, "southbound handler timed out");
            Err(CallError::Timeout(limit))
        }
    }
}

impl fmt::Debug for Whiteboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Whiteboard")
            .field("pulls", &self.pulls.len())
            .field("pushes", &self.pushes.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(provider: &str) -> PullRequest {
        PullRequest {
            model: "m".into(),
            provider: provider.into(),
            service: "s".into(),
            resource: "r".into(),
            value_type: ValueType::Integer,
            cached: TimedValue::unset(),
        }
    }

    fn config(pull_timeout: Duration) -> WhiteboardConfig {
        WhiteboardConfig {
            pull_timeout,
            ..WhiteboardConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pull_with_mock_handler() {
        let mut mock = MockPullHandler::new();
        mock.expect_pull()
            .times(1)
            .returning(|req| Ok(Some(TimedValue::new(req.provider.len() as i64, Utc::now()))));

        let board = Whiteboard::new(WhiteboardConfig::default());
        board.register_pull(ResourceKey::new("m", "s", "r"), None, Arc::new(mock));

        let value = board.pull(request("abc")).await.unwrap().unwrap();
        assert_eq!(value.value(), Some(&Value::Integer(3)));
    }

    #[tokio::test]
    async fn test_provider_filter() {
        let board = Whiteboard::new(WhiteboardConfig::default());
        let key = ResourceKey::new("m", "s", "r");
        board.register_pull(
            key.clone(),
            Some(vec!["only".to_string()]),
            pull_fn(|_| async { Ok(Some(TimedValue::new(1, Utc::now()))) }),
        );
        board.register_pull(
            key.clone(),
            None,
            pull_fn(|_| async { Ok(Some(TimedValue::new(2, Utc::now()))) }),
        );

        let only = board.pull(request("only")).await.unwrap().unwrap();
        assert_eq!(only.value(), Some(&Value::Integer(1)));
        let other = board.pull(request("other")).await.unwrap().unwrap();
        assert_eq!(other.value(), Some(&Value::Integer(2)));
    }

    #[tokio::test]
    async fn test_missing_handler_and_unregister() {
        let board = Whiteboard::new(WhiteboardConfig::default());
        let key = ResourceKey::new("m", "s", "r");
        assert_eq!(board.pull(request("p")).await, Err(CallError::NoHandler));

        let id = board.register_pull(key.clone(), None, pull_fn(|_| async { Ok(None) }));
        assert!(board.has_pull(&key, "p"));
        assert!(board.unregister(id));
        assert!(!board.has_pull(&key, "p"));
        assert!(!board.unregister(id));
    }

    #[tokio::test]
    async fn test_pull_timeout() {
        let board = Whiteboard::new(config(Duration::from_millis(20)));
        board.register_pull(
            ResourceKey::new("m", "s", "r"),
            None,
            pull_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(None)
            }),
        );
        assert_eq!(
            board.pull(request("p")).await,
            Err(CallError::Timeout(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut mock = MockActionHandler::new();
        mock.expect_act()
            .returning(|_| Err(HandlerError::Unavailable("offline".into())));
        let board = Whiteboard::new(WhiteboardConfig::default());
        board.register_action(ResourceKey::new("m", "s", "reboot"), None, Arc::new(mock));

        let result = board
            .act(ActRequest {
                model: "m".into(),
                provider: "p".into(),
                service: "s".into(),
                resource: "reboot".into(),
                arguments: BTreeMap::new(),
            })
            .await;
        assert_eq!(
            result,
            Err(CallError::Handler(HandlerError::Unavailable("offline".into())))
        );
    }
}
