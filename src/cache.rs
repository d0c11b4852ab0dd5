//! # Resource Cache Protocol
//!
//! Decides, per read, whether the cached value of a resource is good enough
//! or a live pull is needed, and decides, per write, whether an incoming
//! value supersedes the cached one.
//!
//! ## Reads
//!
//! | Level    | Getter registered | Outcome                                  |
//! |----------|-------------------|------------------------------------------|
//! | any      | no                | cached value                             |
//! | `WEAK`   | yes               | cached value                             |
//! | `NORMAL` | yes               | cached value while `age <= cache_duration`, else pull |
//! | `STRONG` | yes               | pull                                     |
//!
//! A value that was never set has no age, so `NORMAL` pulls it.
//!
//! ## Writes
//!
//! A write is accepted when its timestamp is not earlier than the cached
//! one; equal timestamps are accepted. Anything older is a
//! [`GatewayError::StaleWrite`] and leaves the store untouched.
//!
//! Everything here runs on the worker inside a command, so no two pulls or
//! pushes for the same resource can interleave.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock;
use crate::error::{GatewayError, GatewayResult};
use crate::event::ActionNotification;
use crate::model::{CachePolicy, ConsistencyLevel, ResourceKind};
use crate::scope::CommandScope;
use crate::twin::ResourcePath;
use crate::value::{TimedValue, Value, ValueType};
use crate::whiteboard::{ActRequest, CallError, PullRequest, PushRequest, ResourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    UseCache,
    Pull,
}

/// Chooses between the cache and a live pull.
pub fn plan_read(
    level: ConsistencyLevel,
    cached: &TimedValue,
    cache_duration: Duration,
    has_getter: bool,
    now: DateTime<Utc>,
) -> ReadPlan {
    if !has_getter {
        return ReadPlan::UseCache;
    }
    match level {
        ConsistencyLevel::Weak => ReadPlan::UseCache,
        ConsistencyLevel::Strong => ReadPlan::Pull,
        ConsistencyLevel::Normal => match cached.timestamp() {
            Some(timestamp) if clock::age(now, timestamp) <= cache_duration => {
                ReadPlan::UseCache
            }
            _ => ReadPlan::Pull,
        },
    }
}

/// True when a value stamped `incoming` may replace one stamped `cached`.
pub fn supersedes(cached: Option<DateTime<Utc>>, incoming: DateTime<Utc>) -> bool {
    match cached {
        Some(cached) => incoming >= cached,
        None => true,
    }
}

pub(crate) fn check_monotonic(
    path: &ResourcePath,
    cached: Option<DateTime<Utc>>,
    incoming: DateTime<Utc>,
) -> GatewayResult<()> {
    match cached {
        Some(cached) if !supersedes(Some(cached), incoming) => Err(GatewayError::StaleWrite {
            resource: path.to_string(),
            cached,
            attempted: incoming,
        }),
        _ => Ok(()),
    }
}

/// What a read or write needs to know about a resource, copied out so the
/// registry lock is never held across a southbound call.
struct ResourceView {
    value_type: ValueType,
    kind: ResourceKind,
    policy: CachePolicy,
    cached: TimedValue,
    arguments: Vec<(String, ValueType)>,
}

fn view(scope: &CommandScope, path: &ResourcePath) -> GatewayResult<ResourceView> {
    let twin = scope.twin();
    let state = twin.resource(path)?;
    Ok(ResourceView {
        value_type: state.value_type,
        kind: state.kind,
        policy: state.cache.clone(),
        cached: state.value.clone(),
        arguments: state.arguments.clone(),
    })
}

fn key(model: &str, path: &ResourcePath) -> ResourceKey {
    ResourceKey::new(model, &path.service, &path.resource)
}

/// Reads a resource under `level`, or under the resource's default level
/// when `None`.
pub(crate) async fn read_value(
    scope: &CommandScope,
    model: &str,
    path: &ResourcePath,
    level: Option<ConsistencyLevel>,
) -> GatewayResult<TimedValue> {
    let view = view(scope, path)?;
    if view.kind == ResourceKind::Action {
        return Err(GatewayError::ActionResource(path.to_string()));
    }
    let level = level.unwrap_or(view.policy.default_consistency);
    let has_getter = scope
        .whiteboard()
        .has_pull(&key(model, path), &path.provider);

    match plan_read(
        level,
        &view.cached,
        view.policy.cache_duration,
        has_getter,
        scope.now(),
    ) {
        ReadPlan::UseCache => Ok(view.cached),
        ReadPlan::Pull => pull_value(scope, model, path, view.value_type, view.cached).await,
    }
}

/// Asks the getter for a fresh value and stores it.
///
/// A getter that fails, times out or reports nothing leaves the cache as it
/// was; the failure carries the retained value. A pulled value older than
/// the cache is not stored and the cached value is returned.
pub(crate) async fn pull_value(
    scope: &CommandScope,
    model: &str,
    path: &ResourcePath,
    value_type: ValueType,
    cached: TimedValue,
) -> GatewayResult<TimedValue> {
    let request = PullRequest {
        model: model.to_string(),
        provider: path.provider.clone(),
        service: path.service.clone(),
        resource: path.resource.clone(),
        value_type,
        cached: cached.clone(),
    };

    let pulled = match scope.whiteboard().pull(request).await {
        Ok(Some(pulled)) => pulled,
        Ok(None) => {
            return Err(GatewayError::PullFailure {
                resource: path.to_string(),
                reason: "getter returned no value".to_string(),
                cached,
            })
        }
        Err(e) => {
            warn!(resource = %path, "pull failed: {}", e);
            return Err(GatewayError::PullFailure {
                resource: path.to_string(),
                reason: e.to_string(),
                cached,
            });
        }
    };

    let timestamp = pulled.timestamp().unwrap_or_else(|| scope.now());
    let mut twin = scope.twin();
    match twin.apply_value(path, pulled.into_value(), timestamp, scope.notifications()) {
        Ok(update) => Ok(update.stored),
        Err(GatewayError::StaleWrite { .. }) => {
            debug!(resource = %path, %timestamp, "pulled value older than cache, keeping cache");
            Ok(twin.resource(path)?.value.clone())
        }
        Err(GatewayError::TypeMismatch { expected, got, .. }) => Err(GatewayError::PullFailure {
            resource: path.to_string(),
            reason: format!("getter returned {} for a {} resource", got, expected),
            cached,
        }),
        Err(e) => Err(e),
    }
}

/// Writes a value, routing it through the setter when one is registered.
///
/// A missing timestamp means "now". The monotonicity rule is checked before
/// the setter is called and again on the value the setter returns.
pub(crate) async fn write_value(
    scope: &CommandScope,
    model: &str,
    path: &ResourcePath,
    value: Option<Value>,
    timestamp: Option<DateTime<Utc>>,
) -> GatewayResult<TimedValue> {
    let view = view(scope, path)?;
    if view.kind == ResourceKind::Action {
        return Err(GatewayError::ActionResource(path.to_string()));
    }
    let timestamp = timestamp.unwrap_or_else(|| scope.now());
    check_monotonic(path, view.cached.timestamp(), timestamp)?;

    let value = match value {
        Some(v) => {
            let got = v.value_type();
            Some(
                v.coerce(view.value_type)
                    .ok_or_else(|| GatewayError::TypeMismatch {
                        resource: path.to_string(),
                        expected: view.value_type,
                        got,
                    })?,
            )
        }
        None => None,
    };
    let requested = TimedValue::with_parts(value, Some(timestamp));

    let to_store = if scope
        .whiteboard()
        .has_push(&key(model, path), &path.provider)
    {
        push_value(scope, model, path, view.value_type, view.cached, requested).await?
    } else {
        requested
    };

    let stored_at = to_store.timestamp().unwrap_or(timestamp);
    let update = scope.twin().apply_value(
        path,
        to_store.into_value(),
        stored_at,
        scope.notifications(),
    )?;
    debug!(resource = %path, previous = ?update.previous.value(), "value written");
    Ok(update.stored)
}

/// Hands an update to the setter and returns what should be stored.
pub(crate) async fn push_value(
    scope: &CommandScope,
    model: &str,
    path: &ResourcePath,
    value_type: ValueType,
    cached: TimedValue,
    requested: TimedValue,
) -> GatewayResult<TimedValue> {
    let request = PushRequest {
        model: model.to_string(),
        provider: path.provider.clone(),
        service: path.service.clone(),
        resource: path.resource.clone(),
        value_type,
        cached,
        value: requested.clone(),
    };

    match scope.whiteboard().push(request).await {
        Ok(Some(transformed)) => {
            let fallback = requested.timestamp();
            let timestamp = transformed.timestamp().or(fallback);
            Ok(TimedValue::with_parts(transformed.into_value(), timestamp))
        }
        Ok(None) => Ok(requested),
        Err(e) => {
            warn!(resource = %path, "push failed: {}", e);
            Err(GatewayError::PushFailure {
                resource: path.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Invokes an action resource.
pub(crate) async fn act(
    scope: &CommandScope,
    model: &str,
    path: &ResourcePath,
    arguments: BTreeMap<String, Value>,
) -> GatewayResult<Value> {
    let view = view(scope, path)?;
    if view.kind != ResourceKind::Action {
        return Err(GatewayError::NotAnAction(path.to_string()));
    }
    let arguments = conform_arguments(path, &view.arguments, arguments)?;

    let request = ActRequest {
        model: model.to_string(),
        provider: path.provider.clone(),
        service: path.service.clone(),
        resource: path.resource.clone(),
        arguments: arguments.clone(),
    };

    let result = match scope.whiteboard().act(request).await {
        Ok(result) => result,
        Err(CallError::NoHandler) => {
            return Err(GatewayError::NoHandler {
                kind: "action",
                resource: path.to_string(),
            })
        }
        Err(e) => {
            return Err(GatewayError::ActionFailure {
                resource: path.to_string(),
                reason: e.to_string(),
            })
        }
    };

    scope.notifications().record_action(ActionNotification {
        model: model.to_string(),
        provider: path.provider.clone(),
        service: path.service.clone(),
        resource: path.resource.clone(),
        arguments,
        result: result.clone(),
        timestamp: scope.now(),
    })?;
    Ok(result)
}

/// Coerces every declared argument to its declared type. Undeclared
/// arguments are passed through untouched.
fn conform_arguments(
    path: &ResourcePath,
    declared: &[(String, ValueType)],
    mut arguments: BTreeMap<String, Value>,
) -> GatewayResult<BTreeMap<String, Value>> {
    for (name, expected) in declared {
        if let Some(value) = arguments.remove(name) {
            let got = value.value_type();
            let value = value
                .coerce(*expected)
                .ok_or_else(|| GatewayError::TypeMismatch {
                    resource: format!("{}({})", path, name),
                    expected: *expected,
                    got,
                })?;
            arguments.insert(name.clone(), value);
        }
    }
    Ok(arguments)
}
