//! # Command Scheduler
//!
//! Commands are the only way to touch the twin. They are queued, then run
//! one at a time by a single worker that hands each a fresh scope and
//! notification batch; results come back through [`Promise`]s completed on a
//! separate continuation thread.

mod executor;
mod promise;
mod scheduler;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{GatewayError, GatewayResult};
use crate::model::ModelHandle;
use crate::twin::TwinHandle;

pub(crate) use executor::ExecutorThread;
pub use promise::Promise;
pub(crate) use promise::Resolver;
pub(crate) use scheduler::GatewayThread;

/// A unit of work run with exclusive access to the twin.
///
/// Closures of the form `|twin, models| async move { .. }` are commands too;
/// implement this trait when a command carries its own state.
pub trait Command: Send + 'static {
    type Output: Send + 'static;

    fn call(self, twin: TwinHandle, models: ModelHandle)
        -> BoxFuture<'static, GatewayResult<Self::Output>>;
}

impl<F, Fut, T> Command for F
where
    F: FnOnce(TwinHandle, ModelHandle) -> Fut + Send + 'static,
    Fut: Future<Output = GatewayResult<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn call(self, twin: TwinHandle, models: ModelHandle) -> BoxFuture<'static, GatewayResult<T>> {
        Box::pin(self(twin, models))
    }
}

/// Result of one run: whether the command succeeded, and the deferred
/// completion of its promise.
pub(crate) struct JobOutcome {
    pub(crate) succeeded: bool,
    pub(crate) deliver: Box<dyn FnOnce() + Send>,
}

/// A started job. `abort` fails the promise if `outcome` is dropped before
/// it finishes.
pub(crate) struct RunningJob {
    pub(crate) outcome: BoxFuture<'static, JobOutcome>,
    pub(crate) abort: Box<dyn FnOnce(GatewayError) + Send>,
}

/// Type-erased queued command.
pub(crate) trait Job: Send {
    fn start(self: Box<Self>, twin: TwinHandle, models: ModelHandle) -> RunningJob;

    /// Fails the promise without running the command.
    fn cancel(self: Box<Self>, error: GatewayError);
}

pub(crate) struct CommandJob<C: Command> {
    command: C,
    resolver: Resolver<C::Output>,
}

impl<C: Command> CommandJob<C> {
    pub(crate) fn new(command: C, resolver: Resolver<C::Output>) -> Self {
        Self { command, resolver }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

type ResolverSlot<T> = Arc<Mutex<Option<Resolver<T>>>>;

fn take<T>(slot: &ResolverSlot<T>) -> Option<Resolver<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl<C: Command> Job for CommandJob<C> {
    fn start(self: Box<Self>, twin: TwinHandle, models: ModelHandle) -> RunningJob {
        let CommandJob { command, resolver } = *self;
        let slot: ResolverSlot<C::Output> = Arc::new(Mutex::new(Some(resolver)));
        let on_abort = slot.clone();

        let outcome = Box::pin(async move {
            let result = AssertUnwindSafe(async move { command.call(twin, models).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(GatewayError::CommandPanicked(panic_message(payload)))
                });
            JobOutcome {
                succeeded: result.is_ok(),
                deliver: Box::new(move || {
                    if let Some(resolver) = take(&slot) {
                        resolver.resolve(result);
                    }
                }),
            }
        });

        RunningJob {
            outcome,
            abort: Box::new(move |error| {
                if let Some(resolver) = take(&on_abort) {
                    resolver.resolve(Err(error));
                }
            }),
        }
    }

    fn cancel(self: Box<Self>, error: GatewayError) {
        self.resolver.resolve(Err(error));
    }
}
