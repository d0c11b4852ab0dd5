use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{GatewayError, GatewayResult};
use crate::event::NotificationAccumulator;
use crate::model::ModelRegistry;
use crate::twin::TwinRegistry;
use crate::whiteboard::Whiteboard;

/// State shared by every command: the twin, the schema, the southbound
/// handlers and the clock. Only the worker locks the registries.
pub(crate) struct GatewayCore {
    pub(crate) twin: Mutex<TwinRegistry>,
    pub(crate) models: Mutex<ModelRegistry>,
    pub(crate) whiteboard: Arc<Whiteboard>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl GatewayCore {
    pub(crate) fn new(
        models: ModelRegistry,
        whiteboard: Arc<Whiteboard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            twin: Mutex::new(TwinRegistry::default()),
            models: Mutex::new(models),
            whiteboard,
            clock,
        }
    }
}

/// Liveness of the handles given to one command.
pub(crate) struct CommandScope {
    id: Uuid,
    active: AtomicBool,
    core: Arc<GatewayCore>,
    notifications: Arc<dyn NotificationAccumulator>,
}

impl CommandScope {
    pub(crate) fn open(
        core: Arc<GatewayCore>,
        notifications: Arc<dyn NotificationAccumulator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            active: AtomicBool::new(true),
            core,
            notifications,
        })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn close(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Fails with [`GatewayError::InvalidScope`] once the owning command has
    /// returned.
    pub(crate) fn check(&self, target: impl fmt::Display) -> GatewayResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(GatewayError::InvalidScope(format!(
                "{} used after command {} returned",
                target, self.id
            )))
        }
    }

    pub(crate) fn twin(&self) -> MutexGuard<'_, TwinRegistry> {
        self.core.twin.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn models(&self) -> MutexGuard<'_, ModelRegistry> {
        self.core.models.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn whiteboard(&self) -> &Whiteboard {
        &self.core.whiteboard
    }

    pub(crate) fn notifications(&self) -> &dyn NotificationAccumulator {
        self.notifications.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.core.clock.now()
    }
}

impl fmt::Debug for CommandScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandScope")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Closes the scope when dropped, including when the command future is
/// abandoned mid-flight.
pub(crate) struct ScopeGuard(pub(crate) Arc<CommandScope>);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}
