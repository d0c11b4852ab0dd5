use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

struct Tracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

struct InFlight(Arc<Tracker>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// A dedicated OS thread driving a single-threaded tokio runtime.
///
/// Tasks spawned here run one at a time, in the order they become ready.
pub(crate) struct ExecutorThread {
    name: String,
    handle: Handle,
    closed: AtomicBool,
    tracker: Arc<Tracker>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    stopped: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ExecutorThread {
    pub(crate) fn start(name: &str) -> GatewayResult<Arc<Self>> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (stopped_tx, stopped_rx) = oneshot::channel::<()>();

        thread::Builder::new().name(name.to_string()).spawn(move || {
            runtime.block_on(async {
                let _ = stop_rx.await;
            });
            // Dropping the runtime cancels whatever is still queued.
            drop(runtime);
            let _ = stopped_tx.send(());
        })?;

        debug!("Executor {} started", name);
        Ok(Arc::new(Self {
            name: name.to_string(),
            handle,
            closed: AtomicBool::new(false),
            tracker: Arc::new(Tracker {
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            stop: Mutex::new(Some(stop_tx)),
            stopped: Mutex::new(Some(stopped_rx)),
        }))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn spawn<F>(&self, task: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return Err(GatewayError::ShutDown);
        }
        self.tracker.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(self.tracker.clone());
        self.handle.spawn(async move {
            let _guard = guard;
            task.await;
        });
        Ok(())
    }

    /// Runs `f` on this thread, or inline once the executor is closed so a
    /// completion is never lost.
    pub(crate) fn deliver(&self, f: Box<dyn FnOnce() + Send>) {
        let slot = Arc::new(Mutex::new(Some(f)));
        let queued = slot.clone();
        let spawned = self.spawn(async move {
            let f = queued.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(f) = f {
                f();
            }
        });
        if spawned.is_err() {
            let f = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(f) = f {
                f();
            }
        }
    }

    /// Stops accepting work, waits up to `grace` for spawned tasks to finish,
    /// then stops the thread, cancelling anything left.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained = tokio::time::timeout(grace, async {
            loop {
                let notified = self.tracker.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.tracker.in_flight.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "Executor {} cancelling {} task(s) after {:?} grace period",
                self.name,
                self.tracker.in_flight.load(Ordering::Acquire),
                grace
            );
        }

        let stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        let stopped = self
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stopped) = stopped {
            let _ = stopped.await;
        }
        debug!("Executor {} stopped", self.name);
    }
}

impl Drop for ExecutorThread {
    fn drop(&mut self) {
        let stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
    }
}
