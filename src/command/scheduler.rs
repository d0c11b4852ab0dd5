use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::Builder;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, debug_span, info, warn, Instrument};

use super::{Command, CommandJob, ExecutorThread, Job, Promise, RunningJob};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::event::{EventBus, NotificationBatch};
use crate::metrics::GatewayMetrics;
use crate::model::ModelHandle;
use crate::scope::{CommandScope, GatewayCore, ScopeGuard};
use crate::twin::TwinHandle;

type CurrentBatch = Arc<Mutex<Option<Arc<NotificationBatch>>>>;

/// Enqueue side of the worker, shared with the scheduled-task runner.
#[derive(Clone)]
struct Submitter {
    sender: mpsc::Sender<Box<dyn Job>>,
    running: Arc<AtomicBool>,
    capacity: usize,
    continuations: Arc<ExecutorThread>,
    metrics: Arc<GatewayMetrics>,
}

impl Submitter {
    fn submit<C: Command>(&self, command: C) -> GatewayResult<Promise<C::Output>> {
        if !self.running.load(Ordering::Acquire) {
            self.metrics.record_rejected();
            return Err(GatewayError::ShutDown);
        }
        let (resolver, promise) = Promise::pending(self.continuations.clone());
        let job: Box<dyn Job> = Box::new(CommandJob::new(command, resolver));
        match self.sender.try_send(job) {
            Ok(()) => {
                self.metrics.record_submitted();
                Ok(promise)
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record_rejected();
                warn!(capacity = self.capacity, "command queue saturated");
                Err(GatewayError::QueueSaturation {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_rejected();
                Err(GatewayError::ShutDown)
            }
        }
    }
}

/// The single worker that owns the twin, plus the two helper threads
/// completing promises and firing scheduled commands.
pub(crate) struct GatewayThread {
    submitter: Submitter,
    timers: Arc<ExecutorThread>,
    current: CurrentBatch,
    shutdown_tx: broadcast::Sender<()>,
    finished: Mutex<Option<oneshot::Receiver<()>>>,
    join_timeout: Duration,
    shutdown_grace: Duration,
}

struct Worker {
    core: Arc<GatewayCore>,
    bus: Arc<EventBus>,
    current: CurrentBatch,
    metrics: Arc<GatewayMetrics>,
    continuations: Arc<ExecutorThread>,
    command_timeout: Duration,
    queue: mpsc::Receiver<Box<dyn Job>>,
    shutdown_rx: broadcast::Receiver<()>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

impl GatewayThread {
    pub(crate) fn start(
        config: &GatewayConfig,
        core: Arc<GatewayCore>,
        bus: Arc<EventBus>,
        metrics: Arc<GatewayMetrics>,
    ) -> GatewayResult<Self> {
        let continuations = ExecutorThread::start("twin-gateway-continuations")?;
        let timers = ExecutorThread::start("twin-gateway-scheduled")?;
        let (sender, queue) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (finished_tx, finished_rx) = oneshot::channel();
        let current: CurrentBatch = Arc::new(Mutex::new(None));

        let worker = Worker {
            core,
            bus,
            current: current.clone(),
            metrics: metrics.clone(),
            continuations: continuations.clone(),
            command_timeout: config.command_timeout,
            queue,
            shutdown_rx,
        };
        let runtime = Builder::new_current_thread().enable_all().build()?;
        thread::Builder::new()
            .name("twin-gateway-worker".to_string())
            .spawn(move || {
                runtime.block_on(worker.run());
                let _ = finished_tx.send(());
            })?;
        info!(capacity = config.queue_capacity, "gateway worker started");

        Ok(Self {
            submitter: Submitter {
                sender,
                running: Arc::new(AtomicBool::new(true)),
                capacity: config.queue_capacity,
                continuations,
                metrics,
            },
            timers,
            current,
            shutdown_tx,
            finished: Mutex::new(Some(finished_rx)),
            join_timeout: config.join_timeout,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.submitter.running.load(Ordering::Acquire)
    }

    pub(crate) fn submit<C: Command>(&self, command: C) -> GatewayResult<Promise<C::Output>> {
        self.submitter.submit(command)
    }

    /// Submits `command` once `delay` has elapsed. Queue saturation at that
    /// point fails the returned promise.
    pub(crate) fn schedule<C: Command>(
        &self,
        delay: Duration,
        command: C,
    ) -> GatewayResult<Promise<C::Output>> {
        if !self.is_running() {
            return Err(GatewayError::ShutDown);
        }
        let (resolver, promise) = Promise::pending(self.submitter.continuations.clone());
        let submitter = self.submitter.clone();
        let mut stop = self.shutdown_tx.subscribe();
        self.timers.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let result = match submitter.submit(command) {
                        Ok(promise) => promise.await,
                        Err(e) => Err(e),
                    };
                    resolver.resolve(result);
                }
                _ = stop.recv() => {
                    resolver.resolve(Err(GatewayError::ShutDown));
                }
            }
        })?;
        Ok(promise)
    }

    /// The batch of the command currently running on the worker, if any.
    pub(crate) fn current_batch(&self) -> Option<Arc<NotificationBatch>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops the worker, then the helper threads. Later submissions fail
    /// with [`GatewayError::ShutDown`].
    pub(crate) async fn shutdown(&self) {
        if !self.submitter.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("shutting down gateway worker");
        let _ = self.shutdown_tx.send(());

        let finished = self
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(finished) = finished {
            if tokio::time::timeout(self.join_timeout, finished).await.is_err() {
                warn!(
                    "gateway worker did not stop within {:?}, leaving it behind",
                    self.join_timeout
                );
            }
        }

        self.timers.shutdown(self.shutdown_grace).await;
        self.submitter
            .continuations
            .shutdown(self.shutdown_grace)
            .await;
        info!("gateway worker stopped");
    }
}

impl Drop for GatewayThread {
    fn drop(&mut self) {
        if self.submitter.running.swap(false, Ordering::AcqRel) {
            let _ = self.shutdown_tx.send(());
        }
    }
}

impl Worker {
    async fn run(mut self) {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => break,
                job = self.queue.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            if self.execute(job).await == Flow::Stop {
                break;
            }
        }

        self.queue.close();
        let mut cancelled = 0usize;
        while let Ok(job) = self.queue.try_recv() {
            self.metrics.record_dropped();
            job.cancel(GatewayError::ShutDown);
            cancelled += 1;
        }
        if cancelled > 0 {
            debug!(cancelled, "cancelled queued commands at shutdown");
        }
    }

    async fn execute(&mut self, job: Box<dyn Job>) -> Flow {
        let started = Instant::now();
        let batch = Arc::new(NotificationBatch::new(self.bus.clone()));
        let scope = CommandScope::open(self.core.clone(), batch.clone());
        let span = debug_span!("command", id = %scope.id());
        let guard = ScopeGuard(scope.clone());
        self.set_current(Some(batch.clone()));

        let RunningJob { outcome, abort } =
            job.start(TwinHandle::new(scope.clone()), ModelHandle::new(scope));
        let limit = self.command_timeout;
        let finished = tokio::select! {
            result = tokio::time::timeout(limit, outcome.instrument(span)) => Some(result),
            _ = self.shutdown_rx.recv() => None,
        };

        drop(guard);
        self.set_current(None);
        let elapsed = started.elapsed();

        match finished {
            Some(Ok(outcome)) => {
                if outcome.succeeded {
                    let report = batch.flush();
                    self.metrics
                        .record_published(report.published, report.failed);
                } else {
                    batch.discard();
                }
                self.metrics.record_finished(outcome.succeeded, elapsed);
                debug!(succeeded = outcome.succeeded, ?elapsed, "command finished");
                self.continuations.deliver(outcome.deliver);
                Flow::Continue
            }
            Some(Err(_)) => {
                batch.discard();
                self.metrics.record_finished(false, elapsed);
                let timeout = self.command_timeout;
                warn!(?timeout, "command timed out");
                self.continuations
                    .deliver(Box::new(move || abort(GatewayError::CommandTimeout { timeout })));
                Flow::Continue
            }
            None => {
                batch.discard();
                self.metrics.record_finished(false, elapsed);
                warn!("command interrupted by shutdown");
                self.continuations
                    .deliver(Box::new(move || abort(GatewayError::ShutDown)));
                Flow::Stop
            }
        }
    }

    fn set_current(&self, batch: Option<Arc<NotificationBatch>>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = batch;
    }
}
