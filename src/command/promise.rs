use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::executor::ExecutorThread;
use crate::error::{GatewayError, GatewayResult};

/// Single-resolution result of a submitted command.
///
/// A `Promise` is a plain future: await it from any runtime. Continuations
/// attached with [`Promise::then`] run on the gateway's continuation thread
/// in the order their inputs complete.
pub struct Promise<T> {
    rx: oneshot::Receiver<GatewayResult<T>>,
    runner: Arc<ExecutorThread>,
}

pub(crate) struct Resolver<T> {
    tx: oneshot::Sender<GatewayResult<T>>,
}

impl<T> Resolver<T> {
    /// Completes the promise. Returns false if nobody is waiting anymore.
    pub(crate) fn resolve(self, result: GatewayResult<T>) -> bool {
        self.tx.send(result).is_ok()
    }
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn pending(runner: Arc<ExecutorThread>) -> (Resolver<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (Resolver { tx }, Self { rx, runner })
    }

    /// Non-blocking check; yields the result once the promise has resolved.
    pub fn try_result(&mut self) -> Option<GatewayResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(GatewayError::Cancelled)),
        }
    }

    /// Chains `f` onto this promise. `f` sees failures too, so it can
    /// recover from them.
    pub fn then<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(GatewayResult<T>) -> GatewayResult<U> + Send + 'static,
    {
        let runner = self.runner.clone();
        let (resolver, next) = Promise::pending(runner.clone());
        let chained = runner.spawn(async move {
            let result = self.await;
            resolver.resolve(f(result));
        });
        if chained.is_err() {
            tracing::debug!("Continuation dropped: runner is shut down");
        }
        next
    }

    /// Like [`Promise::then`], but only runs `f` on success.
    pub fn map<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(|result| result.map(f))
    }
}

impl<T> Future for Promise<T> {
    type Output = GatewayResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(GatewayError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}
