use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Handle to the worker pool that serves requests and fires timers.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    handle: Handle,
}

impl WorkQueue {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// The pool of the calling task, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a plain closure on a worker.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
        self.handle.spawn(async move { job() })
    }
}
