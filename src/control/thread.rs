//! The control thread
//!
//! Every mutation of the control tree runs here, one job at a time, the way
//! a GUI message loop serializes window messages.

use parking_lot::Mutex;
use std::thread::{JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::MediaError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct ControlThread {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl ControlThread {
    pub fn spawn(name: &str) -> Result<Self, MediaError> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    job();
                }
                debug!("Control thread exiting");
            })
            .map_err(|e| MediaError::ControlThread(e.to_string()))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Queue `job` without waiting for it.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<(), MediaError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(MediaError::ControlThread("shut down".into()));
        };
        sender
            .send(Box::new(job))
            .map_err(|_| MediaError::ControlThread("thread exited".into()))
    }

    /// Run `job` on the control thread and wait for its result.
    /// Runs inline when called from the control thread itself.
    pub fn invoke<R, F>(&self, job: F) -> Result<R, MediaError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }

        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let _ = tx.send(job());
        })?;
        rx.blocking_recv()
            .map_err(|_| MediaError::ControlThread("job was dropped".into()))
    }

    /// Stop accepting jobs, drain the queue and join the thread.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Control thread panicked");
            }
        }
    }
}

impl Drop for ControlThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
