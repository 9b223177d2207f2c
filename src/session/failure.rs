use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::crash;
use crate::error::MediaError;

/// What happens after an unrecoverable pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Write diagnostics and abort the process
    Abort,
    /// Record the failure and let a supervisor decide
    Record,
}

/// Pipeline-wide fatal error latch. The first reported error wins.
pub struct FailureState {
    policy: FatalPolicy,
    failed: AtomicBool,
    reason: Mutex<Option<String>>,
    signal: Condvar,
}

impl FailureState {
    pub fn new(policy: FatalPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            failed: AtomicBool::new(false),
            reason: Mutex::new(None),
            signal: Condvar::new(),
        })
    }

    pub fn policy(&self) -> FatalPolicy {
        self.policy
    }

    pub fn report(&self, err: &MediaError) {
        self.report_with_snapshot(err, None);
    }

    /// Latch `err`, attaching a diagnostic snapshot to the crash report if aborting.
    pub fn report_with_snapshot(&self, err: &MediaError, snapshot: Option<serde_json::Value>) {
        let reason = err.to_string();
        error!("Fatal pipeline error: {}", reason);

        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason.clone());
            }
            self.failed.store(true, Ordering::Release);
            self.signal.notify_all();
        }

        if self.policy == FatalPolicy::Abort {
            crash::abort_with_diagnostics(&reason, snapshot);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Block until a failure is reported.
    pub fn wait(&self) -> String {
        let mut slot = self.reason.lock();
        loop {
            if let Some(reason) = slot.as_ref() {
                return reason.clone();
            }
            self.signal.wait(&mut slot);
        }
    }

    /// Block up to `timeout`; returns the reason if a failure was reported.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<String> {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            let _ = self.signal.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let failure = FailureState::new(FatalPolicy::Record);
        assert!(!failure.has_failed());

        failure.report(&MediaError::DeviceLost("display 0".into()));
        failure.report(&MediaError::Invariant("second"));

        assert!(failure.has_failed());
        assert_eq!(failure.reason().as_deref(), Some("device lost: display 0"));
    }

    #[test]
    fn test_wait_wakes_on_report() {
        let failure = FailureState::new(FatalPolicy::Record);
        let waiter = {
            let failure = failure.clone();
            std::thread::spawn(move || failure.wait())
        };
        std::thread::sleep(Duration::from_millis(10));
        failure.report(&MediaError::ClockStart);
        assert_eq!(waiter.join().unwrap(), MediaError::ClockStart.to_string());
    }

    #[test]
    fn test_wait_timeout_without_failure() {
        let failure = FailureState::new(FatalPolicy::Record);
        assert!(failure.wait_timeout(Duration::from_millis(5)).is_none());
    }
}
