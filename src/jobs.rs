//! # Background Jobs
//!
//! Edge-index rebuilds and clustering runs over a whole library can take
//! seconds to minutes. They run on a worker thread and cooperate with the
//! caller through two pieces of shared state:
//!
//! - a [`CancelToken`] the worker polls between batches, and
//! - a [`ProgressCounter`] it bumps as pairs are scored.
//!
//! Abandoning a job never corrupts the structure it was rebuilding: workers
//! compute into a fresh value and publish only on success.

use crate::error::{EngineError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Cooperative cancellation flag, cheap to clone.
///
/// Needs no async runtime: workers only poll it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. a host application's shutdown token.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A token cancelled together with this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token() }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Bail out with [`EngineError::Cancelled`] once cancellation was requested.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] when the token is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Work done so far against the total after pre-filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub scored: usize,
    pub total: usize,
}

impl Progress {
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let fraction = self.scored as f64 / self.total as f64;
            fraction.min(1.0)
        }
    }
}

/// Shared counters a caller can poll while a job runs.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    scored: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl ProgressCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.scored.store(0, Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, by: usize) -> Progress {
        let scored = self.scored.fetch_add(by, Ordering::SeqCst) + by;
        Progress {
            scored,
            total: self.total.load(Ordering::SeqCst),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Progress {
        Progress {
            scored: self.scored.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

/// Everything a long-running operation needs to cooperate with its caller.
#[derive(Debug, Clone, Default)]
pub struct JobControl {
    pub cancel: CancelToken,
    pub progress: ProgressCounter,
}

impl JobControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Handle to a job running on its own thread.
#[derive(Debug)]
pub struct BackgroundJob<T> {
    control: JobControl,
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> BackgroundJob<T> {
    /// Run `work` on a named worker thread.
    pub(crate) fn spawn<F>(name: &str, work: F) -> std::io::Result<Self>
    where
        F: FnOnce(&JobControl) -> Result<T> + Send + 'static,
    {
        let control = JobControl::new();
        let worker_control = control.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || work(&worker_control))?;
        log::debug!("spawned background job '{name}'");
        Ok(Self { control, handle })
    }

    pub fn cancel(&self) {
        self.control.cancel.cancel();
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        self.control.progress.snapshot()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job and return its result.
    ///
    /// # Errors
    ///
    /// The job's own error, or [`EngineError::Cancelled`] if the worker panicked.
    pub fn join(self) -> Result<T> {
        self.handle.join().unwrap_or_else(|_| {
            log::error!("background job panicked");
            Err(EngineError::Cancelled)
        })
    }
}
