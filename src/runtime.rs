//! Bounded execution runtime for collaborator I/O.
//!
//! Evidence collection and reasoning calls are I/O bound and independent
//! within a pass. This module provides a small, bounded, thread-based worker
//! pool that fans such calls out, per-call timeouts, retry with exponential
//! backoff, and a cancellation token that supports both a graceful stop at
//! pass boundaries and an urgent abort of outstanding work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CollaboratorError;

/// Worker pool and retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum collaborator calls in flight at once.
    pub max_in_flight: usize,
    /// Per-call timeout in milliseconds.
    pub call_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            call_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Per-call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            multiplier: 2.0,
            max_backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1` (attempts are 1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = raw.min(self.max_backoff_ms as f64).max(0.0) as u64;
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Default)]
struct CancelState {
    stop_requested: AtomicBool,
    cancelled: AtomicBool,
}

/// Cooperative cancellation shared between a caller and a running discovery.
///
/// - `request_stop` lets the current pass finish, then ends the run.
/// - `cancel` aborts outstanding collection; the current pass is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

impl CancellationToken {
    /// Creates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop after the current pass completes.
    pub fn request_stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Abort outstanding work immediately.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.stop_requested.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first. Returns false if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(5);
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// Marker returned when a batch was abandoned because of cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Shared permits for collaborator calls in flight.
///
/// A permit is held until the collaborator call itself returns, so a call
/// abandoned after its timeout keeps its permit until it finishes.
#[derive(Debug, Clone)]
struct CallPermits {
    release: Sender<()>,
    acquire: Receiver<()>,
}

impl CallPermits {
    fn new(capacity: usize) -> Self {
        let (release, acquire) = bounded(capacity);
        for _ in 0..capacity {
            let _ = release.try_send(());
        }
        Self { release, acquire }
    }

    fn acquire(&self, timeout: Duration) -> Option<CallPermit> {
        self.acquire.recv_timeout(timeout).ok().map(|()| CallPermit {
            release: self.release.clone(),
        })
    }
}

struct CallPermit {
    release: Sender<()>,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        let _ = self.release.try_send(());
    }
}

fn timeout_error(operation: &str, timeout: Duration) -> CollaboratorError {
    CollaboratorError::Timeout {
        operation: operation.to_string(),
        duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Retries `attempt_fn` with exponential backoff while errors are retryable.
///
/// Returns the last error once attempts are exhausted, and
/// `CollaboratorError::Cancelled` if the token is cancelled between attempts.
///
/// # Errors
///
/// See above.
pub fn retry_with_backoff<R, F>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<R, CollaboratorError>
where
    F: FnMut(u32) -> Result<R, CollaboratorError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(CollaboratorError::Cancelled);
        }
        match attempt_fn(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "retrying"
                );
                if !cancel.sleep(delay) {
                    return Err(CollaboratorError::Cancelled);
                }
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    warn!(operation, attempts = attempt, error = %err, "giving up");
                }
                return Err(err);
            }
        }
    }
}

/// A bounded pool that maps a batch of independent jobs concurrently and
/// caps the collaborator calls its jobs have in flight.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_in_flight: usize,
    permits: CallPermits,
}

impl WorkerPool {
    /// Creates a pool with at most `max_in_flight` concurrent jobs and
    /// collaborator calls.
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            max_in_flight,
            permits: CallPermits::new(max_in_flight),
        }
    }

    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Runs `f` on a helper thread and waits at most `timeout` for its
    /// result, counting the wait for a free call permit.
    ///
    /// A call that exceeds the timeout is abandoned: its result is dropped,
    /// but its permit is only returned once `f` finishes.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError::Timeout` if no permit or no result arrives
    /// in time, or `CollaboratorError::Backend` if the helper thread could
    /// not be spawned or panicked.
    pub fn call_with_timeout<R, F>(
        &self,
        operation: &str,
        timeout: Duration,
        f: F,
    ) -> Result<R, CollaboratorError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let started = Instant::now();
        let permit = self
            .permits
            .acquire(timeout)
            .ok_or_else(|| timeout_error(operation, timeout))?;

        let (tx, rx) = bounded::<R>(1);
        thread::Builder::new()
            .name(format!("precog-call-{operation}"))
            .spawn(move || {
                let result = f();
                drop(permit);
                let _ = tx.send(result);
            })
            .map_err(|e| CollaboratorError::backend(format!("failed to spawn call thread: {e}")))?;

        let remaining = timeout.saturating_sub(started.elapsed());
        rx.recv_timeout(remaining).map_err(|err| match err {
            RecvTimeoutError::Timeout => timeout_error(operation, timeout),
            RecvTimeoutError::Disconnected => CollaboratorError::backend(format!(
                "{operation} call thread terminated without a result"
            )),
        })
    }

    /// Applies `f` to every item, preserving input order in the output.
    ///
    /// Workers stop picking up jobs once the token is cancelled and the whole
    /// batch is abandoned: partial results are never returned.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the token was cancelled before every job finished.
    pub fn map<T, R, F>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<Vec<R>, Cancelled>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let total = items.len();
        if total == 0 {
            return if cancel.is_cancelled() { Err(Cancelled) } else { Ok(Vec::new()) };
        }

        let workers = self.max_in_flight.min(total);
        let (job_tx, job_rx) = bounded::<(usize, T)>(workers);
        let (result_tx, result_rx) = unbounded::<(usize, R)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let f = &f;
                scope.spawn(move || {
                    while let Ok((idx, item)) = job_rx.recv() {
                        if cancel.is_cancelled() {
                            continue;
                        }
                        let _ = result_tx.send((idx, f(item)));
                    }
                });
            }
            drop(result_tx);

            for (idx, item) in items.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                if job_tx.send((idx, item)).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        for (idx, result) in result_rx.try_iter() {
            slots[idx] = Some(result);
        }
        slots.into_iter().collect::<Option<Vec<R>>>().ok_or(Cancelled)
    }
}
