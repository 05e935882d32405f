//! Typed progress notifications for a discovery run.
//!
//! The orchestrator reports through a `ProgressSink`. `ProgressChannel` is a
//! sink backed by a bounded channel: publishing never blocks the run, and
//! events that do not fit are counted as dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::confidence::ConfidenceBand;
use crate::entity::EntityId;
use crate::signal::Decision;
use crate::stopping::StopReason;

/// A progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        entity_id: EntityId,
        hypotheses: usize,
        max_passes: u32,
    },
    PassStarted {
        pass: u32,
        focus: Vec<Category>,
        requests: usize,
    },
    SignalDecided {
        pass: u32,
        category: Category,
        decision: Decision,
    },
    CategorySaturated {
        pass: u32,
        category: Category,
    },
    PassCompleted {
        pass: u32,
        confidence: f64,
        delta: f64,
        band: ConfidenceBand,
        signals: usize,
    },
    PassCancelled {
        pass: u32,
    },
    RunFinished {
        entity_id: EntityId,
        stop_reason: StopReason,
        confidence: f64,
        band: ConfidenceBand,
    },
}

/// Receives progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// A sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn publish(&self, _event: ProgressEvent) {}
}

/// Bounded channel sink.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    tx: Sender<ProgressEvent>,
    dropped: Arc<AtomicU64>,
}

impl ProgressChannel {
    /// Creates a channel sink and the stream that receives its events.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, ProgressStream) {
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                dropped: Arc::clone(&dropped),
            },
            ProgressStream { rx, dropped },
        )
    }
}

impl ProgressSink for ProgressChannel {
    fn publish(&self, event: ProgressEvent) {
        // Never block the run: drop if the subscriber is slow or gone.
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Subscriber side of a `ProgressChannel`.
#[derive(Debug)]
pub struct ProgressStream {
    rx: Receiver<ProgressEvent>,
    dropped: Arc<AtomicU64>,
}

impl ProgressStream {
    /// Receive the next event, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout or once every sender is gone.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ProgressEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains every event currently queued.
    #[must_use]
    pub fn drain(&self) -> Vec<ProgressEvent> {
        self.rx.try_iter().collect()
    }

    /// Events dropped because the stream was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
