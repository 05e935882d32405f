//! Category bookkeeping shared by every candidate of a pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::Category;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::signal::Decision;

/// Snapshot of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Consecutive REJECT count per category; categories at zero are absent.
    pub reject_streaks: BTreeMap<Category, u32>,
    pub saturated: BTreeSet<Category>,
}

/// What recording a decision did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// A positive decision cleared the streak.
    Reset,
    /// A REJECT extended the streak.
    Counted { streak: u32 },
    /// This REJECT closed the category.
    NewlySaturated { streak: u32 },
    /// The category was already closed; the candidate becomes SATURATED.
    AlreadySaturated,
    /// The decision does not touch the streak.
    Unchanged,
}

/// Mutex-guarded REJECT counters and saturated set.
///
/// Saturation is monotonic: once a category is in the set it stays there.
#[derive(Debug)]
pub struct CategoryLedger {
    threshold: u32,
    state: Mutex<LedgerState>,
}

impl CategoryLedger {
    /// Creates a ledger that saturates a category after `threshold`
    /// consecutive rejects, starting from `state`.
    #[must_use]
    pub fn new(threshold: u32, state: LedgerState) -> Self {
        Self {
            threshold: threshold.max(1),
            state: Mutex::new(state),
        }
    }

    fn poisoned() -> DiscoveryError {
        DiscoveryError::internal("category ledger lock poisoned")
    }

    /// Records one decision for a category.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Internal` if the lock is poisoned.
    pub fn record(
        &self,
        category: &Category,
        decision: Decision,
    ) -> DiscoveryResult<LedgerOutcome> {
        let mut state = self.state.lock().map_err(|_| Self::poisoned())?;
        if state.saturated.contains(category) {
            return Ok(LedgerOutcome::AlreadySaturated);
        }
        let outcome = match decision {
            Decision::Accept | Decision::WeakAccept => {
                state.reject_streaks.remove(category);
                LedgerOutcome::Reset
            }
            Decision::Reject => {
                let streak = state.reject_streaks.entry(category.clone()).or_insert(0);
                *streak += 1;
                let streak = *streak;
                if streak >= self.threshold {
                    state.saturated.insert(category.clone());
                    info!(category = %category, streak, "category saturated");
                    LedgerOutcome::NewlySaturated { streak }
                } else {
                    LedgerOutcome::Counted { streak }
                }
            }
            Decision::NoProgress | Decision::Saturated => LedgerOutcome::Unchanged,
        };
        Ok(outcome)
    }

    /// Returns true if the category is closed.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Internal` if the lock is poisoned.
    pub fn is_saturated(&self, category: &Category) -> DiscoveryResult<bool> {
        let state = self.state.lock().map_err(|_| Self::poisoned())?;
        Ok(state.saturated.contains(category))
    }

    /// Copy of the current state.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Internal` if the lock is poisoned.
    pub fn snapshot(&self) -> DiscoveryResult<LedgerState> {
        let state = self.state.lock().map_err(|_| Self::poisoned())?;
        Ok(state.clone())
    }

    /// Consumes the ledger, returning its final state.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Internal` if the lock is poisoned.
    pub fn into_state(self) -> DiscoveryResult<LedgerState> {
        self.state.into_inner().map_err(|_| Self::poisoned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn three_rejects_saturate() {
        let ledger = CategoryLedger::new(3, LedgerState::default());
        let crm = Category::new("crm");
        assert_eq!(
            ledger.record(&crm, Decision::Reject).unwrap(),
            LedgerOutcome::Counted { streak: 1 }
        );
        assert_eq!(
            ledger.record(&crm, Decision::Reject).unwrap(),
            LedgerOutcome::Counted { streak: 2 }
        );
        assert_eq!(
            ledger.record(&crm, Decision::Reject).unwrap(),
            LedgerOutcome::NewlySaturated { streak: 3 }
        );
        assert_eq!(ledger.record(&crm, Decision::Accept).unwrap(), LedgerOutcome::AlreadySaturated);
        assert!(ledger.is_saturated(&crm).unwrap());
    }

    #[test]
    fn positive_decision_resets_streak() {
        let ledger = CategoryLedger::new(3, LedgerState::default());
        let crm = Category::new("crm");
        ledger.record(&crm, Decision::Reject).unwrap();
        ledger.record(&crm, Decision::Reject).unwrap();
        assert_eq!(ledger.record(&crm, Decision::WeakAccept).unwrap(), LedgerOutcome::Reset);
        assert_eq!(
            ledger.record(&crm, Decision::Reject).unwrap(),
            LedgerOutcome::Counted { streak: 1 }
        );
        assert_eq!(ledger.record(&crm, Decision::NoProgress).unwrap(), LedgerOutcome::Unchanged);
        assert!(!ledger.is_saturated(&crm).unwrap());
    }

    #[test]
    fn streaks_carry_across_passes() {
        let crm = Category::new("crm");
        let mut state = LedgerState::default();
        state.reject_streaks.insert(crm.clone(), 2);
        let ledger = CategoryLedger::new(3, state);
        assert_eq!(
            ledger.record(&crm, Decision::Reject).unwrap(),
            LedgerOutcome::NewlySaturated { streak: 3 }
        );
        let state = ledger.into_state().unwrap();
        assert!(state.saturated.contains(&crm));
    }

    #[test]
    fn concurrent_rejects_are_not_lost() {
        let ledger = Arc::new(CategoryLedger::new(1000, LedgerState::default()));
        let crm = Category::new("crm");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let crm = crm.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        ledger.record(&crm, Decision::Reject).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.snapshot().unwrap().reject_streaks.get(&crm), Some(&400));
    }
}
