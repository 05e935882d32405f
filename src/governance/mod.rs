//! The governance loop: per-candidate validation state machine.
//!
//! Stages, in order:
//! 1. Rule filter (credibility and keyword presence)
//! 2. Reasoning validation (external service, rule-only fallback)
//! 3. Deduplication against earlier signals of the same hypothesis and source
//! 4. Category bookkeeping (consecutive rejects, saturation)

pub mod dedup;
mod engine;
pub mod ledger;
pub mod state;

pub use dedup::DedupIndex;
pub use engine::{GovernanceConfig, GovernanceLoop, GovernanceOutcome, PassInput};
pub use ledger::{CategoryLedger, LedgerOutcome, LedgerState};
pub use state::{Candidate, Deduplicated, Reasoned, RuleChecked, RuleOutcome, ValidationOutcome};
