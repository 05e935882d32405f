//! External service collaborators: profile supply, content retrieval and
//! reasoning validation.

/// Scripted in-memory implementations for tests and embedded use.
pub mod scripted;
mod traits;

pub use scripted::{ScriptedRetriever, ScriptedValidator, StaticProfiles};
pub use traits::{
    ContentRetriever, ProfileSupplier, ReasoningValidator, RetrievalRequest, Verdict,
    VerdictDecision,
};
