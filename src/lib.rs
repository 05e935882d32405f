//! # precog - Multi-pass discovery of procurement opportunities
//!
//! precog looks for signs that an entity is about to buy something before
//! the purchase is announced. It turns what is known about the entity into
//! hypotheses, collects evidence for them over several passes, validates
//! each piece of evidence through a fixed state machine, and converges on a
//! calibrated confidence score with a recommended next action.
//!
//! ## Core Concepts
//!
//! - **Hypothesis**: A claim that an entity needs a capability from the catalog
//! - **Evidence**: A content excerpt from an external source, with credibility
//! - **Signal**: The validated decision about one hypothesis and its evidence
//! - **Governance loop**: Rule filter, reasoning validation, dedup and bookkeeping
//! - **Confidence band**: EXPLORATORY, INFORMED, CONFIDENT or ACTIONABLE
//! - **Saturation**: A category closed after repeated rejects
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use precog::{DiscoveryOptions, EntityId, Orchestrator};
//!
//! let orchestrator = Orchestrator::builder(retriever, validator)
//!     .profiles(profiles)
//!     .episode_store(episodes)
//!     .relationship_graph(graph)
//!     .build()?;
//!
//! let entity = EntityId::new("acme-fc");
//! let result = orchestrator.full_discovery(&entity, DiscoveryOptions::default())?;
//! println!("{} {:.2}", result.report.band, result.report.confidence);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod catalog;
pub mod entity;
pub mod error;
pub mod evidence;
pub mod hypothesis;
pub mod ids;
pub mod notes;
pub mod signal;
pub mod text;
pub mod time;

// Scoring and control
pub mod confidence;
pub mod governance;
pub mod stopping;
pub mod strategy;

// Context providers
pub mod network;
pub mod temporal;

// Collaborators and runtime
pub mod config;
pub mod progress;
pub mod runtime;
pub mod services;
pub mod storage;

// The discovery loop
pub mod collector;
pub mod orchestrator;
pub mod report;

// Re-export primary types at crate root for convenience
pub use catalog::{CapabilityCatalog, CapabilityEntry, Category, ValueRange};
pub use confidence::{
    ConfidenceAggregator, ConfidenceBand, ConfidenceConfig, ConfidenceState, DecisionTally,
};
pub use entity::{EntityId, EntityProfile, NeedKind, NeedSection, SourceStrength};
pub use error::{CollaboratorError, ConfigurationError, DiscoveryError, DiscoveryResult, InputError};
pub use evidence::{ChannelType, Evidence};
pub use hypothesis::{
    Hypothesis, HypothesisGenerator, HypothesisOrigin, HypothesisSet, TemplateLibrary,
};
pub use ids::{EvidenceId, HypothesisId, SignalId};
pub use notes::{NoteKind, ProcessingNote};
pub use signal::{Decision, MergedDuplicate, Provenance, Signal};
pub use time::{Clock, FixedClock, SystemClock, TimeWindow};

pub use governance::{GovernanceConfig, GovernanceLoop};
pub use stopping::{Budget, StopReason, StoppingConfig, StoppingEvaluator};
pub use strategy::{PassStrategy, PassStrategyPlanner};

pub use network::{
    CapabilityAdoption, NetworkConfig, NetworkContextProvider, RelationshipEdge, RelationshipKind,
};
pub use temporal::{EpisodeType, TemporalConfig, TemporalContextProvider, TemporalEpisode};

pub use config::{CostConfig, DiscoveryConfig, DiscoveryOptions};
pub use progress::{NullProgress, ProgressChannel, ProgressEvent, ProgressSink, ProgressStream};
pub use runtime::{CancellationToken, RetryPolicy, RuntimeConfig, WorkerPool};
pub use services::{
    ContentRetriever, ProfileSupplier, ReasoningValidator, RetrievalRequest, Verdict,
    VerdictDecision,
};
pub use storage::{DiscoveryRepository, EpisodeStore, RelationshipGraph};

pub use collector::EvidenceCollector;
pub use orchestrator::{MultiPassResult, Orchestrator, OrchestratorBuilder, PassResult};
pub use report::{OpportunityEntry, OpportunityReport, RecommendedAction};
