//! Network context: what partners and competitors have adopted.
//!
//! Adoptions by related entities in categories the run is not yet exploring
//! become network-derived hypotheses. Partner adoptions in categories that
//! are already hypothesized, and not saturated, contribute a capped
//! confidence boost.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{CapabilityCatalog, Category};
use crate::confidence::round_score;
use crate::entity::EntityId;
use crate::error::CollaboratorError;
use crate::hypothesis::{Hypothesis, HypothesisOrigin, HypothesisSet};
use crate::storage::RelationshipGraph;

/// Kind of relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Partner,
    Competitor,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partner => write!(f, "partner"),
            Self::Competitor => write!(f, "competitor"),
        }
    }
}

/// An edge from the evaluated entity to a related one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub counterpart: EntityId,
    pub kind: RelationshipKind,
    /// Strength of the relationship in [0, 1].
    pub strength: f64,
}

impl RelationshipEdge {
    /// Creates an edge; strength is clamped to [0, 1].
    #[must_use]
    pub fn new(counterpart: EntityId, kind: RelationshipKind, strength: f64) -> Self {
        Self {
            counterpart,
            kind,
            strength: strength.clamp(0.0, 1.0),
        }
    }
}

/// A capability an entity is known to have adopted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAdoption {
    pub category: Category,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adopted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub description: String,
}

impl CapabilityAdoption {
    #[must_use]
    pub fn new(category: Category, description: impl Into<String>) -> Self {
        Self {
            category,
            adopted_at: None,
            description: description.into(),
        }
    }
}

/// Network provider weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Prior of a derived hypothesis before scaling by edge strength.
    pub network_prior: f64,
    /// Boost per matching partner adoption, scaled by edge strength.
    pub boost_per_match: f64,
    /// Upper bound on the total network boost.
    pub boost_cap: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_prior: 0.40,
            boost_per_match: 0.03,
            boost_cap: 0.06,
        }
    }
}

/// A related entity's adoption in an already-hypothesized category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMatch {
    pub counterpart: EntityId,
    pub kind: RelationshipKind,
    pub category: Category,
}

/// Result of a network query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkContext {
    /// New hypotheses for categories not yet in the active set.
    pub derived: Vec<Hypothesis>,
    pub matches: Vec<NetworkMatch>,
    pub boost: f64,
}

/// Computes network context from a relationship graph.
#[derive(Clone)]
pub struct NetworkContextProvider {
    graph: Arc<dyn RelationshipGraph>,
    catalog: CapabilityCatalog,
    config: NetworkConfig,
}

impl NetworkContextProvider {
    /// Creates a provider.
    pub fn new(
        graph: Arc<dyn RelationshipGraph>,
        catalog: CapabilityCatalog,
        config: NetworkConfig,
    ) -> Self {
        Self { graph, catalog, config }
    }

    /// Builds network context for `entity_id` against the active set.
    ///
    /// Derived hypotheses are tagged as introduced in `pass`. Adoptions in
    /// `saturated` categories neither match nor boost.
    ///
    /// # Errors
    ///
    /// Propagates relationship graph failures.
    pub fn context(
        &self,
        entity_id: &EntityId,
        active: &HypothesisSet,
        saturated: &BTreeSet<Category>,
        pass: u32,
    ) -> Result<NetworkContext, CollaboratorError> {
        let mut edges = self.graph.relationships(entity_id)?;
        edges.sort_by(|a, b| a.counterpart.cmp(&b.counterpart).then_with(|| a.kind.cmp(&b.kind)));

        let mut derived: BTreeMap<Category, Hypothesis> = BTreeMap::new();
        let mut matches = Vec::new();
        let mut raw_boost = 0.0;

        for edge in &edges {
            if edge.strength <= 0.0 {
                continue;
            }
            let mut adoptions = self.graph.adoptions(&edge.counterpart)?;
            adoptions.sort_by(|a, b| a.category.cmp(&b.category));
            adoptions.dedup_by(|a, b| a.category == b.category);

            for adoption in adoptions {
                if saturated.contains(&adoption.category) {
                    continue;
                }
                if active.get(&adoption.category).is_some() {
                    matches.push(NetworkMatch {
                        counterpart: edge.counterpart.clone(),
                        kind: edge.kind,
                        category: adoption.category.clone(),
                    });
                    if edge.kind == RelationshipKind::Partner {
                        raw_boost += self.config.boost_per_match * edge.strength;
                    }
                    continue;
                }

                let Some(entry) = self.catalog.get(&adoption.category) else {
                    continue;
                };
                let hypothesis = Hypothesis::new(
                    entity_id,
                    entry,
                    format!(
                        "{} {} adopted {}; {} may follow",
                        edge.kind, edge.counterpart, entry.service, entity_id
                    ),
                    self.config.network_prior * edge.strength,
                    HypothesisOrigin::Network,
                )
                .introduced_in(pass);

                match derived.get(&entry.category) {
                    Some(existing) if existing.prior >= hypothesis.prior => {}
                    _ => {
                        derived.insert(entry.category.clone(), hypothesis);
                    }
                }
            }
        }

        let boost = round_score(raw_boost.clamp(0.0, self.config.boost_cap.max(0.0)));
        let mut derived: Vec<Hypothesis> = derived.into_values().collect();
        derived.sort_by(|a, b| {
            b.prior
                .total_cmp(&a.prior)
                .then_with(|| a.category.cmp(&b.category))
        });

        debug!(
            entity = %entity_id,
            edges = edges.len(),
            derived = derived.len(),
            matches = matches.len(),
            boost,
            "network context computed"
        );
        Ok(NetworkContext { derived, matches, boost })
    }
}
