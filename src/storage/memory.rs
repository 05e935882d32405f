//! In-memory storage backend.
//!
//! Thread-safe in-memory implementations of the storage traits, intended for
//! embedded usage, tests, and as a reference implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::entity::EntityId;
use crate::error::CollaboratorError;
use crate::network::{CapabilityAdoption, RelationshipEdge};
use crate::orchestrator::MultiPassResult;
use crate::storage::traits::{DiscoveryRepository, EpisodeStore, RelationshipGraph};
use crate::temporal::TemporalEpisode;
use crate::time::TimeWindow;

fn lock_err(context: &'static str) -> CollaboratorError {
    CollaboratorError::backend(format!("poisoned lock: {context}"))
}

/// Append-only episode store backed by a vector.
#[derive(Debug, Default)]
pub struct InMemoryEpisodeStore {
    episodes: RwLock<Vec<TemporalEpisode>>,
}

impl InMemoryEpisodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with episodes.
    #[must_use]
    pub fn with_episodes(episodes: Vec<TemporalEpisode>) -> Self {
        Self {
            episodes: RwLock::new(episodes),
        }
    }

    /// Number of stored episodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.episodes.read().map(|e| e.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored episode in insertion order.
    pub fn all(&self) -> Result<Vec<TemporalEpisode>, CollaboratorError> {
        let episodes = self.episodes.read().map_err(|_| lock_err("episodes"))?;
        Ok(episodes.clone())
    }
}

impl EpisodeStore for InMemoryEpisodeStore {
    fn append(&self, episode: TemporalEpisode) -> Result<(), CollaboratorError> {
        let mut episodes = self.episodes.write().map_err(|_| lock_err("episodes"))?;
        episodes.push(episode);
        Ok(())
    }

    fn query(
        &self,
        entity_id: &EntityId,
        window: &TimeWindow,
    ) -> Result<Vec<TemporalEpisode>, CollaboratorError> {
        let episodes = self.episodes.read().map_err(|_| lock_err("episodes"))?;
        let mut out: Vec<TemporalEpisode> = episodes
            .iter()
            .filter(|e| &e.entity_id == entity_id && window.contains(e.timestamp))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct GraphState {
    edges: HashMap<EntityId, Vec<RelationshipEdge>>,
    adoptions: HashMap<EntityId, Vec<CapabilityAdoption>>,
}

/// Relationship graph held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRelationshipGraph {
    state: RwLock<GraphState>,
}

impl InMemoryRelationshipGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an edge leaving `from`. A poisoned lock drops the write.
    pub fn add_edge(&self, from: &EntityId, edge: RelationshipEdge) {
        if let Ok(mut state) = self.state.write() {
            state.edges.entry(from.clone()).or_default().push(edge);
        }
    }

    /// Records a capability adoption for `entity_id`.
    pub fn add_adoption(&self, entity_id: &EntityId, adoption: CapabilityAdoption) {
        if let Ok(mut state) = self.state.write() {
            state.adoptions.entry(entity_id.clone()).or_default().push(adoption);
        }
    }
}

impl RelationshipGraph for InMemoryRelationshipGraph {
    fn relationships(
        &self,
        entity_id: &EntityId,
    ) -> Result<Vec<RelationshipEdge>, CollaboratorError> {
        let state = self.state.read().map_err(|_| lock_err("graph"))?;
        Ok(state.edges.get(entity_id).cloned().unwrap_or_default())
    }

    fn adoptions(
        &self,
        entity_id: &EntityId,
    ) -> Result<Vec<CapabilityAdoption>, CollaboratorError> {
        let state = self.state.read().map_err(|_| lock_err("graph"))?;
        Ok(state.adoptions.get(entity_id).cloned().unwrap_or_default())
    }
}

/// Keeps every saved run per entity, newest last.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    results: RwLock<HashMap<EntityId, Vec<MultiPassResult>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs saved for an entity.
    #[must_use]
    pub fn count(&self, entity_id: &EntityId) -> usize {
        self.results
            .read()
            .map(|r| r.get(entity_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl DiscoveryRepository for InMemoryRepository {
    fn save_result(&self, result: &MultiPassResult) -> Result<(), CollaboratorError> {
        let mut results = self.results.write().map_err(|_| lock_err("results"))?;
        results
            .entry(result.entity_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    fn latest_result(
        &self,
        entity_id: &EntityId,
    ) -> Result<Option<MultiPassResult>, CollaboratorError> {
        let results = self.results.read().map_err(|_| lock_err("results"))?;
        Ok(results.get(entity_id).and_then(|runs| runs.last().cloned()))
    }
}
