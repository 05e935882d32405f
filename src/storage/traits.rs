//! Abstract storage traits for precog.
//!
//! The core owns no persistent state. Episodes, relationship data and
//! finished runs live in collaborators behind these traits. By using traits,
//! we enable:
//! - In-memory backends for testing and embedded use
//! - Graph databases and episode stores in production

use crate::entity::EntityId;
use crate::error::CollaboratorError;
use crate::network::{CapabilityAdoption, RelationshipEdge};
use crate::orchestrator::MultiPassResult;
use crate::temporal::TemporalEpisode;
use crate::time::TimeWindow;

/// Append-only store of temporal episodes.
///
/// # Safety Considerations
/// - Episodes are never updated or deleted by the core
/// - Implementations should handle concurrent access safely
pub trait EpisodeStore: Send + Sync {
    /// Append an episode.
    fn append(&self, episode: TemporalEpisode) -> Result<(), CollaboratorError>;

    /// Episodes for an entity whose timestamp falls within `window`,
    /// ordered by timestamp.
    fn query(
        &self,
        entity_id: &EntityId,
        window: &TimeWindow,
    ) -> Result<Vec<TemporalEpisode>, CollaboratorError>;
}

/// Read-only view of the relationship graph.
pub trait RelationshipGraph: Send + Sync {
    /// Partner and competitor edges leaving `entity_id`.
    fn relationships(
        &self,
        entity_id: &EntityId,
    ) -> Result<Vec<RelationshipEdge>, CollaboratorError>;

    /// Capabilities an entity is known to have adopted.
    fn adoptions(&self, entity_id: &EntityId) -> Result<Vec<CapabilityAdoption>, CollaboratorError>;
}

/// Storage for finished discovery runs.
pub trait DiscoveryRepository: Send + Sync {
    /// Store a finished run.
    fn save_result(&self, result: &MultiPassResult) -> Result<(), CollaboratorError>;

    /// The most recent stored run for an entity.
    fn latest_result(
        &self,
        entity_id: &EntityId,
    ) -> Result<Option<MultiPassResult>, CollaboratorError>;
}
