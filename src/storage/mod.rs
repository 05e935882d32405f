//! Storage collaborators: episode store, relationship graph and the
//! repository of finished runs.

/// In-memory reference backends.
pub mod memory;
mod traits;

pub use memory::{InMemoryEpisodeStore, InMemoryRelationshipGraph, InMemoryRepository};
pub use traits::{DiscoveryRepository, EpisodeStore, RelationshipGraph};
