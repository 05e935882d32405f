//! Evidence: raw corroborating material for a hypothesis.
//!
//! Evidence is produced by a `ContentRetriever`, attached to exactly one
//! candidate signal and dropped once the owning pass resolves.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EvidenceId;

/// Kind of source evidence is collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    OfficialSite,
    Careers,
    Press,
    Reports,
    PartnershipAnnouncements,
    JobBoards,
    TechnicalBlogs,
}

impl ChannelType {
    /// Every channel, in escalation order.
    pub const ALL: [Self; 7] = [
        Self::OfficialSite,
        Self::Careers,
        Self::Press,
        Self::Reports,
        Self::PartnershipAnnouncements,
        Self::JobBoards,
        Self::TechnicalBlogs,
    ];
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OfficialSite => write!(f, "official_site"),
            Self::Careers => write!(f, "careers"),
            Self::Press => write!(f, "press"),
            Self::Reports => write!(f, "reports"),
            Self::PartnershipAnnouncements => write!(f, "partnership_announcements"),
            Self::JobBoards => write!(f, "job_boards"),
            Self::TechnicalBlogs => write!(f, "technical_blogs"),
        }
    }
}

/// One piece of collected evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: EvidenceId,

    /// Source identifier, typically a URL.
    pub source: String,

    pub channel: ChannelType,

    /// Content excerpt the rule filter and reasoning service inspect.
    pub content: String,

    /// Credibility in [0, 1].
    pub credibility: f64,

    pub collected_at: DateTime<Utc>,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Evidence {
    /// Creates evidence; the id is derived from source and content and the
    /// credibility is clamped to [0, 1].
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        channel: ChannelType,
        content: impl Into<String>,
        credibility: f64,
        collected_at: DateTime<Utc>,
    ) -> Self {
        let source = source.into();
        let content = content.into();
        Self {
            id: EvidenceId::derive(&source, &content),
            source,
            channel,
            content,
            credibility: if credibility.is_finite() {
                credibility.clamp(0.0, 1.0)
            } else {
                0.0
            },
            collected_at,
            metadata: serde_json::Value::Null,
        }
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
