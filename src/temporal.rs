//! Temporal context: what the entity's history says about each hypothesis.
//!
//! The provider reads past episodes for an entity from the episode store,
//! builds a bounded narrative summary, scores how well each hypothesis
//! category fits that history, and converts the number of recent events into
//! a confidence boost. It also writes new episodes for strong ACCEPT signals.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::Category;
use crate::confidence::round_score;
use crate::entity::EntityId;
use crate::error::CollaboratorError;
use crate::evidence::ChannelType;
use crate::hypothesis::Hypothesis;
use crate::ids::SignalId;
use crate::signal::{Decision, Signal};
use crate::storage::EpisodeStore;
use crate::text;
use crate::time::TimeWindow;

/// Kind of historical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    RfpDetected,
    PartnershipFormed,
    HiringSurge,
    TechnologyAdoption,
    StrategicAnnouncement,
    Other,
}

impl EpisodeType {
    /// Episode type recorded for a signal whose lead evidence came from `channel`.
    #[must_use]
    pub const fn for_channel(channel: ChannelType) -> Self {
        match channel {
            ChannelType::OfficialSite | ChannelType::Reports => Self::RfpDetected,
            ChannelType::PartnershipAnnouncements => Self::PartnershipFormed,
            ChannelType::Careers | ChannelType::JobBoards => Self::HiringSurge,
            ChannelType::TechnicalBlogs => Self::TechnologyAdoption,
            ChannelType::Press => Self::StrategicAnnouncement,
        }
    }
}

impl fmt::Display for EpisodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RfpDetected => write!(f, "rfp_detected"),
            Self::PartnershipFormed => write!(f, "partnership_formed"),
            Self::HiringSurge => write!(f, "hiring_surge"),
            Self::TechnologyAdoption => write!(f, "technology_adoption"),
            Self::StrategicAnnouncement => write!(f, "strategic_announcement"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A permanently stored, time-stamped historical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalEpisode {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub episode_type: EpisodeType,
    pub entity_id: EntityId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_signal: Option<SignalId>,

    /// Category the episode is about, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TemporalEpisode {
    /// Creates an episode with no signal reference or category.
    #[must_use]
    pub fn new(
        entity_id: EntityId,
        name: impl Into<String>,
        episode_type: EpisodeType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            timestamp,
            episode_type,
            entity_id,
            reference_signal: None,
            category: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Tags the episode with a category.
    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

/// Longest query window accepted by configuration validation, in days.
pub const MAX_HORIZON_DAYS: i64 = 36_500;

/// Temporal provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Length of the query window.
    pub horizon_days: i64,
    /// Events this recent count toward the boost.
    pub recent_days: i64,
    pub narrative_max_chars: usize,
    /// Lower clip bound of the fit score.
    pub fit_floor: f64,
    /// Upper clip bound of the fit score.
    pub fit_ceiling: f64,
    /// Categories with fit at or above this are temporally favored.
    pub favored_threshold: f64,
    /// Boost for 1-2 recent events.
    pub boost_few: f64,
    /// Boost for 3 or more recent events.
    pub boost_many: f64,
    /// Minimum signal confidence for an ACCEPT to be written as an episode.
    pub persistence_threshold: f64,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            horizon_days: 365,
            recent_days: 90,
            narrative_max_chars: 600,
            fit_floor: 0.0,
            fit_ceiling: 1.0,
            favored_threshold: 0.30,
            boost_few: 0.05,
            boost_many: 0.10,
            persistence_threshold: 0.70,
        }
    }
}

impl TemporalConfig {
    /// Boost tier for a number of recent events.
    #[must_use]
    pub fn boost_for_events(&self, recent_events: usize) -> f64 {
        match recent_events {
            0 => 0.0,
            1 | 2 => self.boost_few,
            _ => self.boost_many,
        }
    }
}

/// Temporal context for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    pub episodes_in_window: usize,
    pub recent_events: usize,
    pub narrative: String,
    pub fit_by_category: BTreeMap<Category, f64>,
    pub boost: f64,
}

impl TemporalContext {
    /// Categories whose fit reaches `threshold`, best fit first.
    #[must_use]
    pub fn favored(&self, threshold: f64) -> Vec<Category> {
        let mut favored: Vec<(&Category, f64)> = self
            .fit_by_category
            .iter()
            .filter(|(_, fit)| **fit >= threshold && **fit > 0.0)
            .map(|(c, f)| (c, *f))
            .collect();
        favored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        favored.into_iter().map(|(c, _)| c.clone()).collect()
    }
}

/// Computes temporal context from an episode store.
#[derive(Clone)]
pub struct TemporalContextProvider {
    store: Arc<dyn EpisodeStore>,
    config: TemporalConfig,
}

impl TemporalContextProvider {
    /// Creates a provider.
    pub fn new(store: Arc<dyn EpisodeStore>, config: TemporalConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &TemporalConfig {
        &self.config
    }

    /// Builds the temporal context for `entity_id` as of `now`.
    ///
    /// # Errors
    ///
    /// Propagates episode store failures.
    pub fn context(
        &self,
        entity_id: &EntityId,
        hypotheses: &[Hypothesis],
        now: DateTime<Utc>,
    ) -> Result<TemporalContext, CollaboratorError> {
        let window = TimeWindow::trailing_days(now, self.config.horizon_days);
        let mut episodes = self.store.query(entity_id, &window)?;
        episodes.retain(|e| window.contains(e.timestamp));
        episodes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.name.cmp(&b.name)));

        let recent_window = TimeWindow::trailing_days(now, self.config.recent_days);
        let recent_events = episodes
            .iter()
            .filter(|e| recent_window.contains(e.timestamp))
            .count();

        let fit_by_category = hypotheses
            .iter()
            .map(|h| (h.category.clone(), self.fit(h, &episodes)))
            .collect();

        let context = TemporalContext {
            episodes_in_window: episodes.len(),
            recent_events,
            narrative: self.narrative(&episodes),
            fit_by_category,
            boost: self.config.boost_for_events(recent_events),
        };
        debug!(
            entity = %entity_id,
            episodes = context.episodes_in_window,
            recent = context.recent_events,
            boost = context.boost,
            "temporal context computed"
        );
        Ok(context)
    }

    /// Share of episodes in the window that match the hypothesis, clipped to
    /// the configured bounds.
    fn fit(&self, hypothesis: &Hypothesis, episodes: &[TemporalEpisode]) -> f64 {
        let floor = self.config.fit_floor.clamp(0.0, 1.0);
        let ceiling = self.config.fit_ceiling.clamp(floor, 1.0);
        if episodes.is_empty() {
            return floor;
        }
        let matching = episodes
            .iter()
            .filter(|e| episode_matches(e, hypothesis))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let fit = matching as f64 / episodes.len() as f64;
        round_score(fit.clamp(floor, ceiling))
    }

    fn narrative(&self, episodes: &[TemporalEpisode]) -> String {
        let max = self.config.narrative_max_chars;
        if episodes.is_empty() {
            return text::truncate_chars("No recorded events in window.", max);
        }
        let mut out = format!("{} events in window", episodes.len());
        for episode in episodes {
            let line = format!(
                "; {} {}: {}",
                episode.timestamp.format("%Y-%m-%d"),
                episode.episode_type,
                episode.name
            );
            if out.chars().count() + line.chars().count() > max {
                break;
            }
            out.push_str(&line);
        }
        text::truncate_chars(&out, max)
    }

    /// Writes an episode for a signal when it is an ACCEPT whose confidence
    /// reaches the persistence threshold. Returns the written episode.
    ///
    /// # Errors
    ///
    /// Propagates episode store failures.
    pub fn record_signal(
        &self,
        entity_id: &EntityId,
        signal: &Signal,
    ) -> Result<Option<TemporalEpisode>, CollaboratorError> {
        if signal.decision != Decision::Accept
            || signal.confidence < self.config.persistence_threshold
        {
            return Ok(None);
        }
        let episode_type = signal
            .evidence
            .first()
            .map_or(EpisodeType::Other, |e| EpisodeType::for_channel(e.channel));
        let episode = TemporalEpisode {
            name: format!("{} signal for {}", episode_type, signal.category),
            timestamp: signal.decided_at,
            episode_type,
            entity_id: entity_id.clone(),
            reference_signal: Some(signal.id),
            category: Some(signal.category.clone()),
            metadata: serde_json::json!({
                "pass": signal.pass,
                "source": signal.lead_source(),
                "confidence": signal.confidence,
            }),
        };
        self.store.append(episode.clone())?;
        Ok(Some(episode))
    }
}

fn episode_matches(episode: &TemporalEpisode, hypothesis: &Hypothesis) -> bool {
    if let Some(category) = &episode.category {
        return category == &hypothesis.category;
    }
    let tokens = text::tokenize(&episode.name);
    hypothesis
        .keywords
        .iter()
        .any(|k| text::contains_keyword(&tokens, k))
}
