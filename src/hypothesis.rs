//! Hypotheses about an entity's procurement needs.
//!
//! The generator turns a dossier into a ranked, category-deduplicated set of
//! hypotheses by matching need statements against the capability catalog.
//! Without a dossier it falls back to a fixed template set for the entity's
//! vertical. Later passes may append network-derived hypotheses; existing
//! hypotheses are never mutated.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{CapabilityCatalog, CapabilityEntry, Category};
use crate::confidence::round_score;
use crate::entity::{normalize_vertical, EntityId, EntityProfile};
use crate::error::InputError;
use crate::ids::HypothesisId;
use crate::text;

/// Maximum length of an extracted need statement.
pub const MAX_NEED_STATEMENT_CHARS: usize = 240;

/// Where a hypothesis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisOrigin {
    /// Matched from a dossier need section.
    Dossier,
    /// Inferred from partner/competitor adoptions.
    Network,
    /// Fixed template for the entity's vertical.
    Template,
}

impl fmt::Display for HypothesisOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dossier => write!(f, "dossier"),
            Self::Network => write!(f, "network"),
            Self::Template => write!(f, "template"),
        }
    }
}

/// A candidate claim that an entity needs a specific capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: HypothesisId,
    pub entity_id: EntityId,
    pub category: Category,
    pub statement: String,

    /// Prior probability in [0, 1].
    pub prior: f64,

    /// Service name of the matched catalog entry.
    pub matched_capability: String,

    pub origin: HypothesisOrigin,

    /// Keywords evidence must mention to pass the rule filter.
    pub keywords: Vec<String>,

    /// Pass in which the hypothesis entered the active set.
    pub introduced_in_pass: u32,
}

impl Hypothesis {
    /// Creates a hypothesis for a catalog entry. The prior is clamped.
    #[must_use]
    pub fn new(
        entity_id: &EntityId,
        entry: &CapabilityEntry,
        statement: impl Into<String>,
        prior: f64,
        origin: HypothesisOrigin,
    ) -> Self {
        Self {
            id: HypothesisId::derive(entity_id.as_str(), entry.category.as_str()),
            entity_id: entity_id.clone(),
            category: entry.category.clone(),
            statement: statement.into(),
            prior: round_score(prior.clamp(0.0, 1.0)),
            matched_capability: entry.service.clone(),
            origin,
            keywords: entry.keywords.clone(),
            introduced_in_pass: 1,
        }
    }

    /// Sets the pass the hypothesis is introduced in.
    #[must_use]
    pub fn introduced_in(mut self, pass: u32) -> Self {
        self.introduced_in_pass = pass;
        self
    }
}

/// Outcome of adding a hypothesis to a `HypothesisSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    /// The category already existed; the existing hypothesis is kept.
    MergedIntoExisting(HypothesisId),
}

/// Append-only, category-unique set of active hypotheses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSet {
    items: Vec<Hypothesis>,
}

impl HypothesisSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hypothesis unless its category is already present.
    pub fn merge(&mut self, hypothesis: Hypothesis) -> MergeOutcome {
        if let Some(existing) = self.get(&hypothesis.category) {
            return MergeOutcome::MergedIntoExisting(existing.id);
        }
        self.items.push(hypothesis);
        MergeOutcome::Added
    }

    /// Adds many hypotheses, returning those that were actually added.
    pub fn merge_all(
        &mut self,
        hypotheses: impl IntoIterator<Item = Hypothesis>,
    ) -> Vec<Hypothesis> {
        let mut added = Vec::new();
        for h in hypotheses {
            if self.merge(h.clone()) == MergeOutcome::Added {
                added.push(h);
            }
        }
        added
    }

    /// Looks up the hypothesis for a category.
    #[must_use]
    pub fn get(&self, category: &Category) -> Option<&Hypothesis> {
        self.items.iter().find(|h| &h.category == category)
    }

    /// Looks up a hypothesis by id.
    #[must_use]
    pub fn by_id(&self, id: HypothesisId) -> Option<&Hypothesis> {
        self.items.iter().find(|h| h.id == id)
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Hypothesis> {
        self.items.iter()
    }

    /// All categories in insertion order.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.items.iter().map(|h| h.category.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consumes the set, returning hypotheses in insertion order.
    #[must_use]
    pub fn into_vec(self) -> Vec<Hypothesis> {
        self.items
    }
}

/// A fixed hypothesis used when no dossier is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisTemplate {
    pub category: Category,
    pub statement: String,
    pub prior: f64,
}

impl HypothesisTemplate {
    fn new(category: &str, statement: &str, prior: f64) -> Self {
        Self {
            category: Category::new(category),
            statement: statement.to_string(),
            prior,
        }
    }
}

/// Template hypotheses keyed by normalized vertical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateLibrary {
    by_vertical: BTreeMap<String, Vec<HypothesisTemplate>>,
}

impl TemplateLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers templates for a vertical, replacing any existing ones.
    #[must_use]
    pub fn with_vertical(mut self, vertical: &str, templates: Vec<HypothesisTemplate>) -> Self {
        self.by_vertical.insert(normalize_vertical(vertical), templates);
        self
    }

    /// Returns the templates for a vertical, if any.
    #[must_use]
    pub fn templates_for(&self, vertical: &str) -> Option<&[HypothesisTemplate]> {
        self.by_vertical
            .get(&normalize_vertical(vertical))
            .map(Vec::as_slice)
            .filter(|t| !t.is_empty())
    }

    /// The built-in template set.
    #[must_use]
    pub fn builtin() -> Self {
        let t = HypothesisTemplate::new;
        Self::empty()
            .with_vertical(
                "sports",
                vec![
                    t("fan_engagement", "Club is likely to invest in fan engagement tooling", 0.45),
                    t("mobile_app", "Club is likely to refresh its mobile app", 0.40),
                    t("ticketing", "Club is likely to modernize ticketing", 0.35),
                    t("data_analytics", "Club is likely to build supporter analytics", 0.30),
                ],
            )
            .with_vertical(
                "retail",
                vec![
                    t("ecommerce", "Retailer is likely to replatform e-commerce", 0.45),
                    t("crm", "Retailer is likely to consolidate customer data", 0.40),
                    t("data_analytics", "Retailer is likely to expand analytics", 0.35),
                ],
            )
            .with_vertical(
                "healthcare",
                vec![
                    t(
                        "digital_transformation",
                        "Provider is likely to digitize patient services",
                        0.40,
                    ),
                    t("cloud_migration", "Provider is likely to migrate workloads to cloud", 0.35),
                    t("data_analytics", "Provider is likely to invest in clinical analytics", 0.30),
                ],
            )
            .with_vertical(
                "finance",
                vec![
                    t("cloud_migration", "Firm is likely to move core systems to cloud", 0.40),
                    t("crm", "Firm is likely to replace client relationship tooling", 0.35),
                    t(
                        "digital_transformation",
                        "Firm is likely to modernize legacy channels",
                        0.35,
                    ),
                ],
            )
            .with_vertical(
                "media",
                vec![
                    t(
                        "fan_engagement",
                        "Publisher is likely to invest in audience engagement",
                        0.40,
                    ),
                    t("mobile_app", "Publisher is likely to rebuild its apps", 0.35),
                    t("ecommerce", "Publisher is likely to grow direct commerce", 0.30),
                ],
            )
            .with_vertical(
                "public_sector",
                vec![
                    t(
                        "digital_transformation",
                        "Body is likely to digitize citizen services",
                        0.40,
                    ),
                    t("cloud_migration", "Body is likely to consolidate hosting", 0.35),
                    t("ticketing", "Body is likely to procure booking systems", 0.25),
                ],
            )
    }
}

/// Turns an entity profile into ranked hypotheses.
#[derive(Debug, Clone)]
pub struct HypothesisGenerator {
    catalog: CapabilityCatalog,
    templates: TemplateLibrary,
}

impl HypothesisGenerator {
    /// Creates a generator over a catalog and template library.
    #[must_use]
    pub fn new(catalog: CapabilityCatalog, templates: TemplateLibrary) -> Self {
        Self { catalog, templates }
    }

    /// The catalog hypotheses are matched against.
    #[must_use]
    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    /// Generates hypotheses for an entity.
    ///
    /// With a profile, need sections are matched against the catalog; a
    /// profile with no matches is supplemented by the vertical template.
    /// Without one, the template for `vertical` is used.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if there is neither a profile nor a template for
    /// the vertical.
    pub fn generate(
        &self,
        entity_id: &EntityId,
        profile: Option<&EntityProfile>,
        vertical: Option<&str>,
    ) -> Result<Vec<Hypothesis>, InputError> {
        let vertical = profile
            .map(|p| p.vertical.clone())
            .or_else(|| vertical.map(normalize_vertical));

        if let Some(profile) = profile {
            let mut hypotheses = self.from_profile(profile);
            if hypotheses.is_empty() {
                if let Some(v) = vertical.as_deref() {
                    hypotheses = self.from_templates(entity_id, v);
                }
            }
            debug!(
                entity = %entity_id,
                count = hypotheses.len(),
                "generated hypotheses from profile"
            );
            return Ok(hypotheses);
        }

        let Some(vertical) = vertical else {
            return Err(InputError::MissingVertical {
                entity_id: entity_id.clone(),
            });
        };

        let hypotheses = self.from_templates(entity_id, &vertical);
        if hypotheses.is_empty() {
            return Err(InputError::NoProfileOrTemplate {
                entity_id: entity_id.clone(),
                vertical,
            });
        }
        debug!(
            entity = %entity_id,
            vertical = %vertical,
            count = hypotheses.len(),
            "generated template hypotheses"
        );
        Ok(hypotheses)
    }

    fn from_profile(&self, profile: &EntityProfile) -> Vec<Hypothesis> {
        let mut best: HashMap<Category, Hypothesis> = HashMap::new();

        for need in &profile.needs {
            let statement = text::first_sentence(&need.text, MAX_NEED_STATEMENT_CHARS);
            if statement.is_empty() {
                continue;
            }
            let tokens = text::tokenize(&need.text);

            for entry in self.catalog.entries() {
                if entry.keywords.is_empty() {
                    continue;
                }
                let hits = entry
                    .keywords
                    .iter()
                    .filter(|k| text::contains_keyword(&tokens, k))
                    .count();
                if hits == 0 {
                    continue;
                }

                #[allow(clippy::cast_precision_loss)]
                let overlap = hits as f64 / entry.keywords.len() as f64;
                let targeted = !entry.verticals.is_empty() && entry.targets(&profile.vertical);
                let vertical_bonus = if targeted { 0.05 } else { 0.0 };
                let prior = 0.20 + 0.50 * overlap + need.strength.prior_bonus() + vertical_bonus;

                let hypothesis = Hypothesis::new(
                    &profile.entity_id,
                    entry,
                    format!("{} needs {}: {}", profile.name, entry.service, statement),
                    prior,
                    HypothesisOrigin::Dossier,
                );

                match best.get(&entry.category) {
                    Some(existing) if existing.prior >= hypothesis.prior => {}
                    _ => {
                        best.insert(entry.category.clone(), hypothesis);
                    }
                }
            }
        }

        rank(best.into_values().collect())
    }

    fn from_templates(&self, entity_id: &EntityId, vertical: &str) -> Vec<Hypothesis> {
        let Some(templates) = self.templates.templates_for(vertical) else {
            return Vec::new();
        };
        let mut best: HashMap<Category, Hypothesis> = HashMap::new();
        for template in templates {
            let Some(entry) = self.catalog.get(&template.category) else {
                continue;
            };
            let hypothesis = Hypothesis::new(
                entity_id,
                entry,
                template.statement.clone(),
                template.prior,
                HypothesisOrigin::Template,
            );
            match best.get(&entry.category) {
                Some(existing) if existing.prior >= hypothesis.prior => {}
                _ => {
                    best.insert(entry.category.clone(), hypothesis);
                }
            }
        }
        rank(best.into_values().collect())
    }
}

/// Sorts by prior descending with the category name as tie-break.
fn rank(mut hypotheses: Vec<Hypothesis>) -> Vec<Hypothesis> {
    hypotheses.sort_by(|a, b| {
        b.prior
            .total_cmp(&a.prior)
            .then_with(|| a.category.cmp(&b.category))
    });
    hypotheses
}
