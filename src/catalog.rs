//! Capability catalog: the services an agency can sell.
//!
//! Static reference data. Each entry owns one hypothesis category and the
//! keyword set used to match dossier text and corroborate evidence.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// A hypothesis category, normalized to lowercase snake case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    /// Creates a normalized category.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(crate::entity::normalize_vertical(name.as_ref()))
    }

    /// Returns the category name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Estimated contract value range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub currency: String,
}

impl ValueRange {
    /// Creates a value range in the given currency.
    #[must_use]
    pub fn new(min: f64, max: f64, currency: impl Into<String>) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
            currency: currency.into(),
        }
    }

    /// Scales both bounds by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            min: (self.min * factor).round(),
            max: (self.max * factor).round(),
            currency: self.currency.clone(),
        }
    }
}

/// One sellable capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    /// Human-readable service name.
    pub service: String,

    pub category: Category,

    /// Lowercase keywords; multi-word keywords match as phrases.
    pub keywords: Vec<String>,

    /// Normalized verticals this service targets. Empty means all.
    #[serde(default)]
    pub verticals: Vec<String>,

    pub value_range: ValueRange,
}

impl CapabilityEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        category: impl AsRef<str>,
        keywords: &[&str],
        verticals: &[&str],
        value_range: ValueRange,
    ) -> Self {
        Self {
            service: service.into(),
            category: Category::new(category),
            keywords: keywords.iter().map(|k| k.trim().to_lowercase()).collect(),
            verticals: verticals
                .iter()
                .map(|v| crate::entity::normalize_vertical(v))
                .collect(),
            value_range,
        }
    }

    /// Returns true if this entry targets `vertical` (or all verticals).
    #[must_use]
    pub fn targets(&self, vertical: &str) -> bool {
        self.verticals.is_empty() || self.verticals.iter().any(|v| v == vertical)
    }
}

/// The static set of capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCatalog {
    entries: Vec<CapabilityEntry>,
}

impl CapabilityCatalog {
    /// Creates a catalog. Entries with a repeated category are dropped
    /// (first occurrence wins).
    ///
    /// # Errors
    ///
    /// Returns `InputError::EmptyCatalog` if no entries are supplied.
    pub fn new(entries: Vec<CapabilityEntry>) -> Result<Self, InputError> {
        let mut deduped: Vec<CapabilityEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !deduped.iter().any(|e| e.category == entry.category) {
                deduped.push(entry);
            }
        }
        if deduped.is_empty() {
            return Err(InputError::EmptyCatalog);
        }
        Ok(Self { entries: deduped })
    }

    /// Returns all entries in catalog order.
    #[must_use]
    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    /// Looks up the entry for a category.
    #[must_use]
    pub fn get(&self, category: &Category) -> Option<&CapabilityEntry> {
        self.entries.iter().find(|e| &e.category == category)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a constructed catalog.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        let gbp = |min: f64, max: f64| ValueRange::new(min, max, "GBP");
        Self {
            entries: vec![
                CapabilityEntry::new(
                    "Mobile App Development",
                    "mobile_app",
                    &["mobile app", "ios", "android", "app", "mobile"],
                    &[],
                    gbp(80_000.0, 500_000.0),
                ),
                CapabilityEntry::new(
                    "Digital Transformation",
                    "digital_transformation",
                    &[
                        "digital transformation",
                        "modernization",
                        "legacy",
                        "digital",
                        "transformation",
                    ],
                    &[],
                    gbp(150_000.0, 1_200_000.0),
                ),
                CapabilityEntry::new(
                    "Fan Engagement Platform",
                    "fan_engagement",
                    &["fan engagement", "fans", "supporters", "engagement", "loyalty"],
                    &["sports", "media"],
                    gbp(100_000.0, 750_000.0),
                ),
                CapabilityEntry::new(
                    "Data Analytics",
                    "data_analytics",
                    &["analytics", "data", "insights", "dashboard", "bi"],
                    &[],
                    gbp(60_000.0, 400_000.0),
                ),
                CapabilityEntry::new(
                    "CRM Implementation",
                    "crm",
                    &["crm", "customer relationship", "salesforce", "customer data"],
                    &[],
                    gbp(70_000.0, 600_000.0),
                ),
                CapabilityEntry::new(
                    "E-commerce Platform",
                    "ecommerce",
                    &["ecommerce", "online store", "merchandise", "checkout", "shop"],
                    &["retail", "sports", "media"],
                    gbp(90_000.0, 800_000.0),
                ),
                CapabilityEntry::new(
                    "Ticketing Systems",
                    "ticketing",
                    &["ticketing", "tickets", "box office", "season ticket", "access control"],
                    &["sports", "media", "public_sector"],
                    gbp(120_000.0, 900_000.0),
                ),
                CapabilityEntry::new(
                    "Cloud Migration",
                    "cloud_migration",
                    &["cloud", "migration", "aws", "azure", "infrastructure"],
                    &[],
                    gbp(100_000.0, 1_000_000.0),
                ),
            ],
        }
    }
}
