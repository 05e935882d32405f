//! Processing notes: the audit trail of a discovery run.
//!
//! Every REJECT, SATURATED, merged duplicate and degraded collaborator call
//! leaves a note, so the final report explains each candidate that did not
//! count toward confidence.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Category;

/// What a note records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Rejected,
    Saturated,
    MergedDuplicate,
    NoProgress,
    EvidenceCollection,
    ValidationService,
    Persistence,
    Cancelled,
    StopRequested,
    Budget,
}

impl fmt::Display for NoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rejected => "rejected",
            Self::Saturated => "saturated",
            Self::MergedDuplicate => "merged_duplicate",
            Self::NoProgress => "no_progress",
            Self::EvidenceCollection => "evidence_collection",
            Self::ValidationService => "validation_service",
            Self::Persistence => "persistence",
            Self::Cancelled => "cancelled",
            Self::StopRequested => "stop_requested",
            Self::Budget => "budget",
        };
        f.write_str(s)
    }
}

/// A human-readable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingNote {
    pub pass: u32,
    pub kind: NoteKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    pub message: String,
}

impl ProcessingNote {
    #[must_use]
    pub fn new(pass: u32, kind: NoteKind, message: impl Into<String>) -> Self {
        Self {
            pass,
            kind,
            category: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn for_category(mut self, category: &Category) -> Self {
        self.category = Some(category.clone());
        self
    }

    /// Returns true for notes produced by a failing collaborator.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(
            self.kind,
            NoteKind::EvidenceCollection | NoteKind::ValidationService | NoteKind::Persistence
        )
    }
}

impl fmt::Display for ProcessingNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.category {
            Some(category) => write!(
                f,
                "[pass {} {} {}] {}",
                self.pass, self.kind, category, self.message
            ),
            None => write!(f, "[pass {} {}] {}", self.pass, self.kind, self.message),
        }
    }
}
