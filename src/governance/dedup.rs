//! Near-duplicate detection for positive signals.

use crate::ids::{HypothesisId, SignalId};
use crate::signal::Signal;
use crate::text;

#[derive(Debug, Clone)]
struct Entry {
    hypothesis_id: HypothesisId,
    source: String,
    content: String,
    signal_id: SignalId,
}

/// Index of counted evidence keyed by hypothesis and source.
///
/// Two items are duplicates when they share hypothesis and source and their
/// token-set Jaccard similarity is strictly above the threshold.
#[derive(Debug, Clone)]
pub struct DedupIndex {
    threshold: f64,
    entries: Vec<Entry>,
}

impl DedupIndex {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            entries: Vec::new(),
        }
    }

    /// Builds an index over the positive signals of earlier passes.
    #[must_use]
    pub fn from_signals(threshold: f64, signals: &[Signal]) -> Self {
        let mut index = Self::new(threshold);
        for signal in signals.iter().filter(|s| s.counts_toward_confidence()) {
            index.insert(signal);
        }
        index
    }

    /// Adds every evidence item of a signal.
    pub fn insert(&mut self, signal: &Signal) {
        for evidence in &signal.evidence {
            self.entries.push(Entry {
                hypothesis_id: signal.hypothesis_id,
                source: evidence.source.clone(),
                content: evidence.content.clone(),
                signal_id: signal.id,
            });
        }
    }

    /// Returns the signal a new item duplicates and the similarity, picking
    /// the most similar entry.
    #[must_use]
    pub fn find(
        &self,
        hypothesis_id: HypothesisId,
        source: &str,
        content: &str,
    ) -> Option<(SignalId, f64)> {
        self.entries
            .iter()
            .filter(|e| e.hypothesis_id == hypothesis_id && e.source == source)
            .map(|e| (e.signal_id, text::jaccard(&e.content, content)))
            .filter(|(_, similarity)| *similarity > self.threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
