//! Per-pass strategy planning.
//!
//! Each pass widens the channel set and raises the request and depth caps:
//!
//! | Pass | Focus | Channels | Cap | Depth |
//! |------|-------|----------|-----|-------|
//! | 1 | every hypothesis | official site, careers, press | 10 | 2 |
//! | 2 | pass 1 focus + network-derived | + reports, partnership announcements | 15 | 3 |
//! | 3 | top 3 by confidence + temporally favored | + job boards, technical blogs | 20 | 4 |
//! | 4+ | every open category, as pairwise combinations | all | 25 | 5 |
//!
//! Saturated categories never appear in a strategy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::entity::EntityId;
use crate::evidence::ChannelType;
use crate::hypothesis::HypothesisSet;
use crate::services::RetrievalRequest;

const FIRST_CHANNELS: [ChannelType; 3] = [
    ChannelType::OfficialSite,
    ChannelType::Careers,
    ChannelType::Press,
];
const SECOND_CHANNELS: [ChannelType; 2] = [
    ChannelType::Reports,
    ChannelType::PartnershipAnnouncements,
];
const THIRD_CHANNELS: [ChannelType; 2] = [ChannelType::JobBoards, ChannelType::TechnicalBlogs];

/// Plan for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStrategy {
    pub pass: u32,
    /// Categories explored this pass, in priority order.
    pub focus: Vec<Category>,
    /// Cross-category pairs queried together (pass 4 onwards).
    pub combinations: Vec<(Category, Category)>,
    pub channels: Vec<ChannelType>,
    /// Maximum collection requests issued in the pass.
    pub iteration_cap: usize,
    /// Search depth forwarded to the retriever.
    pub depth_cap: u32,
}

impl PassStrategy {
    /// Builds the collection requests for the pass, channel by channel, and
    /// truncates them to the iteration cap.
    ///
    /// Each request keeps at most `depth_cap * evidence_per_depth` evidence
    /// items.
    #[must_use]
    pub fn requests(
        &self,
        entity_id: &EntityId,
        hypotheses: &HypothesisSet,
        evidence_per_depth: usize,
    ) -> Vec<RetrievalRequest> {
        let units: Vec<Vec<&Category>> = if self.combinations.is_empty() {
            self.focus.iter().map(|c| vec![c]).collect()
        } else {
            self.combinations.iter().map(|(a, b)| vec![a, b]).collect()
        };
        let max_results = usize::try_from(self.depth_cap)
            .unwrap_or(usize::MAX)
            .saturating_mul(evidence_per_depth.max(1));

        let mut out = Vec::new();
        'channels: for &channel in &self.channels {
            for unit in &units {
                if out.len() >= self.iteration_cap {
                    break 'channels;
                }
                let covered: Vec<_> = unit.iter().filter_map(|c| hypotheses.get(c)).collect();
                if covered.is_empty() {
                    continue;
                }
                let mut keywords: Vec<String> = Vec::new();
                for h in &covered {
                    for k in &h.keywords {
                        if !keywords.contains(k) {
                            keywords.push(k.clone());
                        }
                    }
                }
                out.push(RetrievalRequest {
                    entity_id: entity_id.clone(),
                    pass: self.pass,
                    channel,
                    categories: covered.iter().map(|h| h.category.clone()).collect(),
                    statement: covered
                        .iter()
                        .map(|h| h.statement.as_str())
                        .collect::<Vec<_>>()
                        .join(" | "),
                    keywords,
                    depth: self.depth_cap,
                    max_results,
                });
            }
        }
        out
    }
}

/// What the planner knows when planning a pass.
#[derive(Debug, Clone, Copy)]
pub struct PlanningContext<'a> {
    pub pass: u32,
    pub hypotheses: &'a HypothesisSet,
    /// Strategy of the previous pass, if any.
    pub previous: Option<&'a PassStrategy>,
    /// Categories introduced by the network provider.
    pub network_derived: &'a [Category],
    /// Per-category confidence after the previous pass.
    pub category_confidence: &'a BTreeMap<Category, f64>,
    pub temporally_favored: &'a [Category],
    pub saturated: &'a BTreeSet<Category>,
}

/// Plans pass strategies.
#[derive(Debug, Clone)]
pub struct PassStrategyPlanner {
    top_categories: usize,
}

impl Default for PassStrategyPlanner {
    fn default() -> Self {
        Self { top_categories: 3 }
    }
}

impl PassStrategyPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans pass `ctx.pass`.
    #[must_use]
    pub fn plan(&self, ctx: &PlanningContext<'_>) -> PassStrategy {
        let open = |c: &Category| !ctx.saturated.contains(c) && ctx.hypotheses.get(c).is_some();
        let all_open: Vec<Category> = ctx
            .hypotheses
            .categories()
            .into_iter()
            .filter(|c| open(c))
            .collect();

        let (focus, combinations, channels, iteration_cap, depth_cap) = match ctx.pass {
            0 | 1 => (all_open, Vec::new(), FIRST_CHANNELS.to_vec(), 10, 2),
            2 => {
                let mut focus = match ctx.previous {
                    Some(prev) => prev.focus.iter().filter(|&c| open(c)).cloned().collect(),
                    None => all_open,
                };
                extend_unique(&mut focus, ctx.network_derived.iter().filter(|&c| open(c)).cloned());
                let channels = [&FIRST_CHANNELS[..], &SECOND_CHANNELS[..]].concat();
                (focus, Vec::new(), channels, 15, 3)
            }
            3 => {
                let mut ranked: Vec<(Category, f64)> = all_open
                    .iter()
                    .map(|c| (c.clone(), ctx.category_confidence.get(c).copied().unwrap_or(0.0)))
                    .collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                let mut focus: Vec<Category> = ranked
                    .into_iter()
                    .take(self.top_categories)
                    .map(|(c, _)| c)
                    .collect();
                let favored = ctx.temporally_favored.iter().filter(|&c| open(c)).cloned();
                extend_unique(&mut focus, favored);
                let channels =
                    [&FIRST_CHANNELS[..], &SECOND_CHANNELS[..], &THIRD_CHANNELS[..]].concat();
                (focus, Vec::new(), channels, 20, 4)
            }
            _ => {
                let combinations = pairs(&all_open);
                (all_open, combinations, ChannelType::ALL.to_vec(), 25, 5)
            }
        };

        PassStrategy {
            pass: ctx.pass,
            focus,
            combinations,
            channels,
            iteration_cap,
            depth_cap,
        }
    }
}

fn extend_unique(target: &mut Vec<Category>, items: impl Iterator<Item = Category>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

fn pairs(categories: &[Category]) -> Vec<(Category, Category)> {
    let mut out = Vec::new();
    for (i, a) in categories.iter().enumerate() {
        for b in &categories[i + 1..] {
            out.push((a.clone(), b.clone()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::catalog::CapabilityCatalog;
    use crate::hypothesis::{Hypothesis, HypothesisOrigin};

    fn set(categories: &[&str]) -> HypothesisSet {
        let catalog = CapabilityCatalog::default();
        let entity = EntityId::new("acme");
        let mut set = HypothesisSet::new();
        for c in categories {
            let entry = catalog.get(&Category::new(c)).unwrap();
            set.merge(Hypothesis::new(
                &entity,
                entry,
                format!("needs {c}"),
                0.5,
                HypothesisOrigin::Dossier,
            ));
        }
        set
    }

    fn cats(names: &[&str]) -> Vec<Category> {
        names.iter().map(|n| Category::new(n)).collect()
    }

    struct Fixture {
        hypotheses: HypothesisSet,
        confidence: BTreeMap<Category, f64>,
        saturated: BTreeSet<Category>,
    }

    impl Fixture {
        fn new(categories: &[&str]) -> Self {
            Self {
                hypotheses: set(categories),
                confidence: BTreeMap::new(),
                saturated: BTreeSet::new(),
            }
        }

        fn ctx<'a>(
            &'a self,
            pass: u32,
            previous: Option<&'a PassStrategy>,
            network: &'a [Category],
            favored: &'a [Category],
        ) -> PlanningContext<'a> {
            PlanningContext {
                pass,
                hypotheses: &self.hypotheses,
                previous,
                network_derived: network,
                category_confidence: &self.confidence,
                temporally_favored: favored,
                saturated: &self.saturated,
            }
        }
    }

    #[test]
    fn first_pass_covers_everything_on_three_channels() {
        let f = Fixture::new(&["crm", "ticketing", "mobile_app"]);
        let s = PassStrategyPlanner::new().plan(&f.ctx(1, None, &[], &[]));
        assert_eq!(s.focus, cats(&["crm", "ticketing", "mobile_app"]));
        assert_eq!(s.channels, FIRST_CHANNELS.to_vec());
        assert_eq!((s.iteration_cap, s.depth_cap), (10, 2));
    }

    #[test]
    fn second_pass_adds_network_hypotheses() {
        let f = Fixture::new(&["crm", "ticketing", "mobile_app"]);
        let planner = PassStrategyPlanner::new();
        let mut first = planner.plan(&f.ctx(1, None, &[], &[]));
        first.focus.truncate(2);
        let network = cats(&["mobile_app", "ecommerce"]);
        let s = planner.plan(&f.ctx(2, Some(&first), &network, &[]));
        // ecommerce is not in the hypothesis set and is skipped.
        assert_eq!(s.focus, cats(&["crm", "ticketing", "mobile_app"]));
        assert_eq!(s.channels.len(), 5);
        assert_eq!((s.iteration_cap, s.depth_cap), (15, 3));
    }

    #[test]
    fn third_pass_takes_top_three_and_favored() {
        let mut f =
            Fixture::new(&["crm", "ticketing", "mobile_app", "ecommerce", "cloud_migration"]);
        f.confidence.insert(Category::new("crm"), 0.7);
        f.confidence.insert(Category::new("ticketing"), 0.6);
        f.confidence.insert(Category::new("mobile_app"), 0.6);
        f.confidence.insert(Category::new("ecommerce"), 0.2);
        let favored = cats(&["cloud_migration"]);
        let s = PassStrategyPlanner::new().plan(&f.ctx(3, None, &[], &favored));
        assert_eq!(s.focus, cats(&["crm", "mobile_app", "ticketing", "cloud_migration"]));
        assert_eq!(s.channels.len(), 7);
        assert_eq!((s.iteration_cap, s.depth_cap), (20, 4));
    }

    #[test]
    fn later_passes_use_pairwise_combinations() {
        let f = Fixture::new(&["crm", "ticketing", "mobile_app"]);
        let s = PassStrategyPlanner::new().plan(&f.ctx(5, None, &[], &[]));
        assert_eq!(s.combinations.len(), 3);
        assert_eq!(s.channels, ChannelType::ALL.to_vec());
        assert_eq!((s.iteration_cap, s.depth_cap), (25, 5));
    }

    #[test]
    fn saturated_categories_are_excluded_everywhere() {
        let mut f = Fixture::new(&["crm", "ticketing", "mobile_app"]);
        f.saturated.insert(Category::new("ticketing"));
        let planner = PassStrategyPlanner::new();
        let prev = PassStrategy {
            pass: 1,
            focus: cats(&["crm", "ticketing"]),
            combinations: Vec::new(),
            channels: FIRST_CHANNELS.to_vec(),
            iteration_cap: 10,
            depth_cap: 2,
        };
        let favored = cats(&["ticketing"]);
        let network = cats(&["ticketing"]);
        for pass in 1..=6 {
            let s = planner.plan(&f.ctx(pass, Some(&prev), &network, &favored));
            let ticketing = Category::new("ticketing");
            assert!(!s.focus.contains(&ticketing), "pass {pass}");
            assert!(s.combinations.iter().all(|(a, b)| a != &ticketing && b != &ticketing));
        }
    }

    #[test]
    fn requests_are_channel_major_and_capped() {
        let f = Fixture::new(&["crm", "ticketing", "mobile_app", "ecommerce"]);
        let s = PassStrategyPlanner::new().plan(&f.ctx(1, None, &[], &[]));
        let requests = s.requests(&EntityId::new("acme"), &f.hypotheses, 3);
        assert_eq!(requests.len(), 10);
        assert!(requests[..4].iter().all(|r| r.channel == ChannelType::OfficialSite));
        assert_eq!(requests[9].channel, ChannelType::Press);
        assert_eq!(requests[0].max_results, 6);
        assert_eq!(requests[0].depth, 2);
    }

    #[test]
    fn combination_requests_merge_keywords() {
        let f = Fixture::new(&["crm", "ticketing"]);
        let s = PassStrategyPlanner::new().plan(&f.ctx(4, None, &[], &[]));
        let requests = s.requests(&EntityId::new("acme"), &f.hypotheses, 3);
        assert_eq!(requests.len(), 7);
        assert!(requests[0].is_combination());
        assert_eq!(requests[0].label(), "crm+ticketing");
        assert!(requests[0].keywords.contains(&"crm".to_string()));
        assert!(requests[0].keywords.contains(&"tickets".to_string()));
    }
}
