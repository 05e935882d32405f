use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use precog::services::{ScriptedRetriever, ScriptedValidator, StaticProfiles};
use precog::storage::{InMemoryEpisodeStore, InMemoryRelationshipGraph, InMemoryRepository};
use precog::{
    CapabilityAdoption, Category, ChannelType, CollaboratorError, ConfidenceBand, ContentRetriever,
    Decision, DiscoveryConfig, DiscoveryOptions, DiscoveryRepository, EntityId, EntityProfile,
    EpisodeType, Evidence, FixedClock, HypothesisOrigin, NeedKind, NeedSection, NoteKind,
    Orchestrator, ProgressChannel, ProgressEvent, Provenance, RecommendedAction, RelationshipEdge,
    RelationshipKind, RetrievalRequest, SourceStrength, StopReason, TemporalEpisode, Verdict,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 30, 0).unwrap()
}

fn club() -> EntityId {
    EntityId::new("northbridge-fc")
}

fn sports() -> DiscoveryOptions {
    DiscoveryOptions::default().with_vertical("sports")
}

fn ev(source: &str, channel: ChannelType, content: &str, credibility: f64) -> Evidence {
    Evidence::new(source, channel, content, credibility, now())
}

fn fast_config() -> DiscoveryConfig {
    let mut config = DiscoveryConfig::default();
    config.runtime.retry.initial_backoff_ms = 1;
    config.runtime.retry.max_backoff_ms = 2;
    config
}

/// Pass 1: one ACCEPT and one WEAK_ACCEPT. Pass 2: three new ACCEPTs plus a
/// repeat of the pass 1 weak lead. Pass 3: three ACCEPTs.
fn golden_retriever() -> ScriptedRetriever {
    let weak_lead = ev(
        "jobs-board-x",
        ChannelType::Careers,
        "Hiring a mobile app lead for iOS and Android",
        0.8,
    );
    ScriptedRetriever::new()
        .respond_in_pass(
            1,
            "fan_engagement",
            ChannelType::OfficialSite,
            ev(
                "club-site",
                ChannelType::OfficialSite,
                "Club launches supporters loyalty scheme review",
                0.95,
            ),
        )
        .respond_in_pass(1, "mobile_app", ChannelType::Careers, weak_lead.clone())
        .respond_in_pass(
            2,
            "ticketing",
            ChannelType::Press,
            ev(
                "local-news",
                ChannelType::Press,
                "Club tenders new ticketing and box office system",
                0.9,
            ),
        )
        .respond_in_pass(
            2,
            "data_analytics",
            ChannelType::OfficialSite,
            ev(
                "club-site",
                ChannelType::OfficialSite,
                "Club seeks data analytics dashboard partner",
                0.9,
            ),
        )
        .respond_in_pass(
            2,
            "fan_engagement",
            ChannelType::Press,
            ev(
                "sports-daily",
                ChannelType::Press,
                "Fan engagement platform shortlist published",
                0.85,
            ),
        )
        .respond_in_pass(2, "mobile_app", ChannelType::Careers, weak_lead)
        .respond_in_pass(
            3,
            "fan_engagement",
            ChannelType::Reports,
            ev(
                "annual-report",
                ChannelType::Reports,
                "Annual report commits to supporters engagement investment",
                0.95,
            ),
        )
        .respond_in_pass(
            3,
            "mobile_app",
            ChannelType::JobBoards,
            ev(
                "jobs-board-y",
                ChannelType::JobBoards,
                "Senior Android engineer for new mobile app",
                0.8,
            ),
        )
        .respond_in_pass(
            3,
            "ticketing",
            ChannelType::PartnershipAnnouncements,
            ev(
                "partner-wire",
                ChannelType::PartnershipAnnouncements,
                "Ticketing vendor shortlist for season ticket renewals",
                0.9,
            ),
        )
}

fn golden_validator() -> ScriptedValidator {
    ScriptedValidator::accepting().verdict_for("jobs-board-x", Verdict::weak_accept("hiring only"))
}

fn golden_orchestrator() -> Orchestrator {
    Orchestrator::builder(Arc::new(golden_retriever()), Arc::new(golden_validator()))
        .clock(Arc::new(FixedClock::new(now())))
        .config(fast_config())
        .build()
        .unwrap()
}

#[test]
fn golden_scenario_reaches_actionable() {
    let orch = golden_orchestrator();
    let result = orch.run_discovery(&club(), &sports().with_max_passes(3)).unwrap();

    let after: Vec<f64> = result.passes.iter().map(|p| p.confidence_after).collect();
    assert_eq!(after, vec![0.58, 0.76, 0.90]);
    assert_eq!(result.final_state.score, 0.90);
    assert_eq!(result.final_state.band, ConfidenceBand::Actionable);
    assert_eq!(result.stop_reason, StopReason::MaxPasses);

    // The repeated weak lead counts once.
    assert_eq!(result.passes[1].merged.len(), 1);
    assert_eq!(result.passes[1].signals_with(Decision::WeakAccept).count(), 0);
    assert_eq!(result.final_state.tally.accepts, 7);
    assert_eq!(result.final_state.tally.weak_accepts, 1);

    assert_eq!(result.report.confidence_trend, vec![0.5, 0.58, 0.76, 0.90]);
    assert_eq!(result.report.recommended_action, RecommendedAction::Pursue);
    assert_eq!(result.report.metadata.passes, 3);
    assert_eq!(result.report.metadata.confidence_ceiling, 0.90);
}

#[test]
fn pass_three_focuses_on_strongest_categories() {
    let orch = golden_orchestrator();
    let result = orch.run_discovery(&club(), &sports().with_max_passes(3)).unwrap();
    let focus: Vec<&str> = result.passes[2].strategy.focus.iter().map(Category::as_str).collect();
    assert_eq!(focus, vec!["fan_engagement", "mobile_app", "ticketing"]);
    assert_eq!(result.passes[2].strategy.depth_cap, 4);
}

#[test]
fn rerun_reproduces_report() {
    let orch = golden_orchestrator();
    let first = orch.run_discovery(&club(), &sports().with_max_passes(3)).unwrap();
    let second = orch.run_discovery(&club(), &sports().with_max_passes(3)).unwrap();
    assert_eq!(first.report, second.report);

    let fresh = golden_orchestrator()
        .run_discovery(&club(), &sports().with_max_passes(3))
        .unwrap();
    assert_eq!(first.report, fresh.report);
}

#[test]
fn saturated_category_is_never_revisited() {
    let requests: Arc<Mutex<Vec<(u32, Vec<Category>)>>> = Arc::default();
    let seen = Arc::clone(&requests);
    let mut retriever = ScriptedRetriever::new()
        .with_hook(move |req| {
            if let Ok(mut log) = seen.lock() {
                log.push((req.pass, req.categories.clone()));
            }
        })
        .respond_in_pass(
            1,
            "fan_engagement",
            ChannelType::OfficialSite,
            ev("club-site", ChannelType::OfficialSite, "Supporters loyalty review", 0.95),
        )
        .respond_in_pass(
            2,
            "fan_engagement",
            ChannelType::Press,
            ev("sports-daily", ChannelType::Press, "Fan engagement tender", 0.95),
        )
        .respond(
            "ticketing",
            ChannelType::Reports,
            ev("report", ChannelType::Reports, "Ticketing overhaul budgeted", 0.95),
        );
    for (i, source) in ["blog-a", "blog-b", "blog-c"].iter().enumerate() {
        retriever = retriever.respond_in_pass(
            1,
            "ticketing",
            ChannelType::OfficialSite,
            ev(source, ChannelType::OfficialSite, &format!("ticketing rumour {i}"), 0.4),
        );
    }

    let orch = Orchestrator::builder(Arc::new(retriever), Arc::new(ScriptedValidator::accepting()))
        .clock(Arc::new(FixedClock::new(now())))
        .config(fast_config())
        .build()
        .unwrap();
    let result = orch.run_discovery(&club(), &sports().with_max_passes(2)).unwrap();

    let ticketing = Category::new("ticketing");
    assert!(result.final_state.saturated.contains(&ticketing));
    assert_eq!(result.passes[0].signals_with(Decision::Reject).count(), 3);
    assert!(result.passes[0]
        .notes
        .iter()
        .any(|n| n.kind == NoteKind::Saturated && n.category.as_ref() == Some(&ticketing)));
    assert!(!result.passes[1].strategy.focus.contains(&ticketing));
    assert!(result.passes[1].signals.iter().all(|s| s.category != ticketing));

    let log = requests.lock().unwrap();
    assert!(log.iter().filter(|(pass, _)| *pass == 2).all(|(_, cats)| !cats.contains(&ticketing)));
    assert!(result.report.entry(&ticketing).unwrap().saturated);
}

#[test]
fn small_gain_stops_before_max_passes() {
    let mut config = fast_config();
    config.confidence.weak_accept_weight = 0.008;
    let retriever = ScriptedRetriever::new()
        .respond_in_pass(
            1,
            "fan_engagement",
            ChannelType::OfficialSite,
            ev("club-site", ChannelType::OfficialSite, "Supporters loyalty review", 0.95),
        )
        .respond_in_pass(
            2,
            "mobile_app",
            ChannelType::Press,
            ev("tech-press", ChannelType::Press, "Club plans new mobile app", 0.95),
        )
        .respond_in_pass(
            3,
            "ticketing",
            ChannelType::Careers,
            ev("jobs", ChannelType::Careers, "Ticketing analyst wanted", 0.8),
        );
    let validator =
        ScriptedValidator::accepting().verdict_for("jobs", Verdict::weak_accept("hiring"));
    let orch = Orchestrator::builder(Arc::new(retriever), Arc::new(validator))
        .clock(Arc::new(FixedClock::new(now())))
        .config(config)
        .build()
        .unwrap();

    let result = orch.run_discovery(&club(), &sports().with_max_passes(8)).unwrap();
    assert_eq!(result.passes.len(), 3);
    assert_eq!(result.passes[2].delta, 0.008);
    assert_eq!(result.stop_reason, StopReason::Saturation);
}

#[test]
fn temporal_and_network_boosts_apply_once() {
    let entity = club();
    let episodes = InMemoryEpisodeStore::with_episodes(
        (0..3)
            .map(|i| {
                TemporalEpisode::new(
                    entity.clone(),
                    format!("fan engagement workshop {i}"),
                    EpisodeType::StrategicAnnouncement,
                    now() - Duration::days(10 * (i + 1)),
                )
                .with_category(Category::new("fan_engagement"))
            })
            .collect(),
    );
    let graph = InMemoryRelationshipGraph::new();
    let partner = EntityId::new("harbour-united");
    graph.add_edge(
        &entity,
        RelationshipEdge::new(partner.clone(), RelationshipKind::Partner, 1.0),
    );
    for (category, description) in [
        ("fan_engagement", "loyalty app"),
        ("cloud_migration", "moved to cloud"),
    ] {
        graph.add_adoption(
            &partner,
            CapabilityAdoption::new(Category::new(category), description),
        );
    }

    let retriever = ScriptedRetriever::new()
        .respond_in_pass(
            1,
            "fan_engagement",
            ChannelType::OfficialSite,
            ev("club-site", ChannelType::OfficialSite, "Supporters loyalty review", 0.95),
        )
        .respond_in_pass(
            2,
            "fan_engagement",
            ChannelType::Press,
            ev("sports-daily", ChannelType::Press, "Fan engagement tender", 0.95),
        );
    let orch = Orchestrator::builder(Arc::new(retriever), Arc::new(ScriptedValidator::accepting()))
        .episode_store(Arc::new(episodes))
        .relationship_graph(Arc::new(graph))
        .clock(Arc::new(FixedClock::new(now())))
        .config(fast_config())
        .build()
        .unwrap();

    let result = orch.run_discovery(&entity, &sports().with_max_passes(2)).unwrap();
    assert_eq!(result.passes[0].boosts.temporal, 0.10);
    assert_eq!(result.passes[0].boosts.network, 0.0);
    assert_eq!(result.passes[0].confidence_after, 0.66);
    assert_eq!(result.passes[1].boosts.temporal, 0.0);
    assert_eq!(result.passes[1].boosts.network, 0.03);
    assert_eq!(result.passes[1].confidence_after, 0.75);

    let derived = &result.passes[1].new_hypotheses;
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].category.as_str(), "cloud_migration");
    assert_eq!(derived[0].origin, HypothesisOrigin::Network);
    assert_eq!(derived[0].prior, 0.4);
    assert!(result.passes[1].strategy.focus.contains(&Category::new("cloud_migration")));
}

#[test]
fn validator_outage_degrades_to_rule_outcome() {
    let retriever = ScriptedRetriever::new()
        .respond_in_pass(
            1,
            "fan_engagement",
            ChannelType::OfficialSite,
            ev("club-site", ChannelType::OfficialSite, "Supporters loyalty review", 0.95),
        )
        .respond_in_pass(
            1,
            "mobile_app",
            ChannelType::Careers,
            ev("jobs", ChannelType::Careers, "Mobile app developer role", 0.8),
        );
    let validator = Arc::new(ScriptedValidator::unavailable());
    let orch = Orchestrator::builder(Arc::new(retriever), validator)
        .clock(Arc::new(FixedClock::new(now())))
        .config(fast_config())
        .build()
        .unwrap();

    let result = orch.run_discovery(&club(), &sports().with_max_passes(1)).unwrap();
    let pass = &result.passes[0];
    let accept = pass.signals_with(Decision::Accept).next().unwrap();
    let weak = pass.signals_with(Decision::WeakAccept).next().unwrap();
    assert_eq!(accept.category.as_str(), "fan_engagement");
    assert_eq!(accept.provenance, Provenance::Unvalidated);
    assert_eq!(weak.provenance, Provenance::Unvalidated);
    let outages = pass
        .notes
        .iter()
        .filter(|n| n.kind == NoteKind::ValidationService)
        .count();
    assert_eq!(outages, 2);
    assert_eq!(result.final_state.score, 0.58);
}

#[test]
fn retrieval_failure_yields_no_progress() {
    let mut retriever = ScriptedRetriever::new().respond_in_pass(
        1,
        "mobile_app",
        ChannelType::Press,
        ev("tech-press", ChannelType::Press, "Club plans new mobile app", 0.95),
    );
    for channel in [ChannelType::OfficialSite, ChannelType::Careers, ChannelType::Press] {
        retriever =
            retriever.fail_always("fan_engagement", channel, CollaboratorError::transient("503"));
    }
    let orch = Orchestrator::builder(Arc::new(retriever), Arc::new(ScriptedValidator::accepting()))
        .clock(Arc::new(FixedClock::new(now())))
        .config(fast_config())
        .build()
        .unwrap();

    let result = orch.run_discovery(&club(), &sports().with_max_passes(1)).unwrap();
    let pass = &result.passes[0];
    let fan = pass
        .signals
        .iter()
        .find(|s| s.category.as_str() == "fan_engagement")
        .unwrap();
    assert_eq!(fan.decision, Decision::NoProgress);
    assert!(pass.notes.iter().any(|n| n.kind == NoteKind::EvidenceCollection));
    assert_eq!(result.final_state.score, 0.56);
    assert!(!result.final_state.saturated.contains(&Category::new("fan_engagement")));
}

#[test]
fn input_and_option_errors_fail_fast() {
    let orch = golden_orchestrator();
    let err = orch.run_discovery(&club(), &DiscoveryOptions::default()).unwrap_err();
    assert!(err.is_input());

    let err = orch
        .run_discovery(&club(), &DiscoveryOptions::default().with_vertical("aerospace"))
        .unwrap_err();
    assert!(err.is_input());

    let err = orch.run_discovery(&club(), &sports().with_max_passes(-1)).unwrap_err();
    assert!(err.is_configuration());

    let build = |config: DiscoveryConfig| {
        let validator = Arc::new(ScriptedValidator::accepting());
        Orchestrator::builder(Arc::new(ScriptedRetriever::new()), validator)
            .config(config)
            .build()
    };
    let mut bad = DiscoveryConfig::default();
    bad.governance.saturation_rejects = 0;
    assert!(matches!(build(bad), Err(e) if e.is_configuration()));

    let mut endless = DiscoveryConfig::default();
    endless.temporal.horizon_days = 1_000_000_000;
    assert!(matches!(build(endless), Err(e) if e.is_configuration()));
}

#[test]
fn profile_needs_drive_hypotheses() {
    let need = NeedSection::new(
        NeedKind::StrategicInitiative,
        "The board wants a single CRM holding customer data for every supporter.",
        "board minutes",
        SourceStrength::Official,
    );
    let profile = EntityProfile::new(club(), "Northbridge FC", "sports").with_need(need);
    let repository = Arc::new(InMemoryRepository::new());
    let validator = Arc::new(ScriptedValidator::accepting());
    let orch = Orchestrator::builder(Arc::new(ScriptedRetriever::new()), validator)
        .profiles(Arc::new(StaticProfiles::new().with(profile)))
        .repository(repository.clone())
        .clock(Arc::new(FixedClock::new(now())))
        .build()
        .unwrap();

    let result = orch.run_discovery(&club(), &DiscoveryOptions::default()).unwrap();
    let categories: Vec<&str> = result.hypotheses.iter().map(|h| h.category.as_str()).collect();
    assert!(categories.contains(&"crm"));
    assert!(result.hypotheses.iter().all(|h| h.origin == HypothesisOrigin::Dossier));
    assert_eq!(repository.count(&club()), 1);
    let latest = repository.latest_result(&club()).unwrap().unwrap();
    assert_eq!(latest.stop_reason, StopReason::Exhaustion);
}

#[test]
fn progress_events_bracket_the_run() {
    let (sink, stream) = ProgressChannel::new(256);
    let orch = Orchestrator::builder(Arc::new(golden_retriever()), Arc::new(golden_validator()))
        .clock(Arc::new(FixedClock::new(now())))
        .progress(Arc::new(sink))
        .config(fast_config())
        .build()
        .unwrap();
    orch.run_discovery(&club(), &sports().with_max_passes(3)).unwrap();

    let events = stream.drain();
    assert!(matches!(events.first(), Some(ProgressEvent::RunStarted { max_passes: 3, .. })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::RunFinished {
            stop_reason: StopReason::MaxPasses,
            ..
        })
    ));
    let completed = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::PassCompleted { .. }))
        .count();
    assert_eq!(completed, 3);
    assert_eq!(stream.dropped(), 0);
}

/// Retriever that outlives every call timeout and records peak concurrency.
#[derive(Default)]
struct SlowRetriever {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ContentRetriever for SlowRetriever {
    fn retrieve(&self, _request: &RetrievalRequest) -> Result<Vec<Evidence>, CollaboratorError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(StdDuration::from_millis(100));
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[test]
fn timed_out_retrievals_stay_within_max_in_flight() {
    let retriever = Arc::new(SlowRetriever::default());
    let mut config = fast_config();
    config.runtime.max_in_flight = 2;
    config.runtime.call_timeout_ms = 20;
    config.runtime.retry.max_attempts = 2;
    let orch = Orchestrator::builder(retriever.clone(), Arc::new(ScriptedValidator::accepting()))
        .clock(Arc::new(FixedClock::new(now())))
        .config(config)
        .build()
        .unwrap();

    let result = orch.run_discovery(&club(), &sports().with_max_passes(1)).unwrap();
    let pass = &result.passes[0];
    assert!(pass.notes.iter().any(|n| n.kind == NoteKind::EvidenceCollection));
    assert!(pass.signals.iter().all(|s| s.decision == Decision::NoProgress));

    // Abandoned calls finish in the background; none may exceed the limit.
    thread::sleep(StdDuration::from_millis(250));
    assert_eq!(retriever.current.load(Ordering::SeqCst), 0);
    assert!(retriever.peak.load(Ordering::SeqCst) <= 2);
    assert!(retriever.peak.load(Ordering::SeqCst) >= 1);
}
