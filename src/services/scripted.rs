//! Scripted collaborators.
//!
//! Responses are fixed up front so a run against them is fully
//! reproducible. Failures can be injected per category and channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::catalog::Category;
use crate::entity::{EntityId, EntityProfile};
use crate::error::CollaboratorError;
use crate::evidence::{ChannelType, Evidence};
use crate::hypothesis::Hypothesis;
use crate::services::traits::{
    ContentRetriever, ProfileSupplier, ReasoningValidator, RetrievalRequest, Verdict,
};

/// Profiles held in a map.
#[derive(Debug, Default, Clone)]
pub struct StaticProfiles {
    profiles: HashMap<EntityId, EntityProfile>,
}

impl StaticProfiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a profile, replacing any existing one for the same entity.
    #[must_use]
    pub fn with(mut self, profile: EntityProfile) -> Self {
        self.profiles.insert(profile.entity_id.clone(), profile);
        self
    }
}

impl ProfileSupplier for StaticProfiles {
    fn fetch_profile(
        &self,
        entity_id: &EntityId,
    ) -> Result<Option<EntityProfile>, CollaboratorError> {
        Ok(self.profiles.get(entity_id).cloned())
    }
}

type ResponseKey = (Option<u32>, Category, ChannelType);
type RequestHook = Arc<dyn Fn(&RetrievalRequest) + Send + Sync>;

#[derive(Debug, Clone)]
struct FailurePlan {
    error: CollaboratorError,
    /// Remaining failures; `None` fails forever.
    remaining: Option<u32>,
}

/// Retriever that returns pre-registered evidence.
///
/// Evidence registered for a specific pass takes precedence over evidence
/// registered for every pass. Combination requests receive the evidence of
/// each covered category.
#[derive(Default)]
pub struct ScriptedRetriever {
    responses: HashMap<ResponseKey, Vec<Evidence>>,
    failures: Mutex<HashMap<(Category, ChannelType), FailurePlan>>,
    hook: Option<RequestHook>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedRetriever {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `evidence` for the category and channel in every pass.
    #[must_use]
    pub fn respond(mut self, category: &str, channel: ChannelType, evidence: Evidence) -> Self {
        self.responses
            .entry((None, Category::new(category), channel))
            .or_default()
            .push(evidence);
        self
    }

    /// Returns `evidence` for the category and channel in one pass only.
    #[must_use]
    pub fn respond_in_pass(
        mut self,
        pass: u32,
        category: &str,
        channel: ChannelType,
        evidence: Evidence,
    ) -> Self {
        self.responses
            .entry((Some(pass), Category::new(category), channel))
            .or_default()
            .push(evidence);
        self
    }

    /// Fails the next `times` requests for the category and channel.
    #[must_use]
    pub fn fail_times(
        self,
        category: &str,
        channel: ChannelType,
        error: CollaboratorError,
        times: u32,
    ) -> Self {
        self.plan_failure(category, channel, error, Some(times))
    }

    /// Fails every request for the category and channel.
    #[must_use]
    pub fn fail_always(
        self,
        category: &str,
        channel: ChannelType,
        error: CollaboratorError,
    ) -> Self {
        self.plan_failure(category, channel, error, None)
    }

    fn plan_failure(
        self,
        category: &str,
        channel: ChannelType,
        error: CollaboratorError,
        remaining: Option<u32>,
    ) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert((Category::new(category), channel), FailurePlan { error, remaining });
        }
        self
    }

    /// Runs `hook` at the start of every request.
    #[must_use]
    pub fn with_hook(mut self, hook: impl Fn(&RetrievalRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Sleeps for `delay` on every request.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `retrieve` calls so far, failed ones included.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self, request: &RetrievalRequest) -> Result<(), CollaboratorError> {
        let mut failures = self
            .failures
            .lock()
            .map_err(|_| CollaboratorError::backend("poisoned lock: failures"))?;
        for category in &request.categories {
            let key = (category.clone(), request.channel);
            let Some(plan) = failures.get_mut(&key) else {
                continue;
            };
            let error = plan.error.clone();
            match plan.remaining {
                None => return Err(error),
                Some(0) => {}
                Some(n) => {
                    plan.remaining = Some(n - 1);
                    return Err(error);
                }
            }
        }
        Ok(())
    }
}

impl ContentRetriever for ScriptedRetriever {
    fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Evidence>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook(request);
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.take_failure(request)?;

        let mut out = Vec::new();
        for category in &request.categories {
            let pass_key = (Some(request.pass), category.clone(), request.channel);
            let any_key = (None, category.clone(), request.channel);
            let scripted = self
                .responses
                .get(&pass_key)
                .or_else(|| self.responses.get(&any_key));
            if let Some(evidence) = scripted {
                out.extend(evidence.iter().cloned());
            }
        }
        Ok(out)
    }
}

/// Validator that answers from a table keyed by evidence source.
#[derive(Debug)]
pub struct ScriptedValidator {
    by_source: HashMap<String, Verdict>,
    default: Verdict,
    unavailable: bool,
    unavailable_sources: HashSet<String>,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    /// Creates a validator answering `default` for unknown sources.
    #[must_use]
    pub fn new(default: Verdict) -> Self {
        Self {
            by_source: HashMap::new(),
            default,
            unavailable: false,
            unavailable_sources: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// A validator that accepts everything.
    #[must_use]
    pub fn accepting() -> Self {
        Self::new(Verdict::accept("evidence supports the hypothesis"))
    }

    /// A validator whose service is always down.
    #[must_use]
    pub fn unavailable() -> Self {
        let mut validator = Self::accepting();
        validator.unavailable = true;
        validator
    }

    /// Answers `verdict` for evidence from `source`.
    #[must_use]
    pub fn verdict_for(mut self, source: impl Into<String>, verdict: Verdict) -> Self {
        self.by_source.insert(source.into(), verdict);
        self
    }

    /// Reports the service unavailable for evidence from `source`.
    #[must_use]
    pub fn unavailable_for(mut self, source: impl Into<String>) -> Self {
        self.unavailable_sources.insert(source.into());
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReasoningValidator for ScriptedValidator {
    fn validate(
        &self,
        _hypothesis: &Hypothesis,
        evidence: &Evidence,
    ) -> Result<Verdict, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable || self.unavailable_sources.contains(&evidence.source) {
            return Err(CollaboratorError::unavailable("reasoning", "scripted outage"));
        }
        Ok(self
            .by_source
            .get(&evidence.source)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}
