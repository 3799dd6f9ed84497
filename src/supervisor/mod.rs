//! Supervisor - routes a query, runs specialists concurrently, synthesizes
//!
//! RECEIVED → ROUTING → AWAITING_AGENTS → SYNTHESIZING → DONE (or FAILED)

pub mod routing;
pub mod synthesis;

pub use routing::{Router, RoutingPolicy};
pub use synthesis::{ScoreWeighting, SynthesisConfig, SynthesisEngine};

use crate::agents::SpecialistAgent;
use crate::error::AnalysisError;
use crate::models::{AgentFailure, AgentJudgment, FailureKind, Query, Recommendation, SpecialistKind};
use crate::Result;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorConfig {
    /// Per-specialist deadline
    pub specialist_timeout: Duration,
    pub routing: RoutingPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            specialist_timeout: Duration::from_secs(60),
            routing: RoutingPolicy::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Received,
    Routing,
    AwaitingAgents,
    Synthesizing,
    Done,
    Failed,
}

/// Result of one supervisor run plus the states it passed through
#[derive(Debug)]
pub struct SupervisorRun {
    pub result: Result<Recommendation>,
    pub trace: Vec<SupervisorState>,
}

enum AgentOutcome {
    Succeeded(AgentJudgment),
    Failed(AgentFailure),
}

struct StateTrace {
    request_id: Uuid,
    states: Vec<SupervisorState>,
}

impl StateTrace {
    fn new(request_id: Uuid) -> Self {
        let mut trace = Self {
            request_id,
            states: Vec::new(),
        };
        trace.enter(SupervisorState::Received);
        trace
    }

    fn enter(&mut self, state: SupervisorState) {
        debug!(request_id = %self.request_id, state = ?state, "Supervisor state");
        self.states.push(state);
    }
}

pub struct Supervisor {
    specialists: BTreeMap<SpecialistKind, Arc<dyn SpecialistAgent>>,
    router: Router,
    synthesis: SynthesisEngine,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, synthesis: SynthesisConfig) -> Self {
        Self {
            specialists: BTreeMap::new(),
            router: Router::new(config.routing),
            synthesis: SynthesisEngine::new(synthesis),
            config,
        }
    }

    /// Register a specialist; replaces any earlier one of the same kind
    pub fn register(&mut self, agent: Arc<dyn SpecialistAgent>) {
        self.specialists.insert(agent.kind(), agent);
    }

    pub fn with_specialist(mut self, agent: Arc<dyn SpecialistAgent>) -> Self {
        self.register(agent);
        self
    }

    pub fn registered(&self) -> Vec<SpecialistKind> {
        self.specialists.keys().copied().collect()
    }

    /// Route by the configured policy, then analyze
    pub async fn analyze(&self, query: &Query) -> Result<Recommendation> {
        self.run(query, None).await.result
    }

    /// Analyze with a fixed specialist subset, bypassing routing
    pub async fn only(&self, query: &Query, kinds: &[SpecialistKind]) -> Result<Recommendation> {
        self.run(query, Some(kinds)).await.result
    }

    /// Full run with its state trace
    pub async fn run(&self, query: &Query, subset: Option<&[SpecialistKind]>) -> SupervisorRun {
        let request_id = Uuid::new_v4();
        let span = info_span!("analysis", request_id = %request_id, ticker = %query.ticker);

        async move {
            let mut trace = StateTrace::new(request_id);
            info!(question = %query.question, "Analysis requested");

            let result = self.execute(query, subset, &mut trace).await;

            match &result {
                Ok(rec) => {
                    trace.enter(SupervisorState::Done);
                    info!(
                        recommendation = ?rec.recommendation,
                        score = rec.aggregate_score,
                        succeeded = rec.specialists_succeeded.len(),
                        failed = rec.specialists_failed.len(),
                        "Analysis complete"
                    );
                }
                Err(e) => {
                    trace.enter(SupervisorState::Failed);
                    error!(error = %e, "Analysis failed");
                }
            }

            SupervisorRun {
                result,
                trace: trace.states,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        query: &Query,
        subset: Option<&[SpecialistKind]>,
        trace: &mut StateTrace,
    ) -> Result<Recommendation> {
        trace.enter(SupervisorState::Routing);
        let kinds: Vec<SpecialistKind> = match subset {
            Some(kinds) => kinds.iter().copied().collect::<BTreeSet<_>>().into_iter().collect(),
            None => self.router.route(&query.question),
        };

        if kinds.is_empty() {
            return Err(AnalysisError::SupervisorFailed("no specialists routed".to_string()));
        }
        info!(specialists = ?kinds, policy = ?self.router.policy(), "Query routed");

        trace.enter(SupervisorState::AwaitingAgents);
        let outcomes = self.dispatch(query, &kinds).await;

        trace.enter(SupervisorState::Synthesizing);
        let mut judgments = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                AgentOutcome::Succeeded(judgment) => judgments.push(judgment),
                AgentOutcome::Failed(failure) => failures.push(failure),
            }
        }

        self.synthesis.synthesize(query, judgments, failures, Utc::now())
    }

    /// Run every routed specialist as its own task with its own deadline
    async fn dispatch(&self, query: &Query, kinds: &[SpecialistKind]) -> Vec<AgentOutcome> {
        let timeout = self.config.specialist_timeout;

        let tasks = kinds.iter().map(|&kind| {
            let agent = self.specialists.get(&kind).cloned();
            let query = query.clone();

            async move {
                let Some(agent) = agent else {
                    warn!(agent = %kind, "Specialist not registered");
                    return AgentOutcome::Failed(AgentFailure {
                        agent: kind,
                        kind: FailureKind::Internal,
                        reason: "specialist not registered".to_string(),
                    });
                };

                let span = info_span!("specialist", agent = %kind);
                let handle = tokio::spawn(
                    async move {
                        let started = Instant::now();
                        match tokio::time::timeout(timeout, agent.analyze(&query)).await {
                            Ok(Ok(judgment)) => check_judgment(kind, judgment),
                            Ok(Err(e)) => {
                                warn!(error = %e, "Specialist failed");
                                AgentOutcome::Failed(AgentFailure::from_error(kind, &e))
                            }
                            Err(_) => {
                                let elapsed = started.elapsed().as_millis();
                                warn!(elapsed_ms = elapsed as u64, "Specialist timed out");
                                AgentOutcome::Failed(AgentFailure::timeout(kind, elapsed))
                            }
                        }
                    }
                    .instrument(span),
                );

                match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(agent = %kind, error = %e, "Specialist task aborted");
                        AgentOutcome::Failed(AgentFailure {
                            agent: kind,
                            kind: FailureKind::Internal,
                            reason: format!("task aborted: {}", e),
                        })
                    }
                }
            }
        });

        join_all(tasks).await
    }
}

/// Reject judgments that break the score/confidence ranges or claim the
/// wrong specialist
fn check_judgment(kind: SpecialistKind, mut judgment: AgentJudgment) -> AgentOutcome {
    let in_range = judgment.score.is_finite()
        && (1.0..=10.0).contains(&judgment.score)
        && judgment.confidence.is_finite()
        && (0.0..=1.0).contains(&judgment.confidence);

    if !in_range {
        return AgentOutcome::Failed(AgentFailure {
            agent: kind,
            kind: FailureKind::Parse,
            reason: format!(
                "judgment out of range (score {}, confidence {})",
                judgment.score, judgment.confidence
            ),
        });
    }

    judgment.agent = kind;
    if kind != SpecialistKind::Valuation {
        judgment.target_price = None;
    }
    AgentOutcome::Succeeded(judgment)
}
