use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::application::{
    actor_identity::ActorIdentity,
    completion_guard::{CompletionGuard, witnesses_for},
    context_compositor,
    publisher::{PublishOutcome, Publisher},
    reasoning_invoker::ReasoningInvoker,
    target_resolver::{self, ResolverPolicy},
};
use crate::domain::{
    entities::{
        Admission, AppConfig, ContextLimits, IdempotencyKey, InboundEvent, LedgerState,
        PullRequestSnapshot, PullRequestTarget, ResolvedEvent, ReviewContext, TriggerChannel,
        Witness,
    },
    errors::{ReasoningError, Rejection},
    ports::{DedupLedger, GitHubRepository, ReasoningEngine, TaskTracker},
};

/// Collaborators injected into the pipeline. Nothing here is a process global.
#[derive(Clone)]
pub struct PipelineDeps {
    pub github: Arc<dyn GitHubRepository>,
    pub tracker: Option<Arc<dyn TaskTracker>>,
    pub ledger: Arc<dyn DedupLedger>,
    pub engine: Arc<dyn ReasoningEngine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Rejected(Rejection),
    SkippedAlreadySeen(LedgerState),
    SkippedInFlight,
    SkippedAlreadyFulfilled(Witness),
    Published { comment_id: u64, tagged: bool },
    FailedRetryable(String),
    FailedFatal(String),
}

impl TriggerOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::SkippedAlreadySeen(_) => "skipped_already_seen",
            Self::SkippedInFlight => "skipped_in_flight",
            Self::SkippedAlreadyFulfilled(_) => "skipped_fulfilled",
            Self::Published { .. } => "published",
            Self::FailedRetryable(_) => "failed_retryable",
            Self::FailedFatal(_) => "failed_fatal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub channel: TriggerChannel,
    pub key: Option<IdempotencyKey>,
    pub target: Option<PullRequestTarget>,
    pub outcome: TriggerOutcome,
}

impl PipelineReport {
    pub fn summary_line(&self) -> String {
        let mut line = format!("outcome={} channel={}", self.outcome.label(), self.channel);
        if let Some(key) = &self.key {
            line.push_str(&format!(" key={key}"));
        }
        if let Some(target) = &self.target {
            line.push_str(&format!(" target={target}"));
        }
        match &self.outcome {
            TriggerOutcome::Published { comment_id, tagged } => {
                line.push_str(&format!(" comment_id={comment_id} tagged={tagged}"));
            }
            TriggerOutcome::Rejected(r) => line.push_str(&format!(" reason=\"{r}\"")),
            TriggerOutcome::SkippedAlreadySeen(state) => {
                line.push_str(&format!(" ledger_state={}", state.as_str()))
            }
            TriggerOutcome::FailedRetryable(e) | TriggerOutcome::FailedFatal(e) => {
                line.push_str(&format!(" error=\"{e}\""))
            }
            _ => {}
        }
        line
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    published: AtomicU64,
    rejected: AtomicU64,
    skipped_already_seen: AtomicU64,
    skipped_fulfilled: AtomicU64,
    skipped_in_flight: AtomicU64,
    failed_retryable: AtomicU64,
    failed_fatal: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub published: u64,
    pub rejected: u64,
    pub skipped_already_seen: u64,
    pub skipped_fulfilled: u64,
    pub skipped_in_flight: u64,
    pub failed_retryable: u64,
    pub failed_fatal: u64,
}

impl PipelineStats {
    fn record(&self, outcome: &TriggerOutcome) {
        let counter = match outcome {
            TriggerOutcome::Rejected(_) => &self.rejected,
            TriggerOutcome::SkippedAlreadySeen(_) => &self.skipped_already_seen,
            TriggerOutcome::SkippedInFlight => &self.skipped_in_flight,
            TriggerOutcome::SkippedAlreadyFulfilled(_) => &self.skipped_fulfilled,
            TriggerOutcome::Published { .. } => &self.published,
            TriggerOutcome::FailedRetryable(_) => &self.failed_retryable,
            TriggerOutcome::FailedFatal(_) => &self.failed_fatal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            skipped_already_seen: self.skipped_already_seen.load(Ordering::Relaxed),
            skipped_fulfilled: self.skipped_fulfilled.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped_in_flight.load(Ordering::Relaxed),
            failed_retryable: self.failed_retryable.load(Ordering::Relaxed),
            failed_fatal: self.failed_fatal.load(Ordering::Relaxed),
        }
    }
}

/// Non-blocking claims on (target, scope) pairs held while a pipeline runs.
#[derive(Debug, Clone, Default)]
struct InFlightClaims {
    held: Arc<Mutex<HashSet<String>>>,
}

struct ClaimGuard {
    held: Arc<Mutex<HashSet<String>>>,
    claim: String,
}

impl InFlightClaims {
    fn try_claim(&self, claim: String) -> Option<ClaimGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(claim.clone()) {
            return None;
        }
        Some(ClaimGuard {
            held: self.held.clone(),
            claim,
        })
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.claim);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    Retryable,
    Fatal,
}

fn classify_error(msg: &str) -> ErrorClass {
    let msg = msg.to_ascii_lowercase();
    let retryable_hints = [
        "rate limit",
        "too many requests",
        "timeout",
        "timed out",
        "temporar",
        "connection reset",
        "connection refused",
        "503",
        "502",
        "504",
        "429",
    ];
    if retryable_hints.iter().any(|h| msg.contains(h)) {
        ErrorClass::Retryable
    } else {
        ErrorClass::Fatal
    }
}

fn failure(msg: String) -> TriggerOutcome {
    match classify_error(&msg) {
        ErrorClass::Retryable => TriggerOutcome::FailedRetryable(msg),
        ErrorClass::Fatal => TriggerOutcome::FailedFatal(msg),
    }
}

/// The single parameterized event-to-action pipeline shared by every channel.
pub struct TriggerPipeline {
    policy: ResolverPolicy,
    processed_tag: String,
    limits: ContextLimits,
    github: Arc<dyn GitHubRepository>,
    ledger: Arc<dyn DedupLedger>,
    identity: ActorIdentity,
    guard: CompletionGuard,
    invoker: ReasoningInvoker,
    publisher: Publisher,
    in_flight: InFlightClaims,
    stats: Arc<PipelineStats>,
}

impl TriggerPipeline {
    pub fn new(deps: PipelineDeps, config: &AppConfig) -> Self {
        let identity = ActorIdentity::new(deps.github.clone());
        let guard = CompletionGuard::new(deps.github.clone(), deps.tracker.clone(), identity.clone());
        let publisher = Publisher::new(
            deps.github.clone(),
            deps.ledger.clone(),
            guard.clone(),
            config.effective_intro_line(),
        );
        let invoker = ReasoningInvoker::new(
            deps.engine,
            Duration::from_secs(config.reasoning.timeout_secs.max(1)),
        );
        Self {
            policy: ResolverPolicy {
                actor_login: config.actor_login.trim().to_string(),
                mention_marker: config.effective_mention_marker(),
            },
            processed_tag: config.processed_tag.clone(),
            limits: config.context.clone(),
            github: deps.github,
            ledger: deps.ledger,
            identity,
            guard,
            invoker,
            publisher,
            in_flight: InFlightClaims::default(),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub async fn handle(&self, event: InboundEvent) -> PipelineReport {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let report = match target_resolver::resolve(&event, &self.policy) {
            Err(rejection) => {
                tracing::info!(channel = %event.channel, reason = %rejection, "event rejected");
                PipelineReport {
                    channel: event.channel,
                    key: None,
                    target: None,
                    outcome: TriggerOutcome::Rejected(rejection),
                }
            }
            Ok(resolved) => {
                let outcome = self.run_admitted(&resolved).await;
                PipelineReport {
                    channel: event.channel,
                    key: Some(resolved.key),
                    target: Some(resolved.target),
                    outcome,
                }
            }
        };
        self.stats.record(&report.outcome);
        report
    }

    async fn run_admitted(&self, resolved: &ResolvedEvent) -> TriggerOutcome {
        let key = &resolved.key;
        let target = &resolved.target;
        match self.ledger.admit(key).await {
            Ok(Admission::Admitted) => {}
            Ok(Admission::AlreadySeen(state)) => {
                tracing::info!(key = %key, state = state.as_str(), "event already admitted, skipping");
                return TriggerOutcome::SkippedAlreadySeen(state);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %format!("{e:#}"), "ledger admit failed");
                return failure(format!("ledger admit failed: {e:#}"));
            }
        }

        let claim = format!("{}/{}", target.slug(), resolved.scope.claim_suffix());
        let Some(_claim) = self.in_flight.try_claim(claim) else {
            tracing::info!(key = %key, target = %target, "same target and scope already in flight, skipping");
            self.release(key).await;
            return TriggerOutcome::SkippedInFlight;
        };

        let outcome = self.run_claimed(resolved).await;
        if matches!(
            outcome,
            TriggerOutcome::FailedRetryable(_) | TriggerOutcome::FailedFatal(_)
        ) {
            self.release(key).await;
        }
        outcome
    }

    async fn run_claimed(&self, resolved: &ResolvedEvent) -> TriggerOutcome {
        let key = &resolved.key;
        let target = &resolved.target;
        let witnesses = witnesses_for(resolved, &self.processed_tag);

        match self.guard.find_witness(target, &witnesses).await {
            Ok(None) => {}
            Ok(Some(witness)) => {
                tracing::info!(key = %key, target = %target, witness = ?witness, "target already fulfilled, skipping");
                if let Err(e) = self.ledger.commit(key).await {
                    tracing::warn!(key = %key, error = %format!("{e:#}"), "failed to commit ledger key");
                }
                return TriggerOutcome::SkippedAlreadyFulfilled(witness);
            }
            Err(e) => {
                tracing::warn!(key = %key, target = %target, error = %format!("{e:#}"), "completion guard failed");
                return failure(format!("{e:#}"));
            }
        }

        let context = match self.compose(resolved).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(key = %key, target = %target, error = %format!("{e:#}"), "failed to build review context");
                return failure(format!("{e:#}"));
            }
        };

        let text = match self.invoker.invoke(target, &context).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    target = %target,
                    engine = self.invoker.engine_fingerprint(),
                    error = %e,
                    "reasoning engine failed, leaving target unfulfilled"
                );
                return match e {
                    ReasoningError::Timeout(_) | ReasoningError::RateLimited(_) => {
                        TriggerOutcome::FailedRetryable(e.to_string())
                    }
                    ReasoningError::UpstreamError(_) => failure(e.to_string()),
                };
            }
        };

        match self.publisher.publish(resolved, &witnesses, &text).await {
            Ok(PublishOutcome::Published { comment_id, tagged }) => {
                TriggerOutcome::Published { comment_id, tagged }
            }
            Ok(PublishOutcome::AlreadyFulfilled(witness)) => {
                tracing::info!(key = %key, target = %target, "witness appeared before write, response dropped");
                TriggerOutcome::SkippedAlreadyFulfilled(witness)
            }
            Err(e) => {
                tracing::warn!(key = %key, target = %target, error = %e, "publish failed, leaving target unfulfilled");
                failure(e.to_string())
            }
        }
    }

    async fn compose(&self, resolved: &ResolvedEvent) -> Result<ReviewContext> {
        let snapshot = self.fetch_snapshot(&resolved.target).await?;
        let actor = self.identity.login().await?;
        Ok(context_compositor::compose(
            &snapshot,
            actor,
            resolved.scope.instruction(),
            &self.limits,
        ))
    }

    async fn fetch_snapshot(&self, target: &PullRequestTarget) -> Result<PullRequestSnapshot> {
        let (owner, repo, number) = (&target.owner, &target.repo, target.number);
        let (details, diff, comments) = tokio::try_join!(
            self.github.get_pull_request(owner, repo, number),
            self.github.get_pull_request_diff(owner, repo, number),
            self.github.list_issue_comments(owner, repo, number),
        )
        .with_context(|| format!("failed to fetch {target}"))?;
        Ok(PullRequestSnapshot {
            title: details.title,
            body: details.body,
            diff,
            labels: details.labels,
            assignees: details.assignees,
            reviewers: details.reviewers,
            comments,
        })
    }

    async fn release(&self, key: &IdempotencyKey) {
        match self.ledger.release(key).await {
            Ok(released) => tracing::debug!(key = %key, released, "ledger key released"),
            Err(e) => {
                tracing::warn!(key = %key, error = %format!("{e:#}"), "failed to release ledger key")
            }
        }
    }
}
