use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::application::{
    target_resolver::parse_pull_request_reference,
    trigger_pipeline::{PipelineReport, TriggerPipeline},
};
use crate::domain::{
    entities::{
        AppConfig, DirectInvocation, EventPayload, IdempotencyKey, InboundEvent, LedgerState,
        TriggerChannel,
    },
    ports::{DedupLedger, GitHubRepository},
};
use crate::infrastructure::{memory_ledger::MemoryLedger, sqlite_ledger::SqliteLedger};

#[derive(Debug, Clone, Default)]
pub struct InvokeRequest {
    pub reference: String,
    pub comment_id: Option<u64>,
    pub instruction: Option<String>,
}

/// Opens the durable ledger at `path`, or a process-local one when `path` is `None`.
pub fn open_ledger(path: Option<&Path>) -> Result<Arc<dyn DedupLedger>> {
    match path {
        Some(path) => {
            let ledger = SqliteLedger::open(path)
                .with_context(|| format!("failed to open ledger: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "ledger opened");
            Ok(Arc::new(ledger))
        }
        None => {
            tracing::warn!("using in-memory ledger; dedup state is lost on exit");
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}

/// Builds a direct invocation event, fetching the trigger comment when one is named.
pub async fn build_direct_event(
    github: &dyn GitHubRepository,
    request: &InvokeRequest,
) -> Result<InboundEvent> {
    let (owner, repo, number) = parse_pull_request_reference(&request.reference)?;
    let comment = match request.comment_id {
        Some(id) => Some(
            github
                .get_issue_comment(&owner, &repo, id)
                .await
                .with_context(|| format!("failed to fetch comment {id} on {owner}/{repo}"))?,
        ),
        None => None,
    };
    let instruction = request
        .instruction
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(InboundEvent::new(
        TriggerChannel::DirectInvocation,
        EventPayload::Direct(DirectInvocation {
            owner,
            repo,
            number,
            comment,
            instruction,
        }),
    ))
}

pub async fn run_invoke(
    pipeline: &TriggerPipeline,
    github: &dyn GitHubRepository,
    request: InvokeRequest,
) -> Result<PipelineReport> {
    let event = build_direct_event(github, &request).await?;
    Ok(pipeline.handle(event).await)
}

pub async fn ledger_status(ledger: &dyn DedupLedger, raw_key: &str) -> Result<Option<LedgerState>> {
    ledger.state(&parse_key(raw_key)?).await
}

/// Releases an `admitted` key left behind by a crash. Committed keys stay.
pub async fn ledger_release(ledger: &dyn DedupLedger, raw_key: &str) -> Result<bool> {
    let key = parse_key(raw_key)?;
    let released = ledger.release(&key).await?;
    if released {
        tracing::info!(key = %key, "ledger key released");
    }
    Ok(released)
}

fn parse_key(raw: &str) -> Result<IdempotencyKey> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("ledger key cannot be empty");
    }
    Ok(IdempotencyKey::new(trimmed))
}

pub fn render_config(config: &AppConfig) -> Result<String> {
    serde_json::to_string_pretty(config).context("failed to serialize config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::completion_guard::reply_anchor;
    use crate::application::test_support::{BOT_LOGIN, MockGitHub, ScriptedEngine};
    use crate::application::trigger_pipeline::{PipelineDeps, TriggerOutcome};
    use crate::domain::entities::Admission;

    fn pipeline(gh: Arc<MockGitHub>, ledger: Arc<dyn DedupLedger>) -> TriggerPipeline {
        let config = AppConfig {
            actor_login: BOT_LOGIN.to_string(),
            ..AppConfig::default()
        };
        TriggerPipeline::new(
            PipelineDeps {
                github: gh,
                tracker: None,
                ledger,
                engine: Arc::new(ScriptedEngine::answering("Looks fine.")),
            },
            &config,
        )
    }

    #[tokio::test]
    async fn invoke_without_instruction_posts_full_review_once() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        let ledger = open_ledger(None).expect("ledger");
        let p = pipeline(gh.clone(), ledger);
        let request = InvokeRequest {
            reference: "https://github.com/Acme/Widgets/pull/42".to_string(),
            ..InvokeRequest::default()
        };

        let first = run_invoke(&p, gh.as_ref(), request.clone()).await.expect("invoke");
        assert!(matches!(first.outcome, TriggerOutcome::Published { .. }));
        assert_eq!(
            first.key.as_ref().map(|k| k.as_str()),
            Some("direct:acme/widgets#42")
        );

        let second = run_invoke(&p, gh.as_ref(), request).await.expect("invoke");
        assert!(matches!(second.outcome, TriggerOutcome::SkippedAlreadySeen(_)));
        assert_eq!(gh.bot_comment_count(42), 1);
    }

    #[tokio::test]
    async fn invoke_with_comment_id_replies_to_that_comment() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        gh.seed_comment(42, "dana", &format!("@{BOT_LOGIN} is the backoff capped?"));
        let comment_id = gh.comments_on(42)[0].id;
        let p = pipeline(gh.clone(), open_ledger(None).expect("ledger"));

        let report = run_invoke(
            &p,
            gh.as_ref(),
            InvokeRequest {
                reference: "acme/widgets#42".to_string(),
                comment_id: Some(comment_id),
                instruction: None,
            },
        )
        .await
        .expect("invoke");

        assert!(matches!(report.outcome, TriggerOutcome::Published { .. }));
        let anchor = reply_anchor(&format!("gh-comment-{comment_id}"));
        assert!(gh.comments_on(42).iter().any(|c| c.body.contains(&anchor)));
    }

    #[tokio::test]
    async fn invoke_rejects_bad_reference_and_missing_comment() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        let p = pipeline(gh.clone(), open_ledger(None).expect("ledger"));
        let bad = InvokeRequest {
            reference: "not a pull request".to_string(),
            ..InvokeRequest::default()
        };
        assert!(run_invoke(&p, gh.as_ref(), bad).await.is_err());

        let missing = InvokeRequest {
            reference: "acme/widgets#42".to_string(),
            comment_id: Some(999_999),
            instruction: None,
        };
        assert!(run_invoke(&p, gh.as_ref(), missing).await.is_err());
        assert_eq!(gh.bot_comment_count(42), 0);
    }

    #[tokio::test]
    async fn ledger_release_only_clears_admitted_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = open_ledger(Some(&dir.path().join("ledger.sqlite3"))).expect("ledger");
        let stuck = IdempotencyKey::new("asana-task:1200");
        let done = IdempotencyKey::new("github-review:acme/widgets#42");
        assert_eq!(ledger.admit(&stuck).await.expect("admit"), Admission::Admitted);
        assert_eq!(ledger.admit(&done).await.expect("admit"), Admission::Admitted);
        ledger.commit(&done).await.expect("commit");

        assert_eq!(
            ledger_status(ledger.as_ref(), " asana-task:1200 ").await.expect("status"),
            Some(LedgerState::Admitted)
        );
        assert!(ledger_release(ledger.as_ref(), "asana-task:1200").await.expect("release"));
        assert_eq!(
            ledger_status(ledger.as_ref(), "asana-task:1200").await.expect("status"),
            None
        );

        assert!(!ledger_release(ledger.as_ref(), done.as_str()).await.expect("release"));
        assert_eq!(
            ledger_status(ledger.as_ref(), done.as_str()).await.expect("status"),
            Some(LedgerState::Committed)
        );
        assert!(ledger_status(ledger.as_ref(), "  ").await.is_err());
    }

    #[test]
    fn rendered_config_round_trips() {
        let rendered = render_config(&AppConfig::default()).expect("render");
        let parsed: AppConfig = serde_json::from_str(&rendered).expect("parse");
        assert_eq!(parsed.processed_tag, "prismgate:reviewed");
        assert_eq!(parsed.bind, "127.0.0.1:8788");
    }
}
