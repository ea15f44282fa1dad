use std::sync::Arc;

use crate::application::completion_guard::{CompletionGuard, reply_anchor};
use crate::domain::{
    entities::{ResolvedEvent, ReviewScope, Witness},
    errors::PublishError,
    ports::{DedupLedger, GitHubRepository},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { comment_id: u64, tagged: bool },
    /// A witness appeared between the first guard check and the write.
    AlreadyFulfilled(Witness),
}

/// Writes the engine response onto the pull request and records the witness.
///
/// The pre-write guard check is the linearization point: a concurrent pipeline
/// that committed first is seen here and the response is dropped.
#[derive(Clone)]
pub struct Publisher {
    github: Arc<dyn GitHubRepository>,
    ledger: Arc<dyn DedupLedger>,
    guard: CompletionGuard,
    intro_line: String,
}

impl Publisher {
    pub fn new(
        github: Arc<dyn GitHubRepository>,
        ledger: Arc<dyn DedupLedger>,
        guard: CompletionGuard,
        intro_line: String,
    ) -> Self {
        Self {
            github,
            ledger,
            guard,
            intro_line,
        }
    }

    pub async fn publish(
        &self,
        resolved: &ResolvedEvent,
        witnesses: &[Witness],
        text: &str,
    ) -> Result<PublishOutcome, PublishError> {
        let target = &resolved.target;
        let existing = self
            .guard
            .find_witness(target, witnesses)
            .await
            .map_err(|e| PublishError::WriteError(format!("pre-write witness check failed: {e:#}")))?;
        if let Some(witness) = existing {
            self.commit(resolved).await;
            return Ok(PublishOutcome::AlreadyFulfilled(witness));
        }

        let body = self.render_body(&resolved.scope, text);
        let comment_id = self
            .github
            .create_issue_comment(&target.owner, &target.repo, target.number, &body)
            .await
            .map_err(|e| PublishError::WriteError(format!("{e:#}")))?;

        let tagged = match self.guard.record_witnesses(witnesses).await {
            Ok(()) => witnesses.iter().any(|w| matches!(w, Witness::Tag { .. })),
            Err(e) => {
                tracing::warn!(
                    target = %target,
                    key = %resolved.key,
                    error = %format!("{e:#}"),
                    "comment posted but processed tag could not be attached"
                );
                false
            }
        };
        self.commit(resolved).await;

        tracing::info!(
            target = %target,
            key = %resolved.key,
            comment_id,
            tagged,
            "review comment published"
        );
        Ok(PublishOutcome::Published { comment_id, tagged })
    }

    fn render_body(&self, scope: &ReviewScope, text: &str) -> String {
        match scope {
            ReviewScope::Full => format!("{}\n\n{}", self.intro_line.trim(), text.trim()),
            ReviewScope::Reply { anchor_id, .. } => {
                format!("{}\n\n{}", text.trim(), reply_anchor(anchor_id))
            }
        }
    }

    async fn commit(&self, resolved: &ResolvedEvent) {
        // Best effort: the posted comment is itself a witness.
        if let Err(e) = self.ledger.commit(&resolved.key).await {
            tracing::warn!(key = %resolved.key, error = %format!("{e:#}"), "failed to commit ledger key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::actor_identity::ActorIdentity;
    use crate::application::completion_guard::witnesses_for;
    use crate::application::test_support::{BOT_LOGIN, MockGitHub, MockTracker};
    use crate::domain::entities::{
        Admission, IdempotencyKey, LedgerState, PullRequestTarget, TaskAnchor, TriggerChannel,
    };
    use crate::domain::ports::TaskTracker;
    use crate::infrastructure::memory_ledger::MemoryLedger;

    fn fixture(
        gh: Arc<MockGitHub>,
        tracker: Option<Arc<MockTracker>>,
    ) -> (Publisher, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let guard = CompletionGuard::new(
            gh.clone(),
            tracker.map(|t| t as Arc<dyn TaskTracker>),
            ActorIdentity::new(gh.clone()),
        );
        let publisher = Publisher::new(gh, ledger.clone(), guard, "Hi, I'm the reviewer.".to_string());
        (publisher, ledger)
    }

    fn resolved(scope: ReviewScope, task: Option<TaskAnchor>) -> ResolvedEvent {
        ResolvedEvent {
            target: PullRequestTarget::new("acme", "widgets", 42, TriggerChannel::TaskCreated),
            key: IdempotencyKey::new("asana-task:t1"),
            scope,
            task,
        }
    }

    #[tokio::test]
    async fn full_review_gets_intro_and_tags_task() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        let tracker = Arc::new(MockTracker::with_task("t1", ""));
        let (publisher, ledger) = fixture(gh.clone(), Some(tracker.clone()));
        let event = resolved(
            ReviewScope::Full,
            Some(TaskAnchor {
                task_gid: "t1".to_string(),
                workspace_gid: None,
            }),
        );
        ledger.admit(&event.key).await.expect("admit");

        let outcome = publisher
            .publish(&event, &witnesses_for(&event, "reviewed"), "Looks fine.")
            .await
            .expect("publish");

        assert!(matches!(outcome, PublishOutcome::Published { tagged: true, .. }));
        let comments = gh.comments_on(42);
        assert_eq!(comments[0].body, "Hi, I'm the reviewer.\n\nLooks fine.");
        assert_eq!(tracker.task_tag_names("t1"), vec!["reviewed"]);
        assert_eq!(
            ledger.state(&event.key).await.expect("state"),
            Some(LedgerState::Committed)
        );
    }

    #[tokio::test]
    async fn reply_carries_anchor_without_intro() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        let (publisher, _) = fixture(gh.clone(), None);
        let event = resolved(
            ReviewScope::Reply {
                anchor_id: "gh-comment-7".to_string(),
                instruction: Some("why?".to_string()),
            },
            None,
        );
        publisher
            .publish(&event, &witnesses_for(&event, "reviewed"), "Because.")
            .await
            .expect("publish");
        assert_eq!(
            gh.comments_on(42)[0].body,
            format!("Because.\n\n{}", reply_anchor("gh-comment-7"))
        );
    }

    #[tokio::test]
    async fn write_failure_leaves_no_witness_and_no_commit() {
        let gh = Arc::new(MockGitHub {
            fail_create_comment: true,
            ..MockGitHub::with_pull(42)
        });
        let tracker = Arc::new(MockTracker::with_task("t1", ""));
        let (publisher, ledger) = fixture(gh.clone(), Some(tracker.clone()));
        let event = resolved(
            ReviewScope::Full,
            Some(TaskAnchor {
                task_gid: "t1".to_string(),
                workspace_gid: Some("ws-1".to_string()),
            }),
        );
        assert_eq!(ledger.admit(&event.key).await.expect("admit"), Admission::Admitted);

        let err = publisher
            .publish(&event, &witnesses_for(&event, "reviewed"), "text")
            .await
            .expect_err("write fails");
        assert!(matches!(err, PublishError::WriteError(msg) if msg.contains("simulated network error")));
        assert!(tracker.task_tag_names("t1").is_empty());
        assert_eq!(
            ledger.state(&event.key).await.expect("state"),
            Some(LedgerState::Admitted)
        );
    }

    #[tokio::test]
    async fn existing_witness_blocks_write() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        gh.seed_comment(42, BOT_LOGIN, "earlier review");
        let (publisher, ledger) = fixture(gh.clone(), None);
        let event = resolved(ReviewScope::Full, None);

        let outcome = publisher
            .publish(&event, &[Witness::Identity], "again")
            .await
            .expect("publish");
        assert_eq!(outcome, PublishOutcome::AlreadyFulfilled(Witness::Identity));
        assert_eq!(gh.bot_comment_count(42), 1);
        assert_eq!(
            ledger.state(&event.key).await.expect("state"),
            Some(LedgerState::Committed)
        );
    }

    #[tokio::test]
    async fn tag_failure_does_not_fail_publish() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        let tracker = Arc::new(MockTracker {
            fail_attach: true,
            ..MockTracker::with_task("t1", "")
        });
        let (publisher, _) = fixture(gh.clone(), Some(tracker));
        let event = resolved(
            ReviewScope::Full,
            Some(TaskAnchor {
                task_gid: "t1".to_string(),
                workspace_gid: Some("ws-1".to_string()),
            }),
        );
        let outcome = publisher
            .publish(&event, &witnesses_for(&event, "reviewed"), "ok")
            .await
            .expect("publish");
        assert!(matches!(outcome, PublishOutcome::Published { tagged: false, .. }));
        assert_eq!(gh.bot_comment_count(42), 1);
    }
}
