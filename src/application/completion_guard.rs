use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use crate::application::actor_identity::ActorIdentity;
use crate::domain::{
    entities::{PullRequestTarget, ResolvedEvent, ReviewScope, SimpleComment, TaskAnchor, Witness},
    ports::{GitHubRepository, TaskTracker},
};

const REPLY_ANCHOR_PREFIX: &str = "<!-- prismgate:reply:";

/// Hidden marker carried by every reply comment so the reply itself is the witness.
pub fn reply_anchor(anchor_id: &str) -> String {
    format!("{REPLY_ANCHOR_PREFIX}{anchor_id} -->")
}

/// Witnesses consulted for a resolved event.
///
/// Task-anchored full reviews check both the task tag and the pull request's
/// own comments, so a review posted through any channel blocks the task channel.
pub fn witnesses_for(resolved: &ResolvedEvent, processed_tag: &str) -> Vec<Witness> {
    match &resolved.scope {
        ReviewScope::Reply { anchor_id, .. } => vec![Witness::ReplyAnchor {
            anchor_id: anchor_id.clone(),
        }],
        ReviewScope::Full => {
            let mut out = Vec::new();
            if let Some(task) = &resolved.task {
                out.push(Witness::Tag {
                    task: task.clone(),
                    tag_name: processed_tag.to_string(),
                });
            }
            out.push(Witness::Identity);
            out
        }
    }
}

/// State-derived check that reads the target's own durable state, never the ledger.
#[derive(Clone)]
pub struct CompletionGuard {
    github: Arc<dyn GitHubRepository>,
    tracker: Option<Arc<dyn TaskTracker>>,
    identity: ActorIdentity,
}

impl CompletionGuard {
    pub fn new(
        github: Arc<dyn GitHubRepository>,
        tracker: Option<Arc<dyn TaskTracker>>,
        identity: ActorIdentity,
    ) -> Self {
        Self {
            github,
            tracker,
            identity,
        }
    }

    /// First witness found on the target, if any.
    pub async fn find_witness(
        &self,
        target: &PullRequestTarget,
        witnesses: &[Witness],
    ) -> Result<Option<Witness>> {
        let mut comments: Option<Vec<SimpleComment>> = None;

        for witness in witnesses {
            let found = match witness {
                Witness::Tag { task, tag_name } => self.task_has_tag(task, tag_name).await?,
                Witness::Identity | Witness::ReplyAnchor { .. } => {
                    if comments.is_none() {
                        comments = Some(
                            self.github
                                .list_issue_comments(&target.owner, &target.repo, target.number)
                                .await
                                .with_context(|| format!("failed to list comments on {target}"))?,
                        );
                    }
                    let actor = self.identity.login().await?;
                    let comments = comments.as_deref().unwrap_or_default();
                    comments_witness(comments, actor, witness)
                }
            };
            if found {
                return Ok(Some(witness.clone()));
            }
        }
        Ok(None)
    }

    /// Attaches the processed tag for every tag witness: find-or-create the tag
    /// in the task's workspace, then attach it to the task.
    pub async fn record_witnesses(&self, witnesses: &[Witness]) -> Result<()> {
        for witness in witnesses {
            let Witness::Tag { task, tag_name } = witness else {
                continue;
            };
            let tracker = self.tracker()?;
            let workspace = match &task.workspace_gid {
                Some(gid) => gid.clone(),
                None => tracker
                    .get_task(&task.task_gid)
                    .await?
                    .workspace_gid
                    .ok_or_else(|| anyhow!("task {} has no workspace", task.task_gid))?,
            };
            let tag = match tracker.find_tag_by_name(&workspace, tag_name).await? {
                Some(tag) => tag,
                None => tracker.create_tag(&workspace, tag_name).await?,
            };
            tracker
                .add_tag_to_task(&task.task_gid, &tag.gid)
                .await
                .with_context(|| format!("failed to tag task {}", task.task_gid))?;
        }
        Ok(())
    }

    async fn task_has_tag(&self, task: &TaskAnchor, tag_name: &str) -> Result<bool> {
        let tags = self
            .tracker()?
            .list_task_tags(&task.task_gid)
            .await
            .with_context(|| format!("failed to read tags of task {}", task.task_gid))?;
        Ok(tags.iter().any(|t| t.name.eq_ignore_ascii_case(tag_name)))
    }

    fn tracker(&self) -> Result<&Arc<dyn TaskTracker>> {
        self.tracker
            .as_ref()
            .ok_or_else(|| anyhow!("task tracker is not configured"))
    }
}

fn comments_witness(comments: &[SimpleComment], actor: &str, witness: &Witness) -> bool {
    let mut by_actor = comments
        .iter()
        .filter(|c| ActorIdentity::is_actor(c.author_login.as_deref(), actor));
    match witness {
        // Answers to instructions do not count as a full review.
        Witness::Identity => by_actor.any(|c| !c.body.contains(REPLY_ANCHOR_PREFIX)),
        Witness::ReplyAnchor { anchor_id } => {
            let anchor = reply_anchor(anchor_id);
            by_actor.any(|c| c.body.contains(&anchor))
        }
        Witness::Tag { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{BOT_LOGIN, MockGitHub, MockTracker};
    use crate::domain::entities::{IdempotencyKey, TriggerChannel};

    fn target() -> PullRequestTarget {
        PullRequestTarget::new("acme", "widgets", 42, TriggerChannel::CodeHostReview)
    }

    fn guard(gh: Arc<MockGitHub>, tracker: Option<Arc<MockTracker>>) -> CompletionGuard {
        let tracker = tracker.map(|t| t as Arc<dyn TaskTracker>);
        CompletionGuard::new(gh.clone(), tracker, ActorIdentity::new(gh))
    }

    fn task_anchor() -> TaskAnchor {
        TaskAnchor {
            task_gid: "t1".to_string(),
            workspace_gid: Some("ws-1".to_string()),
        }
    }

    #[tokio::test]
    async fn identity_witness_matches_actor_comments_only() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        gh.seed_comment(42, "carol", "LGTM");
        let g = guard(gh.clone(), None);
        assert!(!g
            .find_witness(&target(), &[Witness::Identity])
            .await
            .expect("guard")
            .is_some());

        gh.seed_comment(42, BOT_LOGIN, "Looks risky");
        assert!(g
            .find_witness(&target(), &[Witness::Identity])
            .await
            .expect("guard")
            .is_some());
    }

    #[tokio::test]
    async fn anchored_replies_are_not_identity_witnesses() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        gh.seed_comment(42, BOT_LOGIN, &format!("It is bounded.\n\n{}", reply_anchor("gh-comment-7")));
        let g = guard(gh.clone(), None);
        assert_eq!(
            g.find_witness(&target(), &[Witness::Identity]).await.expect("guard"),
            None
        );

        gh.seed_comment(42, BOT_LOGIN, "Full review");
        assert_eq!(
            g.find_witness(&target(), &[Witness::Identity]).await.expect("guard"),
            Some(Witness::Identity)
        );
    }

    #[tokio::test]
    async fn reply_anchor_requires_matching_anchor_from_actor() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        gh.seed_comment(42, BOT_LOGIN, &format!("answer\n{}", reply_anchor("gh-comment-1")));
        gh.seed_comment(42, "mallory", &reply_anchor("gh-comment-2"));
        let g = guard(gh, None);

        let done = |id: &str| Witness::ReplyAnchor {
            anchor_id: id.to_string(),
        };
        assert!(g
            .find_witness(&target(), &[done("gh-comment-1")])
            .await
            .expect("guard")
            .is_some());
        assert!(!g
            .find_witness(&target(), &[done("gh-comment-2")])
            .await
            .expect("guard")
            .is_some());
    }

    #[tokio::test]
    async fn tag_witness_find_or_creates_then_detects_tag() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        let tracker = Arc::new(MockTracker::with_task("t1", ""));
        let g = guard(gh, Some(tracker.clone()));
        let witness = Witness::Tag {
            task: task_anchor(),
            tag_name: "prismgate:reviewed".to_string(),
        };

        assert!(!g
            .find_witness(&target(), std::slice::from_ref(&witness))
            .await
            .expect("guard")
            .is_some());
        g.record_witnesses(std::slice::from_ref(&witness))
            .await
            .expect("record");
        g.record_witnesses(std::slice::from_ref(&witness))
            .await
            .expect("record again");

        assert_eq!(tracker.created_tags.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(tracker.task_tag_names("t1"), vec!["prismgate:reviewed"]);
        assert!(g
            .find_witness(&target(), &[witness])
            .await
            .expect("guard")
            .is_some());
    }

    #[tokio::test]
    async fn identity_is_resolved_once_per_guard() {
        let gh = Arc::new(MockGitHub::with_pull(42));
        let g = guard(gh.clone(), None);
        for _ in 0..3 {
            g.find_witness(&target(), &[Witness::Identity])
                .await
                .expect("guard");
        }
        assert_eq!(gh.user_lookups.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn task_anchored_full_review_checks_tag_and_identity() {
        let resolved = ResolvedEvent {
            target: target(),
            key: IdempotencyKey::new("asana-task:t1"),
            scope: ReviewScope::Full,
            task: Some(task_anchor()),
        };
        let witnesses = witnesses_for(&resolved, "done");
        assert_eq!(witnesses.len(), 2);
        assert!(matches!(witnesses[0], Witness::Tag { .. }));
        assert_eq!(witnesses[1], Witness::Identity);
    }
}
