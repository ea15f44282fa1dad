use std::collections::BTreeSet;

use crate::application::actor_identity::ActorIdentity;
use crate::domain::entities::{ContextLimits, PriorComment, PullRequestSnapshot, ReviewContext};

/// Builds the bounded review context for one invocation.
///
/// Pure: identical snapshot, actor, instruction and limits always produce the
/// same context. Comments authored by `actor_login` are dropped.
pub fn compose(
    snapshot: &PullRequestSnapshot,
    actor_login: &str,
    instruction: Option<&str>,
    limits: &ContextLimits,
) -> ReviewContext {
    let human_comments = snapshot
        .comments
        .iter()
        .filter(|c| !ActorIdentity::is_actor(c.author_login.as_deref(), actor_login))
        .map(|c| PriorComment {
            author: c.author_login.clone().unwrap_or_else(|| "unknown".to_string()),
            body: c.body.trim().to_string(),
        })
        .collect::<Vec<_>>();
    let skip = human_comments.len().saturating_sub(limits.max_prior_comments);

    ReviewContext {
        title: snapshot.title.trim().to_string(),
        description: snapshot.body.trim().to_string(),
        diff: truncate_diff(&snapshot.diff, limits.max_diff_chars),
        labels: sorted_unique(&snapshot.labels),
        assignees: sorted_unique(&snapshot.assignees),
        reviewers: sorted_unique(&snapshot.reviewers),
        prior_comments: human_comments.into_iter().skip(skip).collect(),
        free_text_instruction: instruction
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
    }
}

fn sorted_unique(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn truncate_diff(diff: &str, max_chars: usize) -> String {
    let total = diff.chars().count();
    if total <= max_chars {
        return diff.to_string();
    }
    let cut = diff
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(diff.len());
    let mut out = diff[..cut].to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!(
        "... diff truncated ({max_chars} of {total} chars shown)\n"
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::SimpleComment;

    fn comment(id: u64, author: &str, body: &str) -> SimpleComment {
        SimpleComment {
            id,
            body: body.to_string(),
            author_login: Some(author.to_string()),
        }
    }

    fn snapshot() -> PullRequestSnapshot {
        PullRequestSnapshot {
            title: " Add retry ".to_string(),
            body: "Retries uploads.\n".to_string(),
            diff: "diff --git a/x b/x\n+1\n".to_string(),
            labels: vec!["b".to_string(), "a".to_string(), "b".to_string()],
            assignees: vec!["carol".to_string()],
            reviewers: vec!["prismgate-bot".to_string(), "".to_string()],
            comments: vec![
                comment(1, "carol", "please check the timeout"),
                comment(2, "PrismGate-Bot", "previous review"),
                comment(3, "dave", "ack"),
            ],
        }
    }

    #[test]
    fn excludes_comments_from_actor_case_insensitively() {
        let ctx = compose(&snapshot(), "prismgate-bot", None, &ContextLimits::default());
        let authors = ctx
            .prior_comments
            .iter()
            .map(|c| c.author.as_str())
            .collect::<Vec<_>>();
        assert_eq!(authors, vec!["carol", "dave"]);
    }

    #[test]
    fn lists_are_sorted_and_deduplicated() {
        let ctx = compose(&snapshot(), "prismgate-bot", None, &ContextLimits::default());
        assert_eq!(ctx.labels, vec!["a", "b"]);
        assert_eq!(ctx.reviewers, vec!["prismgate-bot"]);
        assert_eq!(ctx.title, "Add retry");
    }

    #[test]
    fn composition_is_deterministic() {
        let limits = ContextLimits::default();
        let a = compose(&snapshot(), "prismgate-bot", Some(" why? "), &limits);
        let b = compose(&snapshot(), "prismgate-bot", Some(" why? "), &limits);
        assert_eq!(a, b);
        assert_eq!(a.free_text_instruction.as_deref(), Some("why?"));
    }

    #[test]
    fn keeps_only_the_most_recent_prior_comments() {
        let limits = ContextLimits {
            max_diff_chars: 1000,
            max_prior_comments: 1,
        };
        let ctx = compose(&snapshot(), "prismgate-bot", None, &limits);
        assert_eq!(ctx.prior_comments.len(), 1);
        assert_eq!(ctx.prior_comments[0].author, "dave");
    }

    #[test]
    fn truncates_diff_on_char_boundary() {
        let out = truncate_diff("héllo wörld", 4);
        assert!(out.starts_with("héll\n"));
        assert!(out.ends_with("... diff truncated (4 of 11 chars shown)\n"));
        assert_eq!(truncate_diff("short", 10), "short");
    }

    #[test]
    fn blank_instruction_is_treated_as_absent() {
        let ctx = compose(&snapshot(), "prismgate-bot", Some("   "), &ContextLimits::default());
        assert_eq!(ctx.free_text_instruction, None);
    }
}
