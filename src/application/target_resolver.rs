use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::domain::{
    entities::{
        DirectInvocation, EventPayload, IdempotencyKey, InboundEvent, IssueCommentEventPayload,
        PullRequestEventPayload, PullRequestTarget, ResolvedEvent, ReviewScope, StoryRecord,
        TaskAnchor, TaskRecord, TriggerChannel,
    },
    errors::{DomainError, Rejection},
};

const REVIEW_REQUESTED_ACTION: &str = "review_requested";
const COMMENT_CREATED_ACTION: &str = "created";
const STORY_COMMENT_SUBTYPE: &str = "comment_added";

static PULL_URL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:www\.)?github\.com/[^\s)\]>"'<]+?/pull/[^\s)\]>"'<#?/,]*"#)
        .expect("pull url shape regex")
});

static PULL_URL_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/pull/(\d+)$")
        .expect("pull url parts regex")
});

#[derive(Debug, Clone)]
pub struct ResolverPolicy {
    pub actor_login: String,
    pub mention_marker: String,
}

/// Turns an inbound event into a canonical target. Never touches external state.
pub fn resolve(event: &InboundEvent, policy: &ResolverPolicy) -> Result<ResolvedEvent, Rejection> {
    match (&event.channel, &event.payload) {
        (TriggerChannel::CodeHostReview, EventPayload::PullRequest(payload)) => {
            resolve_review_request(payload, policy)
        }
        (TriggerChannel::CodeHostMention, EventPayload::IssueComment(payload)) => {
            resolve_mention(payload, policy)
        }
        (TriggerChannel::TaskCreated, EventPayload::Task { task, story: None }) => {
            resolve_task_created(task)
        }
        (
            TriggerChannel::TaskComment,
            EventPayload::Task {
                task,
                story: Some(story),
            },
        ) => resolve_task_comment(task, story, policy),
        (TriggerChannel::DirectInvocation, EventPayload::Direct(direct)) => {
            Ok(resolve_direct(direct, policy))
        }
        (channel, _) => Err(Rejection::UnsupportedEvent(format!(
            "payload does not match channel {channel}"
        ))),
    }
}

fn resolve_review_request(
    payload: &PullRequestEventPayload,
    policy: &ResolverPolicy,
) -> Result<ResolvedEvent, Rejection> {
    if payload.action != REVIEW_REQUESTED_ACTION {
        return Err(Rejection::UnsupportedEvent(format!(
            "pull_request.{}",
            payload.action
        )));
    }
    let requested = payload.requested_reviewer.as_ref().map(|u| u.login.clone());
    if requested.as_deref() != Some(policy.actor_login.as_str()) {
        return Err(Rejection::NotAddressedToActor {
            expected: policy.actor_login.clone(),
            requested,
        });
    }

    let target = PullRequestTarget::new(
        &payload.repository.owner.login,
        &payload.repository.name,
        payload.pull_request.number,
        TriggerChannel::CodeHostReview,
    );
    let key = IdempotencyKey::new(format!(
        "{}:{}",
        TriggerChannel::CodeHostReview,
        target.slug()
    ));
    Ok(ResolvedEvent {
        target,
        key,
        scope: ReviewScope::Full,
        task: None,
    })
}

fn resolve_mention(
    payload: &IssueCommentEventPayload,
    policy: &ResolverPolicy,
) -> Result<ResolvedEvent, Rejection> {
    if payload.action != COMMENT_CREATED_ACTION {
        return Err(Rejection::UnsupportedEvent(format!(
            "issue_comment.{}",
            payload.action
        )));
    }
    if payload.issue.pull_request.is_none() {
        return Err(Rejection::UnsupportedEvent(
            "issue_comment on a plain issue".to_string(),
        ));
    }
    let author = payload.comment.user.as_ref().map(|u| u.login.as_str());
    if author.is_some_and(|a| a.eq_ignore_ascii_case(&policy.actor_login)) {
        return Err(Rejection::SelfAuthored);
    }
    let body = payload.comment.body.as_deref().unwrap_or_default();
    if !contains_marker(body, &policy.mention_marker) {
        return Err(Rejection::UnsupportedEvent(
            "comment does not mention the actor".to_string(),
        ));
    }

    let target = PullRequestTarget::new(
        &payload.repository.owner.login,
        &payload.repository.name,
        payload.issue.number,
        TriggerChannel::CodeHostMention,
    );
    let key = IdempotencyKey::new(format!(
        "{}:{}:comment:{}",
        TriggerChannel::CodeHostMention,
        target.slug(),
        payload.comment.id
    ));
    Ok(ResolvedEvent {
        target,
        key,
        scope: ReviewScope::Reply {
            anchor_id: format!("gh-comment-{}", payload.comment.id),
            instruction: extract_instruction(body, &policy.mention_marker),
        },
        task: None,
    })
}

fn resolve_task_created(task: &TaskRecord) -> Result<ResolvedEvent, Rejection> {
    let target = target_from_text(&task.notes, TriggerChannel::TaskCreated)?;
    Ok(ResolvedEvent {
        target,
        key: IdempotencyKey::new(format!("{}:{}", TriggerChannel::TaskCreated, task.gid)),
        scope: ReviewScope::Full,
        task: Some(task_anchor(task)),
    })
}

fn resolve_task_comment(
    task: &TaskRecord,
    story: &StoryRecord,
    policy: &ResolverPolicy,
) -> Result<ResolvedEvent, Rejection> {
    if let Some(subtype) = story.resource_subtype.as_deref() {
        if subtype != STORY_COMMENT_SUBTYPE {
            return Err(Rejection::UnsupportedEvent(format!("story.{subtype}")));
        }
    }
    if !contains_marker(&story.text, &policy.mention_marker) {
        return Err(Rejection::UnsupportedEvent(
            "task comment does not mention the actor".to_string(),
        ));
    }

    let target = target_from_text(&task.notes, TriggerChannel::TaskComment)?;
    Ok(ResolvedEvent {
        target,
        key: IdempotencyKey::new(format!("{}:{}", TriggerChannel::TaskComment, story.gid)),
        scope: ReviewScope::Reply {
            anchor_id: format!("asana-story-{}", story.gid),
            instruction: extract_instruction(&story.text, &policy.mention_marker),
        },
        task: Some(task_anchor(task)),
    })
}

fn resolve_direct(direct: &DirectInvocation, policy: &ResolverPolicy) -> ResolvedEvent {
    let target = PullRequestTarget::new(
        &direct.owner,
        &direct.repo,
        direct.number,
        TriggerChannel::DirectInvocation,
    );
    let base = format!("{}:{}", TriggerChannel::DirectInvocation, target.slug());

    let explicit = direct
        .instruction
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string);

    let (key, scope) = if let Some(comment) = &direct.comment {
        let instruction = explicit
            .or_else(|| extract_instruction(&comment.body, &policy.mention_marker))
            .or_else(|| Some(comment.body.trim().to_string()).filter(|v| !v.is_empty()));
        (
            format!("{base}:comment:{}", comment.id),
            ReviewScope::Reply {
                anchor_id: format!("gh-comment-{}", comment.id),
                instruction,
            },
        )
    } else if let Some(instruction) = explicit {
        let digest = instruction_digest(&instruction);
        (
            format!("{base}:instruction:{digest}"),
            ReviewScope::Reply {
                anchor_id: format!("instruction-{digest}"),
                instruction: Some(instruction),
            },
        )
    } else {
        (base, ReviewScope::Full)
    };

    ResolvedEvent {
        target,
        key: IdempotencyKey::new(key),
        scope,
        task: None,
    }
}

fn task_anchor(task: &TaskRecord) -> TaskAnchor {
    TaskAnchor {
        task_gid: task.gid.clone(),
        workspace_gid: task.workspace_gid.clone(),
    }
}

fn target_from_text(text: &str, channel: TriggerChannel) -> Result<PullRequestTarget, Rejection> {
    let (owner, repo, number) = extract_pull_request_url(text)?;
    Ok(PullRequestTarget::new(&owner, &repo, number, channel))
}

/// First substring shaped like a pull request URL, decomposed into owner/repo/number.
pub fn extract_pull_request_url(text: &str) -> Result<(String, String, u64), Rejection> {
    let found = PULL_URL_SHAPE
        .find(text)
        .ok_or(Rejection::NoTargetFound)?
        .as_str()
        .trim_end_matches(['.', ',', ';', ':', '!']);

    let caps = PULL_URL_PARTS
        .captures(found)
        .ok_or_else(|| Rejection::MalformedTarget(found.to_string()))?;
    let number = caps[3]
        .parse::<u64>()
        .map_err(|_| Rejection::MalformedTarget(found.to_string()))?;
    if number == 0 {
        return Err(Rejection::MalformedTarget(found.to_string()));
    }
    Ok((caps[1].to_string(), caps[2].to_string(), number))
}

/// Text following the first occurrence of `marker`, matched case-insensitively.
pub fn extract_instruction(text: &str, marker: &str) -> Option<String> {
    let marker = marker.trim();
    let idx = find_marker(text, marker)?;
    let tail = text[idx + marker.len()..].trim();
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

fn contains_marker(text: &str, marker: &str) -> bool {
    find_marker(text, marker).is_some()
}

fn find_marker(text: &str, marker: &str) -> Option<usize> {
    let marker = marker.trim();
    if marker.is_empty() {
        return None;
    }
    text.to_ascii_lowercase()
        .find(&marker.to_ascii_lowercase())
}

pub fn instruction_digest(instruction: &str) -> String {
    let digest = Sha256::digest(instruction.trim().as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Accepts `https://github.com/<owner>/<repo>/pull/<n>` or `<owner>/<repo>#<n>`.
pub fn parse_pull_request_reference(raw: &str) -> Result<(String, String, u64), DomainError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("github.com/") {
        return match extract_pull_request_url(trimmed) {
            Ok(parts) => Ok(parts),
            Err(_) => Err(DomainError::InvalidPullRequestReference(raw.to_string())),
        };
    }

    let (repo_part, number) = trimmed
        .split_once('#')
        .ok_or_else(|| DomainError::InvalidPullRequestReference(raw.to_string()))?;
    let (owner, repo) = repo_part
        .split_once('/')
        .ok_or_else(|| DomainError::InvalidPullRequestReference(raw.to_string()))?;
    let number = number
        .parse::<u64>()
        .map_err(|_| DomainError::InvalidPullRequestReference(raw.to_string()))?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') || number == 0 {
        return Err(DomainError::InvalidPullRequestReference(raw.to_string()));
    }
    Ok((owner.to_string(), repo.to_string(), number))
}
