use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub actor_login: String,
    #[serde(default)]
    pub mention_marker: Option<String>,
    #[serde(default = "default_processed_tag")]
    pub processed_tag: String,
    #[serde(default)]
    pub intro_line: Option<String>,
    #[serde(default)]
    pub ledger_path: Option<String>,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub context: ContextLimits,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            actor_login: String::new(),
            mention_marker: None,
            processed_tag: default_processed_tag(),
            intro_line: None,
            ledger_path: None,
            bind: default_bind(),
            context: ContextLimits::default(),
            reasoning: ReasoningConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn effective_mention_marker(&self) -> String {
        match &self.mention_marker {
            Some(marker) if !marker.trim().is_empty() => marker.trim().to_string(),
            _ => format!("@{}", self.actor_login.trim()),
        }
    }

    pub fn effective_intro_line(&self) -> String {
        self.intro_line
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                "Hi, I'm the automated reviewer for this repository. Here is my take on this pull request.".to_string()
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLimits {
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,
    #[serde(default = "default_max_prior_comments")]
    pub max_prior_comments: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_diff_chars: default_max_diff_chars(),
            max_prior_comments: default_max_prior_comments(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// No engine runs until one is configured explicitly.
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub keep_prompt_files: bool,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            engine: None,
            timeout_secs: default_reasoning_timeout_secs(),
            keep_prompt_files: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineConfig {
    Shell {
        command: String,
    },
    OpenAi {
        #[serde(default = "default_openai_api_base")]
        api_base: String,
        model: String,
        #[serde(default = "default_openai_api_key_env")]
        api_key_env: String,
    },
}

fn default_processed_tag() -> String {
    "prismgate:reviewed".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8788".to_string()
}

fn default_max_diff_chars() -> usize {
    60_000
}

fn default_max_prior_comments() -> usize {
    50
}

fn default_reasoning_timeout_secs() -> u64 {
    300
}

fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerChannel {
    CodeHostReview,
    CodeHostMention,
    TaskComment,
    TaskCreated,
    DirectInvocation,
}

impl TriggerChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeHostReview => "github-review",
            Self::CodeHostMention => "github-mention",
            Self::TaskComment => "asana-story",
            Self::TaskCreated => "asana-task",
            Self::DirectInvocation => "direct",
        }
    }
}

impl fmt::Display for TriggerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery from any trigger channel. Lives for a single ingestion cycle.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub channel: TriggerChannel,
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(channel: TriggerChannel, payload: EventPayload) -> Self {
        Self {
            channel,
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    PullRequest(PullRequestEventPayload),
    IssueComment(IssueCommentEventPayload),
    Task {
        task: TaskRecord,
        story: Option<StoryRecord>,
    },
    Direct(DirectInvocation),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEventPayload {
    pub action: String,
    pub pull_request: WebhookPullRequest,
    pub repository: WebhookRepository,
    #[serde(default)]
    pub requested_reviewer: Option<WebhookUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentEventPayload {
    pub action: String,
    pub issue: WebhookIssue,
    pub comment: WebhookComment,
    pub repository: WebhookRepository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPullRequest {
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookIssue {
    pub number: u64,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<WebhookUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRepository {
    pub name: String,
    pub owner: WebhookUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookUser {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub gid: String,
    pub name: String,
    pub notes: String,
    pub workspace_gid: Option<String>,
    pub tags: Vec<TagRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryRecord {
    pub gid: String,
    pub text: String,
    pub resource_subtype: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
    pub gid: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DirectInvocation {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub comment: Option<SimpleComment>,
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRequestTarget {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub source_channel: TriggerChannel,
}

impl PullRequestTarget {
    pub fn new(owner: &str, repo: &str, number: u64, source_channel: TriggerChannel) -> Self {
        Self {
            owner: owner.to_ascii_lowercase(),
            repo: repo.to_ascii_lowercase(),
            number,
            source_channel,
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}#{}", self.owner, self.repo, self.number)
    }
}

impl fmt::Display for PullRequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewScope {
    Full,
    Reply {
        anchor_id: String,
        instruction: Option<String>,
    },
}

impl ReviewScope {
    pub fn instruction(&self) -> Option<&str> {
        match self {
            Self::Full => None,
            Self::Reply { instruction, .. } => instruction.as_deref(),
        }
    }

    pub fn claim_suffix(&self) -> String {
        match self {
            Self::Full => "full".to_string(),
            Self::Reply { anchor_id, .. } => format!("reply:{anchor_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAnchor {
    pub task_gid: String,
    pub workspace_gid: Option<String>,
}

/// Durable evidence that the action already happened on a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Witness {
    Identity,
    ReplyAnchor { anchor_id: String },
    Tag { task: TaskAnchor, tag_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub target: PullRequestTarget,
    pub key: IdempotencyKey,
    pub scope: ReviewScope,
    pub task: Option<TaskAnchor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    Admitted,
    Committed,
}

impl LedgerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::Committed => "committed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admitted" => Some(Self::Admitted),
            "committed" => Some(Self::Committed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    AlreadySeen(LedgerState),
}

#[derive(Debug, Clone)]
pub struct PullRequestSnapshot {
    pub title: String,
    pub body: String,
    pub diff: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub reviewers: Vec<String>,
    pub comments: Vec<SimpleComment>,
}

#[derive(Debug, Clone)]
pub struct PullRequestDetails {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub reviewers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleComment {
    pub id: u64,
    pub body: String,
    pub author_login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewContext {
    pub title: String,
    pub description: String,
    pub diff: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub reviewers: Vec<String>,
    pub prior_comments: Vec<PriorComment>,
    pub free_text_instruction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorComment {
    pub author: String,
    pub body: String,
}
