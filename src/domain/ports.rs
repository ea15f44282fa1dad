use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{
    entities::{
        Admission, AppConfig, IdempotencyKey, LedgerState, PullRequestDetails, SimpleComment,
        StoryRecord, TagRef, TaskRecord,
    },
    errors::ReasoningError,
};

pub trait ConfigRepository: Send + Sync {
    fn load_config(&self) -> Result<AppConfig>;
    fn config_path(&self) -> &Path;
}

pub trait TokenProvider: Send + Sync {
    fn source_name(&self) -> &'static str;
    fn token(&self) -> Result<Option<String>>;
}

pub trait TokenWriter: Send + Sync {
    fn save_token(&self, token: &str) -> Result<()>;
}

pub trait ShellAdapter: Send + Sync {
    fn run_capture(&self, program: &str, args: &[&str]) -> Result<String>;
    fn run_command_line(&self, command_line: &str) -> Result<String>;
}

#[async_trait]
pub trait GitHubRepository: Send + Sync {
    async fn current_user_login(&self) -> Result<String>;
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<PullRequestDetails>;
    async fn get_pull_request_diff(&self, owner: &str, repo: &str, pull_number: u64)
    -> Result<String>;
    async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> Result<Vec<SimpleComment>>;
    async fn get_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
    ) -> Result<SimpleComment>;
    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<u64>;
}

#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn get_task(&self, task_gid: &str) -> Result<TaskRecord>;
    async fn get_story(&self, story_gid: &str) -> Result<StoryRecord>;
    async fn list_task_tags(&self, task_gid: &str) -> Result<Vec<TagRef>>;
    async fn find_tag_by_name(&self, workspace_gid: &str, name: &str) -> Result<Option<TagRef>>;
    async fn create_tag(&self, workspace_gid: &str, name: &str) -> Result<TagRef>;
    async fn add_tag_to_task(&self, task_gid: &str, tag_gid: &str) -> Result<()>;
}

/// Set-membership idempotency store.
///
/// `admit` must be a single atomic test-and-set: for concurrent calls with the
/// same key exactly one observes `Admission::Admitted`.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    async fn admit(&self, key: &IdempotencyKey) -> Result<Admission>;
    async fn commit(&self, key: &IdempotencyKey) -> Result<()>;
    /// Removes the key only while it is still `Admitted`. Returns whether a row was removed.
    async fn release(&self, key: &IdempotencyKey) -> Result<bool>;
    async fn state(&self, key: &IdempotencyKey) -> Result<Option<LedgerState>>;
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn fingerprint(&self) -> &str;
    async fn complete(&self, prompt: &str) -> std::result::Result<String, ReasoningError>;
}
