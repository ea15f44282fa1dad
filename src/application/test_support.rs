use std::collections::HashMap;
use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::domain::{
    entities::{PullRequestDetails, SimpleComment, StoryRecord, TagRef, TaskRecord},
    errors::ReasoningError,
    ports::{GitHubRepository, ReasoningEngine, TaskTracker},
};

pub const BOT_LOGIN: &str = "prismgate-bot";

#[derive(Default)]
pub struct MockGitHub {
    pub details: HashMap<u64, PullRequestDetails>,
    pub diffs: HashMap<u64, String>,
    pub comments: Mutex<HashMap<u64, Vec<SimpleComment>>>,
    pub fail_create_comment: bool,
    pub fail_list_comments: bool,
    pub user_lookups: AtomicUsize,
    pub next_comment_id: AtomicUsize,
}

impl MockGitHub {
    pub fn with_pull(number: u64) -> Self {
        let mut gh = Self::default();
        gh.details.insert(
            number,
            PullRequestDetails {
                title: "Add retry to uploader".to_string(),
                body: "Retries failed uploads.".to_string(),
                labels: vec!["backend".to_string()],
                assignees: vec!["carol".to_string()],
                reviewers: vec![BOT_LOGIN.to_string()],
            },
        );
        gh.diffs.insert(
            number,
            "diff --git a/src/lib.rs b/src/lib.rs\n+retry();\n".to_string(),
        );
        gh
    }

    pub fn seed_comment(&self, number: u64, author: &str, body: &str) {
        let mut map = self.comments.lock().expect("lock");
        let entry = map.entry(number).or_default();
        let id = 1000 + entry.len() as u64;
        entry.push(SimpleComment {
            id,
            body: body.to_string(),
            author_login: Some(author.to_string()),
        });
    }

    pub fn comments_on(&self, number: u64) -> Vec<SimpleComment> {
        self.comments
            .lock()
            .expect("lock")
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn bot_comment_count(&self, number: u64) -> usize {
        self.comments_on(number)
            .iter()
            .filter(|c| c.author_login.as_deref() == Some(BOT_LOGIN))
            .count()
    }
}

#[async_trait]
impl GitHubRepository for MockGitHub {
    async fn current_user_login(&self) -> Result<String> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(BOT_LOGIN.to_string())
    }

    async fn get_pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        pull_number: u64,
    ) -> Result<PullRequestDetails> {
        self.details
            .get(&pull_number)
            .cloned()
            .ok_or_else(|| anyhow!("pull request not found"))
    }

    async fn get_pull_request_diff(
        &self,
        _owner: &str,
        _repo: &str,
        pull_number: u64,
    ) -> Result<String> {
        Ok(self.diffs.get(&pull_number).cloned().unwrap_or_default())
    }

    async fn list_issue_comments(
        &self,
        _owner: &str,
        _repo: &str,
        issue_number: u64,
    ) -> Result<Vec<SimpleComment>> {
        if self.fail_list_comments {
            return Err(anyhow!("connection reset"));
        }
        Ok(self.comments_on(issue_number))
    }

    async fn get_issue_comment(
        &self,
        _owner: &str,
        _repo: &str,
        comment_id: u64,
    ) -> Result<SimpleComment> {
        self.comments
            .lock()
            .expect("lock")
            .values()
            .flatten()
            .find(|c| c.id == comment_id)
            .cloned()
            .ok_or_else(|| anyhow!("comment not found"))
    }

    async fn create_issue_comment(
        &self,
        _owner: &str,
        _repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<u64> {
        if self.fail_create_comment {
            return Err(anyhow!("simulated network error"));
        }
        let id = 5000 + self.next_comment_id.fetch_add(1, Ordering::SeqCst) as u64;
        self.comments
            .lock()
            .expect("lock")
            .entry(issue_number)
            .or_default()
            .push(SimpleComment {
                id,
                body: body.to_string(),
                author_login: Some(BOT_LOGIN.to_string()),
            });
        Ok(id)
    }
}

#[derive(Default)]
pub struct MockTracker {
    pub tasks: Mutex<HashMap<String, TaskRecord>>,
    pub stories: HashMap<String, StoryRecord>,
    pub workspace_tags: Mutex<Vec<TagRef>>,
    pub created_tags: AtomicUsize,
    pub fail_attach: bool,
}

impl MockTracker {
    pub fn with_task(gid: &str, notes: &str) -> Self {
        let tracker = Self::default();
        tracker.tasks.lock().expect("lock").insert(
            gid.to_string(),
            TaskRecord {
                gid: gid.to_string(),
                name: "Review request".to_string(),
                notes: notes.to_string(),
                workspace_gid: Some("ws-1".to_string()),
                tags: vec![],
            },
        );
        tracker
    }

    pub fn task_tag_names(&self, gid: &str) -> Vec<String> {
        self.tasks
            .lock()
            .expect("lock")
            .get(gid)
            .map(|t| t.tags.iter().map(|tag| tag.name.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskTracker for MockTracker {
    async fn get_task(&self, task_gid: &str) -> Result<TaskRecord> {
        self.tasks
            .lock()
            .expect("lock")
            .get(task_gid)
            .cloned()
            .ok_or_else(|| anyhow!("task not found"))
    }

    async fn get_story(&self, story_gid: &str) -> Result<StoryRecord> {
        self.stories
            .get(story_gid)
            .cloned()
            .ok_or_else(|| anyhow!("story not found"))
    }

    async fn list_task_tags(&self, task_gid: &str) -> Result<Vec<TagRef>> {
        Ok(self.get_task(task_gid).await?.tags)
    }

    async fn find_tag_by_name(&self, _workspace_gid: &str, name: &str) -> Result<Option<TagRef>> {
        Ok(self
            .workspace_tags
            .lock()
            .expect("lock")
            .iter()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn create_tag(&self, _workspace_gid: &str, name: &str) -> Result<TagRef> {
        let n = self.created_tags.fetch_add(1, Ordering::SeqCst);
        let tag = TagRef {
            gid: format!("tag-{n}"),
            name: name.to_string(),
        };
        self.workspace_tags.lock().expect("lock").push(tag.clone());
        Ok(tag)
    }

    async fn add_tag_to_task(&self, task_gid: &str, tag_gid: &str) -> Result<()> {
        if self.fail_attach {
            return Err(anyhow!("attach failed"));
        }
        let tag = self
            .workspace_tags
            .lock()
            .expect("lock")
            .iter()
            .find(|t| t.gid == tag_gid)
            .cloned()
            .ok_or_else(|| anyhow!("tag not found"))?;
        let mut tasks = self.tasks.lock().expect("lock");
        let task = tasks
            .get_mut(task_gid)
            .ok_or_else(|| anyhow!("task not found"))?;
        if !task.tags.iter().any(|t| t.gid == tag.gid) {
            task.tags.push(tag);
        }
        Ok(())
    }
}

/// Engine that returns a fixed answer after an optional delay and counts calls.
pub struct ScriptedEngine {
    pub reply: std::result::Result<String, ReasoningError>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn answering(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(vec![]),
        }
    }

    pub fn failing(err: ReasoningError) -> Self {
        Self {
            reply: Err(err),
            ..Self::answering("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn fingerprint(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> std::result::Result<String, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().expect("lock").push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
    }
}
