use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;

use crate::domain::{
    entities::{PullRequestDetails, SimpleComment},
    ports::GitHubRepository,
};

const COMMENTS_PER_PAGE: u8 = 100;
const MAX_COMMENT_PAGES: u32 = 50;

#[derive(Clone)]
pub struct OctocrabGitHubRepository {
    client: octocrab::Octocrab,
    api_semaphore: Arc<Semaphore>,
}

impl OctocrabGitHubRepository {
    pub fn new(token: String, max_concurrent_api: usize) -> Result<Self> {
        let client = octocrab::Octocrab::builder()
            .personal_token(token)
            .build()
            .context("failed to build GitHub client")?;
        Ok(Self {
            client,
            api_semaphore: Arc::new(Semaphore::new(max_concurrent_api.max(1))),
        })
    }

    async fn acquire_api_permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        self.api_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("api semaphore closed: {e}"))
    }
}

#[derive(Debug, Deserialize)]
struct UserDto {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CommentDto {
    id: u64,
    body: Option<String>,
    user: Option<UserDto>,
}

impl From<CommentDto> for SimpleComment {
    fn from(c: CommentDto) -> Self {
        SimpleComment {
            id: c.id,
            body: c.body.unwrap_or_default(),
            author_login: c.user.map(|u| u.login),
        }
    }
}

#[derive(Debug, Serialize)]
struct PageParams {
    per_page: u8,
    page: u32,
}

/// Fetches pages until a short one arrives. A listing that outgrows
/// `max_pages` is an error, never a silently truncated result.
async fn collect_pages<T, F, Fut>(max_pages: u32, per_page: usize, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut out = Vec::new();
    for page in 1..=max_pages {
        let items = fetch(page).await?;
        let last = items.len() < per_page;
        out.extend(items);
        if last {
            return Ok(out);
        }
    }
    bail!("listing exceeded {max_pages} pages of {per_page} items")
}

#[async_trait]
impl GitHubRepository for OctocrabGitHubRepository {
    async fn current_user_login(&self) -> Result<String> {
        let _permit = self.acquire_api_permit().await?;
        let me: UserDto = self.client.get("/user", None::<&()>).await?;
        Ok(me.login)
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<PullRequestDetails> {
        #[derive(Debug, Deserialize)]
        struct PullDto {
            title: Option<String>,
            body: Option<String>,
            #[serde(default)]
            labels: Vec<LabelDto>,
            #[serde(default)]
            assignees: Vec<UserDto>,
            #[serde(default)]
            requested_reviewers: Vec<UserDto>,
        }
        #[derive(Debug, Deserialize)]
        struct LabelDto {
            name: String,
        }

        let _permit = self.acquire_api_permit().await?;
        let route = format!("/repos/{owner}/{repo}/pulls/{pull_number}");
        let pr: PullDto = self.client.get(route, None::<&()>).await?;
        Ok(PullRequestDetails {
            title: pr.title.unwrap_or_else(|| "(no title)".to_string()),
            body: pr.body.unwrap_or_default(),
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            assignees: pr.assignees.into_iter().map(|u| u.login).collect(),
            reviewers: pr.requested_reviewers.into_iter().map(|u| u.login).collect(),
        })
    }

    async fn get_pull_request_diff(
        &self,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<String> {
        let _permit = self.acquire_api_permit().await?;
        // Sent with `Accept: application/vnd.github.v3.diff`.
        let diff = self.client.pulls(owner, repo).get_diff(pull_number).await?;
        Ok(diff)
    }

    async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> Result<Vec<SimpleComment>> {
        let _permit = self.acquire_api_permit().await?;
        let route = format!("/repos/{owner}/{repo}/issues/{issue_number}/comments");
        let client = &self.client;
        let route = &route;
        let comments = collect_pages(MAX_COMMENT_PAGES, usize::from(COMMENTS_PER_PAGE), |page| async move {
            let params = PageParams {
                per_page: COMMENTS_PER_PAGE,
                page,
            };
            let items: Vec<CommentDto> = client.get(route, Some(&params)).await?;
            Ok::<_, anyhow::Error>(items)
        })
        .await
        .with_context(|| format!("failed to list comments on {owner}/{repo}#{issue_number}"))?;
        Ok(comments.into_iter().map(SimpleComment::from).collect())
    }

    async fn get_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
    ) -> Result<SimpleComment> {
        let _permit = self.acquire_api_permit().await?;
        let route = format!("/repos/{owner}/{repo}/issues/comments/{comment_id}");
        let comment: CommentDto = self.client.get(route, None::<&()>).await?;
        Ok(comment.into())
    }

    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<u64> {
        let _permit = self.acquire_api_permit().await?;
        let route = format!("/repos/{owner}/{repo}/issues/{issue_number}/comments");
        let created: CommentDto = self
            .client
            .post(route, Some(&json!({ "body": body })))
            .await?;
        Ok(created.id)
    }
}
