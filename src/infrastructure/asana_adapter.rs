use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::domain::{
    entities::{StoryRecord, TagRef, TaskRecord},
    ports::TaskTracker,
};

pub const DEFAULT_ASANA_API_BASE: &str = "https://app.asana.com/api/1.0";
const TAGS_PAGE_LIMIT: &str = "100";

/// Asana REST client. Every response is wrapped in `{"data": ...}`.
#[derive(Clone)]
pub struct AsanaTaskTracker {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    next_page: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: String,
}

#[derive(Debug, Deserialize)]
struct GidDto {
    gid: String,
}

#[derive(Debug, Deserialize)]
struct TagDto {
    gid: String,
    #[serde(default)]
    name: Option<String>,
}

impl From<TagDto> for TagRef {
    fn from(t: TagDto) -> Self {
        TagRef {
            gid: t.gid,
            name: t.name.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskDto {
    gid: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    workspace: Option<GidDto>,
    #[serde(default)]
    tags: Vec<TagDto>,
}

#[derive(Debug, Deserialize)]
struct StoryDto {
    gid: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    resource_subtype: Option<String>,
}

impl AsanaTaskTracker {
    pub fn new(api_base: &str, token: &str, request_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("prismgate"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .context("invalid asana authorization header")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .context("failed to create asana api client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Envelope<T>> {
        let response = request
            .send()
            .await
            .with_context(|| format!("asana {operation} request failed"))?;
        let status = response.status();
        let raw = response
            .text()
            .await
            .with_context(|| format!("failed to read asana {operation} response"))?;
        if !status.is_success() {
            bail!("asana {operation} failed with status {status}: {}", truncate(&raw, 400));
        }
        serde_json::from_str(&raw).with_context(|| format!("failed to decode asana {operation} response"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }
}

fn truncate(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[async_trait]
impl TaskTracker for AsanaTaskTracker {
    async fn get_task(&self, task_gid: &str) -> Result<TaskRecord> {
        let request = self
            .http
            .get(self.url(&format!("/tasks/{task_gid}")))
            .query(&[("opt_fields", "name,notes,workspace,tags.name")]);
        let task: TaskDto = self.send("get task", request).await?.data;
        Ok(TaskRecord {
            gid: task.gid,
            name: task.name.unwrap_or_default(),
            notes: task.notes.unwrap_or_default(),
            workspace_gid: task.workspace.map(|w| w.gid),
            tags: task.tags.into_iter().map(TagRef::from).collect(),
        })
    }

    async fn get_story(&self, story_gid: &str) -> Result<StoryRecord> {
        let request = self
            .http
            .get(self.url(&format!("/stories/{story_gid}")))
            .query(&[("opt_fields", "text,resource_subtype")]);
        let story: StoryDto = self.send("get story", request).await?.data;
        Ok(StoryRecord {
            gid: story.gid,
            text: story.text.unwrap_or_default(),
            resource_subtype: story.resource_subtype,
        })
    }

    async fn list_task_tags(&self, task_gid: &str) -> Result<Vec<TagRef>> {
        let request = self
            .http
            .get(self.url(&format!("/tasks/{task_gid}/tags")))
            .query(&[("opt_fields", "name")]);
        let tags: Vec<TagDto> = self.send("list task tags", request).await?.data;
        Ok(tags.into_iter().map(TagRef::from).collect())
    }

    async fn find_tag_by_name(&self, workspace_gid: &str, name: &str) -> Result<Option<TagRef>> {
        let mut offset: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(self.url(&format!("/workspaces/{workspace_gid}/tags")))
                .query(&[("opt_fields", "name"), ("limit", TAGS_PAGE_LIMIT)]);
            if let Some(offset) = offset.as_deref() {
                request = request.query(&[("offset", offset)]);
            }
            let page: Envelope<Vec<TagDto>> = self.send("list workspace tags", request).await?;
            if let Some(tag) = page
                .data
                .into_iter()
                .find(|t| t.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            {
                return Ok(Some(tag.into()));
            }
            match page.next_page {
                Some(next) => offset = Some(next.offset),
                None => return Ok(None),
            }
        }
    }

    async fn create_tag(&self, workspace_gid: &str, name: &str) -> Result<TagRef> {
        let request = self
            .http
            .post(self.url(&format!("/workspaces/{workspace_gid}/tags")))
            .json(&json!({ "data": { "name": name } }));
        let tag: TagDto = self.send("create tag", request).await?.data;
        tracing::info!(workspace = workspace_gid, tag = name, gid = %tag.gid, "created asana tag");
        Ok(tag.into())
    }

    async fn add_tag_to_task(&self, task_gid: &str, tag_gid: &str) -> Result<()> {
        let request = self
            .http
            .post(self.url(&format!("/tasks/{task_gid}/addTag")))
            .json(&json!({ "data": { "tag": tag_gid } }));
        let _: Envelope<serde_json::Value> = self.send("add tag", request).await?;
        Ok(())
    }
}
