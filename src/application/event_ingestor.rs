use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;

use crate::application::trigger_pipeline::{PipelineReport, TriggerPipeline};
use crate::domain::{
    entities::{
        EventPayload, InboundEvent, IssueCommentEventPayload, PullRequestEventPayload,
        TriggerChannel,
    },
    ports::TaskTracker,
};

const ASANA_ADDED: &str = "added";
const ASANA_TASK: &str = "task";
const ASANA_STORY: &str = "story";
const ASANA_COMMENT_SUBTYPE: &str = "comment_added";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AsanaWebhookBody {
    #[serde(default)]
    pub events: Vec<AsanaEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsanaEvent {
    pub resource: AsanaResource,
    pub action: String,
    #[serde(default)]
    pub parent: Option<AsanaResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsanaResource {
    pub gid: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_subtype: Option<String>,
}

#[derive(Debug)]
pub enum GithubDelivery {
    Ping,
    Event(Box<InboundEvent>),
    Ignored(String),
}

/// Maps an `X-GitHub-Event` name and raw body to a pipeline event.
pub fn parse_github_delivery(event_name: &str, body: &[u8]) -> Result<GithubDelivery> {
    match event_name {
        "ping" => Ok(GithubDelivery::Ping),
        "pull_request" => {
            let payload: PullRequestEventPayload =
                serde_json::from_slice(body).context("invalid pull_request payload")?;
            Ok(GithubDelivery::Event(Box::new(InboundEvent::new(
                TriggerChannel::CodeHostReview,
                EventPayload::PullRequest(payload),
            ))))
        }
        "issue_comment" => {
            let payload: IssueCommentEventPayload =
                serde_json::from_slice(body).context("invalid issue_comment payload")?;
            Ok(GithubDelivery::Event(Box::new(InboundEvent::new(
                TriggerChannel::CodeHostMention,
                EventPayload::IssueComment(payload),
            ))))
        }
        other => Ok(GithubDelivery::Ignored(format!("event {other}"))),
    }
}

/// Fetches what task events only reference by id, then feeds the pipeline.
#[derive(Clone)]
pub struct EventIngestor {
    pipeline: Arc<TriggerPipeline>,
    tracker: Option<Arc<dyn TaskTracker>>,
}

impl EventIngestor {
    pub fn new(pipeline: Arc<TriggerPipeline>, tracker: Option<Arc<dyn TaskTracker>>) -> Self {
        Self { pipeline, tracker }
    }

    pub fn pipeline(&self) -> &Arc<TriggerPipeline> {
        &self.pipeline
    }

    pub async fn ingest(&self, event: InboundEvent) -> PipelineReport {
        let received_at = event.received_at;
        let report = self.pipeline.handle(event).await;
        tracing::debug!(
            summary = %report.summary_line(),
            received_at = %received_at.to_rfc3339(),
            elapsed_ms = (Utc::now() - received_at).num_milliseconds(),
            "event processed"
        );
        report
    }

    /// Processes a webhook batch sequentially in order of appearance.
    pub async fn ingest_asana_batch(&self, events: Vec<AsanaEvent>) -> Vec<PipelineReport> {
        let mut reports = Vec::new();
        for event in events {
            match self.hydrate_asana_event(&event).await {
                Ok(Some(inbound)) => reports.push(self.ingest(inbound).await),
                Ok(None) => {
                    tracing::debug!(
                        resource = %event.resource.gid,
                        resource_type = %event.resource.resource_type,
                        action = %event.action,
                        "asana event ignored"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        resource = %event.resource.gid,
                        error = %format!("{e:#}"),
                        "failed to hydrate asana event"
                    );
                }
            }
        }
        reports
    }

    pub async fn hydrate_asana_event(&self, event: &AsanaEvent) -> Result<Option<InboundEvent>> {
        if event.action != ASANA_ADDED {
            return Ok(None);
        }
        let Some(tracker) = &self.tracker else {
            tracing::warn!("asana event received but no task tracker is configured");
            return Ok(None);
        };

        match event.resource.resource_type.as_str() {
            ASANA_TASK => {
                let task = tracker.get_task(&event.resource.gid).await?;
                Ok(Some(InboundEvent::new(
                    TriggerChannel::TaskCreated,
                    EventPayload::Task { task, story: None },
                )))
            }
            ASANA_STORY => {
                if event
                    .resource
                    .resource_subtype
                    .as_deref()
                    .is_some_and(|s| s != ASANA_COMMENT_SUBTYPE)
                {
                    return Ok(None);
                }
                let Some(parent) = event
                    .parent
                    .as_ref()
                    .filter(|p| p.resource_type == ASANA_TASK)
                else {
                    return Ok(None);
                };
                let story = tracker.get_story(&event.resource.gid).await?;
                let task = tracker.get_task(&parent.gid).await?;
                Ok(Some(InboundEvent::new(
                    TriggerChannel::TaskComment,
                    EventPayload::Task {
                        task,
                        story: Some(story),
                    },
                )))
            }
            _ => Ok(None),
        }
    }
}
