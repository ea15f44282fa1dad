use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    entities::{PullRequestTarget, ReviewContext},
    errors::ReasoningError,
    ports::ReasoningEngine,
};

/// Sends one composed context to the configured engine. No retries.
#[derive(Clone)]
pub struct ReasoningInvoker {
    engine: Arc<dyn ReasoningEngine>,
    timeout: Duration,
}

impl ReasoningInvoker {
    pub fn new(engine: Arc<dyn ReasoningEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine_fingerprint(&self) -> &str {
        self.engine.fingerprint()
    }

    pub async fn invoke(
        &self,
        target: &PullRequestTarget,
        context: &ReviewContext,
    ) -> Result<String, ReasoningError> {
        let prompt = render_prompt(target, context);
        let reply = tokio::time::timeout(self.timeout, self.engine.complete(&prompt))
            .await
            .map_err(|_| ReasoningError::Timeout(self.timeout))??;

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(ReasoningError::UpstreamError(
                "engine returned an empty response".to_string(),
            ));
        }
        Ok(reply.to_string())
    }
}

pub fn render_prompt(target: &PullRequestTarget, context: &ReviewContext) -> String {
    let mut out = String::new();
    out.push_str("# PrismGate Review Task\n");
    out.push_str("You are reviewing a GitHub pull request.\n");
    out.push_str("Only use the material in this prompt. Do not ask clarification questions.\n");
    match &context.free_text_instruction {
        Some(_) => {
            out.push_str("Answer only the request at the end. Do not add unrelated review commentary.\n\n");
        }
        None => {
            out.push_str("Produce a review covering:\n");
            out.push_str("1) Bugs, risks and other issues in the change.\n");
            out.push_str("2) Whether the pull request is ready to merge.\n");
            out.push_str("3) Whether unrelated changes should be split into separate pull requests.\n\n");
        }
    }

    out.push_str(&format!("Pull request: {target}\n"));
    out.push_str(&format!("Title: {}\n\n", context.title));
    if !context.description.is_empty() {
        out.push_str("## Description\n");
        out.push_str(&context.description);
        out.push_str("\n\n");
    }

    out.push_str("## Diff\n");
    out.push_str(&context.diff);
    if !context.diff.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');

    out.push_str(&format!("Labels: {}\n", join_or_none(&context.labels)));
    out.push_str(&format!("Assignees: {}\n", join_or_none(&context.assignees)));
    out.push_str(&format!("Reviewers: {}\n", join_or_none(&context.reviewers)));

    if !context.prior_comments.is_empty() {
        out.push_str("\n## Prior discussion\n");
        for c in &context.prior_comments {
            out.push_str(&format!("- {}: {}\n", c.author, c.body));
        }
    }

    if let Some(instruction) = &context.free_text_instruction {
        out.push_str("\n## Request\n");
        out.push_str(instruction);
        out.push('\n');
    }
    out
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.join(", ")
    }
}
