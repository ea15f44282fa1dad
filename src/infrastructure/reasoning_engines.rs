use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;

use crate::domain::{
    entities::{EngineConfig, ReasoningConfig},
    errors::ReasoningError,
    ports::{ReasoningEngine, ShellAdapter},
};

const PROMPT_FILE_PLACEHOLDER: &str = "{prompt_file}";

/// Runs a configured shell command against a prompt file and returns its stdout.
pub struct ShellReasoningEngine {
    shell: Arc<dyn ShellAdapter>,
    command: String,
    keep_prompt_files: bool,
    seq: AtomicU64,
}

impl ShellReasoningEngine {
    pub fn new(shell: Arc<dyn ShellAdapter>, command: String, keep_prompt_files: bool) -> Self {
        Self {
            shell,
            command,
            keep_prompt_files,
            seq: AtomicU64::new(0),
        }
    }

    fn write_prompt_file(&self, prompt: &str) -> Result<PathBuf> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let root = cwd.join(".prismgate").join("tmp-prompts");
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create prompt dir: {}", root.display()))?;
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = root.join(format!("prismgate_{}_{n}_prompt.md", std::process::id()));
        fs::write(&path, prompt)
            .with_context(|| format!("failed to write prompt file: {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl ReasoningEngine for ShellReasoningEngine {
    fn fingerprint(&self) -> &str {
        &self.command
    }

    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError> {
        let prompt_file = self
            .write_prompt_file(prompt)
            .map_err(|e| ReasoningError::UpstreamError(format!("{e:#}")))?;
        let command_line = self
            .command
            .replace(PROMPT_FILE_PLACEHOLDER, &prompt_file.to_string_lossy());

        let shell = self.shell.clone();
        let result = tokio::task::spawn_blocking(move || shell.run_command_line(&command_line))
            .await
            .map_err(|e| anyhow!("shell engine task failed: {e}"))
            .and_then(|r| r);

        if !self.keep_prompt_files {
            let _ = fs::remove_file(&prompt_file);
        }
        result.map_err(|e| classify_shell_failure(&e))
    }
}

fn classify_shell_failure(err: &anyhow::Error) -> ReasoningError {
    let text = format!("{err:#}");
    let lower = text.to_ascii_lowercase();
    if ["rate limit", "too many requests", "429"]
        .iter()
        .any(|h| lower.contains(h))
    {
        ReasoningError::RateLimited(text)
    } else if ["timeout", "timed out"].iter().any(|h| lower.contains(h)) {
        // The command reports no duration of its own.
        ReasoningError::Timeout(Duration::ZERO)
    } else {
        ReasoningError::UpstreamError(text)
    }
}

/// OpenAI-compatible chat completions endpoint.
pub struct OpenAiReasoningEngine {
    client: reqwest::Client,
    url: String,
    model: String,
    fingerprint: String,
}

impl OpenAiReasoningEngine {
    pub fn new(api_base: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("reasoning engine API key is empty");
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .context("invalid API key header")?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build reasoning engine HTTP client")?;

        let base = api_base.trim_end_matches('/');
        let url = if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        };
        Ok(Self {
            client,
            url,
            model: model.to_string(),
            fingerprint: format!("openai:{model}"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ReasoningEngine for OpenAiReasoningEngine {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasoningError::Timeout(Duration::ZERO)
                } else {
                    ReasoningError::UpstreamError(e.to_string())
                }
            })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| ReasoningError::UpstreamError(e.to_string()))?;
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ReasoningError::RateLimited(raw));
        }
        if !status.is_success() {
            return Err(ReasoningError::UpstreamError(format!("HTTP {status}: {raw}")));
        }
        parse_chat_completion(&raw)
    }
}

fn parse_chat_completion(raw: &str) -> Result<String, ReasoningError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(raw)
        .map_err(|e| ReasoningError::UpstreamError(format!("invalid completion payload: {e}")))?;
    parsed
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ReasoningError::UpstreamError("completion had no content".to_string()))
}

pub fn build_engine(
    config: &ReasoningConfig,
    shell: Arc<dyn ShellAdapter>,
) -> Result<Arc<dyn ReasoningEngine>> {
    let Some(engine) = &config.engine else {
        anyhow::bail!(
            "no reasoning engine configured; set reasoning.engine in config.json (kind \"shell\" or \"open_ai\")"
        );
    };
    match engine {
        EngineConfig::Shell { command } => {
            if !command.contains(PROMPT_FILE_PLACEHOLDER) {
                tracing::warn!(command = %command, "shell engine command has no {{prompt_file}} placeholder");
            }
            Ok(Arc::new(ShellReasoningEngine::new(
                shell,
                command.clone(),
                config.keep_prompt_files,
            )))
        }
        EngineConfig::OpenAi {
            api_base,
            model,
            api_key_env,
        } => {
            let key = std::env::var(api_key_env)
                .with_context(|| format!("{api_key_env} is not set"))?;
            let engine = OpenAiReasoningEngine::new(
                api_base,
                model,
                &key,
                Duration::from_secs(config.timeout_secs.max(1)),
            )?;
            Ok(Arc::new(engine))
        }
    }
}
