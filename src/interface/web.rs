use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::application::event_ingestor::{
    AsanaWebhookBody, EventIngestor, GithubDelivery, parse_github_delivery,
};
use crate::domain::errors::SignatureError;
use crate::infrastructure::webhook_signature::{verify_asana_signature, verify_github_signature};

const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
const GITHUB_DELIVERY_HEADER: &str = "x-github-delivery";
const ASANA_HOOK_SECRET_HEADER: &str = "x-hook-secret";
const ASANA_SIGNATURE_HEADER: &str = "x-hook-signature";

#[derive(Clone)]
pub struct WebhookState {
    pub ingestor: EventIngestor,
    pub github_secret: Option<Arc<str>>,
    /// Configured secret plus any secrets adopted from handshakes. Each Asana
    /// webhook has its own secret.
    pub asana_secrets: Arc<RwLock<Vec<String>>>,
    pub adopt_asana_handshakes: bool,
}

impl WebhookState {
    pub fn new(
        ingestor: EventIngestor,
        github_secret: Option<String>,
        asana_secret: Option<String>,
        adopt_asana_handshakes: bool,
    ) -> Self {
        Self {
            ingestor,
            github_secret: github_secret.filter(|s| !s.is_empty()).map(Arc::from),
            asana_secrets: Arc::new(RwLock::new(
                asana_secret.filter(|s| !s.is_empty()).into_iter().collect(),
            )),
            adopt_asana_handshakes,
        }
    }

    fn adopt_asana_secret(&self, secret: &str) {
        let mut secrets = self
            .asana_secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !secrets.iter().any(|s| s == secret) {
            secrets.push(secret.to_string());
        }
    }

    fn verify_asana(&self, body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let secrets = self
            .asana_secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut last = Ok(());
        for secret in secrets.iter() {
            last = verify_asana_signature(body, signature, secret);
            if last.is_ok() {
                break;
            }
        }
        last
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/webhooks/github", post(github_webhook))
        .route("/webhooks/asana", post(asana_webhook))
        .with_state(state)
}

pub async fn run_webhook_server(addr: SocketAddr, state: WebhookState) -> Result<()> {
    if state.github_secret.is_none() {
        tracing::warn!("no GitHub webhook secret configured, deliveries are accepted unsigned");
    }
    let asana_configured = !state
        .asana_secrets
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_empty();
    if !asana_configured && !state.adopt_asana_handshakes {
        tracing::warn!(
            "no Asana webhook secret configured, set PRISMGATE_ASANA_WEBHOOK_SECRET in production"
        );
    }
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "webhook server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<WebhookState>) -> impl IntoResponse {
    Json(state.ingestor.pipeline().stats().snapshot())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn github_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = header(&headers, GITHUB_DELIVERY_HEADER).unwrap_or("-").to_string();
    if let Some(secret) = state.github_secret.as_deref() {
        if let Err(e) =
            verify_github_signature(&body, header(&headers, GITHUB_SIGNATURE_HEADER), secret)
        {
            tracing::warn!(delivery = %delivery, error = %e, "rejected github delivery");
            return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
        }
    }

    let event_name = header(&headers, GITHUB_EVENT_HEADER).unwrap_or_default();
    match parse_github_delivery(event_name, &body) {
        Ok(GithubDelivery::Ping) => {
            tracing::info!(delivery = %delivery, "github ping");
            (StatusCode::OK, "pong").into_response()
        }
        Ok(GithubDelivery::Ignored(what)) => {
            tracing::debug!(delivery = %delivery, what = %what, "github delivery ignored");
            (StatusCode::OK, "ignored").into_response()
        }
        Ok(GithubDelivery::Event(event)) => {
            let ingestor = state.ingestor.clone();
            tokio::spawn(async move {
                let report = ingestor.ingest(*event).await;
                tracing::info!(delivery = %delivery, summary = %report.summary_line(), "github delivery handled");
            });
            (StatusCode::OK, "accepted").into_response()
        }
        Err(e) => {
            // Acknowledged anyway; a redelivery of a bad body would fail the same way.
            tracing::warn!(delivery = %delivery, error = %format!("{e:#}"), "unparseable github delivery");
            (StatusCode::OK, "ignored").into_response()
        }
    }
}

async fn asana_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(hook_secret) = header(&headers, ASANA_HOOK_SECRET_HEADER) {
        let Ok(value) = HeaderValue::from_str(hook_secret) else {
            return (StatusCode::BAD_REQUEST, "invalid hook secret").into_response();
        };
        if state.adopt_asana_handshakes {
            state.adopt_asana_secret(hook_secret);
        }
        tracing::info!(adopted = state.adopt_asana_handshakes, "asana webhook handshake completed");
        let mut response = StatusCode::OK.into_response();
        response.headers_mut().insert(ASANA_HOOK_SECRET_HEADER, value);
        return response;
    }

    if let Err(e) = state.verify_asana(&body, header(&headers, ASANA_SIGNATURE_HEADER)) {
        tracing::warn!(error = %e, "rejected asana delivery");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let parsed: AsanaWebhookBody = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable asana delivery");
            return (StatusCode::OK, "ignored").into_response();
        }
    };
    if parsed.events.is_empty() {
        return (StatusCode::OK, "ok").into_response();
    }

    let ingestor = state.ingestor.clone();
    tokio::spawn(async move {
        for report in ingestor.ingest_asana_batch(parsed.events).await {
            tracing::info!(summary = %report.summary_line(), "asana event handled");
        }
    });
    (StatusCode::OK, "accepted").into_response()
}
