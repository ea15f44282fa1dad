use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::{
    auth_manager::AuthManager,
    event_ingestor::EventIngestor,
    trigger_pipeline::{PipelineDeps, StatsSnapshot, TriggerOutcome, TriggerPipeline},
    usecases::{
        InvokeRequest, ledger_release, ledger_status, open_ledger, render_config, run_invoke,
    },
};
use crate::domain::{
    entities::AppConfig,
    ports::{ConfigRepository, GitHubRepository, ShellAdapter, TaskTracker, TokenProvider},
};
use crate::infrastructure::{
    asana_adapter::{AsanaTaskTracker, DEFAULT_ASANA_API_BASE},
    github_adapter::OctocrabGitHubRepository,
    local_config_adapter::LocalConfigAdapter,
    reasoning_engines::build_engine,
    token_providers::{ASANA_TOKEN_ENV, EnvTokenProvider},
};
use crate::interface::cli::{
    AuthSubcommand, Commands, ConfigSubcommand, LedgerSubcommand, ServeArgs,
};
use crate::interface::web::{WebhookState, run_webhook_server};

const ASANA_REQUEST_TIMEOUT_SECS: u64 = 30;

pub async fn dispatch(
    command: Commands,
    auth_manager: &AuthManager<'_>,
    config_repo: &LocalConfigAdapter,
    shell: Arc<dyn ShellAdapter>,
) -> Result<()> {
    match command {
        Commands::Serve(args) => serve(args, auth_manager, config_repo, shell).await?,
        Commands::Invoke(args) => {
            let config = config_repo.load_config()?;
            warn_if_actor_unset(&config);
            let ledger_path = (!args.ephemeral_ledger).then(|| config_repo.ledger_path(&config));
            let github = github_client(auth_manager, args.max_concurrent_api)?;
            let deps = PipelineDeps {
                github: github.clone(),
                tracker: asana_tracker()?,
                ledger: open_ledger(ledger_path.as_deref())?,
                engine: build_engine(&config.reasoning, shell)?,
            };
            let pipeline = TriggerPipeline::new(deps, &config);
            let report = run_invoke(
                &pipeline,
                github.as_ref(),
                InvokeRequest {
                    reference: args.pull_request,
                    comment_id: args.comment_id,
                    instruction: args.instruction,
                },
            )
            .await?;
            println!("{}", report.summary_line());
            match report.outcome {
                TriggerOutcome::FailedRetryable(e) => {
                    anyhow::bail!("invocation failed (retryable): {e}")
                }
                TriggerOutcome::FailedFatal(e) => anyhow::bail!("invocation failed: {e}"),
                _ => {}
            }
        }
        Commands::Auth(auth) => match auth.command {
            AuthSubcommand::Login { token } => {
                auth_manager.login(&token)?;
                println!("token saved to {}", config_repo.auth_token_path().display());
            }
            AuthSubcommand::Which => {
                if let Some(resolution) = auth_manager.resolve_token()? {
                    println!("source={}", resolution.source);
                    println!(
                        "token_prefix={}***",
                        resolution.token.chars().take(6).collect::<String>()
                    );
                } else {
                    println!("no token found (checked: gh auth token, GITHUB_TOKEN, stored token)");
                }
                let asana = EnvTokenProvider::new(ASANA_TOKEN_ENV).token()?.is_some();
                println!("asana_token={}", if asana { "set" } else { "unset" });
            }
        },
        Commands::Ledger(ledger) => {
            let config = config_repo.load_config()?;
            let path = config_repo.ledger_path(&config);
            let store = open_ledger(Some(&path))?;
            match ledger.command {
                LedgerSubcommand::Status { key } => {
                    let state = ledger_status(store.as_ref(), &key).await?;
                    println!(
                        "key={} state={}",
                        key.trim(),
                        state.map(|s| s.as_str()).unwrap_or("absent")
                    );
                }
                LedgerSubcommand::Release { key } => {
                    let released = ledger_release(store.as_ref(), &key).await?;
                    println!("key={} released={released}", key.trim());
                    if !released {
                        println!("only admitted keys can be released");
                    }
                }
            }
        }
        Commands::Config(config) => match config.command {
            ConfigSubcommand::Show => {
                println!("{}", render_config(&config_repo.load_config()?)?);
            }
            ConfigSubcommand::Path => {
                println!("{}", config_repo.config_path().display());
            }
        },
    }

    Ok(())
}

async fn serve(
    args: ServeArgs,
    auth_manager: &AuthManager<'_>,
    config_repo: &LocalConfigAdapter,
    shell: Arc<dyn ShellAdapter>,
) -> Result<()> {
    let config = config_repo.load_config()?;
    if config.actor_login.trim().is_empty() {
        anyhow::bail!(
            "actor_login is not set in {}; webhooks cannot be matched to a reviewer",
            config_repo.config_path().display()
        );
    }
    let bind = args.bind.unwrap_or_else(|| config.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {bind}"))?;

    let ledger_path = (!args.ephemeral_ledger).then(|| config_repo.ledger_path(&config));
    let tracker = asana_tracker()?;
    let deps = PipelineDeps {
        github: github_client(auth_manager, args.max_concurrent_api)?,
        tracker: tracker.clone(),
        ledger: open_ledger(ledger_path.as_deref())?,
        engine: build_engine(&config.reasoning, shell)?,
    };
    let pipeline = Arc::new(TriggerPipeline::new(deps, &config));
    let stats = pipeline.stats();
    let state = WebhookState::new(
        EventIngestor::new(pipeline, tracker),
        args.github_webhook_secret,
        args.asana_webhook_secret,
        args.adopt_asana_handshake,
    );

    run_webhook_server(addr, state).await?;
    println!("{}", stats_line(&stats.snapshot()));
    Ok(())
}

fn github_client(
    auth_manager: &AuthManager<'_>,
    max_concurrent_api: usize,
) -> Result<Arc<dyn GitHubRepository>> {
    let resolution = auth_manager.require_token("GitHub")?;
    tracing::debug!(source = resolution.source, "github token resolved");
    Ok(Arc::new(OctocrabGitHubRepository::new(
        resolution.token,
        max_concurrent_api,
    )?))
}

fn asana_tracker() -> Result<Option<Arc<dyn TaskTracker>>> {
    let Some(token) = EnvTokenProvider::new(ASANA_TOKEN_ENV).token()? else {
        tracing::info!("{ASANA_TOKEN_ENV} not set; task channels are disabled");
        return Ok(None);
    };
    let tracker = AsanaTaskTracker::new(
        DEFAULT_ASANA_API_BASE,
        &token,
        Duration::from_secs(ASANA_REQUEST_TIMEOUT_SECS),
    )?;
    Ok(Some(Arc::new(tracker)))
}

fn warn_if_actor_unset(config: &AppConfig) {
    if config.actor_login.trim().is_empty() {
        tracing::warn!("actor_login is empty; mention markers fall back to a bare @");
    }
}

fn stats_line(s: &StatsSnapshot) -> String {
    format!(
        "received={} published={} rejected={} skipped_already_seen={} skipped_fulfilled={} skipped_in_flight={} failed_retryable={} failed_fatal={}",
        s.received,
        s.published,
        s.rejected,
        s.skipped_already_seen,
        s.skipped_fulfilled,
        s.skipped_in_flight,
        s.failed_retryable,
        s.failed_fatal
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_line_lists_every_counter() {
        let line = stats_line(&StatsSnapshot {
            received: 3,
            published: 1,
            rejected: 1,
            skipped_already_seen: 1,
            ..StatsSnapshot::default()
        });
        assert!(line.starts_with("received=3 published=1 rejected=1"));
        assert!(line.ends_with("failed_fatal=0"));
    }
}
