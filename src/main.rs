mod application;
mod domain;
mod infrastructure;
mod interface;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use application::auth_manager::AuthManager;
use domain::ports::ShellAdapter;
use infrastructure::{
    local_config_adapter::LocalConfigAdapter,
    shell_adapter::CommandShellAdapter,
    token_providers::{EnvTokenProvider, GITHUB_TOKEN_ENV, GhCliTokenProvider, StoredTokenProvider},
};
use interface::{cli::Cli, cli_handlers::dispatch};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config_repo = LocalConfigAdapter::new()?;
    let shell: Arc<dyn ShellAdapter> = Arc::new(CommandShellAdapter);
    let stored_provider = StoredTokenProvider::new(config_repo.auth_token_path());
    let gh_provider = GhCliTokenProvider::new(shell.as_ref());
    let env_provider = EnvTokenProvider::new(GITHUB_TOKEN_ENV);

    let auth_manager = AuthManager::new(
        vec![&gh_provider, &env_provider, &stored_provider],
        Some(&stored_provider),
    );

    dispatch(cli.command, &auth_manager, &config_repo, shell.clone()).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
