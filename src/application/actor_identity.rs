use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::OnceCell;

use crate::domain::ports::GitHubRepository;

/// Login of the credential the process acts as, resolved once via `GET /user`.
#[derive(Clone)]
pub struct ActorIdentity {
    github: Arc<dyn GitHubRepository>,
    login: Arc<OnceCell<String>>,
}

impl ActorIdentity {
    pub fn new(github: Arc<dyn GitHubRepository>) -> Self {
        Self {
            github,
            login: Arc::new(OnceCell::new()),
        }
    }

    pub async fn login(&self) -> Result<&str> {
        let login = self
            .login
            .get_or_try_init(|| async {
                let login = self
                    .github
                    .current_user_login()
                    .await
                    .context("failed to resolve acting identity")?;
                tracing::info!(login = %login, "resolved acting identity");
                Ok::<_, anyhow::Error>(login)
            })
            .await?;
        Ok(login.as_str())
    }

    pub fn is_actor(login: Option<&str>, actor: &str) -> bool {
        login.is_some_and(|l| l.eq_ignore_ascii_case(actor))
    }
}
