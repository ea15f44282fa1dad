use std::{env, fs, path::PathBuf};

use anyhow::{Context, Result};

use crate::domain::ports::{ShellAdapter, TokenProvider, TokenWriter};

pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const ASANA_TOKEN_ENV: &str = "ASANA_ACCESS_TOKEN";

pub struct GhCliTokenProvider<'a> {
    shell: &'a dyn ShellAdapter,
}

impl<'a> GhCliTokenProvider<'a> {
    pub fn new(shell: &'a dyn ShellAdapter) -> Self {
        Self { shell }
    }
}

impl TokenProvider for GhCliTokenProvider<'_> {
    fn source_name(&self) -> &'static str {
        "gh auth token"
    }

    fn token(&self) -> Result<Option<String>> {
        match self.shell.run_capture("gh", &["auth", "token"]) {
            Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::debug!(error = %e, "gh cli token unavailable");
                Ok(None)
            }
        }
    }
}

/// Reads a token from one named environment variable.
#[derive(Debug, Clone, Copy)]
pub struct EnvTokenProvider {
    var: &'static str,
}

impl EnvTokenProvider {
    pub fn new(var: &'static str) -> Self {
        Self { var }
    }
}

impl TokenProvider for EnvTokenProvider {
    fn source_name(&self) -> &'static str {
        self.var
    }

    fn token(&self) -> Result<Option<String>> {
        Ok(env::var(self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }
}

#[derive(Debug, Clone)]
pub struct StoredTokenProvider {
    path: PathBuf,
}

impl StoredTokenProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenWriter for StoredTokenProvider {
    fn save_token(&self, token: &str) -> Result<()> {
        fs::write(&self.path, token.trim())
            .with_context(|| format!("failed to save token to {}", self.path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl TokenProvider for StoredTokenProvider {
    fn source_name(&self) -> &'static str {
        "stored token"
    }

    fn token(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let token = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let token = token.trim().to_string();
        if token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(token))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_token_round_trips_trimmed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stored = StoredTokenProvider::new(dir.path().join("auth_token"));
        assert_eq!(stored.token().expect("empty"), None);
        stored.save_token("  ghp_abc \n").expect("save");
        assert_eq!(stored.token().expect("read").as_deref(), Some("ghp_abc"));
    }

    #[test]
    fn unset_env_var_yields_none() {
        let provider = EnvTokenProvider::new("PRISMGATE_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert_eq!(provider.token().expect("token"), None);
        assert_eq!(provider.source_name(), "PRISMGATE_TEST_TOKEN_THAT_IS_NEVER_SET");
    }
}
