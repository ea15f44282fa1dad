use anyhow::{Result, anyhow, bail};

use crate::domain::ports::{TokenProvider, TokenWriter};

#[derive(Debug, Clone)]
pub struct TokenResolution {
    pub source: &'static str,
    pub token: String,
}

/// Walks token providers in priority order; the first hit wins.
pub struct AuthManager<'a> {
    providers: Vec<&'a dyn TokenProvider>,
    stored: Option<&'a dyn TokenWriter>,
}

impl<'a> AuthManager<'a> {
    pub fn new(providers: Vec<&'a dyn TokenProvider>, stored: Option<&'a dyn TokenWriter>) -> Self {
        Self { providers, stored }
    }

    pub fn resolve_token(&self) -> Result<Option<TokenResolution>> {
        for provider in &self.providers {
            if let Some(token) = provider.token()? {
                return Ok(Some(TokenResolution {
                    source: provider.source_name(),
                    token,
                }));
            }
        }
        Ok(None)
    }

    pub fn require_token(&self, what: &str) -> Result<TokenResolution> {
        let sources = self
            .providers
            .iter()
            .map(|p| p.source_name())
            .collect::<Vec<_>>()
            .join(", ");
        self.resolve_token()?
            .ok_or_else(|| anyhow!("no {what} token found (checked: {sources})"))
    }

    pub fn login(&self, token: &str) -> Result<()> {
        let cleaned = token.trim();
        if cleaned.is_empty() {
            bail!("token cannot be empty");
        }
        let stored = self
            .stored
            .ok_or_else(|| anyhow!("this credential cannot be stored"))?;
        stored.save_token(cleaned)
    }
}
