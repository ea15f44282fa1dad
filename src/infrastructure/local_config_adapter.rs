use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::domain::{entities::AppConfig, ports::ConfigRepository};

const APP_DIR: &str = "prismgate";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_LEDGER_FILE: &str = "ledger.sqlite3";

/// JSON config under `<config_dir>/prismgate/`, created with defaults on first use.
#[derive(Debug, Clone)]
pub struct LocalConfigAdapter {
    config_root: PathBuf,
    config_path: PathBuf,
}

impl LocalConfigAdapter {
    pub fn new() -> Result<Self> {
        let root = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self::at(root)
    }

    pub fn at(root: PathBuf) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create config dir: {}", root.display()))?;

        if !config_path.exists() {
            let initial = serde_json::to_string_pretty(&AppConfig::default())?;
            fs::write(&config_path, initial).with_context(|| {
                format!("failed to initialize config file: {}", config_path.display())
            })?;
        }

        Ok(Self {
            config_root: root,
            config_path,
        })
    }

    pub fn auth_token_path(&self) -> PathBuf {
        self.config_root.join("auth_token")
    }

    /// Configured ledger path, or `ledger.sqlite3` next to the config file.
    pub fn ledger_path(&self, config: &AppConfig) -> PathBuf {
        match config.ledger_path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => self.config_root.join(DEFAULT_LEDGER_FILE),
        }
    }
}

impl ConfigRepository for LocalConfigAdapter {
    fn load_config(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.config_path)
            .with_context(|| format!("failed to read {}", self.config_path.display()))?;
        let cfg: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid {CONFIG_FILE} format"))?;
        Ok(cfg)
    }

    fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_writes_defaults_and_resolves_ledger_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = LocalConfigAdapter::at(dir.path().join("prismgate")).expect("adapter");
        let cfg = adapter.load_config().expect("load");
        assert_eq!(cfg.processed_tag, "prismgate:reviewed");
        assert_eq!(cfg.context.max_diff_chars, 60_000);
        assert_eq!(
            adapter.ledger_path(&cfg),
            dir.path().join("prismgate").join("ledger.sqlite3")
        );

        let custom = AppConfig {
            ledger_path: Some("/var/lib/prismgate/ledger.db".to_string()),
            ..cfg
        };
        fs::write(
            adapter.config_path(),
            serde_json::to_string_pretty(&custom).expect("serialize"),
        )
        .expect("write");
        let reloaded = adapter.load_config().expect("reload");
        assert_eq!(
            adapter.ledger_path(&reloaded),
            PathBuf::from("/var/lib/prismgate/ledger.db")
        );
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"actor_login":"prismgate-bot","reasoning":{"engine":{"kind":"open_ai","model":"gpt-4o"}}}"#,
        )
        .expect("parse");
        assert_eq!(cfg.effective_mention_marker(), "@prismgate-bot");
        assert_eq!(cfg.reasoning.timeout_secs, 300);
        assert!(matches!(
            cfg.reasoning.engine,
            Some(crate::domain::entities::EngineConfig::OpenAi { ref api_key_env, .. }) if api_key_env == "OPENAI_API_KEY"
        ));
    }
}
