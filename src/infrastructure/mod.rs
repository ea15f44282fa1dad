pub mod asana_adapter;
pub mod github_adapter;
pub mod local_config_adapter;
pub mod memory_ledger;
pub mod reasoning_engines;
pub mod shell_adapter;
pub mod sqlite_ledger;
pub mod token_providers;
pub mod webhook_signature;
