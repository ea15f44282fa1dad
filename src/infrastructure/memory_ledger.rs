use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{
    entities::{Admission, IdempotencyKey, LedgerState},
    ports::DedupLedger,
};

/// Process-local ledger. Admissions are lost on restart, so it only backs
/// tests and `--ephemeral-ledger` runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<IdempotencyKey, LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdempotencyKey, LedgerState>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn admit(&self, key: &IdempotencyKey) -> Result<Admission> {
        match self.lock().entry(key.clone()) {
            Entry::Occupied(seen) => Ok(Admission::AlreadySeen(*seen.get())),
            Entry::Vacant(slot) => {
                slot.insert(LedgerState::Admitted);
                Ok(Admission::Admitted)
            }
        }
    }

    async fn commit(&self, key: &IdempotencyKey) -> Result<()> {
        self.lock().insert(key.clone(), LedgerState::Committed);
        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<bool> {
        let mut entries = self.lock();
        if entries.get(key) == Some(&LedgerState::Admitted) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn state(&self, key: &IdempotencyKey) -> Result<Option<LedgerState>> {
        Ok(self.lock().get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn concurrent_admits_elect_exactly_one_winner() {
        let ledger = Arc::new(MemoryLedger::new());
        let key = IdempotencyKey::new("github-review:acme/widgets#42");

        let handles = (0..32)
            .map(|_| {
                let ledger = ledger.clone();
                let key = key.clone();
                tokio::spawn(async move { ledger.admit(&key).await.expect("admit") })
            })
            .collect::<Vec<_>>();

        let mut admitted = 0usize;
        for handle in handles {
            if handle.await.expect("join") == Admission::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn committed_keys_are_not_released() {
        let ledger = MemoryLedger::new();
        let key = IdempotencyKey::new("k");
        ledger.admit(&key).await.expect("admit");
        ledger.commit(&key).await.expect("commit");
        assert!(!ledger.release(&key).await.expect("release"));
        assert_eq!(
            ledger.state(&key).await.expect("state"),
            Some(LedgerState::Committed)
        );
    }
}
