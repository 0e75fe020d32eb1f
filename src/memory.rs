//! In-process implementations of the storage seams, used by `--in-memory` runs and tests.

use crate::forwardtest::ForwardTest;
use crate::store::{next_updated_at, ForwardtestStore, UpdateOutcome};
use crate::tasks::TaskLedger;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<Uuid, (u64, ForwardTest)>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ForwardtestStore for MemoryStore {
    async fn create(&self, forwardtest: &ForwardTest) -> Result<ForwardTest> {
        let mut stored = forwardtest.clone();
        stored.version = 1;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        match self.entries.entry(stored.id) {
            Entry::Occupied(_) => Err(anyhow::anyhow!(
                "forward test {} already exists",
                stored.id
            )),
            Entry::Vacant(slot) => {
                slot.insert((seq, stored.clone()));
                Ok(stored)
            }
        }
    }

    async fn read(&self, id: Uuid) -> Result<Option<ForwardTest>> {
        Ok(self.entries.get(&id).map(|entry| entry.value().1.clone()))
    }

    async fn update(&self, forwardtest: &ForwardTest) -> Result<UpdateOutcome> {
        let Some(mut entry) = self.entries.get_mut(&forwardtest.id) else {
            return Ok(UpdateOutcome::VersionMismatch);
        };
        let current = &entry.value().1;
        if current.version != forwardtest.version {
            return Ok(UpdateOutcome::VersionMismatch);
        }

        let mut stored = forwardtest.clone();
        stored.version = current.version + 1;
        stored.created_at = current.created_at;
        stored.updated_at = next_updated_at(current.updated_at, Utc::now());
        entry.value_mut().1 = stored.clone();
        Ok(UpdateOutcome::Updated(stored))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.entries.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<ForwardTest>> {
        let mut entries: Vec<(u64, ForwardTest)> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| seq_b.cmp(seq_a))
        });
        Ok(entries.into_iter().map(|(_, ft)| ft).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Default)]
pub struct MemoryTaskLedger {
    claims: DashMap<String, (ClaimState, DateTime<Utc>)>,
}

impl MemoryTaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, task_id: &str, state: ClaimState) {
        self.claims
            .insert(task_id.to_string(), (state, Utc::now()));
    }
}

#[async_trait]
impl TaskLedger for MemoryTaskLedger {
    async fn claim(&self, task_id: &str, lease: Duration) -> Result<bool> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)?;
        match self.claims.entry(task_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert((ClaimState::Running, now));
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                let (state, since) = *slot.get();
                let reclaimable = match state {
                    ClaimState::Failed => true,
                    ClaimState::Running => since + lease < now,
                    ClaimState::Completed => false,
                };
                if reclaimable {
                    slot.insert((ClaimState::Running, now));
                }
                Ok(reclaimable)
            }
        }
    }

    async fn complete(&self, task_id: &str) -> Result<()> {
        self.set(task_id, ClaimState::Completed);
        Ok(())
    }

    async fn release(&self, task_id: &str) -> Result<()> {
        self.set(task_id, ClaimState::Failed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::forwardtest::NewForwardtestParams;
    use crate::models::{CallbackDescriptor, Callbacks, Status};
    use std::collections::HashMap;

    fn forwardtest() -> ForwardTest {
        ForwardTest::new(NewForwardtestParams {
            accounts: HashMap::from([(
                "binance".to_string(),
                Account::with_balances([("USDT", 1_000.0)]),
            )]),
            callbacks: Callbacks {
                on_init: CallbackDescriptor::new("init", "queue"),
                on_new_prices: CallbackDescriptor::new("prices", "queue"),
                on_exit: CallbackDescriptor::new("exit", "queue"),
            },
        })
        .unwrap()
    }

    #[tokio::test]
    async fn stale_versions_are_rejected() {
        let store = MemoryStore::new();
        let created = store.create(&forwardtest()).await.unwrap();
        assert_eq!(created.version, 1);

        let mut first = created.clone();
        first.status = Status::Running;
        let UpdateOutcome::Updated(saved) = store.update(&first).await.unwrap() else {
            panic!("first save should succeed");
        };
        assert_eq!(saved.version, 2);
        assert!(saved.updated_at > created.updated_at);

        let mut second = created;
        second.status = Status::Finished;
        assert_eq!(
            store.update(&second).await.unwrap(),
            UpdateOutcome::VersionMismatch
        );
        let stored = store.read(saved.id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Running);
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let store = MemoryStore::new();
        let mut first = forwardtest();
        let mut second = forwardtest();
        let now = Utc::now();
        first.created_at = now;
        second.created_at = now;
        store.create(&first).await.unwrap();
        store.create(&second).await.unwrap();

        let ids: Vec<Uuid> = store.list().await.unwrap().iter().map(|ft| ft.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        assert!(store.delete(first.id).await.unwrap());
        assert!(!store.delete(first.id).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ledger_claims_once_until_released() {
        let ledger = MemoryTaskLedger::new();
        let lease = Duration::from_secs(60);
        assert!(ledger.claim("task-a", lease).await.unwrap());
        assert!(!ledger.claim("task-a", lease).await.unwrap());

        ledger.release("task-a").await.unwrap();
        assert!(ledger.claim("task-a", lease).await.unwrap());

        ledger.complete("task-a").await.unwrap();
        assert!(!ledger.claim("task-a", lease).await.unwrap());
    }

    #[tokio::test]
    async fn expired_running_claims_can_be_taken_over() {
        let ledger = MemoryTaskLedger::new();
        assert!(ledger.claim("task-b", Duration::ZERO).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(ledger.claim("task-b", Duration::ZERO).await.unwrap());
    }
}
