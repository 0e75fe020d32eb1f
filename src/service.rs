//! The forward test controller.
//!
//! Every operation starts with a fresh load from the store, applies a deterministic local
//! change and saves it back with a version check. Nothing about a forward test is cached
//! between calls. The operations are split by concern:
//!
//! * lifecycle (`start_forwardtest`, `stop_forwardtest`) in [`crate::lifecycle`]
//! * order execution in [`crate::orders`]
//! * balance valuation in [`crate::valuation`]
//! * price subscription and tick relay in [`crate::relay`]

use crate::account::{Account, OrderRules};
use crate::candlesticks::PriceOracle;
use crate::error::{ForwardtestError, ForwardtestResult};
use crate::forwardtest::{ForwardTest, NewForwardtestParams};
use crate::models::{Mode, RunContext, ServiceInfo};
use crate::retry::with_store_retry;
use crate::store::{ForwardtestStore, UpdateOutcome};
use crate::tasks::{TaskDispatcher, TaskLedger, TaskRunner};
use crate::ticks::TickRelay;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_TASK_QUEUE: &str = "ForwardtestsTaskQueue";
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
/// Load-mutate-save cycles attempted before a save gives up with `Conflict`.
pub const MAX_SAVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Queue this service consumes; handed to callbacks as their parent queue.
    pub task_queue: String,
    pub default_callback_timeout: Duration,
    pub order_rules: OrderRules,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            default_callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            order_rules: OrderRules::default(),
        }
    }
}

/// Collaborators the service is wired with.
pub struct ServiceParts {
    pub store: Arc<dyn ForwardtestStore>,
    pub oracle: Arc<dyn PriceOracle>,
    pub ticks: Arc<dyn TickRelay>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub ledger: Arc<dyn TaskLedger>,
}

#[derive(Clone)]
pub struct ForwardtestService {
    pub(crate) store: Arc<dyn ForwardtestStore>,
    pub(crate) oracle: Arc<dyn PriceOracle>,
    pub(crate) ticks: Arc<dyn TickRelay>,
    pub(crate) tasks: TaskRunner,
    pub(crate) settings: ServiceSettings,
}

impl ForwardtestService {
    pub fn new(parts: ServiceParts, settings: ServiceSettings) -> Self {
        Self {
            store: parts.store,
            oracle: parts.oracle,
            ticks: parts.ticks,
            tasks: TaskRunner::new(parts.dispatcher, parts.ledger),
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub async fn create_forwardtest(&self, params: NewForwardtestParams) -> ForwardtestResult<Uuid> {
        let forwardtest = ForwardTest::new(params)?;
        let stored = self
            .store
            .create(&forwardtest)
            .await
            .map_err(ForwardtestError::Store)?;
        log::info!(
            "Created forward test {} with {} account(s)",
            stored.id,
            stored.accounts.len()
        );
        Ok(stored.id)
    }

    pub async fn get_forwardtest(&self, id: Uuid) -> ForwardtestResult<ForwardTest> {
        self.load(id).await
    }

    pub async fn list_forwardtests(&self) -> ForwardtestResult<Vec<ForwardTest>> {
        with_store_retry("list forward tests", || self.store.list())
            .await
            .map_err(ForwardtestError::Store)
    }

    pub async fn list_accounts(&self, id: Uuid) -> ForwardtestResult<HashMap<String, Account>> {
        Ok(self.load(id).await?.accounts)
    }

    pub async fn delete_forwardtest(&self, id: Uuid) -> ForwardtestResult<()> {
        let deleted = self
            .store
            .delete(id)
            .await
            .map_err(ForwardtestError::Store)?;
        if !deleted {
            return Err(ForwardtestError::NotFound(id));
        }
        log::info!("Deleted forward test {}", id);
        Ok(())
    }

    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub(crate) async fn load(&self, id: Uuid) -> ForwardtestResult<ForwardTest> {
        with_store_retry(&format!("read forward test {}", id), || self.store.read(id))
            .await
            .map_err(ForwardtestError::Store)?
            .ok_or(ForwardtestError::NotFound(id))
    }

    /// Applies `mutate` to `forwardtest` and saves it. When another writer got there first
    /// the forward test is reloaded and `mutate` runs again on the fresh copy.
    pub(crate) async fn save_with<T, F>(
        &self,
        mut forwardtest: ForwardTest,
        mut mutate: F,
    ) -> ForwardtestResult<(ForwardTest, T)>
    where
        F: FnMut(&mut ForwardTest) -> ForwardtestResult<T>,
    {
        let id = forwardtest.id;
        let mut attempt = 1;
        loop {
            let output = mutate(&mut forwardtest)?;
            match self
                .store
                .update(&forwardtest)
                .await
                .map_err(ForwardtestError::Store)?
            {
                UpdateOutcome::Updated(saved) => return Ok((saved, output)),
                UpdateOutcome::VersionMismatch if attempt < MAX_SAVE_ATTEMPTS => {
                    log::warn!(
                        "Forward test {} changed during save (attempt {}/{}), reloading",
                        id,
                        attempt,
                        MAX_SAVE_ATTEMPTS
                    );
                    attempt += 1;
                    forwardtest = self.load(id).await?;
                }
                UpdateOutcome::VersionMismatch => {
                    return Err(ForwardtestError::Conflict {
                        id,
                        attempts: MAX_SAVE_ATTEMPTS,
                    })
                }
            }
        }
    }

    pub(crate) fn run_context(&self, id: Uuid, now: DateTime<Utc>) -> RunContext {
        RunContext {
            id,
            mode: Mode::Forwardtest,
            now,
            parent_task_queue: self.settings.task_queue.clone(),
        }
    }
}
