use crate::account::Account;
use crate::forwardtest::ForwardTest;
use crate::models::{Callbacks, Order, Status};
use crate::store::{ForwardtestStore, UpdateOutcome};
use crate::tasks::TaskLedger;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../schema/forwardtests.sql");
const DATA_VERSION: u32 = 1;
const FORWARDTEST_COLUMNS: &str = "id, created_at, updated_at, version, data";

/// Serialized form of the mutable part of a forward test, stored in the `data` column.
#[derive(Debug, Serialize, Deserialize)]
struct ForwardtestData {
    version: u32,
    accounts: HashMap<String, Account>,
    #[serde(default)]
    orders: Vec<Order>,
    callbacks: Callbacks,
    /// Rows written before status was persisted have none and are read as ready.
    #[serde(default = "default_status")]
    status: Status,
}

fn default_status() -> Status {
    Status::Ready
}

impl ForwardtestData {
    fn from_forwardtest(forwardtest: &ForwardTest) -> Self {
        Self {
            version: DATA_VERSION,
            accounts: forwardtest.accounts.clone(),
            orders: forwardtest.orders.clone(),
            callbacks: forwardtest.callbacks.clone(),
            status: forwardtest.status,
        }
    }

    fn to_value(forwardtest: &ForwardTest) -> Result<Value> {
        serde_json::to_value(Self::from_forwardtest(forwardtest))
            .with_context(|| format!("failed to serialize forward test {}", forwardtest.id))
    }
}

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    pub async fn migrate(&self) -> Result<()> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .context("failed to apply forward tests schema")
    }
}

fn forwardtest_from_row(row: &Row) -> Result<ForwardTest> {
    let id: Uuid = row.get(0);
    let data: Value = row.get(4);
    let data: ForwardtestData = serde_json::from_value(data)
        .with_context(|| format!("failed to decode stored forward test {}", id))?;
    if data.version != DATA_VERSION {
        return Err(anyhow!(
            "forward test {} has unsupported data version {}",
            id,
            data.version
        ));
    }
    Ok(ForwardTest {
        id,
        created_at: row.get::<_, DateTime<Utc>>(1),
        updated_at: row.get::<_, DateTime<Utc>>(2),
        version: row.get(3),
        accounts: data.accounts,
        orders: data.orders,
        callbacks: data.callbacks,
        status: data.status,
    })
}

#[async_trait]
impl ForwardtestStore for Database {
    async fn create(&self, forwardtest: &ForwardTest) -> Result<ForwardTest> {
        let data = ForwardtestData::to_value(forwardtest)?;
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO forwardtests (id, created_at, updated_at, version, data)
                     VALUES ($1, $2, $2, 1, $3)
                     RETURNING {}",
                    FORWARDTEST_COLUMNS
                ),
                &[&forwardtest.id, &forwardtest.created_at, &data],
            )
            .await
            .with_context(|| format!("failed to insert forward test {}", forwardtest.id))?;
        forwardtest_from_row(&row)
    }

    async fn read(&self, id: Uuid) -> Result<Option<ForwardTest>> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "SELECT {} FROM forwardtests WHERE id = $1",
                    FORWARDTEST_COLUMNS
                ),
                &[&id],
            )
            .await
            .with_context(|| format!("failed to read forward test {}", id))?;
        row.as_ref().map(forwardtest_from_row).transpose()
    }

    async fn update(&self, forwardtest: &ForwardTest) -> Result<UpdateOutcome> {
        let data = ForwardtestData::to_value(forwardtest)?;
        let row = self
            .client
            .query_opt(
                &format!(
                    "UPDATE forwardtests
                     SET updated_at = GREATEST(clock_timestamp(), updated_at + interval '1 microsecond'),
                         version = version + 1,
                         data = $3
                     WHERE id = $1 AND version = $2
                     RETURNING {}",
                    FORWARDTEST_COLUMNS
                ),
                &[&forwardtest.id, &forwardtest.version, &data],
            )
            .await
            .with_context(|| format!("failed to update forward test {}", forwardtest.id))?;
        match row {
            Some(row) => Ok(UpdateOutcome::Updated(forwardtest_from_row(&row)?)),
            None => Ok(UpdateOutcome::VersionMismatch),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .client
            .execute("DELETE FROM forwardtests WHERE id = $1", &[&id])
            .await
            .with_context(|| format!("failed to delete forward test {}", id))?;
        Ok(deleted > 0)
    }

    async fn list(&self) -> Result<Vec<ForwardTest>> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {} FROM forwardtests ORDER BY created_at DESC, seq DESC",
                    FORWARDTEST_COLUMNS
                ),
                &[],
            )
            .await
            .context("failed to list forward tests")?;
        rows.iter().map(forwardtest_from_row).collect()
    }
}

#[async_trait]
impl TaskLedger for Database {
    async fn claim(&self, task_id: &str, lease: Duration) -> Result<bool> {
        let lease_secs = lease.as_secs_f64();
        let row = self
            .client
            .query_opt(
                "INSERT INTO forwardtest_tasks (task_id, status, attempts, updated_at)
                 VALUES ($1, 'running', 1, clock_timestamp())
                 ON CONFLICT (task_id) DO UPDATE
                 SET status = 'running',
                     attempts = forwardtest_tasks.attempts + 1,
                     updated_at = clock_timestamp()
                 WHERE forwardtest_tasks.status = 'failed'
                    OR (forwardtest_tasks.status = 'running'
                        AND forwardtest_tasks.updated_at < clock_timestamp() - make_interval(secs => $2))
                 RETURNING attempts",
                &[&task_id, &lease_secs],
            )
            .await
            .with_context(|| format!("failed to claim task {}", task_id))?;
        if let Some(row) = &row {
            let attempts: i32 = row.get(0);
            if attempts > 1 {
                log::info!("Task {} claimed again (attempt {})", task_id, attempts);
            }
        }
        Ok(row.is_some())
    }

    async fn complete(&self, task_id: &str) -> Result<()> {
        self.set_task_status(task_id, "completed").await
    }

    async fn release(&self, task_id: &str) -> Result<()> {
        self.set_task_status(task_id, "failed").await
    }
}

impl Database {
    async fn set_task_status(&self, task_id: &str, status: &str) -> Result<()> {
        self.client
            .execute(
                "UPDATE forwardtest_tasks SET status = $2, updated_at = clock_timestamp()
                 WHERE task_id = $1",
                &[&task_id, &status],
            )
            .await
            .with_context(|| format!("failed to mark task {} as {}", task_id, status))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CallbackDescriptor;
    use serde_json::json;

    #[test]
    fn data_blob_is_versioned_and_keeps_status() {
        let forwardtest = ForwardTest {
            id: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 3,
            accounts: HashMap::from([(
                "binance".to_string(),
                Account::with_balances([("USDT", 10.0)]),
            )]),
            orders: Vec::new(),
            callbacks: Callbacks {
                on_init: CallbackDescriptor::new("init", "q"),
                on_new_prices: CallbackDescriptor::new("prices", "q"),
                on_exit: CallbackDescriptor::new("exit", "q"),
            },
            status: Status::Running,
        };
        let value = ForwardtestData::to_value(&forwardtest).unwrap();
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["status"], json!("running"));
        assert_eq!(value["accounts"]["binance"]["balances"]["USDT"], json!(10.0));
        assert!(value.get("id").is_none());
    }

    #[test]
    fn rows_without_status_read_as_ready() {
        let data: ForwardtestData = serde_json::from_value(json!({
            "version": 1,
            "accounts": {"binance": {"balances": {"USDT": 5.0}}},
            "callbacks": {
                "on_init": {"name": "init", "task_queue": "q"},
                "on_new_prices": {"name": "prices", "task_queue": "q"},
                "on_exit": {"name": "exit", "task_queue": "q"}
            }
        }))
        .unwrap();
        assert_eq!(data.status, Status::Ready);
        assert!(data.orders.is_empty());
    }
}
