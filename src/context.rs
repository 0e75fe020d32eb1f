use crate::candlesticks::CandlesticksClient;
use crate::config::ServiceConfig;
use crate::database::Database;
use crate::dispatcher::HttpTaskDispatcher;
use crate::memory::{MemoryStore, MemoryTaskLedger};
use crate::service::{ForwardtestService, ServiceParts};
use crate::ticks::TicksClient;
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    config: ServiceConfig,
    in_memory: bool,
}

impl AppContext {
    pub fn initialize(config: ServiceConfig, in_memory: bool) -> Result<Self> {
        if !in_memory {
            config.require_database_url()?;
        }
        Ok(Self { config, in_memory })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn database(&self) -> Result<Database> {
        Database::new(self.config.require_database_url()?).await
    }

    /// Wires the service against Postgres, or against process memory for `--in-memory` runs.
    pub async fn service(&self) -> Result<ForwardtestService> {
        let timeout = self.config.http_timeout;
        let oracle = Arc::new(CandlesticksClient::new(
            &self.config.candlesticks_url,
            timeout,
        )?);
        let ticks = Arc::new(TicksClient::new(&self.config.ticks_url, timeout)?);
        let dispatcher = Arc::new(HttpTaskDispatcher::new(
            &self.config.callbacks_url,
            timeout,
        )?);

        let parts = if self.in_memory {
            warn!("Running with in-memory storage; forward tests are lost on exit");
            ServiceParts {
                store: Arc::new(MemoryStore::new()),
                oracle,
                ticks,
                dispatcher,
                ledger: Arc::new(MemoryTaskLedger::new()),
            }
        } else {
            let database = Arc::new(self.database().await?);
            info!("Connected to PostgreSQL");
            ServiceParts {
                store: database.clone(),
                oracle,
                ticks,
                dispatcher,
                ledger: database,
            }
        };
        Ok(ForwardtestService::new(
            parts,
            self.config.service_settings(),
        ))
    }
}
