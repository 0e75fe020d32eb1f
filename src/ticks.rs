//! Registration of tick listeners on the ticks service.

use crate::http_client::{build_client, trim_base_url};
use crate::models::CallbackDescriptor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait TickRelay: Send + Sync {
    /// Asks the ticks service to deliver every tick of `exchange`/`pair` to `callback`,
    /// tagged with `requester_id`.
    async fn register(
        &self,
        requester_id: Uuid,
        exchange: &str,
        pair: &str,
        callback: &CallbackDescriptor,
    ) -> Result<()>;

    async fn unregister(&self, requester_id: Uuid, exchange: &str, pair: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct ListenerRegistration<'a> {
    requester_id: Uuid,
    exchange: &'a str,
    pair: &'a str,
    callback: &'a CallbackDescriptor,
}

pub struct TicksClient {
    http: reqwest::Client,
    base_url: String,
}

impl TicksClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: trim_base_url(base_url),
        })
    }
}

#[async_trait]
impl TickRelay for TicksClient {
    async fn register(
        &self,
        requester_id: Uuid,
        exchange: &str,
        pair: &str,
        callback: &CallbackDescriptor,
    ) -> Result<()> {
        let url = format!("{}/listeners", self.base_url);
        self.http
            .post(&url)
            .json(&ListenerRegistration {
                requester_id,
                exchange,
                pair,
                callback,
            })
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .with_context(|| format!("POST {} returned error", url))?;
        Ok(())
    }

    async fn unregister(&self, requester_id: Uuid, exchange: &str, pair: &str) -> Result<()> {
        let url = format!(
            "{}/listeners/{}/{}/{}",
            self.base_url, requester_id, exchange, pair
        );
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url))?;

        if response.status() == StatusCode::NOT_FOUND {
            log::info!(
                "Tick listener for {} on {} {} was already gone",
                requester_id,
                exchange,
                pair
            );
            return Ok(());
        }
        response
            .error_for_status()
            .with_context(|| format!("DELETE {} returned error", url))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registration_body_carries_the_callback() {
        let callback = CallbackDescriptor::new("ForwardNewPrice", "ForwardtestsTaskQueue");
        let body = serde_json::to_value(ListenerRegistration {
            requester_id: Uuid::nil(),
            exchange: "binance",
            pair: "ETH-USDT",
            callback: &callback,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "requester_id": "00000000-0000-0000-0000-000000000000",
                "exchange": "binance",
                "pair": "ETH-USDT",
                "callback": {
                    "name": "ForwardNewPrice",
                    "task_queue": "ForwardtestsTaskQueue",
                    "execution_timeout": 0
                }
            })
        );
    }
}
