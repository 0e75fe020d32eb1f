//! Price lookups against the candlesticks service.

use crate::error::{ForwardtestError, ForwardtestResult};
use crate::http_client::{build_client, trim_base_url};
use crate::models::Candlestick;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    M1,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::M1 => "M1",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandlestickQuery {
    pub exchange: String,
    pub pair: String,
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: usize,
}

impl CandlestickQuery {
    /// The single one-minute candle at `at`.
    pub fn at(exchange: &str, pair: &str, at: DateTime<Utc>) -> Self {
        Self {
            exchange: exchange.to_string(),
            pair: pair.to_string(),
            period: Period::M1,
            start: at,
            end: at,
            limit: 1,
        }
    }

    /// One-minute candles of the `window` ending at `end`; the newest one prices the pair.
    pub fn recent(exchange: &str, pair: &str, end: DateTime<Utc>, window: Duration) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        Self {
            start: end - window,
            ..Self::at(exchange, pair, end)
        }
    }
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn list_candlesticks(&self, query: &CandlestickQuery) -> Result<Vec<Candlestick>>;
}

/// Close of the most recent returned candle. Missing, zero or non-finite closes count as no price.
pub async fn latest_close(
    oracle: &dyn PriceOracle,
    query: &CandlestickQuery,
) -> ForwardtestResult<f64> {
    let candles = oracle
        .list_candlesticks(query)
        .await
        .map_err(ForwardtestError::Adapter)?;
    match candles
        .iter()
        .max_by_key(|candle| candle.time)
        .map(|candle| candle.close)
    {
        Some(close) if close.is_finite() && close > 0.0 => Ok(close),
        _ => Err(ForwardtestError::NoPriceAvailable {
            exchange: query.exchange.clone(),
            pair: query.pair.clone(),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct CandlestickRecord {
    time: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    close: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    volume: Option<f64>,
}

impl From<CandlestickRecord> for Candlestick {
    fn from(record: CandlestickRecord) -> Self {
        Candlestick {
            time: record.time,
            open: record.open.unwrap_or(0.0),
            high: record.high.unwrap_or(0.0),
            low: record.low.unwrap_or(0.0),
            close: record.close.unwrap_or(0.0),
            volume: record.volume.unwrap_or(0.0),
        }
    }
}

pub struct CandlesticksClient {
    http: reqwest::Client,
    base_url: String,
}

impl CandlesticksClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: trim_base_url(base_url),
        })
    }

    async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {}{} with query failed", self.base_url, path))?
            .error_for_status()
            .with_context(|| format!("GET {}{} returned error", self.base_url, path))?;
        let value = response
            .json::<T>()
            .await
            .context("failed to parse candlesticks response")?;
        Ok(value)
    }
}

#[async_trait]
impl PriceOracle for CandlesticksClient {
    async fn list_candlesticks(&self, query: &CandlestickQuery) -> Result<Vec<Candlestick>> {
        let start = query.start.to_rfc3339();
        let end = query.end.to_rfc3339();
        let limit = query.limit.to_string();
        let records: Vec<CandlestickRecord> = self
            .get_with_query(
                "/candlesticks",
                &[
                    ("exchange", query.exchange.as_str()),
                    ("pair", query.pair.as_str()),
                    ("period", query.period.as_str()),
                    ("start", start.as_str()),
                    ("end", end.as_str()),
                    ("limit", limit.as_str()),
                ],
            )
            .await
            .with_context(|| {
                format!(
                    "failed to read {} candlesticks for {} on {}",
                    query.period.as_str(),
                    query.pair,
                    query.exchange
                )
            })?;
        Ok(records.into_iter().map(Candlestick::from).collect())
    }
}

fn deserialize_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct F64OptVisitor;

    impl<'de> Visitor<'de> for F64OptVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number, a numeric string or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2>(self, deserializer: D2) -> Result<Self::Value, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(Some(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value as f64))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value as f64))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(value.trim().parse::<f64>().ok())
        }
    }

    deserializer.deserialize_any(F64OptVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    struct FixedOracle(Vec<Candlestick>);

    #[async_trait]
    impl PriceOracle for FixedOracle {
        async fn list_candlesticks(&self, _query: &CandlestickQuery) -> Result<Vec<Candlestick>> {
            Ok(self.0.clone())
        }
    }

    fn candle(close: f64) -> Candlestick {
        candle_at(1_700_000_000, close)
    }

    fn candle_at(secs: i64, close: f64) -> Candlestick {
        Candlestick {
            time: Utc.timestamp_opt(secs, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn recent_query_spans_the_window() {
        let end = Utc.timestamp_opt(1_700_000_600, 0).unwrap();
        let query = CandlestickQuery::recent("binance", "BTC-USDT", end, Duration::from_secs(600));
        assert_eq!(query.start, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(query.end, end);
        assert_eq!(query.limit, 1);
        assert_eq!(query.period, Period::M1);
    }

    #[tokio::test]
    async fn latest_close_rejects_missing_and_zero_prices() {
        let query = CandlestickQuery::at("binance", "BTC-USDT", Utc::now());

        let price = latest_close(&FixedOracle(vec![candle(20_000.0)]), &query).await;
        assert_eq!(price.unwrap(), 20_000.0);

        for oracle in [FixedOracle(vec![]), FixedOracle(vec![candle(0.0)])] {
            let err = latest_close(&oracle, &query).await.unwrap_err();
            assert!(matches!(err, ForwardtestError::NoPriceAvailable { .. }));
        }
    }

    #[tokio::test]
    async fn latest_close_uses_the_newest_candle() {
        let query = CandlestickQuery::at("binance", "BTC-USDT", Utc::now());
        let oracle = FixedOracle(vec![
            candle_at(1_700_000_000, 100.0),
            candle_at(1_700_000_540, 200.0),
            candle_at(1_700_000_060, 150.0),
        ]);
        assert_eq!(latest_close(&oracle, &query).await.unwrap(), 200.0);
    }

    #[test]
    fn records_accept_string_and_null_prices() {
        let record: CandlestickRecord = serde_json::from_value(json!({
            "time": "2023-11-14T22:13:20Z",
            "open": "100.5",
            "high": 101,
            "low": null,
            "close": 100.75
        }))
        .unwrap();
        let candle = Candlestick::from(record);
        assert_eq!(candle.open, 100.5);
        assert_eq!(candle.high, 101.0);
        assert_eq!(candle.low, 0.0);
        assert_eq!(candle.close, 100.75);
        assert_eq!(candle.volume, 0.0);
    }
}
