use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ForwardtestError;

/// Lifecycle status of a forward test. Variants are declared in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ready,
    Running,
    Finished,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ready => "ready",
            Status::Running => "running",
            Status::Finished => "finished",
        }
    }

    /// Status only moves forward. Start keeps a running test running, stop is allowed
    /// from any state and finished is terminal.
    pub fn can_transition_to(self, next: Status) -> bool {
        match (self, next) {
            (Status::Ready | Status::Running, Status::Running) => true,
            (_, Status::Finished) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
}

impl FromStr for OrderType {
    type Err = ForwardtestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            other => Err(ForwardtestError::InvalidOrder(format!(
                "unsupported order type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl FromStr for OrderSide {
    type Err = ForwardtestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(ForwardtestError::InvalidOrder(format!(
                "unknown order side '{}'",
                other
            ))),
        }
    }
}

/// An order as submitted by a callback and, once matched, as stored on the forward test.
/// `price` and `execution_time` are stamped by the executor and never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub exchange: String,
    pub pair: String,
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub execution_time: Option<DateTime<Utc>>,
}

impl Order {
    pub fn market(side: OrderSide, exchange: &str, pair: &str, quantity: f64) -> Self {
        Self {
            id: None,
            order_type: OrderType::Market,
            side,
            exchange: exchange.to_string(),
            pair: pair.to_string(),
            quantity,
            price: None,
            execution_time: None,
        }
    }

    pub fn validate(&self) -> Result<(), ForwardtestError> {
        if self.exchange.trim().is_empty() {
            return Err(ForwardtestError::InvalidOrder(
                "exchange must not be empty".to_string(),
            ));
        }
        if self.pair.trim().is_empty() {
            return Err(ForwardtestError::InvalidOrder(
                "pair must not be empty".to_string(),
            ));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(ForwardtestError::InvalidOrder(format!(
                "quantity must be a positive number (value: {})",
                self.quantity
            )));
        }
        Ok(())
    }
}

/// Where to deliver a lifecycle or price event: callback name, task queue and an optional
/// execution bound. A zero timeout means the service default applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackDescriptor {
    pub name: String,
    pub task_queue: String,
    #[serde(default, with = "duration_millis")]
    pub execution_timeout: Duration,
}

impl CallbackDescriptor {
    pub fn new(name: &str, task_queue: &str) -> Self {
        Self {
            name: name.to_string(),
            task_queue: task_queue.to_string(),
            execution_timeout: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn effective_timeout(&self, default: Duration) -> Duration {
        if self.execution_timeout.is_zero() {
            default
        } else {
            self.execution_timeout
        }
    }

    fn validate(&self, label: &str) -> Result<(), ForwardtestError> {
        if self.name.trim().is_empty() {
            return Err(ForwardtestError::InvalidCallbacks(format!(
                "{} callback has an empty name",
                label
            )));
        }
        if self.task_queue.trim().is_empty() {
            return Err(ForwardtestError::InvalidCallbacks(format!(
                "{} callback has an empty task queue",
                label
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callbacks {
    pub on_init: CallbackDescriptor,
    pub on_new_prices: CallbackDescriptor,
    pub on_exit: CallbackDescriptor,
}

impl Callbacks {
    pub fn validate(&self) -> Result<(), ForwardtestError> {
        self.on_init.validate("on_init")?;
        self.on_new_prices.validate("on_new_prices")?;
        self.on_exit.validate("on_exit")?;
        Ok(())
    }
}

/// One live price observation for an exchange and pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub exchange: String,
    pub pair: String,
    pub price: f64,
}

impl Tick {
    /// RFC 3339 timestamp with nanosecond precision, used to key per-tick callback tasks.
    pub fn time_key(&self) -> String {
        self.time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candlestick {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Forwardtest,
}

/// Context handed to every user callback so it can identify the run and call back into
/// this service through `parent_task_queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub id: Uuid,
    pub mode: Mode,
    pub now: DateTime<Utc>,
    pub parent_task_queue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitCallbackParams {
    pub context: RunContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPricesCallbackParams {
    pub context: RunContext,
    pub ticks: Vec<Tick>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitCallbackParams {
    pub context: RunContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub version: String,
}

mod duration_millis {
    use super::*;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis.unwrap_or(0)))
    }
}
