use crate::account::OrderRules;
use crate::service::{ServiceSettings, DEFAULT_TASK_QUEUE};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const CANDLESTICKS_URL: &str = "CANDLESTICKS_URL";
pub const TICKS_URL: &str = "TICKS_URL";
pub const CALLBACKS_URL: &str = "CALLBACKS_URL";
pub const TASK_QUEUE: &str = "TASK_QUEUE";
pub const LISTEN_ADDRESS: &str = "LISTEN_ADDRESS";
pub const CALLBACK_TIMEOUT_SECS: &str = "CALLBACK_TIMEOUT_SECS";
pub const HTTP_TIMEOUT_SECS: &str = "HTTP_TIMEOUT_SECS";
pub const ALLOW_NEGATIVE_BALANCES: &str = "ALLOW_NEGATIVE_BALANCES";

const DEFAULT_CANDLESTICKS_URL: &str = "http://localhost:9001";
const DEFAULT_TICKS_URL: &str = "http://localhost:9002";
const DEFAULT_CALLBACKS_URL: &str = "http://localhost:9003";
const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub database_url: Option<String>,
    pub candlesticks_url: String,
    pub ticks_url: String,
    pub callbacks_url: String,
    pub task_queue: String,
    pub listen_address: String,
    pub callback_timeout: Duration,
    pub http_timeout: Duration,
    pub allow_negative_balances: bool,
}

impl ServiceConfig {
    /// Reads the process environment, including a `.env` file when present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let settings: HashMap<String, String> = env::vars().collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            database_url: optional_setting(settings, DATABASE_URL).map(str::to_string),
            candlesticks_url: setting_or(settings, CANDLESTICKS_URL, DEFAULT_CANDLESTICKS_URL),
            ticks_url: setting_or(settings, TICKS_URL, DEFAULT_TICKS_URL),
            callbacks_url: setting_or(settings, CALLBACKS_URL, DEFAULT_CALLBACKS_URL),
            task_queue: setting_or(settings, TASK_QUEUE, DEFAULT_TASK_QUEUE),
            listen_address: setting_or(settings, LISTEN_ADDRESS, DEFAULT_LISTEN_ADDRESS),
            callback_timeout: Duration::from_secs(setting_secs(
                settings,
                CALLBACK_TIMEOUT_SECS,
                DEFAULT_TIMEOUT_SECS,
            )?),
            http_timeout: Duration::from_secs(setting_secs(
                settings,
                HTTP_TIMEOUT_SECS,
                DEFAULT_TIMEOUT_SECS,
            )?),
            allow_negative_balances: match optional_setting(settings, ALLOW_NEGATIVE_BALANCES) {
                Some(_) => require_setting_bool(settings, ALLOW_NEGATIVE_BALANCES)?,
                None => true,
            },
        })
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            anyhow!(
                "{} must be set unless running with --in-memory",
                DATABASE_URL
            )
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            task_queue: self.task_queue.clone(),
            default_callback_timeout: self.callback_timeout,
            order_rules: OrderRules {
                allow_negative_balances: self.allow_negative_balances,
            },
        }
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn setting_or(settings: &HashMap<String, String>, key: &str, default: &str) -> String {
    optional_setting(settings, key)
        .unwrap_or(default)
        .to_string()
}

fn setting_secs(settings: &HashMap<String, String>, key: &str, default: u64) -> Result<u64> {
    if optional_setting(settings, key).is_none() {
        return Ok(default);
    }
    require_setting_u64(settings, key, 1)
}

fn require_setting_u64(settings: &HashMap<String, String>, key: &str, min: u64) -> Result<u64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be a whole number (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn require_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<bool> {
    let raw = require_setting(settings, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Setting {} must be true or false (value: {})", key, raw)),
    }
}
