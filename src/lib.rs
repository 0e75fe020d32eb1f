pub mod account;
pub mod candlesticks;
pub mod commands;
pub mod config;
pub mod context;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod forwardtest;
pub mod http_client;
mod lifecycle;
pub mod memory;
pub mod models;
pub mod operations;
mod orders;
pub mod relay;
mod retry;
pub mod service;
pub mod store;
pub mod tasks;
pub mod ticks;
pub mod valuation;
pub mod worker;

pub use error::{ErrorKind, ForwardtestError, ForwardtestResult};
pub use forwardtest::{ForwardTest, NewForwardtestParams};
pub use service::{ForwardtestService, ServiceParts, ServiceSettings};
