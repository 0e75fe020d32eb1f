use crate::context::AppContext;
use crate::operations::{dispatch, Operation};
use anyhow::{anyhow, Context, Result};
use log::info;
use serde::de::DeserializeOwned;

/// Runs one operation against the configured store and prints its result as JSON.
pub async fn run(app: &AppContext, operation: Operation) -> Result<()> {
    let name = operation.name();
    info!("Running {}", name);
    let service = app.service().await?;
    let output = dispatch(&service, operation)
        .await
        .map_err(|err| anyhow!("{} failed ({}): {}", name, err.kind().as_str(), err))?;
    let rendered =
        serde_json::to_string_pretty(&output).context("failed to render operation output")?;
    println!("{}", rendered);
    Ok(())
}

pub fn parse_json_arg<T: DeserializeOwned>(flag: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("--{} must be valid JSON", flag))
}
