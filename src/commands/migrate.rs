use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub async fn run(app: &AppContext) -> Result<()> {
    info!("Applying forward tests schema");
    let db = app.database().await?;
    db.migrate().await?;
    info!("Schema is up to date");
    Ok(())
}
