use crate::context::AppContext;
use crate::worker;
use anyhow::Result;
use log::info;

pub async fn run(app: &AppContext) -> Result<()> {
    let service = app.service().await?;
    info!(
        "Serving forward tests {} (candlesticks {}, ticks {}, callbacks {})",
        service.service_info().version,
        app.config().candlesticks_url,
        app.config().ticks_url,
        app.config().callbacks_url
    );
    worker::serve(service, &app.config().listen_address).await
}
