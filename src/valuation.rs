use crate::candlesticks::{latest_close, CandlestickQuery};
use crate::error::ForwardtestResult;
use crate::service::ForwardtestService;
use chrono::Utc;
use futures::future::try_join_all;
use std::time::Duration;
use uuid::Uuid;

/// Currency every balance is converted into.
pub const REFERENCE_SYMBOL: &str = "USDT";
pub const VALUATION_WINDOW: Duration = Duration::from_secs(10 * 60);

impl ForwardtestService {
    /// Total value of every account in [`REFERENCE_SYMBOL`]. Fails as a whole when any
    /// conversion price is missing.
    pub async fn get_balance(&self, id: Uuid) -> ForwardtestResult<f64> {
        let forwardtest = self.load(id).await?;
        let now = Utc::now();

        let mut total = 0.0;
        let mut conversions = Vec::new();
        for (exchange, account) in &forwardtest.accounts {
            for (symbol, amount) in &account.balances {
                if symbol == REFERENCE_SYMBOL {
                    total += amount;
                } else {
                    let pair = format!("{}-{}", symbol, REFERENCE_SYMBOL);
                    conversions.push((
                        *amount,
                        CandlestickQuery::recent(exchange, &pair, now, VALUATION_WINDOW),
                    ));
                }
            }
        }

        let oracle = self.oracle.as_ref();
        let converted = try_join_all(conversions.iter().map(|(amount, query)| async move {
            latest_close(oracle, query).await.map(|price| amount * price)
        }))
        .await?;
        total += converted.into_iter().sum::<f64>();

        log::debug!("Forward test {} is worth {} {}", id, total, REFERENCE_SYMBOL);
        Ok(total)
    }
}
