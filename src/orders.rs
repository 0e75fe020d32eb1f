use crate::candlesticks::{latest_close, CandlestickQuery};
use crate::error::{ForwardtestError, ForwardtestResult};
use crate::models::Order;
use crate::service::ForwardtestService;
use chrono::{DurationRound, Utc};
use uuid::Uuid;

impl ForwardtestService {
    /// Fills a market order at the current one-minute close and records it on the forward
    /// test. Returns the id of the stored order.
    pub async fn create_order(&self, id: Uuid, mut order: Order) -> ForwardtestResult<Uuid> {
        let order_id = *order.id.get_or_insert_with(Uuid::new_v4);
        order.price = None;
        order.execution_time = None;
        order.validate()?;

        let forwardtest = self.load(id).await?;
        if !forwardtest.accounts.contains_key(&order.exchange) {
            return Err(ForwardtestError::UnknownExchange {
                id,
                exchange: order.exchange,
            });
        }
        if forwardtest.is_finished() {
            log::warn!(
                "Forward test {} is finished, still executing order {}",
                id,
                order_id
            );
        }

        let now = Utc::now();
        let minute = now
            .duration_trunc(chrono::Duration::minutes(1))
            .unwrap_or(now);
        let query = CandlestickQuery::at(&order.exchange, &order.pair, minute);
        let price = latest_close(self.oracle.as_ref(), &query).await?;

        let rules = self.settings.order_rules;
        let (_, filled) = self
            .save_with(forwardtest, |ft| ft.add_order(order.clone(), price, now, rules))
            .await?;
        log::info!(
            "Forward test {}: {} {} {} on {} filled at {}",
            id,
            filled.side.as_str(),
            filled.quantity,
            filled.pair,
            filled.exchange,
            price
        );
        Ok(order_id)
    }
}
