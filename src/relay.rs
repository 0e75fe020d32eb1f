//! Price subscription and the relay handler that forwards ticks to user callbacks.

use crate::error::{ForwardtestError, ForwardtestResult};
use crate::models::{CallbackDescriptor, NewPricesCallbackParams, Tick};
use crate::service::ForwardtestService;
use crate::tasks::{new_prices_task_id, ChildTask, ParentClosePolicy};
use uuid::Uuid;

/// Task name the ticks service uses to deliver ticks back to this service.
pub const RELAY_CALLBACK_NAME: &str = "ForwardNewPrice";

impl ForwardtestService {
    pub async fn subscribe_to_price(
        &self,
        id: Uuid,
        exchange: &str,
        pair: &str,
    ) -> ForwardtestResult<()> {
        let forwardtest = self.load(id).await?;
        if !forwardtest.accounts.contains_key(exchange) {
            log::warn!(
                "Forward test {} subscribes to {} on {} without an account there",
                id,
                pair,
                exchange
            );
        }

        let callback = CallbackDescriptor::new(RELAY_CALLBACK_NAME, &self.settings.task_queue);
        self.ticks
            .register(id, exchange, pair, &callback)
            .await
            .map_err(ForwardtestError::Adapter)?;
        log::info!("Forward test {} subscribed to {} on {}", id, pair, exchange);
        Ok(())
    }

    /// Handles one tick delivered for `requester_id`.
    ///
    /// A finished forward test unregisters its listener and drops the tick. Otherwise the
    /// tick goes to the `on_new_prices` callback under a task ID derived from the tick time,
    /// so a redelivered tick is acknowledged without a second invocation.
    pub async fn forward_new_price(&self, requester_id: Uuid, tick: Tick) -> ForwardtestResult<()> {
        log::debug!(
            "Forwarding {} {} @ {} to forward test {}",
            tick.exchange,
            tick.pair,
            tick.price,
            requester_id
        );
        let forwardtest = self.load(requester_id).await?;

        if forwardtest.is_finished() {
            log::debug!(
                "Forward test {} is finished, unsubscribing from {} on {}",
                requester_id,
                tick.pair,
                tick.exchange
            );
            if let Err(err) = self
                .ticks
                .unregister(requester_id, &tick.exchange, &tick.pair)
                .await
            {
                log::error!(
                    "Failed to unsubscribe forward test {} from {} on {}: {:#}",
                    requester_id,
                    tick.pair,
                    tick.exchange,
                    err
                );
            }
            return Ok(());
        }

        let callback = &forwardtest.callbacks.on_new_prices;
        let task_id = new_prices_task_id(requester_id, &tick.time_key());
        let payload = NewPricesCallbackParams {
            context: self.run_context(requester_id, tick.time),
            ticks: vec![tick],
        };
        let task = ChildTask::new(
            task_id,
            &callback.task_queue,
            &callback.name,
            callback.effective_timeout(self.settings.default_callback_timeout),
            ParentClosePolicy::Abandon,
            &payload,
        )?;

        match self.tasks.run_to_completion(task).await {
            Ok(()) => Ok(()),
            Err(ForwardtestError::DuplicateTask(task_id)) => {
                log::debug!("Tick already forwarded as {}, ignoring redelivery", task_id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
