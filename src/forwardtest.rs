//! The forward test aggregate: accounts, executed orders, callbacks and lifecycle status.
//!
//! All mutations here are deterministic and local. Persistence, pricing and callback
//! delivery are driven by [`crate::service::ForwardtestService`].

use crate::account::{Account, OrderRules};
use crate::error::{ForwardtestError, ForwardtestResult};
use crate::models::{Callbacks, Order, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewForwardtestParams {
    pub accounts: HashMap<String, Account>,
    pub callbacks: Callbacks,
}

impl NewForwardtestParams {
    pub fn validate(&self) -> ForwardtestResult<()> {
        if self.accounts.is_empty() {
            return Err(ForwardtestError::EmptyAccounts);
        }
        if let Some(exchange) = self.accounts.keys().find(|name| name.trim().is_empty()) {
            return Err(ForwardtestError::InvalidPayload {
                operation: "accounts".to_string(),
                reason: format!("exchange name {:?} must not be blank", exchange),
            });
        }
        self.callbacks.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardTest {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every save.
    #[serde(default)]
    pub version: i64,
    pub accounts: HashMap<String, Account>,
    #[serde(default)]
    pub orders: Vec<Order>,
    pub callbacks: Callbacks,
    pub status: Status,
}

impl ForwardTest {
    pub fn new(params: NewForwardtestParams) -> ForwardtestResult<Self> {
        params.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            version: 0,
            accounts: params.accounts,
            orders: Vec::new(),
            callbacks: params.callbacks,
            status: Status::Ready,
        })
    }

    fn transition(&mut self, next: Status) -> ForwardtestResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ForwardtestError::InvalidStatusTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> ForwardtestResult<()> {
        self.transition(Status::Running)
    }

    pub fn finish(&mut self) -> ForwardtestResult<()> {
        self.transition(Status::Finished)
    }

    pub fn is_finished(&self) -> bool {
        self.status == Status::Finished
    }

    /// Fills `order` at `price` against the account of its exchange and appends it.
    /// Nothing is modified when any step fails.
    pub fn add_order(
        &mut self,
        mut order: Order,
        price: f64,
        now: DateTime<Utc>,
        rules: OrderRules,
    ) -> ForwardtestResult<Order> {
        let Some(account) = self.accounts.get(&order.exchange) else {
            return Err(ForwardtestError::UnknownExchange {
                id: self.id,
                exchange: order.exchange.clone(),
            });
        };
        if !price.is_finite() || price <= 0.0 {
            return Err(ForwardtestError::NoPriceAvailable {
                exchange: order.exchange.clone(),
                pair: order.pair.clone(),
            });
        }

        let mut updated = account.clone();
        updated.apply_order(price, &order, rules)?;

        order.id.get_or_insert_with(Uuid::new_v4);
        order.price = Some(price);
        order.execution_time = Some(now);
        self.accounts.insert(order.exchange.clone(), updated);
        self.orders.push(order.clone());
        Ok(order)
    }
}
