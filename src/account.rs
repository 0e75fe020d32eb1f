use crate::models::{Order, OrderSide};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const BALANCE_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum AccountError {
    #[error("invalid pair {0:?}, expected BASE-QUOTE")]
    InvalidPair(String),
    #[error("invalid order quantity {0}")]
    InvalidQuantity(f64),
    #[error("invalid fill price {0}")]
    InvalidPrice(f64),
    #[error("insufficient {symbol} balance: required {required}, available {available}")]
    InsufficientBalance {
        symbol: String,
        required: f64,
        available: f64,
    },
}

/// Whether balances may be driven below zero by an order. Margin is allowed by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRules {
    pub allow_negative_balances: bool,
}

impl OrderRules {
    /// Rejects any order that spends more than the account holds.
    pub const fn strict() -> Self {
        Self {
            allow_negative_balances: false,
        }
    }
}

impl Default for OrderRules {
    fn default() -> Self {
        Self {
            allow_negative_balances: true,
        }
    }
}

/// Balances held on one exchange, keyed by asset symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub balances: HashMap<String, f64>,
}

impl Account {
    pub fn with_balances<I, S>(balances: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            balances: balances
                .into_iter()
                .map(|(symbol, amount)| (symbol.into(), amount))
                .collect(),
        }
    }

    pub fn balance(&self, symbol: &str) -> f64 {
        self.balances.get(symbol).copied().unwrap_or(0.0)
    }

    /// Spot settlement of a market order at `price`: a buy spends `quantity * price` of the
    /// quote asset for `quantity` of the base asset, a sell does the opposite. Balances are
    /// left untouched when the order is rejected.
    pub fn apply_order(
        &mut self,
        price: f64,
        order: &Order,
        rules: OrderRules,
    ) -> Result<(), AccountError> {
        let (base, quote) = split_pair(&order.pair)?;
        if !order.quantity.is_finite() || order.quantity <= 0.0 {
            return Err(AccountError::InvalidQuantity(order.quantity));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(AccountError::InvalidPrice(price));
        }

        let notional = order.quantity * price;
        let (spent_symbol, spent, received_symbol, received) = match order.side {
            OrderSide::Buy => (quote, notional, base, order.quantity),
            OrderSide::Sell => (base, order.quantity, quote, notional),
        };

        let available = self.balance(spent_symbol);
        if !rules.allow_negative_balances && available + BALANCE_EPSILON < spent {
            return Err(AccountError::InsufficientBalance {
                symbol: spent_symbol.to_string(),
                required: spent,
                available,
            });
        }

        *self.balances.entry(spent_symbol.to_string()).or_insert(0.0) -= spent;
        *self
            .balances
            .entry(received_symbol.to_string())
            .or_insert(0.0) += received;
        Ok(())
    }
}

/// Splits `BASE-QUOTE` into its two symbols.
pub fn split_pair(pair: &str) -> Result<(&str, &str), AccountError> {
    let mut parts = pair.trim().split('-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
            Ok((base, quote))
        }
        _ => Err(AccountError::InvalidPair(pair.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdt_account(amount: f64) -> Account {
        Account::with_balances([("USDT", amount)])
    }

    #[test]
    fn buy_moves_quote_into_base() {
        let mut account = usdt_account(50_000.0);
        let order = Order::market(OrderSide::Buy, "binance", "BTC-USDT", 2.0);
        account
            .apply_order(20_000.0, &order, OrderRules::default())
            .unwrap();
        assert_eq!(account.balance("BTC"), 2.0);
        assert_eq!(account.balance("USDT"), 10_000.0);
    }

    #[test]
    fn sell_moves_base_into_quote() {
        let mut account = Account::with_balances([("ETH", 3.0), ("USDT", 0.0)]);
        let order = Order::market(OrderSide::Sell, "binance", "ETH-USDT", 1.5);
        account
            .apply_order(2_000.0, &order, OrderRules::default())
            .unwrap();
        assert_eq!(account.balance("ETH"), 1.5);
        assert_eq!(account.balance("USDT"), 3_000.0);
    }

    #[test]
    fn insufficient_balance_leaves_account_untouched() {
        let mut account = usdt_account(1_000.0);
        let before = account.clone();
        let order = Order::market(OrderSide::Buy, "binance", "BTC-USDT", 1.0);
        let err = account
            .apply_order(20_000.0, &order, OrderRules::strict())
            .unwrap_err();
        assert_eq!(
            err,
            AccountError::InsufficientBalance {
                symbol: "USDT".to_string(),
                required: 20_000.0,
                available: 1_000.0,
            }
        );
        assert_eq!(account, before);
    }

    #[test]
    fn negative_balances_are_allowed_by_default() {
        let mut account = usdt_account(1_000.0);
        let order = Order::market(OrderSide::Buy, "binance", "BTC-USDT", 1.0);
        account
            .apply_order(20_000.0, &order, OrderRules::default())
            .unwrap();
        assert_eq!(account.balance("BTC"), 1.0);
        assert_eq!(account.balance("USDT"), -19_000.0);
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert_eq!(split_pair("BTC-USDT").unwrap(), ("BTC", "USDT"));
        assert!(split_pair("BTCUSDT").is_err());
        assert!(split_pair("BTC-").is_err());
        assert!(split_pair("A-B-C").is_err());

        let mut account = usdt_account(1_000.0);
        let order = Order::market(OrderSide::Buy, "binance", "BTCUSDT", 1.0);
        assert!(matches!(
            account.apply_order(10.0, &order, OrderRules::default()),
            Err(AccountError::InvalidPair(_))
        ));
    }
}
