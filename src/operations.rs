//! Named operations and their dispatch.
//!
//! Tasks arrive as `(name, JSON payload)`. [`Operation::from_task`] turns them into a typed
//! [`Operation`] and [`dispatch`] runs it against the service with one exhaustive match.

use crate::account::Account;
use crate::error::{ForwardtestError, ForwardtestResult};
use crate::forwardtest::{ForwardTest, NewForwardtestParams};
use crate::models::{Order, ServiceInfo, Tick};
use crate::relay::RELAY_CALLBACK_NAME;
use crate::service::ForwardtestService;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

pub const CREATE_FORWARDTEST: &str = "CreateForwardtest";
pub const LIST_FORWARDTESTS: &str = "ListForwardtests";
pub const GET_FORWARDTEST: &str = "GetForwardtest";
pub const LIST_FORWARDTEST_ACCOUNTS: &str = "ListForwardtestAccounts";
pub const GET_FORWARDTEST_BALANCE: &str = "GetForwardtestBalance";
pub const CREATE_FORWARDTEST_ORDER: &str = "CreateForwardtestOrder";
pub const START_FORWARDTEST: &str = "StartForwardtest";
pub const STOP_FORWARDTEST: &str = "StopForwardtest";
pub const SUBSCRIBE_TO_PRICE: &str = "SubscribeToPrice";
pub const FORWARD_NEW_PRICE: &str = RELAY_CALLBACK_NAME;
pub const DELETE_FORWARDTEST: &str = "DeleteForwardtest";
pub const SERVICE_INFO: &str = "ServiceInfo";

pub const OPERATION_NAMES: [&str; 12] = [
    CREATE_FORWARDTEST,
    LIST_FORWARDTESTS,
    GET_FORWARDTEST,
    LIST_FORWARDTEST_ACCOUNTS,
    GET_FORWARDTEST_BALANCE,
    CREATE_FORWARDTEST_ORDER,
    START_FORWARDTEST,
    STOP_FORWARDTEST,
    SUBSCRIBE_TO_PRICE,
    FORWARD_NEW_PRICE,
    DELETE_FORWARDTEST,
    SERVICE_INFO,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardtestRef {
    pub forwardtest_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderParams {
    pub forwardtest_id: Uuid,
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub forwardtest_id: Uuid,
    pub exchange: String,
    pub pair: String,
}

/// Body the ticks service posts for every tick of a registered listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDelivery {
    pub requester_id: Uuid,
    pub tick: Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateForwardtest(NewForwardtestParams),
    ListForwardtests,
    GetForwardtest(ForwardtestRef),
    ListForwardtestAccounts(ForwardtestRef),
    GetForwardtestBalance(ForwardtestRef),
    CreateForwardtestOrder(CreateOrderParams),
    StartForwardtest(ForwardtestRef),
    StopForwardtest(ForwardtestRef),
    SubscribeToPrice(SubscribeParams),
    ForwardNewPrice(TickDelivery),
    DeleteForwardtest(ForwardtestRef),
    ServiceInfo,
}

impl Operation {
    pub fn from_task(name: &str, payload: Value) -> ForwardtestResult<Self> {
        let operation = match name {
            CREATE_FORWARDTEST => Operation::CreateForwardtest(parse(name, payload)?),
            LIST_FORWARDTESTS => Operation::ListForwardtests,
            GET_FORWARDTEST => Operation::GetForwardtest(parse(name, payload)?),
            LIST_FORWARDTEST_ACCOUNTS => Operation::ListForwardtestAccounts(parse(name, payload)?),
            GET_FORWARDTEST_BALANCE => Operation::GetForwardtestBalance(parse(name, payload)?),
            CREATE_FORWARDTEST_ORDER => Operation::CreateForwardtestOrder(parse(name, payload)?),
            START_FORWARDTEST => Operation::StartForwardtest(parse(name, payload)?),
            STOP_FORWARDTEST => Operation::StopForwardtest(parse(name, payload)?),
            SUBSCRIBE_TO_PRICE => Operation::SubscribeToPrice(parse(name, payload)?),
            FORWARD_NEW_PRICE => Operation::ForwardNewPrice(parse(name, payload)?),
            DELETE_FORWARDTEST => Operation::DeleteForwardtest(parse(name, payload)?),
            SERVICE_INFO => Operation::ServiceInfo,
            other => return Err(ForwardtestError::UnknownOperation(other.to_string())),
        };
        Ok(operation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateForwardtest(_) => CREATE_FORWARDTEST,
            Operation::ListForwardtests => LIST_FORWARDTESTS,
            Operation::GetForwardtest(_) => GET_FORWARDTEST,
            Operation::ListForwardtestAccounts(_) => LIST_FORWARDTEST_ACCOUNTS,
            Operation::GetForwardtestBalance(_) => GET_FORWARDTEST_BALANCE,
            Operation::CreateForwardtestOrder(_) => CREATE_FORWARDTEST_ORDER,
            Operation::StartForwardtest(_) => START_FORWARDTEST,
            Operation::StopForwardtest(_) => STOP_FORWARDTEST,
            Operation::SubscribeToPrice(_) => SUBSCRIBE_TO_PRICE,
            Operation::ForwardNewPrice(_) => FORWARD_NEW_PRICE,
            Operation::DeleteForwardtest(_) => DELETE_FORWARDTEST,
            Operation::ServiceInfo => SERVICE_INFO,
        }
    }
}

fn parse<T: DeserializeOwned>(operation: &str, payload: Value) -> ForwardtestResult<T> {
    serde_json::from_value(payload).map_err(|err| ForwardtestError::InvalidPayload {
        operation: operation.to_string(),
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationOutput {
    Created { id: Uuid },
    OrderCreated { order_id: Uuid },
    Forwardtests(Vec<ForwardTest>),
    Forwardtest(Box<ForwardTest>),
    Accounts(HashMap<String, Account>),
    Balance { balance: f64 },
    Info(ServiceInfo),
    Done {},
}

pub async fn dispatch(
    service: &ForwardtestService,
    operation: Operation,
) -> ForwardtestResult<OperationOutput> {
    log::debug!("Dispatching {}", operation.name());
    let output = match operation {
        Operation::CreateForwardtest(params) => OperationOutput::Created {
            id: service.create_forwardtest(params).await?,
        },
        Operation::ListForwardtests => {
            OperationOutput::Forwardtests(service.list_forwardtests().await?)
        }
        Operation::GetForwardtest(target) => OperationOutput::Forwardtest(Box::new(
            service.get_forwardtest(target.forwardtest_id).await?,
        )),
        Operation::ListForwardtestAccounts(target) => {
            OperationOutput::Accounts(service.list_accounts(target.forwardtest_id).await?)
        }
        Operation::GetForwardtestBalance(target) => OperationOutput::Balance {
            balance: service.get_balance(target.forwardtest_id).await?,
        },
        Operation::CreateForwardtestOrder(params) => OperationOutput::OrderCreated {
            order_id: service
                .create_order(params.forwardtest_id, params.order)
                .await?,
        },
        Operation::StartForwardtest(target) => {
            service.start_forwardtest(target.forwardtest_id).await?;
            OperationOutput::Done {}
        }
        Operation::StopForwardtest(target) => {
            service.stop_forwardtest(target.forwardtest_id).await?;
            OperationOutput::Done {}
        }
        Operation::SubscribeToPrice(params) => {
            service
                .subscribe_to_price(params.forwardtest_id, &params.exchange, &params.pair)
                .await?;
            OperationOutput::Done {}
        }
        Operation::ForwardNewPrice(delivery) => {
            service
                .forward_new_price(delivery.requester_id, delivery.tick)
                .await?;
            OperationOutput::Done {}
        }
        Operation::DeleteForwardtest(target) => {
            service.delete_forwardtest(target.forwardtest_id).await?;
            OperationOutput::Done {}
        }
        Operation::ServiceInfo => OperationOutput::Info(service.service_info()),
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_name_maps_back_to_itself() {
        let id = Uuid::new_v4();
        for name in OPERATION_NAMES {
            let payload = match name {
                CREATE_FORWARDTEST => json!({
                    "accounts": {"binance": {"balances": {"USDT": 1000.0}}},
                    "callbacks": {
                        "on_init": {"name": "init", "task_queue": "q"},
                        "on_new_prices": {"name": "prices", "task_queue": "q"},
                        "on_exit": {"name": "exit", "task_queue": "q"}
                    }
                }),
                CREATE_FORWARDTEST_ORDER => json!({
                    "forwardtest_id": id,
                    "order": {
                        "type": "market",
                        "side": "buy",
                        "exchange": "binance",
                        "pair": "BTC-USDT",
                        "quantity": 1.0
                    }
                }),
                SUBSCRIBE_TO_PRICE => json!({
                    "forwardtest_id": id,
                    "exchange": "binance",
                    "pair": "BTC-USDT"
                }),
                FORWARD_NEW_PRICE => json!({
                    "requester_id": id,
                    "tick": {
                        "time": "2024-01-01T00:00:00Z",
                        "exchange": "binance",
                        "pair": "BTC-USDT",
                        "price": 42000.0
                    }
                }),
                _ => json!({"forwardtest_id": id}),
            };
            let operation = Operation::from_task(name, payload).unwrap();
            assert_eq!(operation.name(), name);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = Operation::from_task("RebalanceForwardtest", json!({})).unwrap_err();
        assert!(matches!(err, ForwardtestError::UnknownOperation(name) if name == "RebalanceForwardtest"));
    }

    #[test]
    fn malformed_payloads_name_the_operation() {
        let err = Operation::from_task(START_FORWARDTEST, json!({"forwardtest_id": 42})).unwrap_err();
        match err {
            ForwardtestError::InvalidPayload { operation, .. } => {
                assert_eq!(operation, START_FORWARDTEST)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn outputs_serialize_as_plain_json() {
        let id = Uuid::nil();
        assert_eq!(
            serde_json::to_value(OperationOutput::Created { id }).unwrap(),
            json!({"id": "00000000-0000-0000-0000-000000000000"})
        );
        assert_eq!(
            serde_json::to_value(OperationOutput::Balance { balance: 1000.0 }).unwrap(),
            json!({"balance": 1000.0})
        );
        assert_eq!(
            serde_json::to_value(OperationOutput::Done {}).unwrap(),
            json!({})
        );
    }
}
