use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::position::OptionSide;

/// Broker error type
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker API error: {0}")]
    Api(String),

    #[error("Order placement failed: {0}")]
    OrderRejected(String),

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    #[error("Quote unavailable for {0}")]
    QuoteUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Acknowledgement for a placed market order. The fill is confirmed
/// separately by polling.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
}

/// One poll of an order's state. `status` is the raw broker status string;
/// interpretation lives in the fill-confirmation protocol.
#[derive(Debug, Clone)]
pub struct OrderPoll {
    pub status: String,
    pub filled_qty: i64,
    pub average_price: f64,
    pub rejection_reason: Option<String>,
}

/// Net position as reported by the broker.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub security_id: String,
    pub trading_symbol: String,
    pub net_qty: i64,
    pub avg_cost_price: f64,
    pub product_type: String,
}

/// Broker port: order placement, order polling, quotes and position
/// reconciliation. Implementations wrap a real broker API; tests script one.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Place a market order. Returns the broker order id on acceptance.
    async fn place_order(
        &self,
        security_id: &str,
        side: OrderSide,
        qty: i64,
        index_name: &str,
    ) -> Result<OrderAck, BrokerError>;

    /// Fetch the current state of an order. Returns None while the order is
    /// not yet visible (in-flight orders can lag the order book by a poll
    /// or two).
    async fn poll_order(&self, order_id: &str) -> Result<Option<OrderPoll>, BrokerError>;

    /// All net positions currently held at the broker.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Nearest tradeable expiry for the index, as YYYY-MM-DD.
    async fn nearest_expiry(&self, index_name: &str) -> Result<String, BrokerError>;

    /// Resolve an option contract to its broker security id.
    async fn resolve_option(
        &self,
        index_name: &str,
        strike: i64,
        side: OptionSide,
        expiry: &str,
    ) -> Result<String, BrokerError>;

    /// Last traded price of an option contract.
    async fn get_option_price(&self, security_id: &str) -> Result<f64, BrokerError>;

    /// Last traded price of the underlying index.
    async fn get_index_price(&self, index_name: &str) -> Result<f64, BrokerError>;
}
