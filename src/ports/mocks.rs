//! Hand-rolled scripted implementations of the ports for tests and dry
//! runs. No broker traffic, fully deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::position::OptionSide;
use crate::domain::trade::TradeRecord;
use crate::ports::broker::{
    BrokerError, BrokerPort, BrokerPosition, OrderAck, OrderPoll, OrderSide,
};
use crate::ports::market_data::{Bar, MarketDataError, MarketDataPort, MarketEvent};
use crate::ports::persistence::{StoreError, TradeStore};

/// One recorded order placement.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub security_id: String,
    pub side: OrderSide,
    pub qty: i64,
}

/// Scripted broker: orders succeed (or fail) per script, polls pop a
/// scripted sequence of order states, positions and quotes are settable.
#[derive(Default)]
pub struct ScriptedBroker {
    order_seq: AtomicU64,
    reject_next_order: Mutex<Option<String>>,
    poll_script: Mutex<VecDeque<Option<OrderPoll>>>,
    positions: Mutex<Vec<BrokerPosition>>,
    option_price: Mutex<f64>,
    index_price: Mutex<f64>,
    placed: Mutex<Vec<PlacedOrder>>,
}

impl ScriptedBroker {
    pub fn new() -> ScriptedBroker {
        let broker = ScriptedBroker::default();
        *broker.option_price.lock().unwrap() = 100.0;
        *broker.index_price.lock().unwrap() = 24500.0;
        broker
    }

    pub fn set_option_price(&self, price: f64) {
        *self.option_price.lock().unwrap() = price;
    }

    pub fn set_index_price(&self, price: f64) {
        *self.index_price.lock().unwrap() = price;
    }

    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        *self.positions.lock().unwrap() = positions;
    }

    pub fn reject_next_order(&self, reason: &str) {
        *self.reject_next_order.lock().unwrap() = Some(reason.to_string());
    }

    /// Queue an order state for the next poll. `None` simulates the order
    /// not being visible in the order book yet.
    pub fn push_poll(&self, poll: Option<OrderPoll>) {
        self.poll_script.lock().unwrap().push_back(poll);
    }

    /// Queue a sequence of raw status strings, each with the given fill.
    pub fn script_statuses(&self, statuses: &[&str], filled_qty: i64, average_price: f64) {
        for status in statuses {
            self.push_poll(Some(OrderPoll {
                status: status.to_string(),
                filled_qty,
                average_price,
                rejection_reason: None,
            }));
        }
    }

    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerPort for ScriptedBroker {
    async fn place_order(
        &self,
        security_id: &str,
        side: OrderSide,
        qty: i64,
        _index_name: &str,
    ) -> Result<OrderAck, BrokerError> {
        if let Some(reason) = self.reject_next_order.lock().unwrap().take() {
            return Err(BrokerError::OrderRejected(reason));
        }
        self.placed.lock().unwrap().push(PlacedOrder {
            security_id: security_id.to_string(),
            side,
            qty,
        });
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderAck {
            order_id: format!("ORD{seq}"),
        })
    }

    async fn poll_order(&self, _order_id: &str) -> Result<Option<OrderPoll>, BrokerError> {
        let mut script = self.poll_script.lock().unwrap();
        match script.pop_front() {
            Some(poll) => Ok(poll),
            // Script exhausted: behave like a fill that already completed.
            None => Ok(Some(OrderPoll {
                status: "TRADED".to_string(),
                filled_qty: 0,
                average_price: *self.option_price.lock().unwrap(),
                rejection_reason: None,
            })),
        }
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn nearest_expiry(&self, _index_name: &str) -> Result<String, BrokerError> {
        Ok("2026-09-02".to_string())
    }

    async fn resolve_option(
        &self,
        index_name: &str,
        strike: i64,
        side: OptionSide,
        _expiry: &str,
    ) -> Result<String, BrokerError> {
        Ok(format!("{index_name}-{strike}-{}", side.as_str()))
    }

    async fn get_option_price(&self, security_id: &str) -> Result<f64, BrokerError> {
        let price = *self.option_price.lock().unwrap();
        if price <= 0.0 {
            return Err(BrokerError::QuoteUnavailable(security_id.to_string()));
        }
        Ok(price)
    }

    async fn get_index_price(&self, _index_name: &str) -> Result<f64, BrokerError> {
        Ok(*self.index_price.lock().unwrap())
    }
}

/// In-memory trade journal for assertions.
#[derive(Default)]
pub struct MemoryTradeStore {
    saved: Mutex<Vec<TradeRecord>>,
    exits: Mutex<Vec<(String, f64, f64, String)>>,
}

impl MemoryTradeStore {
    pub fn new() -> MemoryTradeStore {
        MemoryTradeStore::default()
    }

    pub fn saved_trades(&self) -> Vec<TradeRecord> {
        self.saved.lock().unwrap().clone()
    }

    pub fn exits(&self) -> Vec<(String, f64, f64, String)> {
        self.exits.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn save_trade(&self, record: &TradeRecord) -> Result<(), StoreError> {
        self.saved.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn update_trade_exit(
        &self,
        trade_id: &str,
        _exit_time: DateTime<Utc>,
        exit_price: f64,
        pnl: f64,
        exit_reason: &str,
    ) -> Result<(), StoreError> {
        self.exits.lock().unwrap().push((
            trade_id.to_string(),
            exit_price,
            pnl,
            exit_reason.to_string(),
        ));
        Ok(())
    }
}

/// Feed that replays a fixed list of events, then closes the channel.
pub struct ScriptedFeed {
    warmup: Vec<Bar>,
    events: Mutex<Vec<MarketEvent>>,
}

impl ScriptedFeed {
    pub fn new(warmup: Vec<Bar>, events: Vec<MarketEvent>) -> ScriptedFeed {
        ScriptedFeed {
            warmup,
            events: Mutex::new(events),
        }
    }
}

#[async_trait]
impl MarketDataPort for ScriptedFeed {
    async fn subscribe(
        &self,
        _index_name: &str,
        _candle_interval_seconds: u32,
    ) -> Result<mpsc::Receiver<MarketEvent>, MarketDataError> {
        let events: Vec<MarketEvent> = self.events.lock().unwrap().drain(..).collect();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn fetch_recent_bars(
        &self,
        _index_name: &str,
        _candle_interval_seconds: u32,
        limit: usize,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let n = self.warmup.len();
        Ok(self.warmup[n.saturating_sub(limit)..].to_vec())
    }
}
