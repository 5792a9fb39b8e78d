//! Simulated market session for paper runs.
//!
//! Drives the engine without any broker connectivity: a seeded random walk
//! produces index ticks and bars, and option premiums are marked off the
//! simulated index with a flat delta. Orders always fill at the mark.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::domain::position::OptionSide;
use crate::ports::broker::{
    BrokerError, BrokerPort, BrokerPosition, OrderAck, OrderPoll,
};
use crate::ports::market_data::{Bar, MarketDataError, MarketDataPort, MarketEvent};
use crate::ports::OrderSide;

const TICK_EVERY: Duration = Duration::from_millis(500);
const BASE_PREMIUM: f64 = 100.0;
const SIM_DELTA: f64 = 0.5;
const MIN_PREMIUM: f64 = 2.0;

/// Shared random-walk index price. Seeded, so a run is reproducible.
pub struct SimMarket {
    price: Mutex<f64>,
    rng: Mutex<StdRng>,
    step_points: f64,
}

impl SimMarket {
    pub fn new(start_price: f64, step_points: f64, seed: u64) -> Arc<SimMarket> {
        Arc::new(SimMarket {
            price: Mutex::new(start_price),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            step_points,
        })
    }

    pub fn price(&self) -> f64 {
        *self.price.lock().unwrap()
    }

    fn step(&self) -> f64 {
        let delta = {
            let mut rng = self.rng.lock().unwrap();
            rng.gen_range(-1.0..=1.0) * self.step_points
        };
        let mut price = self.price.lock().unwrap();
        *price = (*price + delta).max(1.0);
        *price
    }
}

/// Market data port backed by the simulated index.
pub struct SimFeed {
    market: Arc<SimMarket>,
}

impl SimFeed {
    pub fn new(market: Arc<SimMarket>) -> SimFeed {
        SimFeed { market }
    }
}

#[async_trait]
impl MarketDataPort for SimFeed {
    async fn subscribe(
        &self,
        _index_name: &str,
        candle_interval_seconds: u32,
    ) -> Result<mpsc::Receiver<MarketEvent>, MarketDataError> {
        let (tx, rx) = mpsc::channel(64);
        let market = Arc::clone(&self.market);
        let interval = Duration::from_secs(u64::from(candle_interval_seconds.max(1)));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_EVERY);
            let mut bar_open = Utc::now();
            let mut high = f64::MIN;
            let mut low = f64::MAX;
            let mut open = market.price();
            loop {
                ticker.tick().await;
                let ltp = market.step();
                high = high.max(ltp);
                low = low.min(ltp);
                let now = Utc::now();
                if tx
                    .send(MarketEvent::IndexTick { ltp, timestamp: now })
                    .await
                    .is_err()
                {
                    return;
                }
                if now - bar_open >= ChronoDuration::from_std(interval).unwrap_or_default() {
                    let bar = Bar {
                        timestamp: now,
                        open,
                        high,
                        low,
                        close: ltp,
                    };
                    if tx.send(MarketEvent::BarClosed(bar)).await.is_err() {
                        return;
                    }
                    bar_open = now;
                    open = ltp;
                    high = f64::MIN;
                    low = f64::MAX;
                }
            }
        });
        Ok(rx)
    }

    async fn fetch_recent_bars(
        &self,
        _index_name: &str,
        candle_interval_seconds: u32,
        limit: usize,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let step = ChronoDuration::seconds(i64::from(candle_interval_seconds));
        let mut timestamp = Utc::now() - step * limit as i32;
        let mut bars = Vec::with_capacity(limit);
        for _ in 0..limit {
            let open = self.market.price();
            let a = self.market.step();
            let close = self.market.step();
            bars.push(Bar {
                timestamp,
                open,
                high: open.max(a).max(close),
                low: open.min(a).min(close),
                close,
            });
            timestamp += step;
        }
        Ok(bars)
    }
}

/// Broker port that marks option premiums off the simulated index and
/// fills every order instantly at the mark.
pub struct SimBroker {
    market: Arc<SimMarket>,
    order_seq: AtomicU64,
    orders: Mutex<HashMap<String, String>>,
}

impl SimBroker {
    pub fn new(market: Arc<SimMarket>) -> SimBroker {
        SimBroker {
            market,
            order_seq: AtomicU64::new(0),
            orders: Mutex::new(HashMap::new()),
        }
    }

    fn premium(&self, security_id: &str) -> Result<f64, BrokerError> {
        let (strike, side) = parse_sim_id(security_id)
            .ok_or_else(|| BrokerError::InstrumentNotFound(security_id.to_string()))?;
        let index = self.market.price();
        let moneyness = match side {
            OptionSide::Ce => index - strike as f64,
            OptionSide::Pe => strike as f64 - index,
        };
        Ok((BASE_PREMIUM + SIM_DELTA * moneyness).max(MIN_PREMIUM))
    }
}

fn parse_sim_id(security_id: &str) -> Option<(i64, OptionSide)> {
    let mut parts = security_id.split('-');
    if parts.next() != Some("SIM") {
        return None;
    }
    let _index = parts.next()?;
    let strike: i64 = parts.next()?.parse().ok()?;
    let side = OptionSide::from_symbol_suffix(parts.next()?)?;
    Some((strike, side))
}

#[async_trait]
impl BrokerPort for SimBroker {
    async fn place_order(
        &self,
        security_id: &str,
        _side: OrderSide,
        _qty: i64,
        _index_name: &str,
    ) -> Result<OrderAck, BrokerError> {
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("SIM{seq}");
        self.orders
            .lock()
            .unwrap()
            .insert(order_id.clone(), security_id.to_string());
        Ok(OrderAck { order_id })
    }

    async fn poll_order(&self, order_id: &str) -> Result<Option<OrderPoll>, BrokerError> {
        let security_id = match self.orders.lock().unwrap().get(order_id).cloned() {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(Some(OrderPoll {
            status: "TRADED".to_string(),
            filled_qty: 0,
            average_price: self.premium(&security_id)?,
            rejection_reason: None,
        }))
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(Vec::new())
    }

    async fn nearest_expiry(&self, _index_name: &str) -> Result<String, BrokerError> {
        // Next Thursday, the common weekly expiry day.
        let mut date = Utc::now().date_naive();
        loop {
            date = date.succ_opt().unwrap_or(date);
            if date.weekday() == Weekday::Thu {
                return Ok(date.format("%Y-%m-%d").to_string());
            }
        }
    }

    async fn resolve_option(
        &self,
        index_name: &str,
        strike: i64,
        side: OptionSide,
        _expiry: &str,
    ) -> Result<String, BrokerError> {
        Ok(format!("SIM-{index_name}-{strike}-{}", side.as_str()))
    }

    async fn get_option_price(&self, security_id: &str) -> Result<f64, BrokerError> {
        self.premium(security_id)
    }

    async fn get_index_price(&self, _index_name: &str) -> Result<f64, BrokerError> {
        Ok(self.market.price())
    }
}
