use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Market data error type
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Feed connection error: {0}")]
    Connection(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Data parsing error: {0}")]
    Parse(String),
}

/// Closed OHLC bar on the engine's base timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Events delivered by the market data feed.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// A base-timeframe candle closed.
    BarClosed(Bar),
    /// Raw index LTP update between candle closes.
    IndexTick { ltp: f64, timestamp: DateTime<Utc> },
}

/// Market data port: streams closed index bars and index ticks for one
/// subscription at a time.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Subscribe to the given index at the given candle interval.
    /// Returns a channel receiver for market events.
    async fn subscribe(
        &self,
        index_name: &str,
        candle_interval_seconds: u32,
    ) -> Result<mpsc::Receiver<MarketEvent>, MarketDataError>;

    /// Fetch recent closed bars so indicators can be seeded warm on start.
    async fn fetch_recent_bars(
        &self,
        index_name: &str,
        candle_interval_seconds: u32,
        limit: usize,
    ) -> Result<Vec<Bar>, MarketDataError>;
}
