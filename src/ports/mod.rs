//! Trait seams to the outside world: broker, market data feed and the
//! trade journal, plus scripted implementations for tests.

pub mod broker;
pub mod market_data;
pub mod mocks;
pub mod persistence;

pub use broker::{BrokerError, BrokerPort, BrokerPosition, OrderAck, OrderPoll, OrderSide};
pub use market_data::{Bar, MarketDataError, MarketDataPort, MarketEvent};
pub use persistence::{JsonlTradeStore, StoreError, TradeStore};
