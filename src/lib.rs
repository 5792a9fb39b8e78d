//! MDS Scalper - Multi-timeframe score-based options scalper for Indian
//! index derivatives.
//!
//! A long-only intraday engine: it blends SuperTrend and MACD across a
//! base and a higher timeframe into a directional score, buys the ATM
//! CE/PE when the score confirms, and manages the position with target,
//! stop-loss, trailing stop, duration and daily-loss limits.
//!
//! # Modules
//!
//! - `domain`: Core types (Phase state machine, Position, TrailingStop,
//!   TradeRecord, index contracts, market hours)
//! - `strategy`: Signal generation (SuperTrend, MACD, ScoreEngine,
//!   entry/exit rules)
//! - `ports`: Trait abstractions (BrokerPort, MarketDataPort, TradeStore)
//! - `adapters`: Port implementations (simulated paper session)
//! - `config`: Configuration loading and validation
//! - `application`: Orchestrator, fill confirmation, broker reconciler

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod strategy;
