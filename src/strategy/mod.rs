//! Signal generation: indicators, the multi-timeframe score engine and the
//! entry/exit rule set.

pub mod macd;
pub mod rules;
pub mod score;
pub mod supertrend;

/// Bullish/bearish indicator state, shared by SuperTrend direction and MACD
/// crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Green,
    Red,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Green => "GREEN",
            Signal::Red => "RED",
        }
    }
}

pub use macd::Macd;
pub use rules::{decide_exit, EntryDecision, ExitDecision, MdsRunner, ThresholdProfile};
pub use score::{Candle, ScoreEngine, ScoreParams, ScoreSnapshot, TfScore};
pub use supertrend::SuperTrend;
