//! Core business types: lifecycle phases, positions, trades, stops, index
//! contract specs and session-clock rules.

pub mod hours;
pub mod indices;
pub mod phase;
pub mod position;
pub mod trade;
pub mod trailing;

pub use indices::{index_spec, round_to_strike, IndexSpec};
pub use phase::{Phase, StateMachine};
pub use position::{OptionSide, Position, PositionError};
pub use trade::{TradeRecord, TradeStatus};
pub use trailing::TrailingStop;
