use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::position::{OptionSide, Position};

/// Journal entry for a single round trip. Written once on entry and
/// completed in place when the position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub mode: String,
    pub index_name: String,
    pub side: OptionSide,
    pub strike: i64,
    pub expiry: String,
    pub qty: i64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_index_ltp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<f64>,
    pub status: TradeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeRecord {
    pub fn from_position(pos: &Position, mode: &str) -> TradeRecord {
        TradeRecord {
            trade_id: pos.trade_id.clone(),
            mode: mode.to_string(),
            index_name: pos.index_name.clone(),
            side: pos.side,
            strike: pos.strike,
            expiry: pos.expiry.clone(),
            qty: pos.qty,
            entry_price: pos.entry_price,
            entry_time: pos.entry_time,
            entry_index_ltp: pos.entry_index_ltp,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            pnl: None,
            status: TradeStatus::Open,
        }
    }
}
