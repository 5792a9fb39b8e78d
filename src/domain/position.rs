use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Invalid quantity {0}, must be a positive lot multiple")]
    InvalidQuantity(i64),

    #[error("Invalid entry price {0}, must be positive")]
    InvalidEntryPrice(f64),
}

/// Which option leg is held. The engine is always a buyer: long CE for a
/// bullish index view, long PE for a bearish one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionSide {
    #[serde(rename = "CE")]
    Ce,
    #[serde(rename = "PE")]
    Pe,
}

impl OptionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionSide::Ce => "CE",
            OptionSide::Pe => "PE",
        }
    }

    /// Parse the side from a trading symbol suffix, e.g. "NIFTY25AUG24500CE".
    pub fn from_symbol_suffix(symbol: &str) -> Option<OptionSide> {
        let sym = symbol.trim().to_uppercase();
        if sym.ends_with("CE") {
            Some(OptionSide::Ce)
        } else if sym.ends_with("PE") {
            Some(OptionSide::Pe)
        } else {
            None
        }
    }
}

impl std::fmt::Display for OptionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open long option position. Quantity is in units (lots * lot size).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: String,
    pub side: OptionSide,
    pub strike: i64,
    pub expiry: String,
    pub security_id: String,
    pub index_name: String,
    pub qty: i64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_index_ltp: f64,
    pub exit_order_id: Option<String>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        trade_id: String,
        side: OptionSide,
        strike: i64,
        expiry: String,
        security_id: String,
        index_name: String,
        qty: i64,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        entry_index_ltp: f64,
    ) -> Result<Position, PositionError> {
        if qty <= 0 {
            return Err(PositionError::InvalidQuantity(qty));
        }
        if entry_price <= 0.0 {
            return Err(PositionError::InvalidEntryPrice(entry_price));
        }
        Ok(Position {
            trade_id,
            side,
            strike,
            expiry,
            security_id,
            index_name,
            qty,
            entry_price,
            entry_time,
            entry_index_ltp,
            exit_order_id: None,
        })
    }

    /// Profit in premium points per unit at the given option LTP. Long-only,
    /// so profit is simply ltp minus entry for both CE and PE.
    pub fn profit_points(&self, ltp: f64) -> f64 {
        ltp - self.entry_price
    }

    /// Rupee P&L at the given option LTP.
    pub fn pnl(&self, ltp: f64) -> f64 {
        self.profit_points(ltp) * self.qty as f64
    }

    pub fn held_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entry_time).num_seconds()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {} {} x{} @ {:.2}",
            self.index_name, self.strike, self.side, self.qty, self.entry_price
        )
    }
}
