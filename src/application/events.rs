//! Engine events published over a broadcast channel for UI layers and
//! alerting. Losing a subscriber never affects trading.

use crate::domain::position::OptionSide;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    PhaseChanged {
        phase: &'static str,
    },
    PositionOpened {
        trade_id: String,
        side: OptionSide,
        strike: i64,
        entry_price: f64,
        qty: i64,
    },
    PositionClosed {
        trade_id: String,
        reason: String,
        exit_price: f64,
        pnl: f64,
    },
    DailyStopTriggered {
        daily_pnl: f64,
    },
}
