use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::domain::trade::TradeRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Trade journal port. Writes are fire-and-forget from the orchestrator's
/// point of view; a failed write must never block trading.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Record a freshly opened trade.
    async fn save_trade(&self, record: &TradeRecord) -> Result<(), StoreError>;

    /// Record the exit of a previously saved trade.
    async fn update_trade_exit(
        &self,
        trade_id: &str,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        pnl: f64,
        exit_reason: &str,
    ) -> Result<(), StoreError>;
}

/// Append-only JSONL journal: one line per event (an OPEN line on entry,
/// a CLOSED line on exit). Replays and analysis scripts read it back with
/// plain line-by-line JSON parsing.
pub struct JsonlTradeStore {
    path: PathBuf,
}

impl JsonlTradeStore {
    pub fn new(path: impl Into<PathBuf>) -> JsonlTradeStore {
        JsonlTradeStore { path: path.into() }
    }

    async fn append_line(&self, line: String) -> Result<(), StoreError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for JsonlTradeStore {
    async fn save_trade(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        self.append_line(line).await
    }

    async fn update_trade_exit(
        &self,
        trade_id: &str,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        pnl: f64,
        exit_reason: &str,
    ) -> Result<(), StoreError> {
        let line = serde_json::to_string(&serde_json::json!({
            "trade_id": trade_id,
            "exit_time": exit_time,
            "exit_price": exit_price,
            "pnl": pnl,
            "exit_reason": exit_reason,
            "status": "CLOSED",
        }))?;
        self.append_line(line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{OptionSide, Position};
    use chrono::TimeZone;

    fn record() -> TradeRecord {
        let pos = Position::open(
            "T7".into(),
            OptionSide::Ce,
            24500,
            "2026-09-02".into(),
            "SEC1".into(),
            "NIFTY".into(),
            65,
            102.5,
            Utc.with_ymd_and_hms(2026, 8, 27, 5, 0, 0).unwrap(),
            24490.0,
        )
        .unwrap();
        TradeRecord::from_position(&pos, "paper")
    }

    #[tokio::test]
    async fn test_journal_appends_open_and_close_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");
        let store = JsonlTradeStore::new(&path);

        let rec = record();
        store.save_trade(&rec).await.unwrap();
        store
            .update_trade_exit(
                &rec.trade_id,
                Utc.with_ymd_and_hms(2026, 8, 27, 5, 10, 0).unwrap(),
                110.0,
                7.5 * 65.0,
                "Target Hit",
            )
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let open: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(open["trade_id"], "T7");
        assert_eq!(open["status"], "OPEN");

        let closed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(closed["trade_id"], "T7");
        assert_eq!(closed["status"], "CLOSED");
        assert_eq!(closed["exit_reason"], "Target Hit");
    }
}
