//! Startup reconciliation against the broker.
//!
//! A crash or restart can leave a real position open at the broker while
//! the engine starts flat. Before trading begins we pull the broker's
//! position book and rebuild our in-memory position from it, so the
//! monitor loops pick it up instead of double-entering.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::position::{OptionSide, Position};
use crate::ports::broker::{BrokerPort, BrokerPosition};

const KNOWN_INDEX_PREFIXES: [&str; 5] =
    ["BANKNIFTY", "MIDCPNIFTY", "FINNIFTY", "NIFTY", "SENSEX"];

/// Pull open option positions from the broker and rebuild the first one
/// as an engine position. Returns `None` only when the book is flat or
/// the position is not an option (no CE/PE suffix, no security id); a
/// cosmetic symbol problem must never leave a real position unmonitored.
pub async fn reconcile(broker: &Arc<dyn BrokerPort>, selected_index: &str) -> Option<Position> {
    let positions = match broker.get_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!("[RECONCILE] Could not fetch broker positions: {}", e);
            return None;
        }
    };

    let open: Vec<BrokerPosition> = positions
        .into_iter()
        .filter(|p| p.net_qty != 0)
        .collect();

    if open.is_empty() {
        info!("[RECONCILE] No open broker positions, starting flat");
        return None;
    }

    if open.len() > 1 {
        warn!(
            "[RECONCILE] {} open broker positions found, adopting the first",
            open.len()
        );
    }

    let broker_pos = &open[0];
    if broker_pos.security_id.trim().is_empty() {
        warn!("[RECONCILE] Broker position has no security id, ignoring");
        return None;
    }
    let Some((index_name, strike, side)) =
        parse_option_symbol(&broker_pos.trading_symbol, selected_index)
    else {
        warn!(
            "[RECONCILE] {:?} has no CE/PE suffix, not an option position, ignoring",
            broker_pos.trading_symbol
        );
        return None;
    };

    if index_name != selected_index.to_uppercase() {
        warn!(
            "[RECONCILE] Open position is on {} but engine trades {}; adopting anyway",
            index_name, selected_index
        );
    }

    let entry_index_ltp = broker
        .get_index_price(selected_index)
        .await
        .unwrap_or_default();

    let trade_id = format!("RECONCILE_{}", Utc::now().timestamp());
    match Position::open(
        trade_id,
        side,
        strike,
        String::new(),
        broker_pos.security_id.clone(),
        index_name.clone(),
        broker_pos.net_qty.abs(),
        broker_pos.avg_cost_price,
        Utc::now(),
        entry_index_ltp,
    ) {
        Ok(position) => {
            info!(
                "[RECONCILE] Adopted broker position: {} {} {} qty={} entry={}",
                index_name,
                strike,
                side.as_str(),
                broker_pos.net_qty.abs(),
                broker_pos.avg_cost_price
            );
            Some(position)
        }
        Err(e) => {
            warn!("[RECONCILE] Broker position unusable: {}", e);
            None
        }
    }
}

/// Split an option trading symbol like "NIFTY25SEP24500CE" into
/// (index, strike, side). The strike is the trailing run of digits
/// (at most 6) just before the CE/PE suffix. Only the suffix is
/// required; an unknown index prefix degrades to the configured index
/// and a missing strike degrades to 0, both with a warning, so the
/// position is still adopted and monitored.
fn parse_option_symbol(symbol: &str, fallback_index: &str) -> Option<(String, i64, OptionSide)> {
    let symbol = symbol.trim().to_uppercase();
    let side = OptionSide::from_symbol_suffix(&symbol)?;
    let body = &symbol[..symbol.len() - 2];

    let digits: String = body
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .take(6)
        .collect::<Vec<char>>()
        .into_iter()
        .rev()
        .collect();
    let strike: i64 = if digits.is_empty() {
        warn!("[RECONCILE] No strike digits in {:?}, recording strike 0", symbol);
        0
    } else {
        digits.parse().unwrap_or(0)
    };

    let index_name = match KNOWN_INDEX_PREFIXES
        .iter()
        .find(|prefix| symbol.starts_with(**prefix))
    {
        Some(prefix) => prefix.to_string(),
        None => {
            warn!(
                "[RECONCILE] Unknown index prefix in {:?}, assuming {}",
                symbol, fallback_index
            );
            fallback_index.to_uppercase()
        }
    };

    Some((index_name, strike, side))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::ScriptedBroker;

    fn broker_position(symbol: &str, net_qty: i64, avg: f64) -> BrokerPosition {
        BrokerPosition {
            security_id: "SEC9".to_string(),
            trading_symbol: symbol.to_string(),
            net_qty,
            avg_cost_price: avg,
            product_type: "INTRADAY".to_string(),
        }
    }

    #[test]
    fn test_parse_weekly_symbol() {
        let (index, strike, side) = parse_option_symbol("NIFTY25SEP24500CE", "NIFTY").unwrap();
        assert_eq!(index, "NIFTY");
        assert_eq!(strike, 24500);
        assert_eq!(side, OptionSide::Ce);
    }

    #[test]
    fn test_parse_banknifty_pe() {
        let (index, strike, side) = parse_option_symbol("BANKNIFTY25OCT52100PE", "NIFTY").unwrap();
        assert_eq!(index, "BANKNIFTY");
        assert_eq!(strike, 52100);
        assert_eq!(side, OptionSide::Pe);
    }

    #[test]
    fn test_parse_degrades_on_unknown_prefix_and_missing_strike() {
        let (index, strike, side) = parse_option_symbol("CRUDEOIL25SEP6000CE", "NIFTY").unwrap();
        assert_eq!(index, "NIFTY");
        assert_eq!(strike, 6000);
        assert_eq!(side, OptionSide::Ce);

        let (index, strike, _) = parse_option_symbol("NIFTYCE", "BANKNIFTY").unwrap();
        assert_eq!(index, "NIFTY");
        assert_eq!(strike, 0);
    }

    #[test]
    fn test_parse_requires_option_suffix() {
        assert!(parse_option_symbol("NIFTY25SEP24500", "NIFTY").is_none());
        assert!(parse_option_symbol("NIFTY-FUT", "NIFTY").is_none());
    }

    #[tokio::test]
    async fn test_reconcile_flat_book() {
        let scripted = Arc::new(ScriptedBroker::new());
        let broker: Arc<dyn BrokerPort> = scripted;
        assert!(reconcile(&broker, "NIFTY").await.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_skips_closed_positions() {
        let scripted = Arc::new(ScriptedBroker::new());
        scripted.set_positions(vec![broker_position("NIFTY25SEP24500CE", 0, 101.0)]);
        let broker: Arc<dyn BrokerPort> = scripted;
        assert!(reconcile(&broker, "NIFTY").await.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_rebuilds_position() {
        let scripted = Arc::new(ScriptedBroker::new());
        scripted.set_positions(vec![broker_position("NIFTY25SEP24500CE", 65, 101.5)]);
        scripted.set_index_price(24512.0);
        let broker: Arc<dyn BrokerPort> = scripted;

        let position = reconcile(&broker, "NIFTY").await.unwrap();
        assert_eq!(position.side, OptionSide::Ce);
        assert_eq!(position.strike, 24500);
        assert_eq!(position.qty, 65);
        assert_eq!(position.entry_price, 101.5);
        assert_eq!(position.entry_index_ltp, 24512.0);
        assert!(position.trade_id.starts_with("RECONCILE_"));
        assert_eq!(position.expiry, "");
    }

    #[tokio::test]
    async fn test_reconcile_adopts_unknown_prefix_with_fallback_index() {
        let scripted = Arc::new(ScriptedBroker::new());
        scripted.set_positions(vec![broker_position("XYZWEIRD9000CE", 65, 101.5)]);
        let broker: Arc<dyn BrokerPort> = scripted;

        let position = reconcile(&broker, "NIFTY").await.unwrap();
        assert_eq!(position.index_name, "NIFTY");
        assert_eq!(position.strike, 9000);
        assert_eq!(position.side, OptionSide::Ce);
        assert_eq!(position.qty, 65);
    }

    #[tokio::test]
    async fn test_reconcile_skips_non_option_symbol() {
        let scripted = Arc::new(ScriptedBroker::new());
        scripted.set_positions(vec![broker_position("NIFTY-FUT", 65, 101.5)]);
        let broker: Arc<dyn BrokerPort> = scripted;
        assert!(reconcile(&broker, "NIFTY").await.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_skips_missing_security_id() {
        let scripted = Arc::new(ScriptedBroker::new());
        let mut pos = broker_position("NIFTY25SEP24500CE", 65, 101.5);
        pos.security_id = String::new();
        scripted.set_positions(vec![pos]);
        let broker: Arc<dyn BrokerPort> = scripted;
        assert!(reconcile(&broker, "NIFTY").await.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_adopts_first_of_many() {
        let scripted = Arc::new(ScriptedBroker::new());
        scripted.set_positions(vec![
            broker_position("NIFTY25SEP24500CE", 65, 101.5),
            broker_position("NIFTY25SEP24600PE", 65, 88.0),
        ]);
        let broker: Arc<dyn BrokerPort> = scripted;

        let position = reconcile(&broker, "NIFTY").await.unwrap();
        assert_eq!(position.strike, 24500);
    }
}
