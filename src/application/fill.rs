//! Order fill confirmation.
//!
//! After placing an order we poll the broker's order book until the order
//! reaches a terminal state or the timeout expires. Broker status strings
//! vary across API versions, so each family is matched as a set.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::ports::broker::BrokerPort;

const FILLED_STATUSES: [&str; 4] = ["TRADED", "COMPLETE", "COMPLETED", "FILLED"];
const PARTIAL_STATUSES: [&str; 3] = ["PART_TRADED", "PARTIALLY_TRADED", "PARTIAL"];
const OPEN_STATUSES: [&str; 5] = [
    "TRANSIT",
    "PENDING",
    "OPEN",
    "AFTER_MARKET_ORDER_REQ_RECEIVED",
    "AMO_REQ_RECEIVED",
];
const CANCELLED_STATUSES: [&str; 3] = ["CANCELLED", "EXPIRED", "CANCELPENDING"];

/// Outcome of a fill confirmation attempt.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub filled: bool,
    /// Normalized terminal status ("TRADED", "PART_TRADED", "REJECTED",
    /// "CANCELLED", "TIMEOUT").
    pub status: String,
    pub filled_qty: i64,
    pub average_price: f64,
    pub message: String,
}

impl FillOutcome {
    fn not_filled(status: &str, message: String) -> FillOutcome {
        FillOutcome {
            filled: false,
            status: status.to_string(),
            filled_qty: 0,
            average_price: 0.0,
            message,
        }
    }
}

/// Poll the broker until `order_id` reaches a terminal state.
///
/// A partial fill counts as filled once the filled quantity covers the
/// expected quantity. An order not yet visible in the order book is
/// treated as in flight, not as an error.
pub async fn confirm_fill(
    broker: &Arc<dyn BrokerPort>,
    order_id: &str,
    expected_qty: i64,
    timeout: Duration,
    poll_interval: Duration,
) -> FillOutcome {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "[FILL] Order {} not confirmed within {:?}",
                order_id, timeout
            );
            return FillOutcome::not_filled(
                "TIMEOUT",
                format!("Order {order_id} not confirmed within {}s", timeout.as_secs()),
            );
        }

        let poll = match broker.poll_order(order_id).await {
            Ok(poll) => poll,
            Err(e) => {
                warn!("[FILL] Poll failed for {}: {}", order_id, e);
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let Some(poll) = poll else {
            // Not visible in the order book yet.
            tokio::time::sleep(poll_interval).await;
            continue;
        };

        let status = poll.status.trim().to_uppercase();

        if FILLED_STATUSES.contains(&status.as_str()) {
            info!(
                "[FILL] Order {} filled: qty={} avg={}",
                order_id, poll.filled_qty, poll.average_price
            );
            return FillOutcome {
                filled: true,
                status: "TRADED".to_string(),
                filled_qty: poll.filled_qty,
                average_price: poll.average_price,
                message: String::new(),
            };
        }

        if PARTIAL_STATUSES.contains(&status.as_str()) {
            if poll.filled_qty >= expected_qty {
                info!(
                    "[FILL] Order {} partial fill covers expected qty {}",
                    order_id, expected_qty
                );
                return FillOutcome {
                    filled: true,
                    status: "PART_TRADED".to_string(),
                    filled_qty: poll.filled_qty,
                    average_price: poll.average_price,
                    message: String::new(),
                };
            }
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        if OPEN_STATUSES.contains(&status.as_str()) {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        if status == "REJECTED" {
            let reason = poll
                .rejection_reason
                .unwrap_or_else(|| "no reason given".to_string());
            warn!("[FILL] Order {} rejected: {}", order_id, reason);
            return FillOutcome::not_filled("REJECTED", reason);
        }

        if CANCELLED_STATUSES.contains(&status.as_str()) {
            warn!("[FILL] Order {} cancelled ({})", order_id, status);
            return FillOutcome::not_filled("CANCELLED", format!("Order state {status}"));
        }

        // Unknown status: keep polling rather than guess.
        warn!("[FILL] Order {} in unknown state {:?}", order_id, status);
        tokio::time::sleep(poll_interval).await;
    }
}
