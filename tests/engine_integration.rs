//! End-to-end engine tests over the scripted ports: no broker traffic,
//! no wall-clock dependence beyond short journal flushes.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;

use mds_scalper::application::{Engine, EngineEvent};
use mds_scalper::config::{load_config, Config, Settings};
use mds_scalper::domain::OptionSide;
use mds_scalper::ports::broker::BrokerPosition;
use mds_scalper::ports::mocks::{MemoryTradeStore, ScriptedBroker, ScriptedFeed};
use mds_scalper::ports::{Bar, BrokerPort, MarketDataPort, MarketEvent, TradeStore};

fn config(mode: &str) -> Config {
    let toml = format!(
        r#"
[engine]
mode = "{mode}"
selected_index = "NIFTY"
candle_interval_seconds = 5
order_lots = 1
bypass_market_hours = true
prefetch_bars_on_start = false

[strategy]
supertrend_period = 7
supertrend_multiplier = 4.0
macd_fast = 12
macd_slow = 26
macd_signal = 9
min_hold_seconds = 15

[risk]
target_points = 20.0
initial_stoploss = 8.0
trail_start_profit = 10.0
trail_step = 5.0
max_trade_duration_seconds = 900
max_trades_per_day = 5
daily_max_loss = 2000.0
min_order_cooldown_seconds = 15

[broker]
client_id = "C1"
journal_path = "trades.jsonl"

[logging]
level = "warn"
log_to_file = false
log_file = "engine.log"
"#
    );
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(toml.as_bytes()).unwrap();
    load_config(file.path()).unwrap()
}

fn engine_with(
    cfg: Config,
    broker: Arc<ScriptedBroker>,
    feed: Arc<ScriptedFeed>,
    store: Arc<MemoryTradeStore>,
) -> Arc<Engine> {
    Arc::new(
        Engine::new(
            Settings::new(cfg),
            broker as Arc<dyn BrokerPort>,
            feed as Arc<dyn MarketDataPort>,
            store as Arc<dyn TradeStore>,
        )
        .unwrap(),
    )
}

fn next_trade_event(events: &mut broadcast::Receiver<EngineEvent>) -> EngineEvent {
    loop {
        match events.try_recv().expect("expected a buffered event") {
            EngineEvent::PhaseChanged { .. } => continue,
            other => return other,
        }
    }
}

fn bar(close: f64) -> Bar {
    Bar {
        timestamp: Utc::now(),
        open: close,
        high: close + 3.0,
        low: close - 3.0,
        close,
    }
}

#[tokio::test]
async fn paper_trade_full_lifecycle() {
    let broker = Arc::new(ScriptedBroker::new());
    let store = Arc::new(MemoryTradeStore::new());
    let feed = Arc::new(ScriptedFeed::new(vec![], vec![]));
    let engine = engine_with(config("paper"), broker.clone(), feed, store.clone());
    let mut events = engine.subscribe_events();

    engine.start().await.unwrap();
    assert_eq!(engine.status().await.phase, "SCANNING");

    assert!(engine.enter_position(OptionSide::Ce).await);
    assert_eq!(engine.status().await.phase, "IN_POSITION");

    broker.set_option_price(121.0);
    engine.check_risk_exits().await;

    let status = engine.status().await;
    assert_eq!(status.phase, "SCANNING");
    assert_eq!(status.daily_trades, 1);
    assert_eq!(status.daily_pnl, 21.0 * 65.0);

    // Journal writes are fire-and-forget.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.saved_trades().len(), 1);
    let exits = store.exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].3, "Target Hit");

    match next_trade_event(&mut events) {
        EngineEvent::PositionOpened { side, strike, .. } => {
            assert_eq!(side, OptionSide::Ce);
            assert_eq!(strike, 24500);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match next_trade_event(&mut events) {
        EngineEvent::PositionClosed { reason, pnl, .. } => {
            assert_eq!(reason, "Target Hit");
            assert_eq!(pnl, 21.0 * 65.0);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn live_start_adopts_and_manages_broker_position() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.set_positions(vec![BrokerPosition {
        security_id: "SEC1".to_string(),
        trading_symbol: "NIFTY25SEP24500CE".to_string(),
        net_qty: 65,
        avg_cost_price: 100.0,
        product_type: "INTRADAY".to_string(),
    }]);
    let store = Arc::new(MemoryTradeStore::new());
    let feed = Arc::new(ScriptedFeed::new(vec![], vec![]));
    let engine = engine_with(config("live"), broker.clone(), feed, store.clone());

    engine.start().await.unwrap();
    let status = engine.status().await;
    assert_eq!(status.phase, "IN_POSITION");
    assert!(status.position.is_some());

    // Stop seeded from the adopted entry price: 100 - 8 = 92.
    broker.set_option_price(91.0);
    engine.check_risk_exits().await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    let exits = store.exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].3, "Stop-loss Hit");
    assert!(exits[0].0.starts_with("RECONCILE_"));
}

#[tokio::test]
async fn run_loop_consumes_scripted_feed() {
    let broker = Arc::new(ScriptedBroker::new());
    let store = Arc::new(MemoryTradeStore::new());

    let mut events = Vec::new();
    for i in 0..30 {
        events.push(MarketEvent::IndexTick {
            ltp: 24500.0 + i as f64,
            timestamp: Utc::now(),
        });
        events.push(MarketEvent::BarClosed(bar(24500.0 + i as f64)));
    }
    let feed = Arc::new(ScriptedFeed::new(vec![], events));
    let engine = engine_with(config("paper"), broker, feed, store);

    let result = tokio::time::timeout(Duration::from_secs(10), engine.clone().run()).await;
    assert!(result.is_ok(), "run loop did not terminate with the feed");
    result.unwrap().unwrap();

    let status = engine.status().await;
    // Feed too short for the score engine to arm: still scanning, no trades.
    assert_eq!(status.phase, "SCANNING");
    assert_eq!(status.daily_trades, 0);
    assert!(status.last_score.is_some());
}

#[tokio::test]
async fn squareoff_and_stop_leave_engine_idle() {
    let broker = Arc::new(ScriptedBroker::new());
    let store = Arc::new(MemoryTradeStore::new());
    let feed = Arc::new(ScriptedFeed::new(vec![], vec![]));
    let engine = engine_with(config("paper"), broker, feed, store.clone());

    engine.start().await.unwrap();
    assert!(engine.enter_position(OptionSide::Pe).await);

    engine.stop().await;
    let status = engine.status().await;
    assert_eq!(status.phase, "IDLE");
    assert!(status.position.is_none());

    tokio::time::sleep(Duration::from_millis(30)).await;
    let exits = store.exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].3, "Engine Stop");
}
