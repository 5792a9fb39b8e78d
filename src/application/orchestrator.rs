//! Trading orchestrator.
//!
//! Owns the engine lifecycle: warms the score engine, consumes closed bars
//! and ticks from the market data port, runs the entry/exit rules, places
//! and confirms orders through the broker port, and enforces the risk
//! limits (target, stop-loss, trailing stop, max duration, daily loss).
//!
//! Signal exits are evaluated on closed bars only; price-based risk exits
//! run on a 1-second monitor so a spike between bars still gets caught.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::application::events::EngineEvent;
use crate::application::fill::confirm_fill;
use crate::application::reconciler::reconcile;
use crate::config::{Config, Settings};
use crate::domain::hours;
use crate::domain::indices::{index_spec, round_to_strike};
use crate::domain::phase::{Phase, StateMachine};
use crate::domain::position::{OptionSide, Position};
use crate::domain::trade::TradeRecord;
use crate::domain::trailing::TrailingStop;
use crate::ports::broker::{BrokerPort, OrderSide};
use crate::ports::market_data::{Bar, MarketDataPort, MarketEvent};
use crate::ports::persistence::TradeStore;
use crate::strategy::score::{Candle, ScoreEngine, ScoreSnapshot};
use crate::strategy::{MdsRunner, Signal};

const FILL_TIMEOUT: Duration = Duration::from_secs(30);
const FILL_POLL: Duration = Duration::from_millis(500);
const MAX_ORDER_FAILURES: u32 = 3;
const WARMUP_BARS: usize = 200;
const PAUSE_LOG_EVERY: Duration = Duration::from_secs(10);
const STALLED_TICK_STREAK: u32 = 10;

struct EngineState {
    machine: StateMachine,
    score: ScoreEngine,
    runner: MdsRunner,
    position: Option<Position>,
    trailing: Option<TrailingStop>,
    last_signal: Option<Signal>,
    last_snapshot: Option<ScoreSnapshot>,
    htf_flips: u32,
    daily_trades: u32,
    daily_pnl: f64,
    daily_peak_pnl: f64,
    max_drawdown: f64,
    daily_loss_hit: bool,
    last_reset_date: Option<NaiveDate>,
    last_order_time: Option<DateTime<Utc>>,
    last_entry_time: Option<DateTime<Utc>>,
    last_exit_time: Option<DateTime<Utc>>,
    last_index_ltp: f64,
    ltp_streak: u32,
    last_pause_log: Option<Instant>,
    consecutive_order_failures: u32,
}

/// Point-in-time view of the engine for status commands.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub phase: String,
    pub mode: String,
    pub index: String,
    pub trading_enabled: bool,
    pub daily_trades: u32,
    pub daily_pnl: f64,
    pub max_drawdown: f64,
    pub daily_loss_hit: bool,
    pub position: Option<String>,
    pub last_score: Option<f64>,
}

enum BarAction {
    None,
    Close(&'static str),
    Enter(OptionSide),
}

pub struct Engine {
    settings: Settings,
    broker: Arc<dyn BrokerPort>,
    feed: Arc<dyn MarketDataPort>,
    store: Arc<dyn TradeStore>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    shutdown: AtomicBool,
    fill_timeout: Duration,
    fill_poll: Duration,
}

impl Engine {
    pub fn new(
        settings: Settings,
        broker: Arc<dyn BrokerPort>,
        feed: Arc<dyn MarketDataPort>,
        store: Arc<dyn TradeStore>,
    ) -> anyhow::Result<Engine> {
        let cfg = settings.snapshot();
        let score = ScoreEngine::new(&cfg.score_params())?;
        let runner = MdsRunner::new(cfg.threshold_profile());
        let (events, _) = broadcast::channel(64);

        Ok(Engine {
            settings,
            broker,
            feed,
            store,
            state: Mutex::new(EngineState {
                machine: StateMachine::new(),
                score,
                runner,
                position: None,
                trailing: None,
                last_signal: None,
                last_snapshot: None,
                htf_flips: 0,
                daily_trades: 0,
                daily_pnl: 0.0,
                daily_peak_pnl: 0.0,
                max_drawdown: 0.0,
                daily_loss_hit: false,
                last_reset_date: None,
                last_order_time: None,
                last_entry_time: None,
                last_exit_time: None,
                last_index_ltp: 0.0,
                ltp_streak: 0,
                last_pause_log: None,
                consecutive_order_failures: 0,
            }),
            events,
            shutdown: AtomicBool::new(false),
            fill_timeout: FILL_TIMEOUT,
            fill_poll: FILL_POLL,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit_phase(&self, phase: Phase) {
        let _ = self.events.send(EngineEvent::PhaseChanged {
            phase: phase.name(),
        });
    }

    /// Broker faults while an order is being worked. The machine goes to
    /// Error once failures repeat, since a broker that keeps refusing
    /// orders needs an operator.
    fn note_order_failure(&self, st: &mut EngineState) {
        st.consecutive_order_failures += 1;
        if st.consecutive_order_failures >= MAX_ORDER_FAILURES {
            st.machine.error("repeated order failures");
        }
    }

    /// Roll back a claimed entry after a broker-side failure.
    async fn abort_entry(&self) {
        let mut st = self.state.lock().await;
        st.machine.entry_failed();
        self.note_order_failure(&mut st);
        self.emit_phase(st.machine.phase());
    }

    /// Roll back a claimed exit, leaving the position open and monitored.
    async fn abort_exit(&self) {
        let mut st = self.state.lock().await;
        st.machine.exit_failed();
        self.note_order_failure(&mut st);
        self.emit_phase(st.machine.phase());
    }

    /// Prepare for trading: adopt any position still open at the broker,
    /// otherwise seed the score engine from recent history.
    pub async fn start(&self) -> anyhow::Result<()> {
        let cfg = self.settings.snapshot();
        {
            let mut st = self.state.lock().await;
            st.machine.start();
            // Mark today's session as current so the first reset check does
            // not wipe the warmup seeded below.
            st.last_reset_date = Some(hours::session_date(Utc::now()));
            self.emit_phase(st.machine.phase());
        }

        if !cfg.is_paper() {
            if let Some(position) = reconcile(&self.broker, &cfg.engine.selected_index).await {
                let mut st = self.state.lock().await;
                st.trailing = Some(TrailingStop::with_initial_stop(
                    position.entry_price,
                    cfg.risk.initial_stoploss,
                    cfg.risk.trail_start_profit,
                    cfg.risk.trail_step,
                ));
                st.machine.warmed_up();
                st.machine.placing_entry();
                st.machine.entry_confirmed();
                st.position = Some(position);
                self.emit_phase(st.machine.phase());
                return Ok(());
            }
        }

        if cfg.engine.prefetch_bars_on_start {
            match self
                .feed
                .fetch_recent_bars(
                    &cfg.engine.selected_index,
                    cfg.engine.candle_interval_seconds,
                    WARMUP_BARS,
                )
                .await
            {
                Ok(bars) => {
                    let mut st = self.state.lock().await;
                    let mut fed = 0usize;
                    for bar in &bars {
                        if bar.close > 0.0 {
                            st.score.on_base_candle(Candle {
                                high: bar.high,
                                low: bar.low,
                                close: bar.close,
                            });
                            fed += 1;
                        }
                    }
                    info!("[WARMUP] Seeded score engine with {} bars", fed);
                }
                Err(e) => warn!("[WARMUP] Could not fetch history, starting cold: {}", e),
            }
        }

        let mut st = self.state.lock().await;
        st.machine.warmed_up();
        self.emit_phase(st.machine.phase());
        Ok(())
    }

    /// Main loop: start, subscribe to the feed, spawn the risk monitor and
    /// process market events until stopped.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.start().await?;
        let cfg = self.settings.snapshot();
        let bypass = cfg.engine.bypass_market_hours;

        let mut rx = self
            .feed
            .subscribe(&cfg.engine.selected_index, cfg.engine.candle_interval_seconds)
            .await?;

        let monitor = {
            let engine = Arc::clone(&self);
            tokio::spawn(async move { engine.monitor_loop().await })
        };

        while let Some(event) = rx.recv().await {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match event {
                MarketEvent::IndexTick { ltp, timestamp } => {
                    self.on_index_tick(ltp, timestamp).await;
                }
                MarketEvent::BarClosed(bar) => {
                    let now = Utc::now();
                    if hours::should_force_squareoff(now, bypass) {
                        self.squareoff("Force Square-off").await;
                        continue;
                    }
                    if !hours::is_market_open(now, bypass) {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                    self.on_bar_closed(bar).await;
                }
            }
        }

        monitor.abort();
        info!("[ENGINE] Feed closed, run loop exiting");
        Ok(())
    }

    /// Square off and stop the engine.
    pub async fn stop(&self) {
        self.squareoff("Engine Stop").await;
        let mut st = self.state.lock().await;
        st.machine.stop();
        self.emit_phase(st.machine.phase());
        drop(st);
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn monitor_loop(&self) {
        let cfg = self.settings.snapshot();
        let bypass = cfg.engine.bypass_market_hours;
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let now = Utc::now();
            {
                let mut st = self.state.lock().await;
                maybe_daily_reset(&mut st, now);
            }
            if hours::should_force_squareoff(now, bypass) {
                self.squareoff("Force Square-off").await;
                continue;
            }
            self.check_risk_exits().await;
        }
    }

    /// Track raw index prints between bars and flag a stalled feed.
    pub async fn on_index_tick(&self, ltp: f64, _timestamp: DateTime<Utc>) {
        let mut st = self.state.lock().await;
        if (ltp - st.last_index_ltp).abs() < f64::EPSILON {
            st.ltp_streak += 1;
            if st.ltp_streak == STALLED_TICK_STREAK {
                warn!(
                    "[FEED] Index LTP unchanged for {} updates, feed may be stalled",
                    STALLED_TICK_STREAK
                );
            }
        } else {
            st.ltp_streak = 1;
            st.last_index_ltp = ltp;
        }
    }

    /// Signal processing on a closed base-timeframe bar. Exits are
    /// evaluated before entries.
    pub async fn on_bar_closed(&self, bar: Bar) {
        let cfg = self.settings.snapshot();
        let now = bar.timestamp;

        let action = {
            let mut st = self.state.lock().await;
            maybe_daily_reset(&mut st, now);

            let snapshot = st.score.on_base_candle(Candle {
                high: bar.high,
                low: bar.low,
                close: bar.close,
            });
            st.last_snapshot = Some(snapshot.clone());

            if st.machine.phase() == Phase::InPosition {
                self.bar_exit_action(&mut st, &cfg, &snapshot, now)
            } else if st.machine.can_enter() {
                if let Some(reason) = entry_blocked(&st, &cfg, now) {
                    debug!("[ENTRY] Skipped: {}", reason);
                    BarAction::None
                } else {
                    let decision = st.runner.decide_entry(
                        snapshot.ready,
                        snapshot.is_choppy,
                        snapshot.direction,
                        snapshot.score,
                        snapshot.slope,
                        cfg.confirm_needed(),
                    );
                    match decision.option_type {
                        Some(side) if decision.should_enter => BarAction::Enter(side),
                        _ => {
                            debug!(
                                "[ENTRY] Waiting: {} ({}/{})",
                                decision.reason, decision.confirm_count, decision.confirm_needed
                            );
                            BarAction::None
                        }
                    }
                }
            } else {
                BarAction::None
            }
        };

        match action {
            BarAction::Close(reason) => {
                self.close_position(reason).await;
            }
            BarAction::Enter(side) => {
                self.enter_position(side).await;
            }
            BarAction::None => {}
        }
    }

    fn bar_exit_action(
        &self,
        st: &mut EngineState,
        cfg: &Config,
        snapshot: &ScoreSnapshot,
        now: DateTime<Utc>,
    ) -> BarAction {
        let Some(position) = st.position.clone() else {
            return BarAction::None;
        };

        debug!(
            "[POSITION] {} | score={} slope={}",
            position.summary(),
            snapshot.score,
            snapshot.slope
        );

        // Fresh entries ride out the first candles before signal exits apply.
        if position.held_seconds(now) < cfg.strategy.min_hold_seconds {
            return BarAction::None;
        }

        let next_tf = st.score.next_timeframe();
        let next = snapshot.tf_scores.get(&next_tf);
        let next_weighted = next.map(|t| t.weighted_score).unwrap_or(0.0);

        let mut flips = st.htf_flips;
        if htf_flip_exit(&mut flips, position.side, next_weighted) {
            st.htf_flips = 0;
            return BarAction::Close("HTF Score Reversal");
        }
        st.htf_flips = flips;

        let slow_mom = next.map(|t| t.macd_score + t.hist_score).unwrap_or(0.0);
        let decision =
            st.runner
                .decide_exit(position.side, snapshot.score, snapshot.slope, slow_mom);
        if decision.should_exit {
            BarAction::Close(decision.reason)
        } else {
            BarAction::None
        }
    }

    /// Open a long CE/PE position at the ATM strike. Returns true when a
    /// position was confirmed.
    pub async fn enter_position(&self, side: OptionSide) -> bool {
        let cfg = self.settings.snapshot();
        let now = Utc::now();
        let bypass = cfg.engine.bypass_market_hours;

        {
            let mut st = self.state.lock().await;
            if !st.machine.can_enter() {
                return false;
            }
            if !cfg.engine.trading_enabled {
                let should_log = st
                    .last_pause_log
                    .map(|t| t.elapsed() >= PAUSE_LOG_EVERY)
                    .unwrap_or(true);
                if should_log {
                    info!("[ENTRY] Trading disabled, entry suppressed");
                    st.last_pause_log = Some(Instant::now());
                }
                return false;
            }
            if !hours::is_market_open(now, bypass) || !hours::in_entry_window(now, bypass) {
                debug!("[ENTRY] Outside entry window");
                return false;
            }
            if let Some(t) = st.last_order_time {
                if (now - t).num_seconds() < cfg.risk.min_order_cooldown_seconds {
                    debug!("[ENTRY] Order cooldown active");
                    return false;
                }
            }
            // Claim the entry before any await: the transition to Entering
            // is what keeps a concurrent caller from buying twice.
            st.machine.placing_entry();
            self.emit_phase(st.machine.phase());
        }

        let index = cfg.engine.selected_index.clone();
        let spec = index_spec(&index);
        let qty = cfg.engine.order_lots * spec.lot_size;

        let expiry = match self.broker.nearest_expiry(&index).await {
            Ok(expiry) => expiry,
            Err(e) => {
                warn!("[ENTRY] Expiry lookup failed: {}", e);
                self.abort_entry().await;
                return false;
            }
        };

        let cached_ltp = self.state.lock().await.last_index_ltp;
        let index_ltp = if cached_ltp > 0.0 {
            cached_ltp
        } else {
            match self.broker.get_index_price(&index).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("[ENTRY] Index LTP unavailable: {}", e);
                    self.abort_entry().await;
                    return false;
                }
            }
        };

        let strike = round_to_strike(index_ltp, &index);
        let security_id = match self
            .broker
            .resolve_option(&index, strike, side, &expiry)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!("[ENTRY] Could not resolve {} {} {}: {}", index, strike, side, e);
                self.abort_entry().await;
                return false;
            }
        };

        let quote = match self.broker.get_option_price(&security_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!("[ENTRY] Option quote failed for {}: {}", security_id, e);
                self.abort_entry().await;
                return false;
            }
        };
        let price = round_to_tick(quote);
        if price <= 0.0 {
            warn!("[ENTRY] Bad option quote {} for {}", quote, security_id);
            self.abort_entry().await;
            return false;
        }

        let entry_price = if cfg.is_paper() {
            price
        } else {
            let ack = match self
                .broker
                .place_order(&security_id, OrderSide::Buy, qty, &index)
                .await
            {
                Ok(ack) => ack,
                Err(e) => {
                    warn!("[ENTRY] Buy order failed: {}", e);
                    self.abort_entry().await;
                    return false;
                }
            };
            let outcome = confirm_fill(
                &self.broker,
                &ack.order_id,
                qty,
                self.fill_timeout,
                self.fill_poll,
            )
            .await;
            if !outcome.filled {
                warn!(
                    "[ENTRY] Order {} not filled ({}): {}",
                    ack.order_id, outcome.status, outcome.message
                );
                self.abort_entry().await;
                return false;
            }
            let avg = round_to_tick(outcome.average_price);
            if avg > 0.0 {
                avg
            } else {
                price
            }
        };

        let trade_id = format!("TRADE_{}", now.timestamp_millis());
        let position = match Position::open(
            trade_id,
            side,
            strike,
            expiry,
            security_id,
            index.clone(),
            qty,
            entry_price,
            now,
            index_ltp,
        ) {
            Ok(position) => position,
            Err(e) => {
                warn!("[ENTRY] Rejecting unusable fill: {}", e);
                self.abort_entry().await;
                return false;
            }
        };

        {
            let mut st = self.state.lock().await;
            st.trailing = Some(TrailingStop::with_initial_stop(
                entry_price,
                cfg.risk.initial_stoploss,
                cfg.risk.trail_start_profit,
                cfg.risk.trail_step,
            ));
            st.htf_flips = 0;
            st.consecutive_order_failures = 0;
            st.machine.entry_confirmed();
            self.emit_phase(st.machine.phase());
            st.daily_trades += 1;
            st.last_order_time = Some(now);
            st.last_entry_time = Some(now);
            st.last_signal = Some(match side {
                OptionSide::Ce => Signal::Green,
                OptionSide::Pe => Signal::Red,
            });
            st.runner.on_entry_attempted();
            st.position = Some(position.clone());
        }

        info!(
            "[TRADE] Entered {} {} {} qty={} entry={} (index {})",
            index,
            position.strike,
            side.as_str(),
            qty,
            entry_price,
            index_ltp
        );

        let record = TradeRecord::from_position(&position, &cfg.engine.mode);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.save_trade(&record).await {
                warn!("[JOURNAL] Could not record entry: {}", e);
            }
        });

        let _ = self.events.send(EngineEvent::PositionOpened {
            trade_id: position.trade_id.clone(),
            side,
            strike: position.strike,
            entry_price,
            qty,
        });

        // A gap against us right after the fill should trip the stop now,
        // not on the next bar.
        self.check_risk_exits().await;
        true
    }

    /// Close the open position. Returns true once the exit is confirmed.
    pub async fn close_position(&self, reason: &str) -> bool {
        let cfg = self.settings.snapshot();
        let now = Utc::now();

        // Claim the exit before any await: the transition to Exiting is
        // what keeps the 1s monitor and the bar loop from selling twice.
        let position = {
            let mut st = self.state.lock().await;
            if !st.machine.can_exit() {
                return false;
            }
            let position = match st.position.clone() {
                Some(position) => position,
                None => return false,
            };
            st.machine.placing_exit();
            self.emit_phase(st.machine.phase());
            position
        };

        let exit_price = if cfg.is_paper() {
            match self.broker.get_option_price(&position.security_id).await {
                Ok(p) => round_to_tick(p),
                Err(e) => {
                    warn!("[EXIT] Quote failed, marking exit at entry: {}", e);
                    position.entry_price
                }
            }
        } else {
            // Reuse an exit order still pending from an earlier attempt.
            let order_id = match position.exit_order_id.clone() {
                Some(id) => id,
                None => {
                    match self
                        .broker
                        .place_order(
                            &position.security_id,
                            OrderSide::Sell,
                            position.qty,
                            &position.index_name,
                        )
                        .await
                    {
                        Ok(ack) => {
                            let mut st = self.state.lock().await;
                            if let Some(p) = st.position.as_mut() {
                                p.exit_order_id = Some(ack.order_id.clone());
                            }
                            ack.order_id
                        }
                        Err(e) => {
                            warn!("[EXIT] Sell order failed: {}", e);
                            self.abort_exit().await;
                            return false;
                        }
                    }
                }
            };

            let outcome = confirm_fill(
                &self.broker,
                &order_id,
                position.qty,
                self.fill_timeout,
                self.fill_poll,
            )
            .await;
            if !outcome.filled {
                let mut st = self.state.lock().await;
                if outcome.status == "TIMEOUT" {
                    // Keep the order id: the next attempt polls it again
                    // instead of stacking a second sell.
                    warn!("[EXIT] Order {} unconfirmed, will retry", order_id);
                } else {
                    warn!(
                        "[EXIT] Order {} failed ({}): {}",
                        order_id, outcome.status, outcome.message
                    );
                    if let Some(p) = st.position.as_mut() {
                        p.exit_order_id = None;
                    }
                }
                st.machine.exit_failed();
                self.note_order_failure(&mut st);
                self.emit_phase(st.machine.phase());
                return false;
            }
            let avg = round_to_tick(outcome.average_price);
            if avg > 0.0 {
                avg
            } else {
                self.broker
                    .get_option_price(&position.security_id)
                    .await
                    .map(round_to_tick)
                    .unwrap_or(position.entry_price)
            }
        };

        let pnl = position.pnl(exit_price);
        let mut daily_stop_pnl = None;
        {
            let mut st = self.state.lock().await;
            st.daily_pnl += pnl;
            st.daily_peak_pnl = st.daily_peak_pnl.max(st.daily_pnl);
            st.max_drawdown = st.max_drawdown.max(st.daily_peak_pnl - st.daily_pnl);
            if cfg.risk.daily_max_loss > 0.0
                && st.daily_pnl <= -cfg.risk.daily_max_loss
                && !st.daily_loss_hit
            {
                st.daily_loss_hit = true;
                daily_stop_pnl = Some(st.daily_pnl);
            }
            // Latch the signal so the very next bar cannot re-enter the
            // same side without a fresh flip.
            st.last_signal = Some(match position.side {
                OptionSide::Ce => Signal::Green,
                OptionSide::Pe => Signal::Red,
            });
            st.position = None;
            st.trailing = None;
            st.htf_flips = 0;
            st.consecutive_order_failures = 0;
            st.runner.reset();
            st.last_exit_time = Some(now);
            st.last_order_time = Some(now);
            st.machine.exit_confirmed();
            st.machine.cooldown_done();
            self.emit_phase(st.machine.phase());
        }

        info!(
            "[TRADE] Closed {} at {} | {} | pnl={:.2}",
            position.trade_id, exit_price, reason, pnl
        );

        let store = Arc::clone(&self.store);
        let trade_id = position.trade_id.clone();
        let reason_owned = reason.to_string();
        tokio::spawn(async move {
            if let Err(e) = store
                .update_trade_exit(&trade_id, now, exit_price, pnl, &reason_owned)
                .await
            {
                warn!("[JOURNAL] Could not record exit: {}", e);
            }
        });

        let _ = self.events.send(EngineEvent::PositionClosed {
            trade_id: position.trade_id.clone(),
            reason: reason.to_string(),
            exit_price,
            pnl,
        });
        if let Some(daily_pnl) = daily_stop_pnl {
            warn!(
                "[RISK] Daily loss limit hit ({:.2}), blocking new entries",
                daily_pnl
            );
            let _ = self.events.send(EngineEvent::DailyStopTriggered { daily_pnl });
        }

        true
    }

    /// Price-based risk exits, polled every second while in a position:
    /// target, then stop/trailing stop, then max duration.
    pub async fn check_risk_exits(&self) {
        let cfg = self.settings.snapshot();

        let position = {
            let st = self.state.lock().await;
            if st.machine.phase() != Phase::InPosition {
                return;
            }
            match st.position.clone() {
                Some(position) => position,
                None => return,
            }
        };

        let ltp = match self.broker.get_option_price(&position.security_id).await {
            Ok(p) => p,
            Err(e) => {
                debug!("[MONITOR] Quote failed: {}", e);
                return;
            }
        };

        let reason = {
            let mut st = self.state.lock().await;
            if st.machine.phase() != Phase::InPosition {
                return;
            }
            let profit = ltp - position.entry_price;

            if cfg.risk.target_points > 0.0 && profit >= cfg.risk.target_points {
                Some("Target Hit")
            } else if let Some(hit) = st.trailing.as_mut().and_then(|trailing| {
                trailing.update(ltp);
                if trailing.is_hit(ltp) {
                    let armed = cfg.risk.trail_start_profit > 0.0
                        && trailing.highest_profit() >= cfg.risk.trail_start_profit;
                    Some(if armed { "Trailing SL Hit" } else { "Stop-loss Hit" })
                } else {
                    None
                }
            }) {
                Some(hit)
            } else if cfg.risk.max_trade_duration_seconds > 0
                && position.held_seconds(Utc::now()) >= cfg.risk.max_trade_duration_seconds
            {
                Some("Max Duration Hit")
            } else {
                None
            }
        };

        if let Some(reason) = reason {
            self.close_position(reason).await;
        }
    }

    /// Close any open position immediately.
    pub async fn squareoff(&self, reason: &str) {
        let in_position = {
            let st = self.state.lock().await;
            st.machine.phase() == Phase::InPosition
        };
        if in_position {
            self.close_position(reason).await;
        }
    }

    pub async fn status(&self) -> EngineStatus {
        let cfg = self.settings.snapshot();
        let st = self.state.lock().await;
        EngineStatus {
            phase: st.machine.phase().name().to_string(),
            mode: cfg.engine.mode.clone(),
            index: cfg.engine.selected_index.clone(),
            trading_enabled: cfg.engine.trading_enabled,
            daily_trades: st.daily_trades,
            daily_pnl: st.daily_pnl,
            max_drawdown: st.max_drawdown,
            daily_loss_hit: st.daily_loss_hit,
            position: st.position.as_ref().map(|p| p.summary()),
            last_score: st.last_snapshot.as_ref().map(|s| s.score),
        }
    }
}

/// Two consecutive higher-timeframe bars against the position force an
/// exit even when the blended score still looks fine.
fn htf_flip_exit(count: &mut u32, side: OptionSide, next_tf_weighted: f64) -> bool {
    let against = match side {
        OptionSide::Ce => next_tf_weighted < -1.0,
        OptionSide::Pe => next_tf_weighted > 1.0,
    };
    if against {
        *count += 1;
    } else {
        *count = 0;
    }
    *count >= 2
}

fn entry_blocked(
    st: &EngineState,
    cfg: &Config,
    now: DateTime<Utc>,
) -> Option<&'static str> {
    if let Some(t) = st.last_order_time {
        if (now - t).num_seconds() < cfg.risk.min_order_cooldown_seconds {
            return Some("order_cooldown");
        }
    }
    if !hours::can_take_new_trade(now, cfg.engine.bypass_market_hours) {
        return Some("entry_window_closed");
    }
    if st.daily_loss_hit {
        return Some("daily_loss_stop");
    }
    if st.daily_trades >= cfg.risk.max_trades_per_day {
        return Some("daily_trade_cap");
    }
    if cfg.risk.min_trade_gap_seconds > 0 {
        if let Some(t) = st.last_entry_time {
            if (now - t).num_seconds() < cfg.risk.min_trade_gap_seconds {
                return Some("trade_gap");
            }
        }
    }
    if let Some(t) = st.last_exit_time {
        if (now - t).num_seconds() < i64::from(cfg.engine.candle_interval_seconds) {
            return Some("post_exit_cooldown");
        }
    }
    None
}

fn maybe_daily_reset(st: &mut EngineState, now: DateTime<Utc>) {
    if hours::is_session_reset_due(now, st.last_reset_date) {
        st.daily_trades = 0;
        st.daily_pnl = 0.0;
        st.daily_peak_pnl = 0.0;
        st.max_drawdown = 0.0;
        st.daily_loss_hit = false;
        st.consecutive_order_failures = 0;
        // Yesterday's indicator state is stale on a new session date; the
        // score engine re-warms from live bars.
        st.score.reset();
        st.runner.reset();
        st.last_reset_date = Some(hours::session_date(now));
        info!(
            "[SESSION] Daily counters and indicators reset for {}",
            hours::session_date(now)
        );
    }
}

/// Exchange prices move in 5-paise ticks.
fn round_to_tick(price: f64) -> f64 {
    ((price / 0.05).round() * 0.05 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use crate::ports::broker::{BrokerError, BrokerPosition, OrderAck, OrderPoll};
    use crate::ports::mocks::{MemoryTradeStore, ScriptedBroker, ScriptedFeed};
    use async_trait::async_trait;
    use std::io::Write;
    use tempfile::NamedTempFile;

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
level = "info"
log_to_file = false
log_file = "engine.log"
"#
        );
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        load_config(file.path()).unwrap()
    }

    struct Harness {
        engine: Arc<Engine>,
        broker: Arc<ScriptedBroker>,
        store: Arc<MemoryTradeStore>,
        settings: Settings,
    }

    fn harness(cfg: Config) -> Harness {
        let settings = Settings::new(cfg);
        let broker = Arc::new(ScriptedBroker::new());
        let store = Arc::new(MemoryTradeStore::new());
        let feed = Arc::new(ScriptedFeed::new(vec![], vec![]));
        let engine = Arc::new(
            Engine::new(
                settings.clone(),
                broker.clone() as Arc<dyn BrokerPort>,
                feed as Arc<dyn MarketDataPort>,
                store.clone() as Arc<dyn TradeStore>,
            )
            .unwrap(),
        );
        Harness {
            engine,
            broker,
            store,
            settings,
        }
    }

    fn bar(close: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open: close,
            high: close + 2.0,
            low: close - 2.0,
            close,
        }
    }

    fn next_trade_event(events: &mut broadcast::Receiver<EngineEvent>) -> EngineEvent {
        loop {
            match events.try_recv().expect("expected a buffered event") {
                EngineEvent::PhaseChanged { .. } => continue,
                other => return other,
            }
        }
    }

    async fn clear_cooldowns(engine: &Engine) {
        let mut st = engine.state.lock().await;
        st.last_order_time = None;
        st.last_entry_time = None;
        st.last_exit_time = None;
    }

    #[tokio::test]
    async fn test_paper_entry_opens_position() {
        let h = harness(config("paper"));
        let mut events = h.engine.subscribe_events();
        h.engine.start().await.unwrap();

        assert!(h.engine.enter_position(OptionSide::Ce).await);

        let status = h.engine.status().await;
        assert_eq!(status.phase, "IN_POSITION");
        assert_eq!(status.daily_trades, 1);

        let st = h.engine.state.lock().await;
        let position = st.position.as_ref().unwrap();
        assert_eq!(position.side, OptionSide::Ce);
        assert_eq!(position.strike, 24500);
        assert_eq!(position.qty, 65);
        assert_eq!(position.entry_price, 100.0);
        assert!(st.trailing.is_some());
        assert_eq!(st.last_signal, Some(Signal::Green));
        drop(st);

        // Paper mode places no broker orders.
        assert!(h.broker.placed_orders().is_empty());

        // Journal write is fire-and-forget, give it a beat.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.store.saved_trades().len(), 1);

        match next_trade_event(&mut events) {
            EngineEvent::PositionOpened { strike, qty, .. } => {
                assert_eq!(strike, 24500);
                assert_eq!(qty, 65);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_phase_events_are_broadcast() {
        let h = harness(config("paper"));
        let mut events = h.engine.subscribe_events();
        h.engine.start().await.unwrap();

        let mut phases = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::PhaseChanged { phase } = event {
                phases.push(phase);
            }
        }
        assert_eq!(phases, vec!["WARMING_UP", "SCANNING"]);
    }

    #[tokio::test]
    async fn test_trading_disabled_blocks_entry() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();
        h.settings.set_trading_enabled(false);

        assert!(!h.engine.enter_position(OptionSide::Ce).await);
        assert_eq!(h.engine.status().await.phase, "SCANNING");
    }

    #[tokio::test]
    async fn test_entry_requires_scanning_phase() {
        let h = harness(config("paper"));
        // Still IDLE: start() not called.
        assert!(!h.engine.enter_position(OptionSide::Pe).await);
    }

    #[tokio::test]
    async fn test_target_hit_closes_position() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();
        assert!(h.engine.enter_position(OptionSide::Ce).await);

        h.broker.set_option_price(125.0);
        h.engine.check_risk_exits().await;

        let status = h.engine.status().await;
        assert_eq!(status.phase, "SCANNING");
        assert_eq!(status.daily_pnl, 25.0 * 65.0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let exits = h.store.exits();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].3, "Target Hit");
        assert_eq!(exits[0].1, 125.0);
    }

    #[tokio::test]
    async fn test_initial_stop_loss() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();
        assert!(h.engine.enter_position(OptionSide::Ce).await);

        // Stop seeded at entry - 8 = 92.
        h.broker.set_option_price(91.0);
        h.engine.check_risk_exits().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let exits = h.store.exits();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].3, "Stop-loss Hit");
        assert_eq!(h.engine.status().await.daily_pnl, -9.0 * 65.0);
    }

    #[tokio::test]
    async fn test_trailing_stop_locks_profit() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();
        assert!(h.engine.enter_position(OptionSide::Ce).await);

        // Profit 15 arms trailing: levels past start lock stop at 110.
        h.broker.set_option_price(115.0);
        h.engine.check_risk_exits().await;
        assert_eq!(h.engine.status().await.phase, "IN_POSITION");

        h.broker.set_option_price(109.0);
        h.engine.check_risk_exits().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let exits = h.store.exits();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].3, "Trailing SL Hit");
    }

    #[tokio::test]
    async fn test_max_duration_exit() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();
        assert!(h.engine.enter_position(OptionSide::Ce).await);

        {
            let mut st = h.engine.state.lock().await;
            let position = st.position.as_mut().unwrap();
            position.entry_time = Utc::now() - chrono::Duration::seconds(901);
        }
        h.engine.check_risk_exits().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let exits = h.store.exits();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].3, "Max Duration Hit");
    }

    #[tokio::test]
    async fn test_daily_loss_stop_blocks_entries() {
        let mut cfg = config("paper");
        cfg.risk.daily_max_loss = 100.0;
        let h = harness(cfg.clone());
        let mut events = h.engine.subscribe_events();
        h.engine.start().await.unwrap();
        assert!(h.engine.enter_position(OptionSide::Ce).await);

        h.broker.set_option_price(90.0);
        h.engine.check_risk_exits().await;

        let status = h.engine.status().await;
        assert!(status.daily_loss_hit);
        assert_eq!(status.daily_pnl, -10.0 * 65.0);

        // PositionOpened, PositionClosed, then the daily stop.
        let mut saw_daily_stop = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::DailyStopTriggered { daily_pnl } = event {
                assert_eq!(daily_pnl, -650.0);
                saw_daily_stop = true;
            }
        }
        assert!(saw_daily_stop);

        clear_cooldowns(&h.engine).await;
        let st = h.engine.state.lock().await;
        assert_eq!(entry_blocked(&st, &cfg, Utc::now()), Some("daily_loss_stop"));
    }

    #[tokio::test]
    async fn test_live_entry_uses_fill_average() {
        let h = harness(config("live"));
        h.engine.start().await.unwrap();
        h.broker.script_statuses(&["TRADED"], 65, 100.55);

        assert!(h.engine.enter_position(OptionSide::Ce).await);

        let placed = h.broker.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side, OrderSide::Buy);
        assert_eq!(placed[0].qty, 65);

        let st = h.engine.state.lock().await;
        assert_eq!(st.position.as_ref().unwrap().entry_price, 100.55);
    }

    #[tokio::test]
    async fn test_live_entry_rejected_returns_to_scanning() {
        let h = harness(config("live"));
        h.engine.start().await.unwrap();
        h.broker.push_poll(Some(OrderPoll {
            status: "REJECTED".to_string(),
            filled_qty: 0,
            average_price: 0.0,
            rejection_reason: Some("Insufficient margin".to_string()),
        }));

        assert!(!h.engine.enter_position(OptionSide::Ce).await);
        let status = h.engine.status().await;
        assert_eq!(status.phase, "SCANNING");
        assert_eq!(status.daily_trades, 0);
    }

    #[tokio::test]
    async fn test_live_exit_places_sell_and_books_pnl() {
        let h = harness(config("live"));
        h.engine.start().await.unwrap();
        h.broker.script_statuses(&["TRADED"], 65, 100.0);
        assert!(h.engine.enter_position(OptionSide::Ce).await);

        h.broker.script_statuses(&["TRADED"], 65, 126.35);
        assert!(h.engine.close_position("Target Hit").await);

        let placed = h.broker.placed_orders();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[1].side, OrderSide::Sell);

        let status = h.engine.status().await;
        assert_eq!(status.phase, "SCANNING");
        assert!((status.daily_pnl - 26.35 * 65.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_live_exit_rejection_keeps_position() {
        let h = harness(config("live"));
        h.engine.start().await.unwrap();
        h.broker.script_statuses(&["TRADED"], 65, 100.0);
        assert!(h.engine.enter_position(OptionSide::Ce).await);

        h.broker.push_poll(Some(OrderPoll {
            status: "REJECTED".to_string(),
            filled_qty: 0,
            average_price: 0.0,
            rejection_reason: Some("Freeze qty".to_string()),
        }));
        assert!(!h.engine.close_position("Target Hit").await);

        let st = h.engine.state.lock().await;
        assert_eq!(st.machine.phase(), Phase::InPosition);
        // Rejected sell is discarded so the next attempt places fresh.
        assert!(st.position.as_ref().unwrap().exit_order_id.is_none());
    }

    /// Broker whose order placement takes a while, so the window between
    /// deciding to trade and the order reaching the book is wide enough
    /// for a second caller to race into.
    struct SlowOrderBroker {
        inner: Arc<ScriptedBroker>,
        delay: Duration,
    }

    #[async_trait]
    impl BrokerPort for SlowOrderBroker {
        async fn place_order(
            &self,
            security_id: &str,
            side: OrderSide,
            qty: i64,
            index_name: &str,
        ) -> Result<OrderAck, BrokerError> {
            tokio::time::sleep(self.delay).await;
            self.inner
                .place_order(security_id, side, qty, index_name)
                .await
        }

        async fn poll_order(&self, order_id: &str) -> Result<Option<OrderPoll>, BrokerError> {
            self.inner.poll_order(order_id).await
        }

        async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
            self.inner.get_positions().await
        }

        async fn nearest_expiry(&self, index_name: &str) -> Result<String, BrokerError> {
            self.inner.nearest_expiry(index_name).await
        }

        async fn resolve_option(
            &self,
            index_name: &str,
            strike: i64,
            side: OptionSide,
            expiry: &str,
        ) -> Result<String, BrokerError> {
            self.inner
                .resolve_option(index_name, strike, side, expiry)
                .await
        }

        async fn get_option_price(&self, security_id: &str) -> Result<f64, BrokerError> {
            self.inner.get_option_price(security_id).await
        }

        async fn get_index_price(&self, index_name: &str) -> Result<f64, BrokerError> {
            self.inner.get_index_price(index_name).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_exits_place_single_sell() {
        let settings = Settings::new(config("live"));
        let scripted = Arc::new(ScriptedBroker::new());
        let broker = Arc::new(SlowOrderBroker {
            inner: scripted.clone(),
            delay: Duration::from_millis(50),
        });
        let store = Arc::new(MemoryTradeStore::new());
        let feed = Arc::new(ScriptedFeed::new(vec![], vec![]));
        let engine = Arc::new(
            Engine::new(
                settings,
                broker as Arc<dyn BrokerPort>,
                feed as Arc<dyn MarketDataPort>,
                store as Arc<dyn TradeStore>,
            )
            .unwrap(),
        );

        engine.start().await.unwrap();
        scripted.script_statuses(&["TRADED"], 65, 100.0);
        assert!(engine.enter_position(OptionSide::Ce).await);

        scripted.set_option_price(120.0);
        scripted.script_statuses(&["TRADED"], 65, 120.0);

        // The 1s monitor and the bar loop can both reach the exit path
        // while the sell is still in flight; only the first may sell.
        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.close_position("Target Hit").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.close_position("Target Hit").await })
        };

        assert!(first.await.unwrap());
        assert!(!second.await.unwrap());

        let sells = scripted
            .placed_orders()
            .into_iter()
            .filter(|o| o.side == OrderSide::Sell)
            .count();
        assert_eq!(sells, 1);
        let status = engine.status().await;
        assert!((status.daily_pnl - 20.0 * 65.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_repeated_order_failures_reach_error_phase() {
        let h = harness(config("live"));
        h.engine.start().await.unwrap();

        for attempt in 0..3 {
            h.broker.push_poll(Some(OrderPoll {
                status: "REJECTED".to_string(),
                filled_qty: 0,
                average_price: 0.0,
                rejection_reason: Some("Insufficient margin".to_string()),
            }));
            assert!(
                !h.engine.enter_position(OptionSide::Ce).await,
                "attempt {attempt} must not fill"
            );
        }

        // Three straight broker failures park the engine until an
        // operator steps in; further entries are refused.
        assert_eq!(h.engine.status().await.phase, "ERROR");
        assert!(!h.engine.enter_position(OptionSide::Ce).await);
    }

    #[tokio::test]
    async fn test_squareoff_closes_open_position() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();
        assert!(h.engine.enter_position(OptionSide::Pe).await);

        h.engine.squareoff("Force Square-off").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let exits = h.store.exits();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].3, "Force Square-off");
        assert_eq!(h.engine.status().await.phase, "SCANNING");
    }

    #[tokio::test]
    async fn test_squareoff_without_position_is_noop() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();
        h.engine.squareoff("Force Square-off").await;
        assert_eq!(h.engine.status().await.phase, "SCANNING");
        assert!(h.store.exits().is_empty());
    }

    #[tokio::test]
    async fn test_live_start_adopts_broker_position() {
        let h = harness(config("live"));
        h.broker.set_positions(vec![BrokerPosition {
            security_id: "SEC9".to_string(),
            trading_symbol: "NIFTY25SEP24500CE".to_string(),
            net_qty: 65,
            avg_cost_price: 101.5,
            product_type: "INTRADAY".to_string(),
        }]);

        h.engine.start().await.unwrap();
        let status = h.engine.status().await;
        assert_eq!(status.phase, "IN_POSITION");

        // Adopted position flows through the normal risk exits.
        h.broker.set_option_price(130.0);
        h.engine.check_risk_exits().await;
        assert_eq!(h.engine.status().await.phase, "SCANNING");
    }

    #[tokio::test]
    async fn test_bar_without_ready_score_does_nothing() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();

        h.engine.on_bar_closed(bar(24500.0)).await;

        let status = h.engine.status().await;
        assert_eq!(status.phase, "SCANNING");
        assert_eq!(status.last_score, Some(0.0));
        assert!(h.broker.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_min_hold_suppresses_signal_exits() {
        let h = harness(config("paper"));
        h.engine.start().await.unwrap();
        assert!(h.engine.enter_position(OptionSide::Ce).await);

        // Fresh position: a closed bar must not trigger a signal exit.
        h.engine.on_bar_closed(bar(24500.0)).await;
        assert_eq!(h.engine.status().await.phase, "IN_POSITION");
    }

    #[tokio::test]
    async fn test_stalled_feed_streak() {
        let h = harness(config("paper"));
        for _ in 0..12 {
            h.engine.on_index_tick(24500.0, Utc::now()).await;
        }
        let st = h.engine.state.lock().await;
        assert!(st.ltp_streak >= STALLED_TICK_STREAK);
    }

    #[test]
    fn test_htf_flip_needs_two_consecutive_bars() {
        let mut count = 0;
        assert!(!htf_flip_exit(&mut count, OptionSide::Ce, -1.5));
        assert!(htf_flip_exit(&mut count, OptionSide::Ce, -2.0));

        // Alignment in between resets the streak.
        let mut count = 0;
        assert!(!htf_flip_exit(&mut count, OptionSide::Ce, -1.5));
        assert!(!htf_flip_exit(&mut count, OptionSide::Ce, 0.5));
        assert!(!htf_flip_exit(&mut count, OptionSide::Ce, -1.5));

        // PE mirrors the sign.
        let mut count = 0;
        assert!(!htf_flip_exit(&mut count, OptionSide::Pe, 1.5));
        assert!(htf_flip_exit(&mut count, OptionSide::Pe, 1.5));

        // Exactly at the threshold does not count.
        let mut count = 0;
        assert!(!htf_flip_exit(&mut count, OptionSide::Ce, -1.0));
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_entry_blocked_ordering() {
        let cfg = config("paper");
        let h = harness(cfg.clone());
        h.engine.start().await.unwrap();

        let now = Utc::now();
        {
            let mut st = h.engine.state.lock().await;
            st.last_order_time = Some(now);
            st.daily_loss_hit = true;
            // Cooldown outranks the daily stop.
            assert_eq!(entry_blocked(&st, &cfg, now), Some("order_cooldown"));
            st.last_order_time = None;
            assert_eq!(entry_blocked(&st, &cfg, now), Some("daily_loss_stop"));
            st.daily_loss_hit = false;
            st.daily_trades = 5;
            assert_eq!(entry_blocked(&st, &cfg, now), Some("daily_trade_cap"));
            st.daily_trades = 0;
            st.last_exit_time = Some(now);
            assert_eq!(entry_blocked(&st, &cfg, now), Some("post_exit_cooldown"));
            st.last_exit_time = None;
            assert_eq!(entry_blocked(&st, &cfg, now), None);
        }
    }

    #[tokio::test]
    async fn test_daily_reset_clears_counters() {
        let h = harness(config("paper"));
        {
            let mut st = h.engine.state.lock().await;
            st.daily_trades = 3;
            st.daily_pnl = -500.0;
            st.daily_loss_hit = true;
            // 10:00 IST is past the reset time.
            let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 8, 27, 4, 30, 0).unwrap();
            maybe_daily_reset(&mut st, now);
            assert_eq!(st.daily_trades, 0);
            assert_eq!(st.daily_pnl, 0.0);
            assert!(!st.daily_loss_hit);
            assert!(st.last_reset_date.is_some());

            // Same session: no second reset.
            st.daily_trades = 2;
            maybe_daily_reset(&mut st, now);
            assert_eq!(st.daily_trades, 2);
        }
    }

    #[tokio::test]
    async fn test_daily_reset_reseeds_indicators() {
        let h = harness(config("paper"));
        let mut st = h.engine.state.lock().await;

        let mut snap = None;
        for i in 0..240 {
            let close = 24000.0 + i as f64 * 5.0;
            snap = Some(st.score.on_base_candle(Candle {
                high: close + 3.0,
                low: close - 3.0,
                close,
            }));
        }
        assert!(snap.unwrap().ready, "both timeframes should be warm");

        // First event of a new session date, past 09:15 IST.
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 8, 27, 4, 30, 0).unwrap();
        maybe_daily_reset(&mut st, now);

        // Yesterday's indicator state is gone: one candle cannot re-arm.
        let snap = st.score.on_base_candle(Candle {
            high: 25203.0,
            low: 25197.0,
            close: 25200.0,
        });
        assert!(!snap.ready);
        assert!(snap.tf_scores.is_empty() || snap.score == 0.0);
    }

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(100.02), 100.0);
        assert_eq!(round_to_tick(100.03), 100.05);
        assert_eq!(round_to_tick(99.97), 99.95);
        assert_eq!(round_to_tick(0.0), 0.0);
    }
}
