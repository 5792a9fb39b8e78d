//! Deterministic multi-timeframe direction scoring.
//!
//! The engine consumes closed base-timeframe candles, aggregates them to the
//! next timeframe in the chain, and scores MACD line, MACD histogram and
//! SuperTrend per timeframe. The weighted total is EWMA-smoothed and tracked
//! for slope, acceleration, stability and chop before being folded into a
//! confidence value. Everything is loggable and replayable.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use thiserror::Error;

use crate::domain::position::OptionSide;
use crate::strategy::macd::Macd;
use crate::strategy::supertrend::SuperTrend;
use crate::strategy::Signal;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Unsupported base timeframe: {0}s")]
    UnsupportedTimeframe(u32),
}

/// Closed candle on some timeframe. Open is irrelevant to the scoring.
#[derive(Debug, Clone, Copy)]
pub struct Candle {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Per-timeframe indicator state. Cloneable so the engine can score a
/// partially aggregated higher-timeframe candle on a throwaway copy without
/// disturbing the live indicators.
#[derive(Debug, Clone)]
struct TfState {
    supertrend: SuperTrend,
    macd: Macd,
    prev_macd: Option<f64>,
    prev_hist: Option<f64>,
    prev_st_dir: Option<i8>,
    st_flip_history: VecDeque<u8>,
}

impl TfState {
    fn new(st_period: usize, st_multiplier: f64, fast: usize, slow: usize, signal: usize) -> Self {
        TfState {
            supertrend: SuperTrend::new(st_period, st_multiplier),
            macd: Macd::new(fast, slow, signal),
            prev_macd: None,
            prev_hist: None,
            prev_st_dir: None,
            st_flip_history: VecDeque::with_capacity(FLIP_WINDOW),
        }
    }

    fn reset(&mut self) {
        self.supertrend.reset();
        self.macd.reset();
        self.prev_macd = None;
        self.prev_hist = None;
        self.prev_st_dir = None;
        self.st_flip_history.clear();
    }

    fn is_ready(&self) -> bool {
        self.supertrend.is_ready() && self.macd.is_ready()
    }
}

/// Score breakdown for one timeframe.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TfScore {
    pub timeframe_seconds: u32,
    pub macd_score: f64,
    pub hist_score: f64,
    pub st_score: f64,
    pub bonus_score: f64,
    pub raw_score: f64,
    pub weighted_score: f64,
    /// 1 bullish, -1 bearish, 0 unknown.
    pub st_direction: i8,
}

impl TfScore {
    fn neutral(tf: u32) -> TfScore {
        TfScore {
            timeframe_seconds: tf,
            macd_score: 0.0,
            hist_score: 0.0,
            st_score: 0.0,
            bonus_score: 0.0,
            raw_score: 0.0,
            weighted_score: 0.0,
            st_direction: 0,
        }
    }
}

/// Output of one scoring pass. Values are rounded to 3 decimals so logs and
/// replays compare exactly.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreSnapshot {
    pub score: f64,
    pub slope: f64,
    pub acceleration: f64,
    pub stability: f64,
    pub confidence: f64,
    pub is_choppy: bool,
    pub direction: Option<OptionSide>,
    pub tf_scores: BTreeMap<u32, TfScore>,
    pub ready: bool,
    pub ready_timeframes: Vec<u32>,
}

impl ScoreSnapshot {
    fn not_ready() -> ScoreSnapshot {
        ScoreSnapshot {
            score: 0.0,
            slope: 0.0,
            acceleration: 0.0,
            stability: 0.0,
            confidence: 0.0,
            is_choppy: false,
            direction: None,
            tf_scores: BTreeMap::new(),
            ready: false,
            ready_timeframes: Vec::new(),
        }
    }
}

/// Tuning knobs. Defaults mirror the production profile.
#[derive(Debug, Clone)]
pub struct ScoreParams {
    pub st_period: usize,
    pub st_multiplier: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub base_timeframe_seconds: u32,
    pub bonus_macd_triple: f64,
    pub bonus_macd_momentum: f64,
    pub bonus_macd_cross: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        ScoreParams {
            st_period: 7,
            st_multiplier: 4.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            base_timeframe_seconds: 5,
            bonus_macd_triple: 1.0,
            bonus_macd_momentum: 0.5,
            bonus_macd_cross: 0.5,
        }
    }
}

const TF_CHAIN: [u32; 6] = [5, 15, 30, 60, 300, 900];
const FLIP_WINDOW: usize = 6;

// Normalized indicator thresholds (fractions of close).
const NORM_EPS: f64 = 1e-12;
const MACD_FLAT_DIFF_NORM: f64 = 2e-6;
const HIST_NEAR_ZERO_NORM: f64 = 2e-6;
const HIST_EXPAND_THRESH_NORM: f64 = 4e-6;

// EWMA smoothing of the total score, alpha in (0,1].
const SCORE_SMOOTHING_ALPHA: f64 = 0.4;

const BASE_TF_WEIGHT: f64 = 1.0;
const NEXT_TF_WEIGHT: f64 = 3.0;

#[derive(Debug, Clone, Copy)]
struct Bonuses {
    triple: f64,
    momentum: f64,
    cross: f64,
}

#[derive(Debug, Clone, Default)]
struct PartialAgg {
    count: u32,
    high: f64,
    low: f64,
    close: f64,
}

pub struct ScoreEngine {
    base_tf: u32,
    next_tf: u32,
    bonuses: Bonuses,
    max_tf_raw: f64,
    neutral_band: f64,
    chop_window: usize,
    history_cap: usize,
    base_state: TfState,
    next_state: TfState,
    agg_partial: Option<PartialAgg>,
    score_history: VecDeque<f64>,
    slope_history: VecDeque<f64>,
    score_ewma: Option<f64>,
    last_scores: BTreeMap<u32, TfScore>,
}

impl ScoreEngine {
    pub fn new(params: &ScoreParams) -> Result<ScoreEngine, ScoreError> {
        let base_tf = params.base_timeframe_seconds;
        let next_tf = next_in_chain(base_tf).ok_or(ScoreError::UnsupportedTimeframe(base_tf))?;

        let bonuses = Bonuses {
            triple: params.bonus_macd_triple,
            momentum: params.bonus_macd_momentum,
            cross: params.bonus_macd_cross,
        };

        // Base per-timeframe raw max is 6.0 (2 MACD + 2 HIST + 2 ST); positive
        // bonus headroom keeps the neutral band and chop scaling consistent.
        let max_tf_raw =
            6.0 + bonuses.triple.max(0.0) + bonuses.momentum.max(0.0) + bonuses.cross.max(0.0);
        let max_possible = max_tf_raw * (BASE_TF_WEIGHT + NEXT_TF_WEIGHT);
        let neutral_band = round2(0.30 * max_possible).max(4.0);

        // ~2 minutes worth of base candles, never fewer than 8.
        let chop_window = ((120.0 / base_tf.max(1) as f64).round() as usize).max(8);
        let history_cap = (chop_window * 5).max(60);

        let mk_state = || {
            TfState::new(
                params.st_period,
                params.st_multiplier,
                params.macd_fast,
                params.macd_slow,
                params.macd_signal,
            )
        };

        let mut last_scores = BTreeMap::new();
        last_scores.insert(base_tf, TfScore::neutral(base_tf));
        last_scores.insert(next_tf, TfScore::neutral(next_tf));

        Ok(ScoreEngine {
            base_tf,
            next_tf,
            bonuses,
            max_tf_raw,
            neutral_band,
            chop_window,
            history_cap,
            base_state: mk_state(),
            next_state: mk_state(),
            agg_partial: None,
            score_history: VecDeque::with_capacity(history_cap),
            slope_history: VecDeque::with_capacity(history_cap),
            score_ewma: None,
            last_scores,
        })
    }

    pub fn base_timeframe(&self) -> u32 {
        self.base_tf
    }

    pub fn next_timeframe(&self) -> u32 {
        self.next_tf
    }

    pub fn neutral_band(&self) -> f64 {
        self.neutral_band
    }

    pub fn reset(&mut self) {
        self.base_state.reset();
        self.next_state.reset();
        self.agg_partial = None;
        self.score_history.clear();
        self.slope_history.clear();
        self.score_ewma = None;
        self.last_scores
            .insert(self.base_tf, TfScore::neutral(self.base_tf));
        self.last_scores
            .insert(self.next_tf, TfScore::neutral(self.next_tf));
    }

    /// Consume a closed base-timeframe candle and produce the latest snapshot.
    pub fn on_base_candle(&mut self, candle: Candle) -> ScoreSnapshot {
        if candle.close <= 0.0 {
            return ScoreSnapshot::not_ready();
        }

        let mut fresh: BTreeMap<u32, TfScore> = BTreeMap::new();

        let base_score = compute_tf_score(
            &mut self.base_state,
            self.base_tf,
            BASE_TF_WEIGHT,
            candle,
            self.bonuses,
        );
        self.last_scores.insert(self.base_tf, base_score);
        fresh.insert(self.base_tf, base_score);

        match self.aggregate(candle) {
            Some(completed) => {
                let next_score = compute_tf_score(
                    &mut self.next_state,
                    self.next_tf,
                    NEXT_TF_WEIGHT,
                    completed,
                    self.bonuses,
                );
                // Real completion: the higher-TF contribution is persisted.
                self.last_scores.insert(self.next_tf, next_score);
                fresh.insert(self.next_tf, next_score);
            }
            None => {
                // Peek: score the partial higher-TF candle on a cloned state
                // so the live indicators stay untouched until completion.
                if let Some(partial) = self.agg_partial.clone() {
                    if partial.count > 0 {
                        let mut peek = self.next_state.clone();
                        let peek_candle = Candle {
                            high: partial.high,
                            low: partial.low,
                            close: partial.close,
                        };
                        let next_score = compute_tf_score(
                            &mut peek,
                            self.next_tf,
                            NEXT_TF_WEIGHT,
                            peek_candle,
                            self.bonuses,
                        );
                        fresh.insert(self.next_tf, next_score);
                    }
                }
            }
        }

        let total_score: f64 = [self.base_tf, self.next_tf]
            .iter()
            .map(|tf| {
                fresh
                    .get(tf)
                    .or_else(|| self.last_scores.get(tf))
                    .map(|s| s.weighted_score)
                    .unwrap_or(0.0)
            })
            .sum();

        let smoothed = match self.score_ewma {
            None => total_score,
            Some(prev) => SCORE_SMOOTHING_ALPHA * total_score + (1.0 - SCORE_SMOOTHING_ALPHA) * prev,
        };
        self.score_ewma = Some(smoothed);

        let slope = match self.score_history.back() {
            None => 0.0,
            Some(prev) => smoothed - prev,
        };
        let acceleration = match self.slope_history.back() {
            None => 0.0,
            Some(prev) => slope - prev,
        };

        push_capped(&mut self.score_history, smoothed, self.history_cap);
        push_capped(&mut self.slope_history, slope, self.history_cap);

        let stability = if self.score_history.len() >= 5 {
            let window = self.tail_window();
            stddev(&window)
        } else {
            0.0
        };

        let is_choppy = self.detect_chop();
        let confidence = self.confidence(smoothed, slope, stability, &fresh, is_choppy);
        let direction = self.direction(smoothed);

        let mut ready_timeframes = Vec::new();
        if self.base_state.is_ready() {
            ready_timeframes.push(self.base_tf);
        }
        if self.next_state.is_ready() {
            ready_timeframes.push(self.next_tf);
        }
        let ready = ready_timeframes.len() == 2;

        // The snapshot exposes the last persisted per-TF scores; peeked
        // partial scores feed the total only.
        let tf_scores = self.last_scores.clone();

        ScoreSnapshot {
            score: round3(smoothed),
            slope: round3(slope),
            acceleration: round3(acceleration),
            stability: round3(stability),
            confidence: round3(confidence),
            is_choppy,
            direction,
            tf_scores,
            ready,
            ready_timeframes,
        }
    }

    fn aggregate(&mut self, candle: Candle) -> Option<Candle> {
        let multiple = self.next_tf / self.base_tf;

        let state = self.agg_partial.get_or_insert_with(|| PartialAgg {
            count: 0,
            high: candle.high,
            low: candle.low,
            close: candle.close,
        });
        state.count += 1;
        state.high = state.high.max(candle.high);
        state.low = state.low.min(candle.low);
        state.close = candle.close;

        if state.count >= multiple {
            let completed = Candle {
                high: state.high,
                low: state.low,
                close: state.close,
            };
            self.agg_partial = None;
            Some(completed)
        } else {
            None
        }
    }

    fn tail_window(&self) -> Vec<f64> {
        let skip = self.score_history.len().saturating_sub(self.chop_window);
        self.score_history.iter().skip(skip).copied().collect()
    }

    fn detect_chop(&self) -> bool {
        let window = self.tail_window();
        if window.len() < 8 {
            return false;
        }

        let mut flips = 0u32;
        let mut prev_sign = 0i8;
        for &s in &window {
            let sign: i8 = if s > 0.0 {
                1
            } else if s < 0.0 {
                -1
            } else {
                0
            };
            if prev_sign != 0 && sign != 0 && sign != prev_sign {
                flips += 1;
            }
            if sign != 0 {
                prev_sign = sign;
            }
        }

        let stability = stddev(&window);
        let mean_abs = window.iter().map(|s| s.abs()).sum::<f64>() / window.len() as f64;

        // Thresholds scale with score range; the legacy tuning assumed a ~45
        // maximum score.
        let max_possible = self.max_tf_raw * (BASE_TF_WEIGHT + NEXT_TF_WEIGHT);
        let scale = (max_possible / 45.0).clamp(0.35, 1.0);

        if flips >= 4 {
            return true;
        }
        if stability >= 7.5 * scale && mean_abs <= 12.0 * scale {
            return true;
        }
        if mean_abs <= 7.0 * scale && stability >= 3.5 * scale {
            return true;
        }
        false
    }

    fn confidence(
        &self,
        score: f64,
        slope: f64,
        stability: f64,
        fresh: &BTreeMap<u32, TfScore>,
        is_choppy: bool,
    ) -> f64 {
        if is_choppy {
            return 0.0;
        }

        let max_possible = 6.0 * (BASE_TF_WEIGHT + NEXT_TF_WEIGHT);
        let mag = (score.abs() / (0.70 * max_possible).max(1.0)).min(1.0);
        let slp = (slope.abs() / 8.0).min(1.0);

        let sign_total: i8 = if score > 0.0 {
            1
        } else if score < 0.0 {
            -1
        } else {
            0
        };
        let mut total_w = 0.0;
        let mut aligned_w = 0.0;
        for (tf, weight) in [(self.base_tf, BASE_TF_WEIGHT), (self.next_tf, NEXT_TF_WEIGHT)] {
            total_w += weight;
            let sc = fresh
                .get(&tf)
                .or_else(|| self.last_scores.get(&tf))
                .map(|s| s.weighted_score)
                .unwrap_or(0.0);
            let sign_tf: i8 = if sc > 0.0 {
                1
            } else if sc < 0.0 {
                -1
            } else {
                0
            };
            if sign_total != 0 && sign_tf == sign_total {
                aligned_w += weight;
            }
        }
        let alignment = if total_w <= 0.0 { 0.0 } else { aligned_w / total_w };

        let stability_score = 1.0 - (stability / 10.0).min(1.0);

        (0.35 * mag + 0.25 * slp + 0.25 * alignment + 0.15 * stability_score).clamp(0.0, 1.0)
    }

    fn direction(&self, score: f64) -> Option<OptionSide> {
        if score >= self.neutral_band {
            Some(OptionSide::Ce)
        } else if score <= -self.neutral_band {
            Some(OptionSide::Pe)
        } else {
            None
        }
    }
}

/// Score one timeframe off its indicator state. Mutates `state`; persistence
/// into the engine's per-TF map is the caller's choice, which is what makes
/// the non-committing peek possible.
fn compute_tf_score(
    state: &mut TfState,
    tf: u32,
    weight: f64,
    candle: Candle,
    bonuses: Bonuses,
) -> TfScore {
    let close = candle.close;
    let norm = close.abs().max(NORM_EPS);

    let st_out = state.supertrend.add_candle(candle.high, candle.low, close);
    state.macd.add_candle(close);

    let st_dir: i8 = match st_out {
        Some((_, Signal::Green)) => 1,
        Some((_, Signal::Red)) => -1,
        None => 0,
    };

    let flipped = st_dir != 0
        && state
            .prev_st_dir
            .map(|prev| st_dir != prev)
            .unwrap_or(false);

    if state.st_flip_history.len() == FLIP_WINDOW {
        state.st_flip_history.pop_front();
    }
    state.st_flip_history.push_back(u8::from(flipped));
    let flip_count: u32 = state.st_flip_history.iter().map(|&f| f as u32).sum();

    let st_score = if st_dir == 0 || flip_count >= 2 {
        0.0
    } else if flipped {
        1.0 * st_dir as f64
    } else {
        2.0 * st_dir as f64
    };

    if st_dir != 0 {
        state.prev_st_dir = Some(st_dir);
    }

    // MACD line score.
    let mut macd_score = 0.0;
    let macd = state.macd.last_macd();
    if let Some(macd) = macd {
        let diff = state.prev_macd.map(|prev| macd - prev).unwrap_or(0.0);
        let diff_norm = diff / norm;
        let rising = diff_norm > MACD_FLAT_DIFF_NORM;
        let falling = diff_norm < -MACD_FLAT_DIFF_NORM;

        if diff_norm.abs() > MACD_FLAT_DIFF_NORM {
            macd_score = if macd > 0.0 && rising {
                2.0
            } else if macd > 0.0 && falling {
                1.0
            } else if macd < 0.0 && falling {
                -2.0
            } else if macd < 0.0 && rising {
                -1.0
            } else {
                0.0
            };
        }
        state.prev_macd = Some(macd);
    }

    // Histogram score.
    let mut hist_score = 0.0;
    let hist = state.macd.last_histogram();
    if let Some(hist) = hist {
        let diffh = state.prev_hist.map(|prev| hist - prev).unwrap_or(0.0);
        let hist_norm = hist / norm;
        let diff_norm = diffh / norm;

        if hist_norm.abs() > HIST_NEAR_ZERO_NORM {
            let expanding = diff_norm > HIST_EXPAND_THRESH_NORM;
            let contracting = diff_norm < -HIST_EXPAND_THRESH_NORM;

            hist_score = if hist > 0.0 && expanding {
                2.0
            } else if hist > 0.0 && contracting {
                1.0
            } else if hist < 0.0 && contracting {
                -2.0
            } else if hist < 0.0 && expanding {
                -1.0
            } else {
                0.0
            };
        }
        state.prev_hist = Some(hist);
    }

    let mut bonus = 0.0;

    // Triple alignment: MACD line, signal line and histogram all clear of
    // zero on the same side.
    if let (Some(macd), Some(signal_line), Some(hist)) =
        (macd, state.macd.last_signal_line(), hist)
    {
        let macd_ok = (macd / norm).abs() > MACD_FLAT_DIFF_NORM;
        let sig_ok = (signal_line / norm).abs() > MACD_FLAT_DIFF_NORM;
        let hist_ok = (hist / norm).abs() > HIST_NEAR_ZERO_NORM;

        if macd_ok && sig_ok && hist_ok {
            if macd > 0.0 && signal_line > 0.0 && hist > 0.0 {
                bonus += bonuses.triple;
            } else if macd < 0.0 && signal_line < 0.0 && hist < 0.0 {
                bonus -= bonuses.triple;
            }
        }
    }

    // Momentum kicker when line and histogram both score full marks.
    if macd_score >= 2.0 && hist_score >= 2.0 {
        bonus += bonuses.momentum;
    } else if macd_score <= -2.0 && hist_score <= -2.0 {
        bonus -= bonuses.momentum;
    }

    // Cross bonus on the candle where MACD crosses its signal line.
    match state.macd.last_cross() {
        Some(Signal::Green) => bonus += bonuses.cross,
        Some(Signal::Red) => bonus -= bonuses.cross,
        None => {}
    }

    let raw = macd_score + hist_score + st_score + bonus;

    TfScore {
        timeframe_seconds: tf,
        macd_score,
        hist_score,
        st_score,
        bonus_score: bonus,
        raw_score: raw,
        weighted_score: raw * weight,
        st_direction: st_dir,
    }
}

fn push_capped(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

fn stddev(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

fn next_in_chain(tf: u32) -> Option<u32> {
    let idx = TF_CHAIN.iter().position(|&t| t == tf)?;
    TF_CHAIN.get(idx + 1).copied()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
