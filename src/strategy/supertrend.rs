use std::collections::VecDeque;

use crate::strategy::Signal;

// Indicator buffers are bounded; anything older has no effect on Wilder
// smoothing at practical precision.
const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Candle {
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Debug, Clone, Copy)]
struct Band {
    upper: f64,
    lower: f64,
    direction: i8,
}

/// SuperTrend over ATR with Wilder smoothing. The initial ATR is a simple
/// average of true ranges; afterwards `atr = (prev*(n-1) + tr) / n`.
#[derive(Debug, Clone)]
pub struct SuperTrend {
    period: usize,
    multiplier: f64,
    candles: VecDeque<Candle>,
    last_atr: Option<f64>,
    last_band: Option<Band>,
}

impl SuperTrend {
    pub fn new(period: usize, multiplier: f64) -> SuperTrend {
        SuperTrend {
            period,
            multiplier,
            candles: VecDeque::with_capacity(MAX_HISTORY + 1),
            last_atr: None,
            last_band: None,
        }
    }

    pub fn reset(&mut self) {
        self.candles.clear();
        self.last_atr = None;
        self.last_band = None;
    }

    /// Warm once `period` candles have been seen.
    pub fn is_ready(&self) -> bool {
        self.candles.len() >= self.period
    }

    fn true_range(&self, idx: usize) -> f64 {
        let cur = self.candles[idx];
        if idx == 0 {
            return cur.high - cur.low;
        }
        let prev_close = self.candles[idx - 1].close;
        (cur.high - cur.low)
            .max((cur.high - prev_close).abs())
            .max((cur.low - prev_close).abs())
    }

    /// Feed a closed candle. Returns `(supertrend_value, signal)` once warm,
    /// None while still seeding.
    pub fn add_candle(&mut self, high: f64, low: f64, close: f64) -> Option<(f64, Signal)> {
        self.candles.push_back(Candle { high, low, close });
        if self.candles.len() < self.period {
            return None;
        }

        let n = self.candles.len();
        let atr = match self.last_atr {
            None => {
                let start = n.saturating_sub(self.period);
                let trs: Vec<f64> = (start..n).map(|i| self.true_range(i)).collect();
                if trs.is_empty() {
                    0.0
                } else {
                    trs.iter().sum::<f64>() / trs.len() as f64
                }
            }
            Some(prev_atr) => {
                let tr = self.true_range(n - 1);
                (prev_atr * (self.period as f64 - 1.0) + tr) / self.period as f64
            }
        };
        self.last_atr = Some(atr);

        let hl2 = (high + low) / 2.0;
        let basic_upper = hl2 + self.multiplier * atr;
        let basic_lower = hl2 - self.multiplier * atr;

        let (final_upper, final_lower, direction) = match self.last_band {
            None => {
                let dir = if close > basic_upper { 1 } else { -1 };
                (basic_upper, basic_lower, dir)
            }
            Some(prev) => {
                let prev_close = self.candles[n - 2].close;
                let lower = if basic_lower > prev.lower || prev_close < prev.lower {
                    basic_lower
                } else {
                    prev.lower
                };
                let upper = if basic_upper < prev.upper || prev_close > prev.upper {
                    basic_upper
                } else {
                    prev.upper
                };
                let dir = if prev.direction == 1 {
                    if close < lower {
                        -1
                    } else {
                        1
                    }
                } else if close > upper {
                    1
                } else {
                    -1
                };
                (upper, lower, dir)
            }
        };

        self.last_band = Some(Band {
            upper: final_upper,
            lower: final_lower,
            direction,
        });

        while self.candles.len() > MAX_HISTORY {
            self.candles.pop_front();
        }

        let value = if direction == 1 {
            final_lower
        } else {
            final_upper
        };
        let signal = if direction == 1 {
            Signal::Green
        } else {
            Signal::Red
        };
        Some((value, signal))
    }
}
