use crate::strategy::Signal;

/// Incremental EMA with SMA seeding: returns None until `period` samples
/// have arrived, seeds with their simple average, then updates with
/// `alpha = 2 / (period + 1)`.
#[derive(Debug, Clone)]
struct Ema {
    period: usize,
    value: Option<f64>,
    seed: Vec<f64>,
}

impl Ema {
    fn new(period: usize) -> Ema {
        Ema {
            period,
            value: None,
            seed: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.value = None;
        self.seed.clear();
    }

    fn update(&mut self, sample: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        match self.value {
            Some(ema) => {
                let alpha = 2.0 / (self.period as f64 + 1.0);
                let next = sample * alpha + ema * (1.0 - alpha);
                self.value = Some(next);
                Some(next)
            }
            None => {
                self.seed.push(sample);
                if self.seed.len() < self.period {
                    return None;
                }
                let sma = self.seed.iter().rev().take(self.period).sum::<f64>()
                    / self.period as f64;
                self.value = Some(sma);
                Some(sma)
            }
        }
    }
}

/// MACD (fast EMA - slow EMA) with a signal-line EMA over the MACD series.
/// A cross fires on the candle where the macd/signal relation changes.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    last_macd: Option<f64>,
    last_signal_line: Option<f64>,
    last_histogram: Option<f64>,
    last_cross: Option<Signal>,
    last_relation: Option<i8>,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Macd {
        Macd {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            last_macd: None,
            last_signal_line: None,
            last_histogram: None,
            last_cross: None,
            last_relation: None,
        }
    }

    pub fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
        self.last_macd = None;
        self.last_signal_line = None;
        self.last_histogram = None;
        self.last_cross = None;
        self.last_relation = None;
    }

    pub fn last_macd(&self) -> Option<f64> {
        self.last_macd
    }

    pub fn last_signal_line(&self) -> Option<f64> {
        self.last_signal_line
    }

    pub fn last_histogram(&self) -> Option<f64> {
        self.last_histogram
    }

    pub fn last_cross(&self) -> Option<Signal> {
        self.last_cross
    }

    /// Ready once both the MACD line and histogram exist.
    pub fn is_ready(&self) -> bool {
        self.last_macd.is_some() && self.last_histogram.is_some()
    }

    /// Feed a closed candle. Returns `(macd_line, cross)` once the fast and
    /// slow EMAs are seeded.
    pub fn add_candle(&mut self, close: f64) -> Option<(f64, Option<Signal>)> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);

        let (fast, slow) = match (fast, slow) {
            (Some(f), Some(s)) => (f, s),
            _ => {
                self.last_macd = None;
                self.last_signal_line = None;
                self.last_histogram = None;
                self.last_cross = None;
                return None;
            }
        };

        let macd = fast - slow;
        let signal_line = self.signal.update(macd);

        let mut cross = None;
        let mut histogram = None;
        if let Some(sig) = signal_line {
            histogram = Some(macd - sig);
            let relation: i8 = if macd >= sig { 1 } else { -1 };
            if let Some(prev) = self.last_relation {
                if relation != prev {
                    cross = Some(if relation == 1 {
                        Signal::Green
                    } else {
                        Signal::Red
                    });
                }
            }
            self.last_relation = Some(relation);
        }

        self.last_macd = Some(macd);
        self.last_signal_line = signal_line;
        self.last_histogram = histogram;
        self.last_cross = cross;

        Some((macd, cross))
    }
}
