use serde::{Deserialize, Serialize};

/// Step-lock trailing stop on premium points.
///
/// Inactive until the best profit seen reaches `trail_start`. From then on
/// the locked profit is `(trail_start - trail_step) + levels * trail_step`
/// where `levels = floor((highest - trail_start) / trail_step)`, clamped at
/// zero. The resulting stop price only ever moves up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStop {
    entry_price: f64,
    trail_start: f64,
    trail_step: f64,
    highest_profit: f64,
    stop_price: Option<f64>,
}

impl TrailingStop {
    pub fn new(entry_price: f64, trail_start: f64, trail_step: f64) -> TrailingStop {
        TrailingStop {
            entry_price,
            trail_start,
            trail_step,
            highest_profit: 0.0,
            stop_price: None,
        }
    }

    /// Seed the stop at `entry - initial_stoploss` so the protective stop is
    /// in place before the ladder arms. Ladder updates only ever raise it.
    pub fn with_initial_stop(
        entry_price: f64,
        initial_stoploss: f64,
        trail_start: f64,
        trail_step: f64,
    ) -> TrailingStop {
        let mut ts = TrailingStop::new(entry_price, trail_start, trail_step);
        if initial_stoploss > 0.0 {
            ts.stop_price = Some(entry_price - initial_stoploss);
        }
        ts
    }

    pub fn highest_profit(&self) -> f64 {
        self.highest_profit
    }

    /// Current trailing stop price, None while trailing has not armed.
    pub fn stop_price(&self) -> Option<f64> {
        self.stop_price
    }

    /// Feed a new option LTP. Returns the trailing stop after the update.
    pub fn update(&mut self, ltp: f64) -> Option<f64> {
        let profit = ltp - self.entry_price;
        if profit > self.highest_profit {
            self.highest_profit = profit;
        }

        if self.highest_profit >= self.trail_start && self.trail_step > 0.0 {
            let levels = ((self.highest_profit - self.trail_start) / self.trail_step).floor();
            let locked = ((self.trail_start - self.trail_step) + levels * self.trail_step).max(0.0);
            let candidate = self.entry_price + locked;
            match self.stop_price {
                Some(cur) if candidate <= cur => {}
                _ => self.stop_price = Some(candidate),
            }
        }
        self.stop_price
    }

    /// True once the LTP has fallen to or below the trailing stop.
    pub fn is_hit(&self, ltp: f64) -> bool {
        matches!(self.stop_price, Some(stop) if ltp <= stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_step_lock_ladder() {
        // Entry 100, arm at +10, lock in +5 steps.
        let mut ts = TrailingStop::new(100.0, 10.0, 5.0);
        let profits = [0.0, 3.0, 6.0, 11.0, 16.0, 20.0];
        let expected = [None, None, None, Some(105.0), Some(110.0), Some(115.0)];
        for (p, exp) in profits.iter().zip(expected.iter()) {
            let stop = ts.update(100.0 + p);
            match (stop, exp) {
                (None, None) => {}
                (Some(s), Some(e)) => assert_relative_eq!(s, *e, epsilon = 1e-9),
                other => panic!("unexpected stop at profit {}: {:?}", p, other),
            }
        }
    }

    #[test]
    fn test_stop_never_lowers() {
        let mut ts = TrailingStop::new(100.0, 10.0, 5.0);
        ts.update(120.0);
        assert_eq!(ts.stop_price(), Some(115.0));
        // Price falls back; stop holds.
        ts.update(104.0);
        assert_eq!(ts.stop_price(), Some(115.0));
        assert!(ts.is_hit(104.0));
    }

    #[test]
    fn test_arming_exactly_at_trail_start() {
        let mut ts = TrailingStop::new(200.0, 10.0, 5.0);
        assert_eq!(ts.update(209.9), None);
        // levels = 0, locked = trail_start - trail_step = 5
        assert_eq!(ts.update(210.0), Some(205.0));
    }

    #[test]
    fn test_locked_profit_never_negative() {
        // trail_step larger than trail_start would push the first lock
        // below entry; it clamps to breakeven instead.
        let mut ts = TrailingStop::new(100.0, 4.0, 10.0);
        assert_eq!(ts.update(105.0), Some(100.0));
    }

    #[test]
    fn test_initial_stop_seeds_below_entry_and_ratchets_up() {
        let mut ts = TrailingStop::with_initial_stop(100.0, 8.0, 10.0, 5.0);
        assert_eq!(ts.stop_price(), Some(92.0));
        assert!(ts.is_hit(92.0));
        // Ladder arming replaces the protective stop with a locked-profit one.
        ts.update(112.0);
        assert_eq!(ts.stop_price(), Some(105.0));
    }

    #[test]
    fn test_highest_profit_is_sticky() {
        let mut ts = TrailingStop::new(100.0, 10.0, 5.0);
        ts.update(108.0);
        ts.update(101.0);
        assert_relative_eq!(ts.highest_profit(), 8.0, epsilon = 1e-9);
    }
}
