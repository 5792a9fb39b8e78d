//! Entry and exit rules on top of the score snapshots.
//!
//! Pure threshold functions plus a small stateful runner that owns the
//! multi-candle confirmation ("arming") state. `slow_mom` is the higher
//! timeframe's macd + histogram score, used as a slow confirmation so one
//! fast tick cannot flip a decision on its own.

use std::collections::VecDeque;

use crate::domain::position::OptionSide;

/// Legacy vs tuned thresholds, switchable for A/B replay comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdProfile {
    Legacy,
    #[default]
    Tuned,
}

impl ThresholdProfile {
    fn entry_score_min(self) -> f64 {
        match self {
            ThresholdProfile::Legacy => 10.0,
            ThresholdProfile::Tuned => 12.0,
        }
    }

    fn entry_slope_min(self) -> f64 {
        match self {
            ThresholdProfile::Legacy => 1.0,
            ThresholdProfile::Tuned => 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub should_exit: bool,
    pub reason: &'static str,
}

impl ExitDecision {
    fn hold() -> ExitDecision {
        ExitDecision {
            should_exit: false,
            reason: "",
        }
    }

    fn exit(reason: &'static str) -> ExitDecision {
        ExitDecision {
            should_exit: true,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryDecision {
    pub should_enter: bool,
    pub option_type: Option<OptionSide>,
    pub reason: &'static str,
    pub confirm_count: u32,
    pub confirm_needed: u32,
}

impl EntryDecision {
    fn no(reason: &'static str, confirm_count: u32, confirm_needed: u32) -> EntryDecision {
        EntryDecision {
            should_enter: false,
            option_type: None,
            reason,
            confirm_count,
            confirm_needed,
        }
    }
}

/// Signal-based exits for an open position. The reversal/momentum branches
/// all require the slow momentum to confirm before firing.
pub fn decide_exit(
    profile: ThresholdProfile,
    side: OptionSide,
    score: f64,
    slope: f64,
    slow_mom: f64,
) -> ExitDecision {
    let neutral = score.abs() <= 6.0;

    match (side, profile) {
        (OptionSide::Ce, ThresholdProfile::Tuned) => {
            if score <= -12.0 {
                if slow_mom <= -1.5 {
                    return ExitDecision::exit("MDS Reversal (slow confirm)");
                }
            } else if neutral {
                if slow_mom.abs() <= 0.5 && slope <= 0.0 {
                    return ExitDecision::exit("MDS Neutral (slow confirm)");
                }
            } else if slope <= -2.5 && score < 12.0 && slow_mom <= -0.5 {
                return ExitDecision::exit("MDS Momentum Loss (slow confirm)");
            }
        }
        (OptionSide::Ce, ThresholdProfile::Legacy) => {
            if score <= -10.0 {
                if slow_mom <= -1.0 {
                    return ExitDecision::exit("MDS Reversal (slow confirm)");
                }
            } else if neutral {
                if slow_mom.abs() <= 1.0 && slope <= 0.0 {
                    return ExitDecision::exit("MDS Neutral (slow confirm)");
                }
            } else if slope <= -2.0 && score < 12.0 && slow_mom <= 0.0 {
                return ExitDecision::exit("MDS Momentum Loss (slow confirm)");
            }
        }
        (OptionSide::Pe, ThresholdProfile::Tuned) => {
            if score >= 12.0 {
                if slow_mom >= 1.5 {
                    return ExitDecision::exit("MDS Reversal (slow confirm)");
                }
            } else if neutral {
                if slow_mom.abs() <= 0.5 && slope >= 0.0 {
                    return ExitDecision::exit("MDS Neutral (slow confirm)");
                }
            } else if slope >= 2.5 && score > -12.0 && slow_mom >= 0.5 {
                return ExitDecision::exit("MDS Momentum Loss (slow confirm)");
            }
        }
        (OptionSide::Pe, ThresholdProfile::Legacy) => {
            if score >= 10.0 {
                if slow_mom >= 1.0 {
                    return ExitDecision::exit("MDS Reversal (slow confirm)");
                }
            } else if neutral {
                if slow_mom.abs() <= 1.0 && slope >= 0.0 {
                    return ExitDecision::exit("MDS Neutral (slow confirm)");
                }
            } else if slope >= 2.0 && score > -12.0 && slow_mom >= 0.0 {
                return ExitDecision::exit("MDS Momentum Loss (slow confirm)");
            }
        }
    }

    ExitDecision::hold()
}

/// Decision-only runner for the score strategy. Owns the confirmation
/// counter and a short raw-score history for the immediate-entry override.
#[derive(Debug, Default)]
pub struct MdsRunner {
    profile: ThresholdProfile,
    last_direction: Option<OptionSide>,
    confirm_count: u32,
    recent_scores: VecDeque<f64>,
}

const RECENT_SCORES: usize = 5;

impl MdsRunner {
    pub fn new(profile: ThresholdProfile) -> MdsRunner {
        MdsRunner {
            profile,
            ..MdsRunner::default()
        }
    }

    pub fn reset(&mut self) {
        self.last_direction = None;
        self.confirm_count = 0;
        self.recent_scores.clear();
    }

    /// Call after any entry attempt, whether it succeeded or was blocked
    /// downstream. Confirmation starts over.
    pub fn on_entry_attempted(&mut self) {
        self.confirm_count = 0;
    }

    pub fn confirm_count(&self) -> u32 {
        self.confirm_count
    }

    fn push_score(&mut self, score: f64) {
        if self.recent_scores.len() == RECENT_SCORES {
            self.recent_scores.pop_front();
        }
        self.recent_scores.push_back(score);
    }

    pub fn decide_exit(
        &mut self,
        side: OptionSide,
        score: f64,
        slope: f64,
        slow_mom: f64,
    ) -> ExitDecision {
        self.push_score(score);
        decide_exit(self.profile, side, score, slope, slow_mom)
    }

    pub fn decide_entry(
        &mut self,
        ready: bool,
        is_choppy: bool,
        direction: Option<OptionSide>,
        score: f64,
        slope: f64,
        confirm_needed: u32,
    ) -> EntryDecision {
        self.push_score(score);

        if !ready {
            return EntryDecision::no("mds_not_ready", self.confirm_count, confirm_needed);
        }
        if is_choppy {
            return EntryDecision::no("mds_choppy", self.confirm_count, confirm_needed);
        }

        let dir = match direction {
            Some(dir) => dir,
            None => {
                self.last_direction = None;
                self.confirm_count = 0;
                return EntryDecision::no("neutral_band", 0, confirm_needed);
            }
        };

        if score.abs() < self.profile.entry_score_min() {
            self.last_direction = Some(dir);
            self.confirm_count = 0;
            return EntryDecision::no("score_too_low", 0, confirm_needed);
        }

        if slope.abs() < self.profile.entry_slope_min() {
            self.last_direction = Some(dir);
            self.confirm_count = 0;
            return EntryDecision::no("slope_too_low", 0, confirm_needed);
        }

        // Strictly monotonic raw scores over the last 3 ticks.
        let (rising_ok, falling_ok) = {
            let n = self.recent_scores.len();
            if n >= 3 {
                let a = self.recent_scores[n - 3];
                let b = self.recent_scores[n - 2];
                let c = self.recent_scores[n - 1];
                (c > b && b > a, c < b && b < a)
            } else {
                (false, false)
            }
        };

        // Immediate-entry override: three consecutive score moves in the
        // trade direction skip the remaining confirmation candles.
        if rising_ok && dir == OptionSide::Ce {
            self.last_direction = Some(dir);
            self.confirm_count = confirm_needed.max(1);
            return EntryDecision {
                should_enter: true,
                option_type: Some(OptionSide::Ce),
                reason: "rising_mds_immediate",
                confirm_count: self.confirm_count,
                confirm_needed,
            };
        }
        if falling_ok && dir == OptionSide::Pe {
            self.last_direction = Some(dir);
            self.confirm_count = confirm_needed.max(1);
            return EntryDecision {
                should_enter: true,
                option_type: Some(OptionSide::Pe),
                reason: "falling_mds_immediate",
                confirm_count: self.confirm_count,
                confirm_needed,
            };
        }

        if rising_ok {
            if self.last_direction == Some(dir) {
                self.confirm_count += 1;
            } else {
                self.last_direction = Some(dir);
                self.confirm_count = 1;
            }
        } else {
            self.last_direction = Some(dir);
            self.confirm_count = 0;
        }

        if self.confirm_count < confirm_needed {
            return EntryDecision::no("arming", self.confirm_count, confirm_needed);
        }

        EntryDecision {
            should_enter: true,
            option_type: Some(dir),
            reason: "",
            confirm_count: self.confirm_count,
            confirm_needed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ce_reversal_exit_tuned() {
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Ce, -13.0, 0.0, -2.0);
        assert!(d.should_exit);
        assert_eq!(d.reason, "MDS Reversal (slow confirm)");
        // Without the slow confirmation, hold.
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Ce, -13.0, 0.0, -1.0);
        assert!(!d.should_exit);
    }

    #[test]
    fn test_ce_neutral_exit_requires_flat_slope() {
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Ce, 4.0, -0.2, 0.3);
        assert!(d.should_exit);
        assert_eq!(d.reason, "MDS Neutral (slow confirm)");
        // Still rising: do not cut a winner.
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Ce, 4.0, 0.8, 0.3);
        assert!(!d.should_exit);
    }

    #[test]
    fn test_ce_momentum_loss_exit() {
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Ce, 9.0, -3.0, -0.6);
        assert!(d.should_exit);
        assert_eq!(d.reason, "MDS Momentum Loss (slow confirm)");
        // High score shields against the momentum-loss exit.
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Ce, 14.0, -3.0, -0.6);
        assert!(!d.should_exit);
    }

    #[test]
    fn test_pe_exits_mirror_ce() {
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Pe, 13.0, 0.0, 2.0);
        assert!(d.should_exit);
        assert_eq!(d.reason, "MDS Reversal (slow confirm)");
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Pe, -4.0, 0.2, -0.3);
        assert!(d.should_exit);
        assert_eq!(d.reason, "MDS Neutral (slow confirm)");
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Pe, -9.0, 3.0, 0.6);
        assert!(d.should_exit);
        assert_eq!(d.reason, "MDS Momentum Loss (slow confirm)");
    }

    #[test]
    fn test_legacy_exit_thresholds_are_looser() {
        // -11 triggers the legacy reversal branch but not the tuned one.
        let d = decide_exit(ThresholdProfile::Legacy, OptionSide::Ce, -11.0, 0.0, -1.0);
        assert!(d.should_exit);
        let d = decide_exit(ThresholdProfile::Tuned, OptionSide::Ce, -11.0, 0.0, -1.0);
        assert!(!d.should_exit);
    }

    #[test]
    fn test_entry_gate_ordering() {
        let mut r = MdsRunner::new(ThresholdProfile::Tuned);
        let d = r.decide_entry(false, false, Some(OptionSide::Ce), 20.0, 3.0, 2);
        assert_eq!(d.reason, "mds_not_ready");
        let d = r.decide_entry(true, true, Some(OptionSide::Ce), 20.0, 3.0, 2);
        assert_eq!(d.reason, "mds_choppy");
        let d = r.decide_entry(true, false, None, 20.0, 3.0, 2);
        assert_eq!(d.reason, "neutral_band");
        let d = r.decide_entry(true, false, Some(OptionSide::Ce), 11.0, 3.0, 2);
        assert_eq!(d.reason, "score_too_low");
        let d = r.decide_entry(true, false, Some(OptionSide::Ce), 15.0, 1.2, 2);
        assert_eq!(d.reason, "slope_too_low");
    }

    #[test]
    fn test_rising_override_enters_immediately() {
        let mut r = MdsRunner::new(ThresholdProfile::Tuned);
        // Three strictly rising scores, all past the gates.
        r.decide_entry(true, false, Some(OptionSide::Ce), 13.0, 2.0, 2);
        r.decide_entry(true, false, Some(OptionSide::Ce), 14.0, 2.0, 2);
        let d = r.decide_entry(true, false, Some(OptionSide::Ce), 15.0, 2.0, 2);
        assert!(d.should_enter);
        assert_eq!(d.reason, "rising_mds_immediate");
        assert_eq!(d.option_type, Some(OptionSide::Ce));
        assert_eq!(d.confirm_count, 2);
    }

    #[test]
    fn test_falling_override_for_pe() {
        let mut r = MdsRunner::new(ThresholdProfile::Tuned);
        r.decide_entry(true, false, Some(OptionSide::Pe), -13.0, -2.0, 2);
        r.decide_entry(true, false, Some(OptionSide::Pe), -14.0, -2.0, 2);
        let d = r.decide_entry(true, false, Some(OptionSide::Pe), -15.0, -2.0, 2);
        assert!(d.should_enter);
        assert_eq!(d.reason, "falling_mds_immediate");
        assert_eq!(d.option_type, Some(OptionSide::Pe));
    }

    #[test]
    fn test_non_monotonic_scores_keep_arming() {
        let mut r = MdsRunner::new(ThresholdProfile::Tuned);
        // Scores wobble, so the rising pattern never forms and the counter
        // stays at zero.
        r.decide_entry(true, false, Some(OptionSide::Ce), 15.0, 2.0, 2);
        r.decide_entry(true, false, Some(OptionSide::Ce), 14.0, 2.0, 2);
        let d = r.decide_entry(true, false, Some(OptionSide::Ce), 15.0, 2.0, 2);
        assert!(!d.should_enter);
        assert_eq!(d.reason, "arming");
        assert_eq!(d.confirm_count, 0);
    }

    #[test]
    fn test_entry_attempt_resets_confirmation() {
        let mut r = MdsRunner::new(ThresholdProfile::Tuned);
        r.decide_entry(true, false, Some(OptionSide::Ce), 13.0, 2.0, 2);
        r.decide_entry(true, false, Some(OptionSide::Ce), 14.0, 2.0, 2);
        let d = r.decide_entry(true, false, Some(OptionSide::Ce), 15.0, 2.0, 2);
        assert!(d.should_enter);
        r.on_entry_attempted();
        assert_eq!(r.confirm_count(), 0);
    }

    #[test]
    fn test_legacy_entry_thresholds() {
        let mut r = MdsRunner::new(ThresholdProfile::Legacy);
        // Score 11 / slope 1.2 pass legacy gates but fail tuned ones.
        let d = r.decide_entry(true, false, Some(OptionSide::Ce), 11.0, 1.2, 1);
        assert_ne!(d.reason, "score_too_low");
        assert_ne!(d.reason, "slope_too_low");
    }
}
