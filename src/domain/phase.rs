//! Engine lifecycle state machine — single source of truth for what the
//! engine is allowed to do at any instant.
//!
//! Phases:
//!   Idle       — engine stopped, no position
//!   WarmingUp  — engine started, seeding indicators from history
//!   Scanning   — watching for an entry signal, no position
//!   Entering   — entry order placed, waiting for fill confirmation
//!   InPosition — position open, monitoring SL/target/signals
//!   Exiting    — exit order placed, waiting for fill confirmation
//!   Cooldown   — brief post-exit pause before the next entry is allowed
//!   Error      — unrecoverable fault, requires an operator stop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    WarmingUp,
    Scanning,
    Entering,
    InPosition,
    Exiting,
    Cooldown,
    Error,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Idle,
        Phase::WarmingUp,
        Phase::Scanning,
        Phase::Entering,
        Phase::InPosition,
        Phase::Exiting,
        Phase::Cooldown,
        Phase::Error,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::WarmingUp => "WARMING_UP",
            Phase::Scanning => "SCANNING",
            Phase::Entering => "ENTERING",
            Phase::InPosition => "IN_POSITION",
            Phase::Exiting => "EXITING",
            Phase::Cooldown => "COOLDOWN",
            Phase::Error => "ERROR",
        }
    }
}

/// Legal targets for each phase. Error is reachable from every running
/// phase; only Idle is reachable from Error.
fn allowed_targets(from: Phase) -> &'static [Phase] {
    use Phase::*;
    match from {
        Idle => &[WarmingUp, Scanning],
        WarmingUp => &[Scanning, Idle, Error],
        Scanning => &[Entering, Idle, Error],
        Entering => &[InPosition, Scanning, Idle, Error],
        InPosition => &[Exiting, Idle, Error],
        Exiting => &[Cooldown, InPosition, Idle, Error],
        Cooldown => &[Scanning, Idle, Error],
        Error => &[Idle],
    }
}

/// Governs phase transitions with logging and guard checks.
///
/// Single-writer: only the orchestrator's control flow mutates this, under
/// its state mutex.
#[derive(Debug)]
pub struct StateMachine {
    phase: Phase,
    previous: Option<Phase>,
    entered_at: Option<DateTime<Utc>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            previous: None,
            entered_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn entered_at(&self) -> Option<DateTime<Utc>> {
        self.entered_at
    }

    /// True only when it is safe to place an entry order.
    pub fn can_enter(&self) -> bool {
        self.phase == Phase::Scanning
    }

    /// True only when a position is open and no exit is pending.
    pub fn can_exit(&self) -> bool {
        self.phase == Phase::InPosition
    }

    /// True whenever the engine loop should be running.
    pub fn is_active(&self) -> bool {
        !matches!(self.phase, Phase::Idle | Phase::Error)
    }

    /// Attempt a phase transition. Returns true if allowed, false if blocked.
    /// A blocked transition leaves the phase unchanged.
    pub fn transition(&mut self, target: Phase, reason: &str) -> bool {
        if !allowed_targets(self.phase).contains(&target) {
            tracing::warn!(
                "[STATE] Blocked illegal transition {} -> {} ({})",
                self.phase.name(),
                target.name(),
                reason
            );
            return false;
        }

        self.previous = Some(self.phase);
        self.phase = target;
        self.entered_at = Some(Utc::now());
        tracing::info!(
            "[STATE] {} -> {} | {}",
            self.previous.map(|p| p.name()).unwrap_or("?"),
            self.phase.name(),
            reason
        );
        true
    }

    // Explicit named transitions — cleaner call sites.

    pub fn start(&mut self) -> bool {
        self.transition(Phase::WarmingUp, "engine started")
    }

    pub fn warmed_up(&mut self) -> bool {
        self.transition(Phase::Scanning, "indicators seeded")
    }

    pub fn placing_entry(&mut self) -> bool {
        self.transition(Phase::Entering, "entry order placed")
    }

    pub fn entry_confirmed(&mut self) -> bool {
        self.transition(Phase::InPosition, "fill confirmed")
    }

    pub fn entry_failed(&mut self) -> bool {
        self.transition(Phase::Scanning, "entry rejected/timeout")
    }

    pub fn placing_exit(&mut self) -> bool {
        self.transition(Phase::Exiting, "exit order placed")
    }

    pub fn exit_confirmed(&mut self) -> bool {
        self.transition(Phase::Cooldown, "exit fill confirmed")
    }

    pub fn exit_failed(&mut self) -> bool {
        self.transition(Phase::InPosition, "exit failed, still open")
    }

    pub fn cooldown_done(&mut self) -> bool {
        self.transition(Phase::Scanning, "cooldown elapsed")
    }

    pub fn stop(&mut self) -> bool {
        self.transition(Phase::Idle, "engine stopped")
    }

    pub fn error(&mut self, reason: &str) -> bool {
        self.transition(Phase::Error, reason)
    }
}
