use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::models::MatchType;

/// Lead-in countdown shown before autonomous in a full game (3, 2, 1).
pub const LEAD_IN_SECS: u32 = 3;
/// Full game clock, displayed as 2:30.
pub const FULL_GAME_SECS: u32 = 150;
pub const FULL_GAME_START: u32 = FULL_GAME_SECS + LEAD_IN_SECS;
pub const AUTONOMOUS_SECS: u32 = 30;
/// Main timer value at which a full game's autonomous period ends.
pub const AUTON_END_MARK: u32 = FULL_GAME_SECS - AUTONOMOUS_SECS;
pub const CONTROLLER_PICKUP_SECS: u32 = 8;
pub const TELEOP_SECS: u32 = 120;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    #[default]
    Auton,
    ControllerPickup,
    Teleop,
    Ended,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::Auton => "auton",
            MatchPhase::ControllerPickup => "controller_pickup",
            MatchPhase::Teleop => "teleop",
            MatchPhase::Ended => "ended",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MatchPhase::Auton => 0,
            MatchPhase::ControllerPickup => 1,
            MatchPhase::Teleop => 2,
            MatchPhase::Ended => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    pub from: MatchPhase,
    pub to: MatchPhase,
}

/// Seconds that should be shown for `timer` in `phase`.
///
/// During the full-game lead-in the main timer sits above 150 and the
/// display shows the remaining lead-in seconds instead.
pub fn display_timer(timer: u32, phase: MatchPhase) -> u32 {
    if phase == MatchPhase::Auton && timer > FULL_GAME_SECS {
        timer - FULL_GAME_SECS
    } else {
        timer
    }
}

/// `m:ss` rendering of a seconds count.
pub fn format_clock(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub fn initial_timer(match_type: MatchType) -> u32 {
    match match_type {
        MatchType::FullGame => FULL_GAME_START,
        MatchType::Autonomous => AUTONOMOUS_SECS,
        MatchType::Teleop => TELEOP_SECS,
    }
}

pub fn initial_phase(match_type: MatchType) -> MatchPhase {
    match match_type {
        MatchType::Teleop => MatchPhase::Teleop,
        MatchType::FullGame | MatchType::Autonomous => MatchPhase::Auton,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimerState {
    pub match_type: MatchType,
    /// Match countdown, in seconds.
    pub timer: u32,
    /// Controller pickup countdown; only set during that phase.
    pub phase_timer: Option<u32>,
    /// Seconds the session has been underway, across matches.
    pub session_elapsed: u64,
    pub running: bool,
    pub phase: MatchPhase,
    pub has_started: bool,
    pub has_transitioned_to_teleop: bool,
    pub show_teleop_transition: bool,
    pub session_started_at: Option<DateTime<Utc>>,
    pub match_started_at: Option<DateTime<Utc>>,
}

impl Default for SessionTimerState {
    fn default() -> Self {
        Self::for_match_type(MatchType::default())
    }
}

impl SessionTimerState {
    pub fn for_match_type(match_type: MatchType) -> Self {
        Self {
            match_type,
            timer: initial_timer(match_type),
            phase_timer: None,
            session_elapsed: 0,
            running: false,
            phase: initial_phase(match_type),
            has_started: false,
            has_transitioned_to_teleop: false,
            show_teleop_transition: false,
            session_started_at: None,
            match_started_at: None,
        }
    }

    /// Started or running; an active timer keeps the session worth persisting.
    pub fn is_active(&self) -> bool {
        self.has_started || self.running
    }

    pub fn display(&self) -> u32 {
        match (self.phase, self.phase_timer) {
            (MatchPhase::ControllerPickup, Some(pickup)) => pickup,
            _ => display_timer(self.timer, self.phase),
        }
    }

    pub fn in_lead_in(&self) -> bool {
        self.phase == MatchPhase::Auton && self.timer > FULL_GAME_SECS
    }

    /// Start or resume the match clock. Returns false when nothing changed.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.running
            || matches!(self.phase, MatchPhase::Ended | MatchPhase::ControllerPickup)
        {
            return false;
        }
        self.running = true;
        self.has_started = true;
        self.session_started_at.get_or_insert(now);
        self.match_started_at.get_or_insert(now);
        true
    }

    pub fn pause(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        true
    }

    fn enter(&mut self, to: MatchPhase) -> PhaseTransition {
        let from = self.phase;
        debug_assert!(to.rank() >= from.rank(), "phases only move forward");
        self.phase = to;
        PhaseTransition { from, to }
    }

    fn enter_controller_pickup(&mut self) -> PhaseTransition {
        self.running = false;
        self.timer = AUTON_END_MARK;
        self.phase_timer = Some(CONTROLLER_PICKUP_SECS);
        self.show_teleop_transition = true;
        self.enter(MatchPhase::ControllerPickup)
    }

    fn enter_teleop(&mut self) -> PhaseTransition {
        self.timer = TELEOP_SECS;
        self.phase_timer = None;
        self.running = true;
        self.has_transitioned_to_teleop = true;
        self.show_teleop_transition = false;
        self.enter(MatchPhase::Teleop)
    }

    fn enter_ended(&mut self) -> PhaseTransition {
        self.running = false;
        self.phase_timer = None;
        self.show_teleop_transition = false;
        self.enter(MatchPhase::Ended)
    }

    /// One second of the main match clock.
    pub fn tick(&mut self) -> Option<PhaseTransition> {
        if !self.running {
            return None;
        }

        match self.phase {
            MatchPhase::Auton => {
                self.timer = self.timer.saturating_sub(1);
                match self.match_type {
                    MatchType::FullGame if self.timer <= AUTON_END_MARK => {
                        Some(self.enter_controller_pickup())
                    }
                    MatchType::Autonomous if self.timer == 0 => Some(self.enter_ended()),
                    _ => None,
                }
            }
            MatchPhase::Teleop => {
                self.timer = self.timer.saturating_sub(1);
                if self.timer == 0 {
                    Some(self.enter_ended())
                } else {
                    None
                }
            }
            MatchPhase::ControllerPickup | MatchPhase::Ended => None,
        }
    }

    /// One second of the controller pickup countdown.
    pub fn tick_phase(&mut self) -> Option<PhaseTransition> {
        if self.phase != MatchPhase::ControllerPickup {
            return None;
        }
        let remaining = self.phase_timer.unwrap_or(0).saturating_sub(1);
        self.phase_timer = Some(remaining);
        if remaining == 0 {
            Some(self.enter_teleop())
        } else {
            None
        }
    }

    /// One second of the session-elapsed counter. Returns true when it moved.
    pub fn tick_elapsed(&mut self, session_completed: bool) -> bool {
        if !self.has_started || session_completed {
            return false;
        }
        self.session_elapsed += 1;
        true
    }

    /// External end-of-autonomous signal for a full game.
    pub fn end_autonomous(&mut self) -> Option<PhaseTransition> {
        if self.match_type != MatchType::FullGame || self.phase != MatchPhase::Auton {
            return None;
        }
        Some(self.enter_controller_pickup())
    }

    pub fn skip_to_teleop(&mut self) -> Result<PhaseTransition, SessionError> {
        if self.match_type != MatchType::FullGame {
            return Err(SessionError::InvalidState(
                "skip to teleop is only available in full games".into(),
            ));
        }
        if !matches!(self.phase, MatchPhase::Auton | MatchPhase::ControllerPickup) {
            return Err(SessionError::InvalidState(format!(
                "cannot skip to teleop from {}",
                self.phase.as_str()
            )));
        }
        self.has_started = true;
        Ok(self.enter_teleop())
    }

    /// Switch match type; only allowed before the clock has been started.
    pub fn set_match_type(&mut self, match_type: MatchType) -> Result<(), SessionError> {
        if self.running || self.has_started {
            return Err(SessionError::InvalidState(
                "match type cannot change once the timer has started".into(),
            ));
        }
        self.match_type = match_type;
        self.timer = initial_timer(match_type);
        self.phase = initial_phase(match_type);
        self.phase_timer = None;
        Ok(())
    }

    /// Back to the initial clock for the current match type; the session
    /// elapsed counter keeps counting from where it was.
    pub fn reset_timer(&mut self) {
        let session_elapsed = self.session_elapsed;
        let session_started_at = self.session_started_at;
        *self = Self::for_match_type(self.match_type);
        self.session_elapsed = session_elapsed;
        self.session_started_at = session_started_at;
    }

    pub fn reset_session(&mut self) {
        *self = Self::for_match_type(self.match_type);
    }

    /// Let `secs` of unticked wall-clock time pass in the controller pickup
    /// window. Time beyond the window runs down the teleop clock, and a
    /// teleop clock that runs out ends the match.
    pub fn advance_pickup(&mut self, secs: u64) -> Option<PhaseTransition> {
        if self.phase != MatchPhase::ControllerPickup {
            return None;
        }
        let pickup = u64::from(self.phase_timer.unwrap_or(0));
        if secs < pickup {
            self.phase_timer = Some((pickup - secs) as u32);
            return None;
        }

        let from = self.phase;
        self.enter_teleop();
        let overshoot = secs - pickup;
        self.timer = u64::from(TELEOP_SECS).saturating_sub(overshoot) as u32;
        if self.timer == 0 {
            self.enter_ended();
        }
        Some(PhaseTransition {
            from,
            to: self.phase,
        })
    }

    /// Settle a state restored from storage whose clock kept running while
    /// nothing was ticking it.
    pub fn reconcile_after_restore(&mut self) -> Option<PhaseTransition> {
        let from = self.phase;
        match self.phase {
            MatchPhase::ControllerPickup => {
                if self.phase_timer.unwrap_or(0) == 0 {
                    self.enter_teleop();
                }
            }
            MatchPhase::Auton if self.running => match self.match_type {
                MatchType::FullGame if self.timer <= AUTON_END_MARK => {
                    let overshoot = AUTON_END_MARK - self.timer;
                    self.enter_controller_pickup();
                    self.advance_pickup(u64::from(overshoot));
                }
                MatchType::Autonomous if self.timer == 0 => {
                    self.enter_ended();
                }
                _ => {}
            },
            MatchPhase::Teleop if self.running && self.timer == 0 => {
                self.enter_ended();
            }
            _ => {}
        }

        if self.phase != from {
            Some(PhaseTransition {
                from,
                to: self.phase,
            })
        } else {
            None
        }
    }
}
