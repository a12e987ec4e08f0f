use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex as StdMutex,
};

use tokio::{runtime::Handle, task::JoinHandle, time};

use crate::models::MatchType;
use crate::timer::{MatchPhase, SessionTimerState};
use crate::{log_debug, log_warn};

use super::{AudioCueConfig, AudioElement, AudioLease, AudioManager};

const ENABLE_LOGS: bool = true;

const FULL_GAME_START: f64 = 153.0;
const AUTONOMOUS_SECS: f64 = 30.0;
const PICKUP_SECS: f64 = 8.0;
const TELEOP_SECS: f64 = 120.0;
/// Drift beyond this re-seeks a playing element.
const DRIFT_TOLERANCE_SECS: f64 = 2.0;

/// Where in the match track playback should be for `state`, in seconds.
/// `None` when no cue should be playing.
pub fn expected_offset(state: &SessionTimerState, cues: &AudioCueConfig) -> Option<f64> {
    if !state.has_started || state.phase == MatchPhase::Ended {
        return None;
    }
    let timer = f64::from(state.timer);
    let offset = match (state.match_type, state.phase) {
        (MatchType::FullGame, MatchPhase::Auton) => FULL_GAME_START - timer,
        (MatchType::FullGame, MatchPhase::ControllerPickup) => {
            let pickup = f64::from(state.phase_timer.unwrap_or(0));
            cues.pickup_base + (PICKUP_SECS - pickup)
        }
        (MatchType::Autonomous, _) => cues.autonomous_base + (AUTONOMOUS_SECS - timer),
        (_, MatchPhase::Teleop) => cues.teleop_base + (TELEOP_SECS - timer),
        _ => return None,
    };
    Some(offset.max(0.0))
}

fn should_play(state: &SessionTimerState) -> bool {
    state.running || state.phase == MatchPhase::ControllerPickup
}

fn play_quietly(element: &mut dyn AudioElement) {
    if let Err(err) = element.play() {
        log_debug!("Audio playback refused: {}", err);
    }
}

/// Keeps the shared element aligned with one timer.
pub struct AudioSynchronizer {
    lease: AudioLease,
    cues: AudioCueConfig,
    tutorial_active: AtomicBool,
    stop_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for AudioSynchronizer {
    fn drop(&mut self) {
        self.cancel_stop();
    }
}

impl AudioSynchronizer {
    pub fn new(manager: &AudioManager, cues: AudioCueConfig) -> Self {
        Self {
            lease: manager.acquire(),
            cues,
            tutorial_active: AtomicBool::new(false),
            stop_task: StdMutex::new(None),
        }
    }

    pub fn manager(&self) -> &AudioManager {
        self.lease.manager()
    }

    pub fn cues(&self) -> &AudioCueConfig {
        &self.cues
    }

    pub fn set_tutorial_active(&self, active: bool) {
        self.tutorial_active.store(active, Ordering::SeqCst);
        self.manager().with_element(|element| element.set_muted(active));
    }

    pub fn tutorial_active(&self) -> bool {
        self.tutorial_active.load(Ordering::SeqCst)
    }

    /// Periodic alignment: restarts an element that stopped while the
    /// timer is running and re-seeks one that has drifted.
    pub fn sync(&self, state: &SessionTimerState) {
        let Some(expected) = expected_offset(state, &self.cues) else {
            return;
        };
        if !should_play(state) {
            return;
        }
        let muted = self.tutorial_active();
        self.manager().with_element(|element| {
            element.set_muted(muted);
            if element.is_paused() {
                log_debug!("Audio was paused mid-match; resuming at {:.1}s", expected);
                element.set_current_time(expected);
                play_quietly(element);
            } else if (element.current_time() - expected).abs() > DRIFT_TOLERANCE_SECS {
                element.set_current_time(expected);
            }
        });
    }

    /// Timer started or resumed.
    pub fn start_cue(&self, state: &SessionTimerState) {
        self.cancel_stop();
        let Some(expected) = expected_offset(state, &self.cues) else {
            return;
        };
        let muted = self.tutorial_active();
        self.manager().with_element(|element| {
            element.set_muted(muted);
            element.set_current_time(expected);
            play_quietly(element);
        });
    }

    pub fn pause_cue(&self) {
        self.manager().with_element(|element| element.pause());
    }

    pub fn on_skip_to_teleop(&self) {
        self.cancel_stop();
        let offset = self.cues.skip_to_teleop_offset;
        let muted = self.tutorial_active();
        self.manager().with_element(|element| {
            element.set_muted(muted);
            element.set_current_time(offset);
            play_quietly(element);
        });
    }

    /// Let the end-of-match cue ring out, then stop and rewind.
    pub fn schedule_stop(&self, match_type: MatchType) {
        let tail = self.cues.tail_for(match_type);
        let Ok(runtime) = Handle::try_current() else {
            self.stop_now();
            return;
        };
        let manager = self.manager().clone();
        let handle = runtime.spawn(async move {
            time::sleep(tail).await;
            stop(&manager);
        });
        if let Some(previous) = self.stop_slot().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_now(&self) {
        self.cancel_stop();
        stop(self.manager());
    }

    fn cancel_stop(&self) {
        if let Some(handle) = self.stop_slot().take() {
            handle.abort();
        }
    }

    /// Compare the loaded track with the cue table. Returns a warning when
    /// they disagree.
    pub fn validate_track(&self) -> Option<String> {
        let duration = self.manager().with_element(|element| element.duration())?;
        let teleop_end = self.cues.teleop_base.max(self.cues.skip_to_teleop_offset) + TELEOP_SECS;
        let message = if duration + f64::EPSILON < teleop_end {
            format!(
                "Match track is {duration:.1}s but the teleop cue needs {teleop_end:.1}s"
            )
        } else if (duration - self.cues.track_length_secs).abs() > 1.0 {
            format!(
                "Match track is {duration:.1}s, expected {:.1}s; cues may be out of sync",
                self.cues.track_length_secs
            )
        } else {
            return None;
        };
        log_warn!("{}", message);
        Some(message)
    }

    fn stop_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.stop_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn stop(manager: &AudioManager) {
    manager.with_element(|element| {
        element.pause();
        element.set_current_time(0.0);
    });
    manager.clear_snapshot();
}
