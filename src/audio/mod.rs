//! Match sound cues: one shared playback element kept in step with the timer.

mod manager;
#[cfg(feature = "rodio-output")]
mod rodio_element;
mod sync;

pub use manager::{AudioLease, AudioManager, AudioSnapshot, RESUME_WINDOW_MS};
#[cfg(feature = "rodio-output")]
pub use rodio_element::RodioElement;
pub use sync::{expected_offset, AudioSynchronizer};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::AudioError;
use crate::models::MatchType;

/// A seekable playback element, modelled on an HTML media element.
pub trait AudioElement: Send {
    /// May be refused (autoplay policy, missing device).
    fn play(&mut self) -> Result<(), AudioError>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    /// Playback position in seconds.
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, secs: f64);
    fn set_muted(&mut self, muted: bool);
    fn is_muted(&self) -> bool;
    /// Track length in seconds, once known.
    fn duration(&self) -> Option<f64>;
}

/// Silent element that advances its position with the clock. Used when no
/// output device is wanted and as the position model for real outputs.
#[derive(Debug, Clone)]
pub struct ClockElement {
    position: f64,
    playing_since: Option<Instant>,
    muted: bool,
    duration: Option<f64>,
    reject_play: bool,
}

impl ClockElement {
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            position: 0.0,
            playing_since: None,
            muted: false,
            duration,
            reject_play: false,
        }
    }

    /// An element whose `play` is always refused.
    pub fn rejecting(duration: Option<f64>) -> Self {
        Self {
            reject_play: true,
            ..Self::new(duration)
        }
    }

    fn clamp(&self, secs: f64) -> f64 {
        let secs = secs.max(0.0);
        match self.duration {
            Some(duration) => secs.min(duration),
            None => secs,
        }
    }
}

impl Default for ClockElement {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AudioElement for ClockElement {
    fn play(&mut self) -> Result<(), AudioError> {
        if self.reject_play {
            return Err(AudioError::PlaybackRejected(
                "playback requires a user gesture".into(),
            ));
        }
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.position = self.current_time();
        self.playing_since = None;
    }

    fn is_paused(&self) -> bool {
        self.playing_since.is_none()
    }

    fn current_time(&self) -> f64 {
        let running = self
            .playing_since
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.clamp(self.position + running)
    }

    fn set_current_time(&mut self, secs: f64) {
        self.position = self.clamp(secs);
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }
}

/// Where each phase's cue starts in the match track, plus stop tails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCueConfig {
    pub autonomous_base: f64,
    pub pickup_base: f64,
    pub teleop_base: f64,
    /// Seek target when a full game skips straight to teleop.
    pub skip_to_teleop_offset: f64,
    pub track_length_secs: f64,
    pub autonomous_tail_ms: u64,
    pub default_tail_ms: u64,
}

impl Default for AudioCueConfig {
    fn default() -> Self {
        Self {
            autonomous_base: 3.0,
            pickup_base: 33.0,
            teleop_base: 42.0,
            skip_to_teleop_offset: 42.0,
            track_length_secs: 167.0,
            autonomous_tail_ms: 3_000,
            default_tail_ms: 5_000,
        }
    }
}

impl AudioCueConfig {
    /// How long the end-of-match cue is allowed to ring before stopping.
    pub fn tail_for(&self, match_type: MatchType) -> Duration {
        match match_type {
            MatchType::Autonomous => Duration::from_millis(self.autonomous_tail_ms),
            MatchType::FullGame | MatchType::Teleop => Duration::from_millis(self.default_tail_ms),
        }
    }
}
