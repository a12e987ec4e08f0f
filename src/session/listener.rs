use std::sync::Arc;

use crate::audio::AudioSynchronizer;
use crate::events::{AppEvent, EventSink};
use crate::persistence::PersistScheduler;
use crate::timer::{MatchPhase, SessionTimerState, TimerChange, TimerListener, TimerSnapshot};

/// Fans timer changes out to persistence, audio and the event sink.
pub(crate) struct SessionListener {
    pub(crate) scheduler: PersistScheduler,
    pub(crate) audio: Option<Arc<AudioSynchronizer>>,
    pub(crate) events: Arc<dyn EventSink>,
}

impl SessionListener {
    fn drive_audio(&self, audio: &AudioSynchronizer, state: &SessionTimerState, change: TimerChange) {
        match change {
            TimerChange::Started => audio.start_cue(state),
            TimerChange::Paused => audio.pause_cue(),
            TimerChange::SkippedToTeleop => audio.on_skip_to_teleop(),
            TimerChange::Reset => audio.stop_now(),
            TimerChange::Transition(transition) if transition.to == MatchPhase::Ended => {
                audio.schedule_stop(state.match_type)
            }
            TimerChange::Transition(_)
            | TimerChange::Tick
            | TimerChange::PhaseTick
            | TimerChange::Restored => audio.sync(state),
            TimerChange::ElapsedTick | TimerChange::MatchTypeChanged => {}
        }
    }
}

impl TimerListener for SessionListener {
    fn timer_changed(&self, state: &SessionTimerState, change: TimerChange) {
        self.scheduler.mark_dirty();

        if let Some(audio) = &self.audio {
            self.drive_audio(audio, state, change);
        }

        if let TimerChange::Transition(transition) = change {
            self.events.emit(AppEvent::PhaseChanged {
                from: transition.from,
                to: transition.to,
            });
            if transition.to == MatchPhase::Ended {
                self.events.emit(AppEvent::MatchEnded {
                    match_type: state.match_type,
                });
            }
        }
        self.events.emit(AppEvent::TimerStateChanged {
            snapshot: TimerSnapshot::from(state.clone()),
        });
    }
}
