use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex, Weak,
};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::error::SessionError;
use crate::models::MatchType;
use crate::{log_debug, log_info};

use super::state::{format_clock, MatchPhase, PhaseTransition, SessionTimerState};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub state: SessionTimerState,
    pub display: u32,
    pub clock: String,
}

impl From<SessionTimerState> for TimerSnapshot {
    fn from(state: SessionTimerState) -> Self {
        let display = state.display();
        Self {
            clock: format_clock(display),
            display,
            state,
        }
    }
}

/// What caused a timer state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerChange {
    Started,
    Paused,
    Tick,
    PhaseTick,
    ElapsedTick,
    Transition(PhaseTransition),
    SkippedToTeleop,
    MatchTypeChanged,
    Reset,
    Restored,
}

/// Receives every state change after the state lock has been released.
pub trait TimerListener: Send + Sync {
    fn timer_changed(&self, state: &SessionTimerState, change: TimerChange);
}

/// Listener that ignores everything.
pub struct NoopListener;

impl TimerListener for NoopListener {
    fn timer_changed(&self, _state: &SessionTimerState, _change: TimerChange) {}
}

#[derive(Default)]
struct Tickers {
    main: Option<JoinHandle<()>>,
    phase: Option<JoinHandle<()>>,
    elapsed: Option<JoinHandle<()>>,
}

impl Tickers {
    fn abort_all(&mut self) {
        for handle in [self.main.take(), self.phase.take(), self.elapsed.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct ControllerInner {
    state: Arc<Mutex<SessionTimerState>>,
    tickers: StdMutex<Tickers>,
    tick_interval: Duration,
    listener: Arc<dyn TimerListener>,
    session_completed: AtomicBool,
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let mut tickers = match self.tickers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tickers.abort_all();
    }
}

/// Drives a [`SessionTimerState`] with three independent 1 Hz tickers: the
/// match clock, the controller pickup countdown and the session-elapsed
/// counter. At most one of each is alive at any time.
#[derive(Clone)]
pub struct TimerController {
    inner: Arc<ControllerInner>,
}

impl TimerController {
    pub fn new(
        state: Arc<Mutex<SessionTimerState>>,
        listener: Arc<dyn TimerListener>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                state,
                tickers: StdMutex::new(Tickers::default()),
                tick_interval,
                listener,
                session_completed: AtomicBool::new(false),
            }),
        }
    }

    pub fn shared_state(&self) -> Arc<Mutex<SessionTimerState>> {
        self.inner.state.clone()
    }

    pub async fn get_state(&self) -> SessionTimerState {
        self.inner.state.lock().await.clone()
    }

    pub async fn get_snapshot(&self) -> TimerSnapshot {
        TimerSnapshot::from(self.get_state().await)
    }

    /// Which tickers are alive: (main, phase, elapsed).
    pub fn active_tickers(&self) -> (bool, bool, bool) {
        let tickers = self.tickers();
        let alive = |h: &Option<JoinHandle<()>>| h.as_ref().is_some_and(|h| !h.is_finished());
        (
            alive(&tickers.main),
            alive(&tickers.phase),
            alive(&tickers.elapsed),
        )
    }

    pub fn set_session_completed(&self, completed: bool) {
        self.inner
            .session_completed
            .store(completed, Ordering::SeqCst);
    }

    /// Resume tickers for a state restored from storage.
    pub async fn restore(&self) {
        let (snapshot, transition) = {
            let mut state = self.inner.state.lock().await;
            let transition = state.reconcile_after_restore();
            (state.clone(), transition)
        };

        if let Some(transition) = transition {
            log_info!(
                "Restored timer moved from {} to {}",
                transition.from.as_str(),
                transition.to.as_str()
            );
        }

        self.spawn_elapsed_ticker();
        self.align_tickers(&snapshot);
        self.notify(
            &snapshot,
            transition.map_or(TimerChange::Restored, TimerChange::Transition),
        );
    }

    pub async fn start(&self) -> Result<SessionTimerState, SessionError> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            if state.phase == MatchPhase::Ended {
                return Err(SessionError::InvalidState(
                    "match has ended; reset the timer first".into(),
                ));
            }
            if !state.start(Utc::now()) {
                return Ok(state.clone());
            }
            state.clone()
        };

        log_info!(
            "Timer started ({} at {})",
            snapshot.match_type.as_str(),
            snapshot.timer
        );
        self.spawn_main_ticker();
        self.spawn_elapsed_ticker();
        self.notify(&snapshot, TimerChange::Started);
        Ok(snapshot)
    }

    pub async fn pause(&self) -> SessionTimerState {
        let (snapshot, changed) = {
            let mut state = self.inner.state.lock().await;
            let changed = state.pause();
            (state.clone(), changed)
        };
        if changed {
            self.cancel_main_ticker();
            self.notify(&snapshot, TimerChange::Paused);
        }
        snapshot
    }

    pub async fn end_autonomous(&self) -> Option<PhaseTransition> {
        let (snapshot, transition) = {
            let mut state = self.inner.state.lock().await;
            let transition = state.end_autonomous()?;
            (state.clone(), transition)
        };
        self.cancel_main_ticker();
        self.spawn_phase_ticker();
        self.notify(&snapshot, TimerChange::Transition(transition));
        Some(transition)
    }

    pub async fn skip_to_teleop(&self) -> Result<SessionTimerState, SessionError> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.skip_to_teleop()?;
            state.clone()
        };
        log_info!("Skipped to teleop");
        self.cancel_phase_ticker();
        self.spawn_main_ticker();
        self.spawn_elapsed_ticker();
        self.notify(&snapshot, TimerChange::SkippedToTeleop);
        Ok(snapshot)
    }

    pub async fn set_match_type(
        &self,
        match_type: MatchType,
    ) -> Result<SessionTimerState, SessionError> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            if state.match_type == match_type {
                return Ok(state.clone());
            }
            state.set_match_type(match_type)?;
            state.clone()
        };
        self.notify(&snapshot, TimerChange::MatchTypeChanged);
        Ok(snapshot)
    }

    pub async fn reset_timer(&self) -> SessionTimerState {
        self.reset_with(SessionTimerState::reset_timer).await
    }

    pub async fn reset_session(&self) -> SessionTimerState {
        self.set_session_completed(false);
        self.reset_with(SessionTimerState::reset_session).await
    }

    async fn reset_with(&self, reset: fn(&mut SessionTimerState)) -> SessionTimerState {
        self.cancel_main_ticker();
        self.cancel_phase_ticker();
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            reset(&mut state);
            state.clone()
        };
        self.notify(&snapshot, TimerChange::Reset);
        snapshot
    }

    /// Tear down every ticker; the controller can be restarted afterwards.
    pub fn shutdown(&self) {
        self.tickers().abort_all();
        log_debug!("Timer tickers stopped");
    }

    fn tickers(&self) -> std::sync::MutexGuard<'_, Tickers> {
        match self.inner.tickers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, state: &SessionTimerState, change: TimerChange) {
        self.inner.listener.timer_changed(state, change);
    }

    fn align_tickers(&self, state: &SessionTimerState) {
        if state.running {
            self.spawn_main_ticker();
        }
        if state.phase == MatchPhase::ControllerPickup {
            self.spawn_phase_ticker();
        }
    }

    fn cancel_main_ticker(&self) {
        if let Some(handle) = self.tickers().main.take() {
            handle.abort();
        }
    }

    fn cancel_phase_ticker(&self) {
        if let Some(handle) = self.tickers().phase.take() {
            handle.abort();
        }
    }

    fn spawn_main_ticker(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(controller) = upgrade(&weak) else {
                    break;
                };

                let (snapshot, transition) = {
                    let mut state = controller.inner.state.lock().await;
                    if !state.running {
                        break;
                    }
                    let transition = state.tick();
                    (state.clone(), transition)
                };

                match transition {
                    Some(transition) => {
                        if transition.to == MatchPhase::ControllerPickup {
                            controller.spawn_phase_ticker();
                        }
                        controller.notify(&snapshot, TimerChange::Transition(transition));
                    }
                    None => controller.notify(&snapshot, TimerChange::Tick),
                }

                if !snapshot.running {
                    break;
                }
            }
        });

        if let Some(previous) = self.tickers().main.replace(handle) {
            previous.abort();
        }
    }

    fn spawn_phase_ticker(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(controller) = upgrade(&weak) else {
                    break;
                };

                let (snapshot, transition) = {
                    let mut state = controller.inner.state.lock().await;
                    if state.phase != MatchPhase::ControllerPickup {
                        break;
                    }
                    let transition = state.tick_phase();
                    (state.clone(), transition)
                };

                match transition {
                    Some(transition) => {
                        controller.spawn_main_ticker();
                        controller.notify(&snapshot, TimerChange::Transition(transition));
                        break;
                    }
                    None => controller.notify(&snapshot, TimerChange::PhaseTick),
                }
            }
        });

        if let Some(previous) = self.tickers().phase.replace(handle) {
            previous.abort();
        }
    }

    fn spawn_elapsed_ticker(&self) {
        {
            let tickers = self.tickers();
            if tickers
                .elapsed
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
            {
                return;
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(controller) = upgrade(&weak) else {
                    break;
                };

                let completed = controller.inner.session_completed.load(Ordering::SeqCst);
                let snapshot = {
                    let mut state = controller.inner.state.lock().await;
                    if !state.tick_elapsed(completed) {
                        continue;
                    }
                    state.clone()
                };
                controller.notify(&snapshot, TimerChange::ElapsedTick);
            }
        });

        if let Some(previous) = self.tickers().elapsed.replace(handle) {
            previous.abort();
        }
    }
}

fn upgrade(weak: &Weak<ControllerInner>) -> Option<TimerController> {
    weak.upgrade().map(|inner| TimerController { inner })
}
