pub mod controller;
pub mod state;

pub use controller::{NoopListener, TimerChange, TimerController, TimerListener, TimerSnapshot};
pub use state::{
    display_timer, format_clock, MatchPhase, PhaseTransition, SessionTimerState,
};
