//! Outbound notifications: toasts for the user and state-change events for
//! whatever front end is attached.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::models::MatchType;
use crate::timer::{MatchPhase, TimerSnapshot};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AppEvent {
    Toast {
        level: ToastLevel,
        message: String,
    },
    TimerStateChanged {
        snapshot: TimerSnapshot,
    },
    PhaseChanged {
        from: MatchPhase,
        to: MatchPhase,
    },
    MatchEnded {
        match_type: MatchType,
    },
}

impl AppEvent {
    pub fn warning(message: impl Into<String>) -> Self {
        AppEvent::Toast {
            level: ToastLevel::Warning,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        AppEvent::Toast {
            level: ToastLevel::Info,
            message: message.into(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: AppEvent);
}

/// Writes toasts to the log and drops everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: AppEvent) {
        if let AppEvent::Toast { level, message } = event {
            match level {
                ToastLevel::Info => log::info!("{message}"),
                ToastLevel::Warning => log::warn!("{message}"),
                ToastLevel::Error => log::error!("{message}"),
            }
        }
    }
}

/// Forwards events to an async consumer; a closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<AppEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<AppEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory; used by tests and by the CLI to print
/// warnings after a command.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AppEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AppEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn toasts(&self) -> Vec<(ToastLevel, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::Toast { level, message } => Some((level, message)),
                _ => None,
            })
            .collect()
    }

    pub fn drain(&self) -> Vec<AppEvent> {
        match self.events.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: AppEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
