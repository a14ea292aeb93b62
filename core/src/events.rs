//! Structured application events raised by the proximity core.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventLevel {
    Verbose,
    Debug,
    Info,
    Error,
}

/// Stable event identifiers, surfaced to the application as numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventId {
    /// Repeated 133 faults: the radio stack needs a restart
    UnhealthyBluetooth,
    ExchangeFailed,
    InvalidPayload,
    ServerStartFailed,
    ConfigReplaced,
}

impl EventId {
    pub fn code(&self) -> u32 {
        match self {
            Self::UnhealthyBluetooth => 1000,
            Self::ExchangeFailed => 1001,
            Self::InvalidPayload => 1002,
            Self::ServerStartFailed => 1003,
            Self::ConfigReplaced => 1004,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProximityEvent {
    pub level: EventLevel,
    pub id: EventId,
    pub message: String,
    pub cause: Option<String>,
}

impl ProximityEvent {
    pub fn new(level: EventLevel, id: EventId, message: impl Into<String>) -> Self {
        Self {
            level,
            id,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

/// Receives events for the application (UI, analytics, restart prompts)
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProximityEvent);
}

/// Forwards events to `tracing` at the matching level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ProximityEvent) {
        let code = event.id.code();
        let cause = event.cause.as_deref().unwrap_or("-");
        match event.level {
            EventLevel::Verbose => tracing::trace!(event_id = code, cause, "{}", event.message),
            EventLevel::Debug => tracing::debug!(event_id = code, cause, "{}", event.message),
            EventLevel::Info => tracing::info!(event_id = code, cause, "{}", event.message),
            EventLevel::Error => tracing::error!(event_id = code, cause, "{}", event.message),
        }
    }
}
