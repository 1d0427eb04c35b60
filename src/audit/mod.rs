//! Transition lifecycle audit utilities.
//!
//! The pipeline emits a structured record at each major checkpoint so callers
//! can observe guard outcomes, commits and history updates without hooking
//! into the state machine itself. Records capture a stage identifier plus
//! structured metadata keyed by string.

use std::time::SystemTime;

use serde_json::Value;

/// Distinct checkpoints emitted by the transition pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAuditStage {
    /// A transition entered the pipeline.
    TransitionStarted,
    /// A `can_unload` hook settled.
    GuardUnloadEvaluated,
    /// A `can_load` hook settled.
    GuardLoadEvaluated,
    /// The next tree replaced the committed tree.
    TreeCommitted,
    /// Viewport agents swapped to their new occupants.
    ViewportsSwapped,
    /// The history collaborator was invoked.
    HistoryUpdated,
    /// The transition settled successfully.
    TransitionCompleted,
    /// The transition was cancelled (guard refusal or supersession).
    TransitionCancelled,
    /// The transition failed (a hook raised an error).
    TransitionFailed,
    /// A load queued from within a guard hook was replayed.
    QueuedLoadDrained,
}

/// Structured audit entry.
#[derive(Debug, Clone)]
pub struct RouterAuditEvent {
    pub timestamp: SystemTime,
    pub stage: RouterAuditStage,
    pub details: Vec<(String, Value)>,
}

impl RouterAuditEvent {
    fn new(stage: RouterAuditStage) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage,
            details: Vec::new(),
        }
    }
}

/// Builder helper to append fields ergonomically.
pub struct RouterAuditEventBuilder {
    event: RouterAuditEvent,
}

impl RouterAuditEventBuilder {
    pub fn new(stage: RouterAuditStage) -> Self {
        Self {
            event: RouterAuditEvent::new(stage),
        }
    }

    pub fn detail(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.event.details.push((key.into(), value));
        self
    }

    pub fn finish(self) -> RouterAuditEvent {
        self.event
    }
}

/// Trait implemented by any audit sink.
pub trait RouterAudit: Send + Sync {
    fn record(&self, event: RouterAuditEvent);
}

/// Default no-op implementation used when auditing is disabled.
#[derive(Debug, Default)]
pub struct NullRouterAudit;

impl RouterAudit for NullRouterAudit {
    fn record(&self, _event: RouterAuditEvent) {}
}
