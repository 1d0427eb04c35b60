use crate::logging::{LogEvent, LogFields, LogLevel};
use serde_json::json;
use std::time::Duration;

/// Counters accumulated by the transition pipeline.
#[derive(Debug, Default, Clone)]
pub struct RouterMetrics {
    transitions: u64,
    completed: u64,
    cancelled: u64,
    failed: u64,
    guard_calls: u64,
    redirects: u64,
    fallbacks: u64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transition(&mut self) {
        self.transitions = self.transitions.saturating_add(1);
    }

    pub fn record_completed(&mut self) {
        self.completed = self.completed.saturating_add(1);
    }

    pub fn record_cancelled(&mut self) {
        self.cancelled = self.cancelled.saturating_add(1);
    }

    pub fn record_failed(&mut self) {
        self.failed = self.failed.saturating_add(1);
    }

    pub fn record_guard_calls(&mut self, count: usize) {
        if count > 0 {
            self.guard_calls = self.guard_calls.saturating_add(count as u64);
        }
    }

    pub fn record_redirect(&mut self) {
        self.redirects = self.redirects.saturating_add(1);
    }

    pub fn record_fallback(&mut self) {
        self.fallbacks = self.fallbacks.saturating_add(1);
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            transitions: self.transitions,
            completed: self.completed,
            cancelled: self.cancelled,
            failed: self.failed,
            guard_calls: self.guard_calls,
            redirects: self.redirects,
            fallbacks: self.fallbacks,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub transitions: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub guard_calls: u64,
    pub redirects: u64,
    pub fallbacks: u64,
}

impl MetricSnapshot {
    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("transitions".to_string(), json!(self.transitions));
        map.insert("completed".to_string(), json!(self.completed));
        map.insert("cancelled".to_string(), json!(self.cancelled));
        map.insert("failed".to_string(), json!(self.failed));
        map.insert("guard_calls".to_string(), json!(self.guard_calls));
        map.insert("redirects".to_string(), json!(self.redirects));
        map.insert("fallbacks".to_string(), json!(self.fallbacks));
        map
    }

    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(
            LogLevel::Info,
            target.to_string(),
            "router_metrics".to_string(),
            self.as_fields(),
        )
    }
}
