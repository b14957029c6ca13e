//! Shared health reporting across every supervised component.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::events::{EventEmitter, HealthEvent};
use crate::utils::now_millis;

const MAX_REPAIR_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub last_error: Option<String>,
    pub last_checked_millis: u64,
    pub repair_actions: VecDeque<String>,
}

impl Default for ComponentHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_error: None,
            last_checked_millis: now_millis(),
            repair_actions: VecDeque::new(),
        }
    }
}

/// Concurrent map of component name -> health, with change-triggered events.
pub struct HealthReporter {
    components: DashMap<String, ComponentHealth>,
    emitter: Arc<dyn EventEmitter>,
}

impl HealthReporter {
    #[must_use]
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            components: DashMap::new(),
            emitter,
        }
    }

    /// Updates a component's status. Emits a `HealthChanged` event and logs a
    /// warning only when the status actually transitions.
    pub fn report(&self, component: &str, status: HealthStatus, error: Option<String>) {
        let mut changed = false;
        {
            let mut entry = self
                .components
                .entry(component.to_string())
                .or_insert_with(ComponentHealth::default);
            if entry.status != status {
                changed = true;
            }
            entry.status = status;
            entry.last_error = error.clone();
            entry.last_checked_millis = now_millis();
        }

        if changed {
            if status != HealthStatus::Healthy {
                log::warn!(
                    "component '{}' health changed to {:?}: {:?}",
                    component,
                    status,
                    error
                );
            }
            self.emitter.emit_health(HealthEvent {
                component: component.to_string(),
                status: status.as_str().to_string(),
                reason: error,
                timestamp: now_millis(),
            });
        }
    }

    /// Appends a repair action, capped at [`MAX_REPAIR_HISTORY`] entries
    /// (oldest evicted first).
    pub fn record_repair(&self, component: &str, action: impl Into<String>) {
        let mut entry = self
            .components
            .entry(component.to_string())
            .or_insert_with(ComponentHealth::default);
        entry.repair_actions.push_back(action.into());
        while entry.repair_actions.len() > MAX_REPAIR_HISTORY {
            entry.repair_actions.pop_front();
        }
    }

    /// Point-in-time clone of every tracked component's health.
    #[must_use]
    pub fn snapshot(&self) -> std::collections::HashMap<String, ComponentHealth> {
        self.components
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;

    #[test]
    fn report_is_idempotent_for_unchanged_status() {
        let reporter = HealthReporter::new(Arc::new(NoopEventEmitter));
        reporter.report("scene_controller", HealthStatus::Healthy, None);
        reporter.report("scene_controller", HealthStatus::Healthy, None);
        let snap = reporter.snapshot();
        assert_eq!(snap["scene_controller"].status, HealthStatus::Healthy);
    }

    #[test]
    fn repair_history_is_capped() {
        let reporter = HealthReporter::new(Arc::new(NoopEventEmitter));
        for i in 0..30 {
            reporter.record_repair("scene_controller", format!("repair-{i}"));
        }
        let snap = reporter.snapshot();
        assert_eq!(snap["scene_controller"].repair_actions.len(), MAX_REPAIR_HISTORY);
        assert_eq!(snap["scene_controller"].repair_actions.front().unwrap(), "repair-10");
    }
}
