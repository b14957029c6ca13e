//! Keeps the scene controller connected and the compositor configuration
//! free of drift: connect with unbounded backoff, then periodically check
//! in for configuration drift and reconnect with a bounded attempt cap.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::health::{HealthReporter, HealthStatus};

use super::SceneController;

const DRIFT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const BOUNDED_RECONNECT_ATTEMPTS: u32 = 10;

/// Supervises a [`SceneController`]'s connection lifetime and configuration.
pub struct SceneHealthSupervisor {
    controller: Arc<SceneController>,
    health: Arc<HealthReporter>,
    backoff: BackoffPolicy,
}

impl SceneHealthSupervisor {
    #[must_use]
    pub fn new(controller: Arc<SceneController>, health: Arc<HealthReporter>) -> Self {
        Self {
            controller,
            health,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Runs until `cancel` fires. Never returns early on connection loss;
    /// reconnects with a bounded burst of attempts before falling back to
    /// the outer unbounded-backoff loop.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            self.connect_with_unbounded_backoff(&cancel).await;
            if cancel.is_cancelled() {
                return;
            }

            self.health.report("scene_controller", HealthStatus::Healthy, None);
            self.watch_until_disconnected(&cancel).await;
            if cancel.is_cancelled() {
                return;
            }

            if !self.reconnect_bounded(&cancel).await {
                self.health.report(
                    "scene_controller",
                    HealthStatus::Unhealthy,
                    Some("exhausted bounded reconnect attempts".into()),
                );
            }
        }
    }

    async fn connect_with_unbounded_backoff(&self, cancel: &CancellationToken) {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.controller.connect().await {
                Ok(()) => {
                    if let Err(e) = self.controller.ensure_clip_scene_and_source_exists().await {
                        log::warn!("initial scene/source provisioning failed: {e}");
                    }
                    return;
                }
                Err(e) => {
                    log::warn!("scene controller connect failed: {e}");
                    self.health.report("scene_controller", HealthStatus::Unhealthy, Some(e.to_string()));
                }
            }

            let delay = self.backoff.delay_for(attempt);
            attempt += 1;
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn watch_until_disconnected(&self, cancel: &CancellationToken) {
        let mut interval = tokio::time::interval(DRIFT_CHECK_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it.

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if !self.controller.is_connected() {
                        self.health.report(
                            "scene_controller",
                            HealthStatus::Unhealthy,
                            Some("connection lost".into()),
                        );
                        return;
                    }
                    match self.controller.check_configuration_drift(&self.health).await {
                        Ok(true) => log::info!("repaired scene configuration drift"),
                        Ok(false) => {}
                        Err(e) => log::warn!("drift check failed: {e}"),
                    }
                }
            }

            if !self.controller.is_connected() {
                self.health.report(
                    "scene_controller",
                    HealthStatus::Unhealthy,
                    Some("connection lost".into()),
                );
                return;
            }
        }
    }

    async fn reconnect_bounded(&self, cancel: &CancellationToken) -> bool {
        for attempt in 0..BOUNDED_RECONNECT_ATTEMPTS {
            if cancel.is_cancelled() {
                return true; // shutting down, not a failure
            }
            tokio::select! {
                _ = cancel.cancelled() => return true,
                _ = tokio::time::sleep(self.backoff.delay_for(attempt)) => {}
            }
            if self.controller.connect().await.is_ok() {
                if let Err(e) = self.controller.ensure_clip_scene_and_source_exists().await {
                    log::warn!("post-reconnect scene/source provisioning failed: {e}");
                }
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;

    #[tokio::test]
    async fn run_returns_promptly_once_cancelled() {
        let controller = SceneController::disconnected_for_tests();
        let health = Arc::new(HealthReporter::new(Arc::new(NoopEventEmitter)));
        let supervisor = SceneHealthSupervisor::new(controller, health);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(200), supervisor.run(cancel))
            .await
            .expect("run should return immediately when cancelled up front");
    }
}
