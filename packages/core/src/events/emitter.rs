//! Event emitter abstraction for decoupling services from transport.

use super::{HealthEvent, IngestionEvent, PlaybackEvent, SceneEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    fn emit_health(&self, event: HealthEvent);
    fn emit_playback(&self, event: PlaybackEvent);
    fn emit_scene(&self, event: SceneEvent);
    fn emit_ingestion(&self, event: IngestionEvent);
}

/// No-op emitter; the default when nothing downstream is listening.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_health(&self, _event: HealthEvent) {}
    fn emit_playback(&self, _event: PlaybackEvent) {}
    fn emit_scene(&self, _event: SceneEvent) {}
    fn emit_ingestion(&self, _event: IngestionEvent) {}
}

/// Logs every event at debug level. Useful during development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_health(&self, event: HealthEvent) {
        log::debug!(target: "events", "health_event: {:?}", event);
    }
    fn emit_playback(&self, event: PlaybackEvent) {
        log::debug!(target: "events", "playback_event: {:?}", event);
    }
    fn emit_scene(&self, event: SceneEvent) {
        log::debug!(target: "events", "scene_event: {:?}", event);
    }
    fn emit_ingestion(&self, event: IngestionEvent) {
        log::debug!(target: "events", "ingestion_event: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmitter {
        health_count: AtomicUsize,
    }

    impl EventEmitter for CountingEmitter {
        fn emit_health(&self, _event: HealthEvent) {
            self.health_count.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_playback(&self, _event: PlaybackEvent) {}
        fn emit_scene(&self, _event: SceneEvent) {}
        fn emit_ingestion(&self, _event: IngestionEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_health_events() {
        let emitter = CountingEmitter {
            health_count: AtomicUsize::new(0),
        };
        emitter.emit_health(HealthEvent {
            component: "scene_controller".into(),
            status: "unhealthy".into(),
            reason: None,
            timestamp: 0,
        });
        assert_eq!(emitter.health_count.load(Ordering::SeqCst), 1);
    }
}
