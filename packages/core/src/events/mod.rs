//! Event system for cross-cutting notifications.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! transport, so the core library never has to know whether anything is
//! listening (the tray UI, a diagnostics exporter, nothing at all).

mod emitter;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::model::PlaybackState;

/// Every cross-cutting notification the core can raise.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum DomainEvent {
    Health(HealthEvent),
    Playback(PlaybackEvent),
    Scene(SceneEvent),
    Ingestion(IngestionEvent),
}

/// A component's health status changed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEvent {
    pub component: String,
    pub status: String,
    pub reason: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    StateChanged {
        from: PlaybackState,
        to: PlaybackState,
        clip_id: Option<String>,
        timestamp: u64,
    },
    ClipQuarantined {
        clip_id: String,
        timestamp: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SceneEvent {
    Connected { timestamp: u64 },
    Disconnected { timestamp: u64 },
    ConfigurationDriftRepaired { timestamp: u64 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IngestionEvent {
    SourceActive { source: String, timestamp: u64 },
    SourceLost { source: String, timestamp: u64 },
}

impl From<HealthEvent> for DomainEvent {
    fn from(e: HealthEvent) -> Self {
        DomainEvent::Health(e)
    }
}
impl From<PlaybackEvent> for DomainEvent {
    fn from(e: PlaybackEvent) -> Self {
        DomainEvent::Playback(e)
    }
}
impl From<SceneEvent> for DomainEvent {
    fn from(e: SceneEvent) -> Self {
        DomainEvent::Scene(e)
    }
}
impl From<IngestionEvent> for DomainEvent {
    fn from(e: IngestionEvent) -> Self {
        DomainEvent::Ingestion(e)
    }
}
