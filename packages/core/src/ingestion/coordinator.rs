//! Coordinates the two ingestion sources: prefers the EventSub WebSocket,
//! fails over to IRC on subscription or connection failure, and reconnects
//! with exponential backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::events::{EventEmitter, IngestionEvent};
use crate::health::{HealthReporter, HealthStatus};
use crate::model::Event;
use crate::utils::now_millis;

use super::EventSource;

/// Runs the active-source-with-failover loop until `cancel` fires.
///
/// `on_event` is invoked for every event from the currently active source,
/// inside its own error boundary so one bad handler never stops the stream.
pub struct IngestionCoordinator {
    eventsub: Arc<dyn EventSource>,
    irc: Arc<dyn EventSource>,
    backoff: BackoffPolicy,
    emitter: Arc<dyn EventEmitter>,
    health: Arc<HealthReporter>,
    prefer_eventsub: AtomicBool,
}

impl IngestionCoordinator {
    #[must_use]
    pub fn new(
        eventsub: Arc<dyn EventSource>,
        irc: Arc<dyn EventSource>,
        emitter: Arc<dyn EventEmitter>,
        health: Arc<HealthReporter>,
    ) -> Self {
        Self {
            eventsub,
            irc,
            backoff: BackoffPolicy::default(),
            emitter,
            health,
            prefer_eventsub: AtomicBool::new(true),
        }
    }

    /// Active source name, for diagnostics/tests.
    #[must_use]
    pub fn active_source_name(&self) -> &'static str {
        if self.prefer_eventsub.load(Ordering::SeqCst) {
            self.eventsub.source_name()
        } else {
            self.irc.source_name()
        }
    }

    pub async fn run<F>(&self, cancel: CancellationToken, mut on_event: F)
    where
        F: FnMut(Event) + Send,
    {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let prefer_eventsub = self.prefer_eventsub.load(Ordering::SeqCst);
            let source: &Arc<dyn EventSource> = if prefer_eventsub { &self.eventsub } else { &self.irc };

            match source.connect().await {
                Ok(()) => {
                    attempt = 0;
                    self.health.report("event_ingestion", HealthStatus::Healthy, None);
                    self.emitter.emit_ingestion(IngestionEvent::SourceActive {
                        source: source.source_name().to_string(),
                        timestamp: now_millis(),
                    });

                    let mut stream = source.events();
                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                source.disconnect().await;
                                return;
                            }
                            next = stream.next() => {
                                match next {
                                    Some(event) => on_event(event),
                                    None => break,
                                }
                            }
                        }
                    }

                    source.disconnect().await;
                    self.emitter.emit_ingestion(IngestionEvent::SourceLost {
                        source: source.source_name().to_string(),
                        timestamp: now_millis(),
                    });
                }
                Err(e) => {
                    log::warn!("{} connect failed: {e}", source.source_name());
                    self.health.report(
                        "event_ingestion",
                        HealthStatus::Degraded,
                        Some(format!("{} connect failed: {e}", source.source_name())),
                    );
                    if prefer_eventsub {
                        self.prefer_eventsub.store(false, Ordering::SeqCst);
                        // Retry immediately on the fallback before backing off.
                        continue;
                    }
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::events::NoopEventEmitter;
    use crate::model::ChatMessage;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    struct FailingSource;

    #[async_trait::async_trait]
    impl EventSource for FailingSource {
        async fn connect(&self) -> AppResult<()> {
            Err(crate::error::IngestionError::Connect("refused".into()).into())
        }
        async fn disconnect(&self) {}
        fn is_connected(&self) -> bool {
            false
        }
        fn source_name(&self) -> &'static str {
            "eventsub"
        }
        fn events(&self) -> UnboundedReceiverStream<Event> {
            let (_tx, rx) = mpsc::unbounded_channel();
            UnboundedReceiverStream::new(rx)
        }
    }

    struct OneShotSource {
        connected: StdAtomicBool,
    }

    #[async_trait::async_trait]
    impl EventSource for OneShotSource {
        async fn connect(&self) -> AppResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn source_name(&self) -> &'static str {
            "irc"
        }
        fn events(&self) -> UnboundedReceiverStream<Event> {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(Event::Chat(ChatMessage {
                author_login: "viewer".into(),
                author_display: "Viewer".into(),
                author_id: "1".into(),
                channel_login: "bc".into(),
                channel_id: "2".into(),
                text: "!stop".into(),
                is_broadcaster: false,
                is_moderator: false,
                is_vip: false,
                is_subscriber: false,
            }));
            // Dropping `tx` here closes the stream after the single event,
            // so the run loop falls through to backoff instead of blocking.
            UnboundedReceiverStream::new(rx)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_primary_falls_over_to_secondary_and_delivers_its_event() {
        let eventsub: Arc<dyn EventSource> = Arc::new(FailingSource);
        let irc: Arc<dyn EventSource> = Arc::new(OneShotSource { connected: StdAtomicBool::new(false) });
        let emitter = Arc::new(NoopEventEmitter);
        let health = Arc::new(HealthReporter::new(emitter.clone()));
        let coordinator = IngestionCoordinator::new(eventsub, irc, emitter, health);

        let cancel = CancellationToken::new();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);

        let cancel_for_run = cancel.clone();
        let run = tokio::spawn(async move {
            coordinator
                .run(cancel_for_run.clone(), move |event| {
                    received_clone.lock().unwrap().push(event);
                    cancel_for_run.cancel();
                })
                .await;
        });

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("coordinator run should finish once cancelled")
            .unwrap();

        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
