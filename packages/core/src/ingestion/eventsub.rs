//! EventSub WebSocket source.
//!
//! Connects, waits for `session_welcome`, then asks the platform client to
//! subscribe `channel.chat.message` (fatal if it fails) and `channel.raid`
//! (tolerated if it fails). Frames are demultiplexed by `metadata.message_type`
//! the way the reference OBS client demultiplexes responses vs. broadcast
//! events off a single socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{AppResult, IngestionError};
use crate::model::{ChatMessage, Event, RaidEvent};
use crate::platform::SubscriptionClient;

use super::EventSource;

const EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

pub struct EventSubSource {
    broadcaster_user_id: String,
    subscriber: Arc<dyn SubscriptionClient>,
    connected: Arc<AtomicBool>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl EventSubSource {
    #[must_use]
    pub fn new(broadcaster_user_id: String, subscriber: Arc<dyn SubscriptionClient>) -> Arc<Self> {
        Arc::new(Self {
            broadcaster_user_id,
            subscriber,
            connected: Arc::new(AtomicBool::new(false)),
            rx: Mutex::new(None),
            cancel: Mutex::new(None),
        })
    }
}

#[derive(Deserialize)]
struct Envelope {
    metadata: Metadata,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct Metadata {
    message_type: String,
}

#[async_trait]
impl EventSource for EventSubSource {
    async fn connect(&self) -> AppResult<()> {
        let (ws, _) = tokio_tungstenite::connect_async(EVENTSUB_WS_URL)
            .await
            .map_err(|e| IngestionError::Connect(e.to_string()))?;
        let (_write, mut read) = ws.split();

        // First frame must be session_welcome before any subscription can be made.
        let session_id = loop {
            let Some(Ok(msg)) = read.next().await else {
                return Err(IngestionError::Closed.into());
            };
            let Message::Text(text) = msg else { continue };
            let envelope: Envelope = serde_json::from_str(&text)
                .map_err(|e| IngestionError::Decode(e.to_string()))?;
            if envelope.metadata.message_type == "session_welcome" {
                let session_id = envelope.payload["session"]["id"]
                    .as_str()
                    .ok_or_else(|| IngestionError::Decode("missing session id".into()))?
                    .to_string();
                break session_id;
            }
        };

        self.subscriber
            .create_subscription(
                "channel.chat.message",
                "1",
                &self.broadcaster_user_id,
                &session_id,
            )
            .await
            .map_err(|e| IngestionError::Subscription(e.to_string()))?;

        if let Err(e) = self
            .subscriber
            .create_subscription("channel.raid", "1", &self.broadcaster_user_id, &session_id)
            .await
        {
            log::warn!("raid subscription failed (tolerated): {e}");
        }

        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        *self.rx.lock() = Some(rx);

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        self.connected.store(true, Ordering::SeqCst);
        let connected = Arc::clone(&self.connected);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = read.next() => {
                        match next {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(envelope) = serde_json::from_str::<Envelope>(&text) {
                                    if envelope.metadata.message_type == "notification" {
                                        if let Some(event) = decode_notification(&envelope.payload) {
                                            let _ = tx.send(event);
                                        }
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(_)) => break,
                            _ => {}
                        }
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        self.connected.store(false, Ordering::SeqCst);
        *self.rx.lock() = None;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn source_name(&self) -> &'static str {
        "eventsub"
    }

    fn events(&self) -> UnboundedReceiverStream<Event> {
        let rx = self
            .rx
            .lock()
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);
        UnboundedReceiverStream::new(rx)
    }
}

fn decode_notification(payload: &serde_json::Value) -> Option<Event> {
    let subscription_type = payload["subscription"]["type"].as_str()?;
    let event = &payload["event"];

    match subscription_type {
        "channel.chat.message" => Some(Event::Chat(ChatMessage {
            author_login: event["chatter_user_login"].as_str()?.to_string(),
            author_display: event["chatter_user_name"].as_str().unwrap_or_default().to_string(),
            author_id: event["chatter_user_id"].as_str()?.to_string(),
            channel_login: event["broadcaster_user_login"].as_str().unwrap_or_default().to_string(),
            channel_id: event["broadcaster_user_id"].as_str().unwrap_or_default().to_string(),
            text: event["message"]["text"].as_str()?.to_string(),
            is_broadcaster: has_badge(event, "broadcaster"),
            is_moderator: has_badge(event, "moderator"),
            is_vip: has_badge(event, "vip"),
            is_subscriber: has_badge(event, "subscriber"),
        })),
        "channel.raid" => Some(Event::Raid(RaidEvent {
            raider_login: event["from_broadcaster_user_login"].as_str()?.to_string(),
            raider_id: event["from_broadcaster_user_id"].as_str()?.to_string(),
            viewer_count: event["viewers"].as_u64().unwrap_or(0) as u32,
        })),
        _ => None,
    }
}

fn has_badge(event: &serde_json::Value, set_id: &str) -> bool {
    event["badges"]
        .as_array()
        .map(|badges| badges.iter().any(|b| b["set_id"].as_str() == Some(set_id)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_chat_notification_with_role_badges() {
        let payload = serde_json::json!({
            "subscription": { "type": "channel.chat.message" },
            "event": {
                "chatter_user_login": "viewer1",
                "chatter_user_name": "Viewer1",
                "chatter_user_id": "123",
                "broadcaster_user_login": "bc",
                "broadcaster_user_id": "456",
                "message": { "text": "!watch abc" },
                "badges": [{ "set_id": "moderator" }],
            }
        });
        let event = decode_notification(&payload).unwrap();
        match event {
            Event::Chat(msg) => {
                assert_eq!(msg.author_login, "viewer1");
                assert!(msg.is_moderator);
                assert!(!msg.is_broadcaster);
            }
            _ => panic!("expected chat event"),
        }
    }

    #[test]
    fn decodes_raid_notification() {
        let payload = serde_json::json!({
            "subscription": { "type": "channel.raid" },
            "event": {
                "from_broadcaster_user_login": "raider",
                "from_broadcaster_user_id": "789",
                "viewers": 42,
            }
        });
        let event = decode_notification(&payload).unwrap();
        match event {
            Event::Raid(r) => {
                assert_eq!(r.raider_login, "raider");
                assert_eq!(r.viewer_count, 42);
            }
            _ => panic!("expected raid event"),
        }
    }

    #[test]
    fn unknown_subscription_type_is_dropped() {
        let payload = serde_json::json!({
            "subscription": { "type": "channel.follow" },
            "event": {}
        });
        assert!(decode_notification(&payload).is_none());
    }
}
