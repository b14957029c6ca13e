//! IRC-over-WebSocket fallback source.
//!
//! Writer-actor + reader-loop split, exactly the shape of a typical chat-bot
//! fetcher: a dedicated task owns the socket write half and drains an
//! `mpsc` command queue; the reader loop owns the read half and responds to
//! `PING`, parses `PRIVMSG`/`USERNOTICE`, and can also be used to send chat
//! (shoutout/feedback) by pushing onto the same command queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{AppResult, IngestionError};
use crate::model::{ChatMessage, Event, RaidEvent};

use super::EventSource;

const IRC_WS_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

pub struct IrcSource {
    login: String,
    oauth_token: String,
    channel_login: String,
    connected: Arc<AtomicBool>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    cancel: Mutex<Option<CancellationToken>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl IrcSource {
    #[must_use]
    pub fn new(login: String, oauth_token: String, channel_login: String) -> Arc<Self> {
        Arc::new(Self {
            login,
            oauth_token,
            channel_login,
            connected: Arc::new(AtomicBool::new(false)),
            rx: Mutex::new(None),
            cancel: Mutex::new(None),
            outbound: Mutex::new(None),
        })
    }
}

#[async_trait]
impl EventSource for IrcSource {
    async fn connect(&self) -> AppResult<()> {
        let (ws, _) = tokio_tungstenite::connect_async(IRC_WS_URL)
            .await
            .map_err(|e| IngestionError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(format!("PASS oauth:{}", self.oauth_token)))
            .await
            .map_err(|e| IngestionError::Connect(e.to_string()))?;
        write
            .send(Message::Text(format!("NICK {}", self.login)))
            .await
            .map_err(|e| IngestionError::Connect(e.to_string()))?;
        write
            .send(Message::Text(
                "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            ))
            .await
            .map_err(|e| IngestionError::Connect(e.to_string()))?;
        write
            .send(Message::Text(format!("JOIN #{}", self.channel_login)))
            .await
            .map_err(|e| IngestionError::Connect(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
        *self.rx.lock() = Some(event_rx);

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock() = Some(outbound_tx);

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        self.connected.store(true, Ordering::SeqCst);
        let connected = Arc::clone(&self.connected);

        // Writer actor: owns the sink, drains the outbound queue.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_cancel.cancelled() => break,
                    line = outbound_rx.recv() => {
                        match line {
                            Some(line) => {
                                if write.send(Message::Text(line)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        let channel_login = self.channel_login.clone();
        let reply_tx = self.outbound.lock().clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = read.next() => {
                        match next {
                            Some(Ok(Message::Text(text))) => {
                                for line in text.lines() {
                                    handle_line(line, &channel_login, &event_tx, reply_tx.as_ref());
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
        *self.outbound.lock() = None;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn source_name(&self) -> &'static str {
        "irc"
    }

    fn events(&self) -> UnboundedReceiverStream<Event> {
        let rx = self
            .rx
            .lock()
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);
        UnboundedReceiverStream::new(rx)
    }

    async fn send_chat_message(&self, text: &str) -> AppResult<()> {
        let tx = self.outbound.lock().clone();
        match tx {
            Some(tx) => {
                let line = format!("PRIVMSG #{} :{}", self.channel_login, text);
                tx.send(line).map_err(|_| IngestionError::Closed)?;
                Ok(())
            }
            None => Err(IngestionError::Closed.into()),
        }
    }
}

fn handle_line(
    line: &str,
    channel_login: &str,
    event_tx: &mpsc::UnboundedSender<Event>,
    reply_tx: Option<&mpsc::UnboundedSender<String>>,
) {
    if let Some(server) = line.strip_prefix("PING ") {
        if let Some(tx) = reply_tx {
            let _ = tx.send(format!("PONG {server}"));
        }
        return;
    }

    let (tags, rest) = match line.strip_prefix('@') {
        Some(after_at) => match after_at.split_once(' ') {
            Some((tags, rest)) => (parse_tags(tags), rest),
            None => return,
        },
        None => (std::collections::HashMap::new(), line),
    };

    if rest.contains("PRIVMSG") {
        if let Some(chat) = parse_privmsg(&tags, rest, channel_login) {
            let _ = event_tx.send(Event::Chat(chat));
        }
    } else if rest.contains("USERNOTICE") && tags.get("msg-id").map(String::as_str) == Some("raid") {
        if let Some(raid) = parse_raid(&tags) {
            let _ = event_tx.send(Event::Raid(raid));
        }
    }
}

fn parse_tags(raw: &str) -> std::collections::HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_privmsg(
    tags: &std::collections::HashMap<String, String>,
    rest: &str,
    channel_login: &str,
) -> Option<ChatMessage> {
    let text = rest.splitn(2, " :").nth(1)?.to_string();
    let badges = tags.get("badges").cloned().unwrap_or_default();

    Some(ChatMessage {
        author_login: tags
            .get("display-name")
            .cloned()
            .unwrap_or_default()
            .to_lowercase(),
        author_display: tags.get("display-name").cloned().unwrap_or_default(),
        author_id: tags.get("user-id").cloned().unwrap_or_default(),
        channel_login: channel_login.to_string(),
        channel_id: tags.get("room-id").cloned().unwrap_or_default(),
        text,
        is_broadcaster: badges.contains("broadcaster/"),
        is_moderator: badges.contains("moderator/"),
        is_vip: badges.contains("vip/"),
        is_subscriber: badges.contains("subscriber/"),
    })
}

fn parse_raid(tags: &std::collections::HashMap<String, String>) -> Option<RaidEvent> {
    Some(RaidEvent {
        raider_login: tags.get("login").cloned()?,
        raider_id: tags.get("user-id").cloned().unwrap_or_default(),
        viewer_count: tags
            .get("msg-param-viewerCount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg_with_role_badges() {
        let tags = parse_tags("display-name=Viewer1;user-id=123;room-id=456;badges=moderator/1");
        let chat = parse_privmsg(&tags, "PRIVMSG #bc :!watch abc", "bc").unwrap();
        assert_eq!(chat.author_display, "Viewer1");
        assert_eq!(chat.text, "!watch abc");
        assert!(chat.is_moderator);
        assert!(!chat.is_vip);
    }

    #[test]
    fn parses_raid_usernotice() {
        let tags = parse_tags("msg-id=raid;login=raider;user-id=789;msg-param-viewerCount=42");
        let raid = parse_raid(&tags).unwrap();
        assert_eq!(raid.raider_login, "raider");
        assert_eq!(raid.viewer_count, 42);
    }

    #[test]
    fn handle_line_replies_pong_to_ping() {
        let (etx, _erx) = mpsc::unbounded_channel();
        let (rtx, mut rrx) = mpsc::unbounded_channel();
        handle_line("PING :tmi.twitch.tv", "bc", &etx, Some(&rtx));
        assert_eq!(rrx.try_recv().unwrap(), "PONG :tmi.twitch.tv");
    }
}
