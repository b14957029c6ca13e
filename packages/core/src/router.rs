//! Command router: turns ingested events into playback/shoutout side
//! effects. Every handler catches and logs its own failures so one bad
//! command never stops the ingestion loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalService;
use crate::command::parse_command;
use crate::config::{AppConfig, ShoutoutConfig};
use crate::feedback::ChatFeedbackService;
use crate::model::{Command, Event};
use crate::platform::{extract_clip_id, PlatformClient};
use crate::playback::PlaybackEngine;
use crate::search::{format_shoutout_message, ClipSearchService, ShoutoutClipPicker};

/// Wires every per-command service together and dispatches ingested events.
pub struct CommandRouter {
    platform: Arc<dyn PlatformClient>,
    approval: Arc<ApprovalService>,
    playback: PlaybackEngine,
    search: ClipSearchService,
    shoutout_picker: ShoutoutClipPicker,
    feedback: Arc<ChatFeedbackService>,
    shoutout_config: ShoutoutConfig,
    own_broadcaster_id: String,
    cancel: CancellationToken,
}

impl CommandRouter {
    #[must_use]
    pub fn new(
        config: &AppConfig,
        platform: Arc<dyn PlatformClient>,
        approval: Arc<ApprovalService>,
        playback: PlaybackEngine,
        feedback: Arc<ChatFeedbackService>,
        own_broadcaster_id: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            search: ClipSearchService::new(Arc::clone(&platform), config.clip_search.clone()),
            shoutout_picker: ShoutoutClipPicker::new(Arc::clone(&platform), config.shoutout.clone()),
            shoutout_config: config.shoutout.clone(),
            platform,
            approval,
            playback,
            feedback,
            own_broadcaster_id,
            cancel,
        }
    }

    /// Entry point for every event the active ingestion source produces.
    pub async fn handle_event(&self, event: Event) {
        let Event::Chat(msg) = event else {
            return;
        };

        if self.approval.try_consume_response(&msg) {
            return;
        }

        let Some(command) = parse_command(&msg) else {
            return;
        };

        let result = match command {
            Command::WatchClip { clip_identifier, .. } => self.handle_watch_clip(&clip_identifier).await,
            Command::WatchSearch {
                broadcaster_name,
                search_terms,
                origin,
            } => self.handle_watch_search(&broadcaster_name, &search_terms, origin).await,
            Command::Stop { .. } => {
                self.playback.stop();
                Ok(())
            }
            Command::Replay { .. } => {
                if !self.playback.replay() {
                    self.feedback.clip_not_found().await?;
                }
                Ok(())
            }
            Command::Shoutout { target_username, .. } => self.handle_shoutout(&target_username).await,
        };

        if let Err(e) = result {
            log::warn!("command handling failed: {e}");
            let _ = self.feedback.generic_error().await;
        }
    }

    async fn handle_watch_clip(&self, identifier: &str) -> crate::error::AppResult<()> {
        // The command parser already extracted a bare id out of any URL shape;
        // `extract_clip_id` here is idempotent so an opaque id passes through.
        let id = extract_clip_id(identifier).unwrap_or_else(|| identifier.to_string());
        let mut clip = self.platform.get_clip_by_id(&id).await?;
        if clip.is_none() {
            clip = self.platform.get_clip_by_url(identifier).await?;
        }

        match clip {
            Some(clip) => {
                self.playback.enqueue(clip);
                Ok(())
            }
            None => {
                self.feedback.clip_not_found().await?;
                Ok(())
            }
        }
    }

    async fn handle_watch_search(
        &self,
        broadcaster_name: &str,
        search_terms: &str,
        origin: crate::model::ChatMessage,
    ) -> crate::error::AppResult<()> {
        let Some(clip) = self.search.search_top(broadcaster_name, search_terms).await? else {
            self.feedback.search_no_results(search_terms).await?;
            return Ok(());
        };

        if !self.approval.requires_approval(&origin) {
            self.playback.enqueue(clip);
            return Ok(());
        }

        let (id, fut) = self.approval.request(origin, clip.clone(), self.cancel.child_token());
        self.feedback.awaiting_approval(&id).await?;

        if fut.await {
            self.playback.enqueue(clip);
        } else {
            self.feedback.approval_denied().await?;
        }

        Ok(())
    }

    async fn handle_shoutout(&self, target_username: &str) -> crate::error::AppResult<()> {
        let Some(target_id) = self.platform.get_broadcaster_id_by_name(target_username).await? else {
            self.feedback.shoutout_no_clips(target_username).await?;
            return Ok(());
        };

        let Some(clip) = self.shoutout_picker.pick(&target_id).await? else {
            self.feedback.shoutout_no_clips(target_username).await?;
            return Ok(());
        };

        self.playback.enqueue(clip);

        if let Some(template) = &self.shoutout_config.message_template {
            let info = self.platform.get_channel_info(&target_id).await.unwrap_or_default();
            let message = format_shoutout_message(
                template,
                target_username,
                info.broadcaster_display.as_deref().unwrap_or(target_username),
                info.game_name.as_deref().unwrap_or("something"),
            );
            if let Err(e) = self.feedback.send(&message).await {
                log::warn!("shoutout chat message failed (continuing): {e}");
            }
        }

        if self.shoutout_config.use_native_shoutout {
            if let Err(e) = self.platform.send_shoutout(&self.own_broadcaster_id, &target_id).await {
                log::warn!("native shoutout call failed (continuing): {e}");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::model::ClipData;
    use crate::platform::ChannelInfo;
    use crate::scene::SceneController;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex as SyncMutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakePlatform {
        clip: Option<ClipData>,
        broadcaster_id: AsyncMutex<Option<String>>,
        sent_messages: SyncMutex<Vec<String>>,
    }

    impl FakePlatform {
        fn new(clip: Option<ClipData>, broadcaster_id: Option<String>) -> Self {
            Self {
                clip,
                broadcaster_id: AsyncMutex::new(broadcaster_id),
                sent_messages: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PlatformClient for FakePlatform {
        async fn get_clip_by_id(&self, id: &str) -> AppResult<Option<ClipData>> {
            Ok(self.clip.clone().filter(|c| c.id == id))
        }
        async fn get_clip_by_url(&self, _url: &str) -> AppResult<Option<ClipData>> {
            Ok(None)
        }
        async fn get_clips_by_broadcaster(
            &self,
            _broadcaster_id: &str,
            _count: u32,
            _started_at: Option<DateTime<Utc>>,
            _ended_at: Option<DateTime<Utc>>,
        ) -> AppResult<Vec<ClipData>> {
            Ok(self.clip.clone().into_iter().collect())
        }
        async fn get_broadcaster_id_by_name(&self, _login: &str) -> AppResult<Option<String>> {
            Ok(self.broadcaster_id.lock().await.clone())
        }
        async fn get_authenticated_user_id(&self) -> AppResult<String> {
            Ok("own".into())
        }
        async fn get_channel_info(&self, _broadcaster_id: &str) -> AppResult<ChannelInfo> {
            Ok(ChannelInfo::default())
        }
        async fn send_chat_message(&self, _broadcaster_id: &str, text: &str) -> AppResult<()> {
            self.sent_messages.lock().push(text.to_string());
            Ok(())
        }
        async fn send_shoutout(&self, _from: &str, _to: &str) -> AppResult<()> {
            Ok(())
        }
    }

    fn clip(id: &str, title: &str) -> ClipData {
        ClipData {
            id: id.into(),
            url: format!("https://clips.twitch.tv/{id}"),
            title: title.into(),
            creator_id: "1".into(),
            creator_login: "creator".into(),
            creator_display: "Creator".into(),
            broadcaster_id: "2".into(),
            broadcaster_login: "broadcaster".into(),
            broadcaster_display: "Broadcaster".into(),
            game_name: "Just Chatting".into(),
            duration_seconds: 1,
            created_at: Utc::now(),
            view_count: 0,
        }
    }

    fn viewer(text: &str) -> ChatMessage {
        ChatMessage {
            author_login: "viewer".into(),
            author_display: "Viewer".into(),
            author_id: "1".into(),
            channel_login: "bc".into(),
            channel_id: "2".into(),
            text: text.into(),
            is_broadcaster: false,
            is_moderator: false,
            is_vip: false,
            is_subscriber: false,
        }
    }

    fn moderator(text: &str) -> ChatMessage {
        let mut m = viewer(text);
        m.is_moderator = true;
        m
    }

    fn test_router(platform: Arc<FakePlatform>) -> CommandRouter {
        let config = AppConfig::default();
        let emitter = Arc::new(NoopEventEmitter);
        let scene = SceneController::disconnected_for_tests();
        let playback = PlaybackEngine::start(scene, emitter, CancellationToken::new());
        let approval = ApprovalService::new(config.clip_search.clone());
        let feedback = Arc::new(ChatFeedbackService::new(
            platform.clone() as Arc<dyn PlatformClient>,
            config.chat_feedback.clone(),
            "bc".into(),
        ));
        CommandRouter::new(
            &config,
            platform as Arc<dyn PlatformClient>,
            approval,
            playback,
            feedback,
            "own".into(),
            CancellationToken::new(),
        )
    }

    /// Scenario 1 from the concrete end-to-end list: watch by id enqueues the
    /// clip and the engine drains it back to idle, recording it as last played.
    #[tokio::test]
    async fn watch_by_id_enqueues_and_engine_drains_to_idle() {
        let platform = Arc::new(FakePlatform::new(Some(clip("abc123", "a clip")), None));
        let router = test_router(platform);

        router.handle_event(Event::Chat(viewer("!watch abc123"))).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(
            router.playback.queue().last_played().map(|c| c.id),
            Some("abc123".into())
        );
    }

    /// Scenario 3: a non-exempt viewer's search match requires approval; a
    /// moderator's `!deny` keeps the clip out of the queue entirely.
    #[tokio::test]
    async fn watch_search_requiring_approval_is_denied() {
        let platform = Arc::new(FakePlatform::new(
            Some(clip("xyz999", "Epic Block Steal")),
            Some("42".into()),
        ));
        let router = Arc::new(test_router(Arc::clone(&platform)));

        let handler_router = Arc::clone(&router);
        let handle = tokio::spawn(async move {
            handler_router
                .handle_event(Event::Chat(viewer("!watch @streamerX epic block steal")))
                .await;
        });

        // Wait for the awaiting-approval feedback message, then pull the id out
        // of it the same way a moderator reading chat would.
        let id = loop {
            if let Some(msg) = platform.sent_messages.lock().first().cloned() {
                break msg.split_whitespace().nth(2).unwrap().to_string();
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };

        router
            .handle_event(Event::Chat(moderator(&format!("!deny {id}"))))
            .await;

        handle.await.unwrap();
        assert!(router.playback.queue().is_empty());
        assert!(router.playback.queue().last_played().is_none());
    }
}
