//! Rate-limited chat feedback with standardized templates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::ChatFeedbackConfig;
use crate::error::AppResult;
use crate::platform::PlatformClient;

/// Sends short, templated chat replies, dropping bursts rather than queuing
/// them: a single global last-send timestamp gates every call.
pub struct ChatFeedbackService {
    platform: Arc<dyn PlatformClient>,
    config: ChatFeedbackConfig,
    broadcaster_id: String,
    last_sent: Mutex<Option<Instant>>,
}

impl ChatFeedbackService {
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformClient>, config: ChatFeedbackConfig, broadcaster_id: String) -> Self {
        Self {
            platform,
            config,
            broadcaster_id,
            last_sent: Mutex::new(None),
        }
    }

    /// Sends `text` if feedback is enabled and the rate limit allows it.
    /// Dropped messages are debug-logged, never queued.
    pub async fn send(&self, text: &str) -> AppResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        {
            let mut last_sent = self.last_sent.lock();
            let min_interval = Duration::from_secs_f64(self.config.min_interval_seconds.max(0.0));
            if let Some(last) = *last_sent {
                if last.elapsed() < min_interval {
                    log::debug!("dropping chat feedback, rate limit not elapsed: {text}");
                    return Ok(());
                }
            }
            *last_sent = Some(Instant::now());
        }

        self.platform.send_chat_message(&self.broadcaster_id, text).await
    }

    pub async fn clip_not_found(&self) -> AppResult<()> {
        self.send("Couldn't find that clip.").await
    }

    pub async fn shoutout_no_clips(&self, target: &str) -> AppResult<()> {
        self.send(&format!("No eligible clips found for @{target}.")).await
    }

    pub async fn awaiting_approval(&self, id: &str) -> AppResult<()> {
        self.send(&format!(
            "Waiting on a moderator: reply !approve {id} or !deny {id}."
        ))
        .await
    }

    pub async fn search_no_results(&self, terms: &str) -> AppResult<()> {
        self.send(&format!("No clips matched \"{terms}\".")).await
    }

    pub async fn approval_timeout(&self) -> AppResult<()> {
        self.send("Approval request timed out.").await
    }

    pub async fn approval_denied(&self) -> AppResult<()> {
        self.send("That clip request was denied.").await
    }

    pub async fn generic_error(&self) -> AppResult<()> {
        self.send("Something went wrong handling that command.").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClipData;
    use crate::platform::ChannelInfo;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPlatform {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl PlatformClient for CountingPlatform {
        async fn get_clip_by_id(&self, _id: &str) -> AppResult<Option<ClipData>> {
            Ok(None)
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
            Ok(Vec::new())
        }
        async fn get_broadcaster_id_by_name(&self, _login: &str) -> AppResult<Option<String>> {
            Ok(None)
        }
        async fn get_authenticated_user_id(&self) -> AppResult<String> {
            Ok("1".into())
        }
        async fn get_channel_info(&self, _broadcaster_id: &str) -> AppResult<ChannelInfo> {
            Ok(ChannelInfo::default())
        }
        async fn send_chat_message(&self, _broadcaster_id: &str, _text: &str) -> AppResult<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn send_shoutout(&self, _from: &str, _to: &str) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn burst_within_interval_is_dropped() {
        let platform = Arc::new(CountingPlatform { sent: AtomicUsize::new(0) });
        let config = ChatFeedbackConfig {
            enabled: true,
            min_interval_seconds: 60.0,
            show_approval_status: true,
        };
        let svc = ChatFeedbackService::new(platform.clone(), config, "1".into());

        svc.send("first").await.unwrap();
        svc.send("second").await.unwrap();

        assert_eq!(platform.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_feedback_never_sends() {
        let platform = Arc::new(CountingPlatform { sent: AtomicUsize::new(0) });
        let config = ChatFeedbackConfig {
            enabled: false,
            min_interval_seconds: 0.0,
            show_approval_status: true,
        };
        let svc = ChatFeedbackService::new(platform.clone(), config, "1".into());
        svc.clip_not_found().await.unwrap();
        assert_eq!(platform.sent.load(Ordering::SeqCst), 0);
    }
}
