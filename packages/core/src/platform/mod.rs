//! Platform REST client and authenticated-call plumbing.

mod rest_client;

pub use rest_client::HelixClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::model::ClipData;

/// Every authenticated operation the core needs from the broadcaster platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get_clip_by_id(&self, id: &str) -> AppResult<Option<ClipData>>;
    async fn get_clip_by_url(&self, url: &str) -> AppResult<Option<ClipData>>;
    async fn get_clips_by_broadcaster(
        &self,
        broadcaster_id: &str,
        count: u32,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<ClipData>>;
    async fn get_broadcaster_id_by_name(&self, login: &str) -> AppResult<Option<String>>;
    async fn get_authenticated_user_id(&self) -> AppResult<String>;
    async fn get_channel_info(&self, broadcaster_id: &str) -> AppResult<ChannelInfo>;
    async fn send_chat_message(&self, broadcaster_id: &str, text: &str) -> AppResult<()>;
    async fn send_shoutout(&self, from_broadcaster_id: &str, to_broadcaster_id: &str) -> AppResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    pub game_name: Option<String>,
    pub broadcaster_display: Option<String>,
}

/// Narrow trait for creating EventSub subscriptions, kept separate from
/// [`PlatformClient`] because only the event-ingestion source needs it.
#[async_trait]
pub trait SubscriptionClient: Send + Sync {
    async fn create_subscription(
        &self,
        subscription_type: &str,
        version: &str,
        broadcaster_user_id: &str,
        session_id: &str,
    ) -> AppResult<()>;
}

/// Extracts a clip id from either a bare id or a recognized clip URL shape.
///
/// Accepts `clips.<platform>/<id>` and `<platform>/<login>/clip/<id>`; any
/// other token without `/` or `.` is treated as the id itself.
#[must_use]
pub fn extract_clip_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed.contains('/') && !trimmed.contains('.') {
        return Some(trimmed.to_string());
    }

    let without_scheme = trimmed
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");

    if let Some(rest) = without_scheme.split_once("clips.twitch.tv/") {
        let id = rest.1.split(['?', '/']).next().unwrap_or("");
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    if let Some(idx) = without_scheme.find("/clip/") {
        let id = &without_scheme[idx + "/clip/".len()..];
        let id = id.split(['?', '/']).next().unwrap_or("");
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_clips_host_url() {
        assert_eq!(
            extract_clip_id("https://clips.twitch.tv/ABC-xyz_1"),
            Some("ABC-xyz_1".into())
        );
    }

    #[test]
    fn extracts_from_channel_clip_path() {
        assert_eq!(
            extract_clip_id("https://www.twitch.tv/streamerX/clip/ABC-xyz_1?filter=clips"),
            Some("ABC-xyz_1".into())
        );
    }

    #[test]
    fn bare_token_without_slash_or_dot_is_identity() {
        let id = "ABC-xyz_1";
        assert_eq!(extract_clip_id(id).as_deref(), Some(id));
        // extract(extract(x)) is identity for bare ids.
        assert_eq!(extract_clip_id(&extract_clip_id(id).unwrap()).as_deref(), Some(id));
    }

    #[test]
    fn empty_input_yields_none() {
        assert_eq!(extract_clip_id("   "), None);
    }
}
