//! Core domain types shared across ingestion, routing, and playback.

use serde::{Deserialize, Serialize};

/// A single chat message, as delivered by either ingestion source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author_login: String,
    pub author_display: String,
    pub author_id: String,
    pub channel_login: String,
    pub channel_id: String,
    pub text: String,
    pub is_broadcaster: bool,
    pub is_moderator: bool,
    pub is_vip: bool,
    pub is_subscriber: bool,
}

impl ChatMessage {
    /// True if the author is exempt from approval gating under the default policy.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.is_broadcaster || self.is_moderator
    }
}

/// A raid notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidEvent {
    pub raider_login: String,
    pub raider_id: String,
    pub viewer_count: u32,
}

/// Tagged union of everything the ingestion layer can produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Chat(ChatMessage),
    Raid(RaidEvent),
}

/// Clip metadata as fetched from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipData {
    pub id: String,
    pub url: String,
    pub title: String,
    pub creator_id: String,
    pub creator_login: String,
    pub creator_display: String,
    pub broadcaster_id: String,
    pub broadcaster_login: String,
    pub broadcaster_display: String,
    pub game_name: String,
    pub duration_seconds: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub view_count: u64,
}

impl ClipData {
    /// Derived, never trusted from an upstream field (see design notes).
    #[must_use]
    pub fn is_featured(&self) -> bool {
        self.view_count >= 100
    }

    /// Clamps a raw duration (possibly fractional, possibly non-positive) to
    /// the minimum of 1 whole second the playback engine requires.
    #[must_use]
    pub fn normalize_duration(raw_seconds: f64) -> u32 {
        if raw_seconds.is_finite() && raw_seconds > 0.0 {
            raw_seconds.ceil() as u32
        } else {
            1
        }
    }
}

/// Parsed chat commands. Each carries the message that produced it so
/// handlers can reply to the right author/channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    WatchClip {
        clip_identifier: String,
        origin: ChatMessage,
    },
    WatchSearch {
        broadcaster_name: String,
        search_terms: String,
        origin: ChatMessage,
    },
    Stop {
        origin: ChatMessage,
    },
    Replay {
        origin: ChatMessage,
    },
    Shoutout {
        target_username: String,
        origin: ChatMessage,
    },
}

impl Command {
    #[must_use]
    pub fn origin(&self) -> &ChatMessage {
        match self {
            Command::WatchClip { origin, .. }
            | Command::WatchSearch { origin, .. }
            | Command::Stop { origin }
            | Command::Replay { origin }
            | Command::Shoutout { origin, .. } => origin,
        }
    }
}

/// Playback state machine states (see `playback` module for transitions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Cooldown,
    Stopped,
}

/// Fixed point the scene controller drives the compositor toward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneDesiredState {
    pub scene_name: String,
    pub source_name: String,
    pub player_url: String,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_clip(view_count: u64) -> ClipData {
        ClipData {
            id: "abc".into(),
            url: "https://clips.twitch.tv/abc".into(),
            title: "neat clip".into(),
            creator_id: "1".into(),
            creator_login: "creator".into(),
            creator_display: "Creator".into(),
            broadcaster_id: "2".into(),
            broadcaster_login: "broadcaster".into(),
            broadcaster_display: "Broadcaster".into(),
            game_name: "Just Chatting".into(),
            duration_seconds: 12,
            created_at: chrono::Utc::now(),
            view_count,
        }
    }

    #[test]
    fn featured_is_always_derived_from_view_count() {
        assert!(!sample_clip(99).is_featured());
        assert!(sample_clip(100).is_featured());
        assert!(sample_clip(500).is_featured());
    }

    #[test]
    fn duration_is_ceiled_and_never_below_one() {
        assert_eq!(ClipData::normalize_duration(10.2), 11);
        assert_eq!(ClipData::normalize_duration(0.0), 1);
        assert_eq!(ClipData::normalize_duration(-5.0), 1);
        assert_eq!(ClipData::normalize_duration(f64::NAN), 1);
    }

    #[test]
    fn command_origin_returns_originating_message() {
        let msg = ChatMessage {
            author_login: "viewer".into(),
            author_display: "Viewer".into(),
            author_id: "9".into(),
            channel_login: "bc".into(),
            channel_id: "1".into(),
            text: "!stop".into(),
            is_broadcaster: false,
            is_moderator: false,
            is_vip: false,
            is_subscriber: false,
        };
        let cmd = Command::Stop { origin: msg.clone() };
        assert_eq!(cmd.origin(), &msg);
    }
}
