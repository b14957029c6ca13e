//! Fully resolved runtime configuration.
//!
//! [`AppConfig`] is the library-side configuration surface; the binary crate
//! layers defaults -> YAML file -> environment variables -> CLI flags on top
//! of [`AppConfig::default`] before handing the result to [`crate::bootstrap`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub scene_name: String,
    pub source_name: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 4455,
            password: None,
            scene_name: "ClipCaster".into(),
            source_name: "ClipCasterPlayer".into(),
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub url: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:49300/player".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    pub client_id: String,
    pub channel_login: String,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            channel_login: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShoutoutConfig {
    pub enabled: bool,
    pub message_template: Option<String>,
    pub use_native_shoutout: bool,
    pub use_featured_clips_first: bool,
    pub max_clip_length_seconds: u32,
    pub max_clip_age_days_tiers: Vec<u32>,
}

impl Default for ShoutoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            message_template: Some(
                "Go check out {channel} ({broadcaster}) - last seen playing {game}!".into(),
            ),
            use_native_shoutout: true,
            use_featured_clips_first: true,
            max_clip_length_seconds: 60,
            max_clip_age_days_tiers: vec![1, 7, 30, 90, 365],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipSearchConfig {
    pub search_window_days: u32,
    pub fuzzy_match_threshold: f64,
    pub require_approval: bool,
    pub approval_timeout_seconds: u64,
    pub exempt_roles: Vec<String>,
    pub max_results: usize,
}

impl Default for ClipSearchConfig {
    fn default() -> Self {
        Self {
            search_window_days: 90,
            fuzzy_match_threshold: 0.4,
            require_approval: true,
            approval_timeout_seconds: 30,
            exempt_roles: vec!["broadcaster".into(), "moderator".into()],
            max_results: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatFeedbackConfig {
    pub enabled: bool,
    pub min_interval_seconds: f64,
    pub show_approval_status: bool,
}

impl Default for ChatFeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_seconds: 2.0,
            show_approval_status: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub check_for_updates: bool,
    pub repo: String,
    pub check_interval_hours: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_for_updates: false,
            repo: String::new(),
            check_interval_hours: 24,
        }
    }
}

/// The fully resolved runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub obs: ObsConfig,
    pub player: PlayerConfig,
    pub twitch: TwitchConfig,
    pub shoutout: ShoutoutConfig,
    pub clip_search: ClipSearchConfig,
    pub chat_feedback: ChatFeedbackConfig,
    pub update: UpdateConfig,
    pub data_dir: Option<std::path::PathBuf>,
}
