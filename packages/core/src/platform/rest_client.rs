//! Helix REST client: authenticated calls with 401-triggered token refresh
//! and bounded exponential-backoff retries for transient failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{AppResult, PlatformError};
use crate::model::ClipData;
use crate::token_store::{TokenBundle, TokenStore};

use super::{ChannelInfo, PlatformClient, SubscriptionClient};

const HELIX_BASE: &str = "https://api.twitch.tv/helix";
const OAUTH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const MAX_ATTEMPTS: u32 = 3;

pub struct HelixClient {
    http: Client,
    client_id: String,
    token_store: Arc<dyn TokenStore>,
    cached_access_token: RwLock<Option<String>>,
}

impl HelixClient {
    #[must_use]
    pub fn new(client_id: String, token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            http: Client::new(),
            client_id,
            token_store,
            cached_access_token: RwLock::new(None),
        }
    }

    async fn access_token(&self) -> AppResult<String> {
        if let Some(tok) = self.cached_access_token.read().clone() {
            return Ok(tok);
        }
        let bundle = self
            .token_store
            .load()
            .await?
            .ok_or(PlatformError::Unauthorized)?;
        *self.cached_access_token.write() = Some(bundle.access_token.clone());
        Ok(bundle.access_token)
    }

    /// Exchanges the stored refresh token for a new access token.
    async fn refresh(&self) -> AppResult<()> {
        let bundle = self
            .token_store
            .load()
            .await?
            .ok_or(PlatformError::Unauthorized)?;
        let refresh_token = bundle.refresh_token.clone().ok_or(PlatformError::Unauthorized)?;

        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
            refresh_token: Option<String>,
            expires_in: i64,
        }

        let resp = self
            .http
            .post(OAUTH_TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(PlatformError::Http)?;

        if !resp.status().is_success() {
            return Err(PlatformError::Unauthorized.into());
        }

        let parsed: RefreshResponse = resp.json().await.map_err(PlatformError::Http)?;
        let new_bundle = TokenBundle {
            access_token: parsed.access_token.clone(),
            refresh_token: parsed.refresh_token.or(Some(refresh_token)),
            expires_at: Utc::now() + chrono::Duration::seconds(parsed.expires_in),
            user_id: bundle.user_id,
        };
        self.token_store.save(&new_bundle).await?;
        *self.cached_access_token.write() = Some(parsed.access_token);
        Ok(())
    }

    /// Runs `build` (a fresh `RequestBuilder` each call) with 401-triggered
    /// refresh-and-retry-once semantics, plus bounded backoff retries for
    /// transient network errors and 5xx/429 statuses.
    async fn send_with_retry<F>(&self, mut build: F) -> AppResult<reqwest::Response>
    where
        F: FnMut(String) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        let mut refreshed_once = false;

        loop {
            let token = self.access_token().await?;
            let request = build(token).header("Client-Id", self.client_id.clone());

            match request.send().await {
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED && !refreshed_once => {
                    refreshed_once = true;
                    self.refresh().await?;
                    continue;
                }
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                    return Err(PlatformError::Unauthorized.into());
                }
                Ok(resp) if resp.status().is_server_error() || resp.status().as_u16() == 429 => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(PlatformError::Status(
                            resp.status().as_u16(),
                            resp.text().await.unwrap_or_default(),
                        )
                        .into());
                    }
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(PlatformError::Status(
                        resp.status().as_u16(),
                        resp.text().await.unwrap_or_default(),
                    )
                    .into());
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(PlatformError::Http(e).into());
                    }
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct ClipDto {
    id: String,
    url: String,
    title: String,
    creator_id: String,
    creator_name: String,
    broadcaster_id: String,
    broadcaster_name: String,
    #[serde(default)]
    game_id: String,
    duration: f64,
    created_at: DateTime<Utc>,
    view_count: u64,
}

impl ClipDto {
    /// The clips endpoint only returns display names, not logins; the login
    /// is always the lowercase-ASCII form of the display name in practice.
    fn into_clip_data(self, game_name: String) -> ClipData {
        ClipData {
            id: self.id,
            url: self.url,
            title: self.title,
            creator_id: self.creator_id,
            creator_login: self.creator_name.to_lowercase(),
            creator_display: self.creator_name,
            broadcaster_id: self.broadcaster_id,
            broadcaster_login: self.broadcaster_name.to_lowercase(),
            broadcaster_display: self.broadcaster_name,
            game_name,
            duration_seconds: ClipData::normalize_duration(self.duration),
            created_at: self.created_at,
            view_count: self.view_count,
        }
    }
}

#[derive(Deserialize)]
struct Paginated<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct UserDto {
    id: String,
}

#[derive(Deserialize)]
struct ChannelDto {
    game_name: Option<String>,
    broadcaster_name: Option<String>,
}

#[derive(Deserialize)]
struct GameDto {
    id: String,
    name: String,
}

impl HelixClient {
    async fn hydrate_game_names(&self, clips: Vec<ClipDto>) -> AppResult<Vec<ClipData>> {
        let mut unique_ids: Vec<String> = clips
            .iter()
            .map(|c| c.game_id.clone())
            .filter(|id| !id.is_empty())
            .collect();
        unique_ids.sort();
        unique_ids.dedup();

        let mut names = std::collections::HashMap::new();
        for chunk in unique_ids.chunks(100) {
            if chunk.is_empty() {
                continue;
            }
            let query: Vec<(&str, &str)> = chunk.iter().map(|id| ("id", id.as_str())).collect();
            let resp = self
                .send_with_retry(|token| {
                    self.http
                        .get(format!("{HELIX_BASE}/games"))
                        .bearer_auth(&token)
                        .query(&query)
                })
                .await?;
            let parsed: Paginated<GameDto> = resp.json().await.map_err(PlatformError::Http)?;
            for g in parsed.data {
                names.insert(g.id, g.name);
            }
        }

        Ok(clips
            .into_iter()
            .map(|c| {
                let name = names.get(&c.game_id).cloned().unwrap_or_default();
                c.into_clip_data(name)
            })
            .collect())
    }
}

#[async_trait]
impl PlatformClient for HelixClient {
    async fn get_clip_by_id(&self, id: &str) -> AppResult<Option<ClipData>> {
        let resp = self
            .send_with_retry(|token| {
                self.http
                    .get(format!("{HELIX_BASE}/clips"))
                    .bearer_auth(&token)
                    .query(&[("id", id)])
            })
            .await?;
        let parsed: Paginated<ClipDto> = resp.json().await.map_err(PlatformError::Http)?;
        let hydrated = self.hydrate_game_names(parsed.data).await?;
        Ok(hydrated.into_iter().next())
    }

    async fn get_clip_by_url(&self, url: &str) -> AppResult<Option<ClipData>> {
        match super::extract_clip_id(url) {
            Some(id) => self.get_clip_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn get_clips_by_broadcaster(
        &self,
        broadcaster_id: &str,
        count: u32,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<ClipData>> {
        let count = count.min(100).to_string();
        let started = started_at.map(|d| d.to_rfc3339());
        let ended = ended_at.map(|d| d.to_rfc3339());

        let resp = self
            .send_with_retry(|token| {
                let mut query = vec![
                    ("broadcaster_id", broadcaster_id.to_string()),
                    ("first", count.clone()),
                ];
                if let Some(s) = &started {
                    query.push(("started_at", s.clone()));
                }
                if let Some(e) = &ended {
                    query.push(("ended_at", e.clone()));
                }
                self.http
                    .get(format!("{HELIX_BASE}/clips"))
                    .bearer_auth(&token)
                    .query(&query)
            })
            .await?;
        let parsed: Paginated<ClipDto> = resp.json().await.map_err(PlatformError::Http)?;
        self.hydrate_game_names(parsed.data).await
    }

    async fn get_broadcaster_id_by_name(&self, login: &str) -> AppResult<Option<String>> {
        let login_lower = login.to_lowercase();
        let resp = self
            .send_with_retry(|token| {
                self.http
                    .get(format!("{HELIX_BASE}/users"))
                    .bearer_auth(&token)
                    .query(&[("login", login_lower.as_str())])
            })
            .await?;
        let parsed: Paginated<UserDto> = resp.json().await.map_err(PlatformError::Http)?;
        Ok(parsed.data.into_iter().next().map(|u| u.id))
    }

    async fn get_authenticated_user_id(&self) -> AppResult<String> {
        let resp = self
            .send_with_retry(|token| self.http.get(format!("{HELIX_BASE}/users")).bearer_auth(&token))
            .await?;
        let parsed: Paginated<UserDto> = resp.json().await.map_err(PlatformError::Http)?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|u| u.id)
            .ok_or_else(|| PlatformError::NotFound("authenticated user".into()).into())
    }

    async fn get_channel_info(&self, broadcaster_id: &str) -> AppResult<ChannelInfo> {
        let resp = self
            .send_with_retry(|token| {
                self.http
                    .get(format!("{HELIX_BASE}/channels"))
                    .bearer_auth(&token)
                    .query(&[("broadcaster_id", broadcaster_id)])
            })
            .await?;
        let parsed: Paginated<ChannelDto> = resp.json().await.map_err(PlatformError::Http)?;
        let channel = parsed.data.into_iter().next();
        Ok(ChannelInfo {
            game_name: channel.as_ref().and_then(|c| c.game_name.clone()),
            broadcaster_display: channel.and_then(|c| c.broadcaster_name),
        })
    }

    async fn send_chat_message(&self, broadcaster_id: &str, text: &str) -> AppResult<()> {
        let sender_id = self.get_authenticated_user_id().await?;
        let body = serde_json::json!({
            "broadcaster_id": broadcaster_id,
            "sender_id": sender_id,
            "message": text,
        });
        self.send_with_retry(|token| {
            self.http
                .post(format!("{HELIX_BASE}/chat/messages"))
                .bearer_auth(&token)
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn send_shoutout(&self, from_broadcaster_id: &str, to_broadcaster_id: &str) -> AppResult<()> {
        let moderator_id = self.get_authenticated_user_id().await?;
        self.send_with_retry(|token| {
            self.http
                .post(format!("{HELIX_BASE}/chat/shoutouts"))
                .bearer_auth(&token)
                .query(&[
                    ("from_broadcaster_id", from_broadcaster_id),
                    ("to_broadcaster_id", to_broadcaster_id),
                    ("moderator_id", moderator_id.as_str()),
                ])
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionClient for HelixClient {
    async fn create_subscription(
        &self,
        subscription_type: &str,
        version: &str,
        broadcaster_user_id: &str,
        session_id: &str,
    ) -> AppResult<()> {
        let body = serde_json::json!({
            "type": subscription_type,
            "version": version,
            "condition": { "broadcaster_user_id": broadcaster_user_id },
            "transport": { "method": "websocket", "session_id": session_id },
        });
        self.send_with_retry(|token| {
            self.http
                .post(format!("{HELIX_BASE}/eventsub/subscriptions"))
                .bearer_auth(&token)
                .json(&body)
        })
        .await?;
        Ok(())
    }
}
