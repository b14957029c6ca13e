//! Moderator-approval workflow for gated commands.
//!
//! Each pending request is a single-shot rendezvous raced against a timeout
//! and the service's own cancellation token — whichever resolves first wins,
//! exactly as the playback engine races `Stop` against a clip's duration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::ClipSearchConfig;
use crate::model::{ChatMessage, ClipData};
use crate::utils::short_hex_id;

struct PendingApproval {
    requester: ChatMessage,
    clip: ClipData,
    expires_at: DateTime<Utc>,
    completion: Option<oneshot::Sender<bool>>,
}

/// Tracks in-flight approval requests and resolves them from chat replies.
pub struct ApprovalService {
    config: ClipSearchConfig,
    pending: Arc<Mutex<HashMap<String, PendingApproval>>>,
}

impl ApprovalService {
    #[must_use]
    pub fn new(config: ClipSearchConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Whether `requester` must go through approval under the current policy.
    #[must_use]
    pub fn requires_approval(&self, requester: &ChatMessage) -> bool {
        if !self.config.require_approval {
            return false;
        }
        if requester.is_broadcaster && self.config.exempt_roles.iter().any(|r| r == "broadcaster") {
            return false;
        }
        if requester.is_moderator && self.config.exempt_roles.iter().any(|r| r == "moderator") {
            return false;
        }
        if requester.is_vip && self.config.exempt_roles.iter().any(|r| r == "vip") {
            return false;
        }
        if requester.is_subscriber && self.config.exempt_roles.iter().any(|r| r == "subscriber") {
            return false;
        }
        true
    }

    /// Registers a pending approval and returns its id plus a future that
    /// resolves once the request is approved, denied, times out, or the
    /// parent cancellation fires (all three resolve to `false` except an
    /// explicit approval).
    pub fn request(
        &self,
        requester: ChatMessage,
        clip: ClipData,
        cancel: CancellationToken,
    ) -> (String, impl std::future::Future<Output = bool> + Send) {
        let id = short_hex_id();
        let (tx, rx) = oneshot::channel();
        let expires_at = Utc::now() + chrono::Duration::seconds(self.config.approval_timeout_seconds as i64);

        self.pending.lock().insert(
            id.clone(),
            PendingApproval {
                requester,
                clip,
                expires_at,
                completion: Some(tx),
            },
        );

        let timeout = Duration::from_secs(self.config.approval_timeout_seconds);
        let id_for_cleanup = id.clone();
        let pending = Arc::clone(&self.pending);

        let fut = async move {
            let result = tokio::select! {
                res = rx => res.unwrap_or(false),
                _ = tokio::time::sleep(timeout) => false,
                _ = cancel.cancelled() => false,
            };
            pending.lock().remove(&id_for_cleanup);
            result
        };

        (id, fut)
    }

    /// Feeds a chat message into the responder path. Returns `true` if the
    /// message was consumed as an approve/deny response (regardless of
    /// whether it was authorized or matched a live entry).
    pub fn try_consume_response(&self, msg: &ChatMessage) -> bool {
        let text = msg.text.trim();
        let (verb, rest) = match text.split_once(' ') {
            Some((v, r)) => (v.to_lowercase(), r.trim()),
            None => return false,
        };

        let approve = match verb.as_str() {
            "!approve" => true,
            "!deny" => false,
            _ => return false,
        };

        let id = rest.split_whitespace().next().unwrap_or("").to_string();
        if id.is_empty() {
            return true;
        }

        if !msg.is_privileged() {
            log::warn!("unauthorized approval response from {}", msg.author_login);
            return true;
        }

        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&id) else {
            log::debug!("approval id {id} not found (already resolved or unknown)");
            return true;
        };

        if Utc::now() > entry.expires_at {
            log::debug!("approval id {id} already expired");
            return true;
        }

        if let Some(tx) = entry.completion.take() {
            let _ = tx.send(approve);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc as ChronoUtc;

    fn clip() -> ClipData {
        ClipData {
            id: "abc".into(),
            url: "https://clips.twitch.tv/abc".into(),
            title: "t".into(),
            creator_id: "1".into(),
            creator_login: "c".into(),
            creator_display: "C".into(),
            broadcaster_id: "2".into(),
            broadcaster_login: "b".into(),
            broadcaster_display: "B".into(),
            game_name: "g".into(),
            duration_seconds: 5,
            created_at: ChronoUtc::now(),
            view_count: 0,
        }
    }

    fn viewer() -> ChatMessage {
        ChatMessage {
            author_login: "viewer".into(),
            author_display: "Viewer".into(),
            author_id: "1".into(),
            channel_login: "bc".into(),
            channel_id: "2".into(),
            text: String::new(),
            is_broadcaster: false,
            is_moderator: false,
            is_vip: false,
            is_subscriber: false,
        }
    }

    fn moderator() -> ChatMessage {
        let mut m = viewer();
        m.is_moderator = true;
        m
    }

    #[test]
    fn broadcaster_and_moderator_are_exempt_by_default() {
        let svc = ApprovalService::new(ClipSearchConfig::default());
        let mut bc = viewer();
        bc.is_broadcaster = true;
        assert!(!svc.requires_approval(&bc));
        assert!(!svc.requires_approval(&moderator()));
        assert!(svc.requires_approval(&viewer()));
    }

    #[tokio::test]
    async fn approve_resolves_true() {
        let svc = ApprovalService::new(ClipSearchConfig::default());
        let (id, fut) = svc.request(viewer(), clip(), CancellationToken::new());
        let mut reply = moderator();
        reply.text = format!("!approve {id}");
        assert!(svc.try_consume_response(&reply));
        assert!(fut.await);
    }

    #[tokio::test]
    async fn deny_resolves_false() {
        let svc = ApprovalService::new(ClipSearchConfig::default());
        let (id, fut) = svc.request(viewer(), clip(), CancellationToken::new());
        let mut reply = moderator();
        reply.text = format!("!deny {id}");
        assert!(svc.try_consume_response(&reply));
        assert!(!fut.await);
    }

    #[tokio::test]
    async fn unauthorized_responder_is_ignored() {
        let svc = ApprovalService::new(ClipSearchConfig::default());
        let (id, fut) = svc.request(viewer(), clip(), CancellationToken::new());
        let mut reply = viewer();
        reply.text = format!("!approve {id}");
        svc.try_consume_response(&reply);

        tokio::time::timeout(Duration::from_millis(50), fut)
            .await
            .expect_err("should not resolve from an unauthorized reply");
    }

    #[tokio::test]
    async fn cancellation_resolves_false() {
        let svc = ApprovalService::new(ClipSearchConfig::default());
        let cancel = CancellationToken::new();
        let (_id, fut) = svc.request(viewer(), clip(), cancel.clone());
        cancel.cancel();
        assert!(!fut.await);
    }
}
