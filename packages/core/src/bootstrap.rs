//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place every service is
//! instantiated and wired together, in dependency order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalService;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::events::EventEmitter;
use crate::feedback::ChatFeedbackService;
use crate::health::HealthReporter;
use crate::ingestion::{EventSubSource, IngestionCoordinator, IrcSource};
use crate::platform::{HelixClient, PlatformClient};
use crate::playback::PlaybackEngine;
use crate::router::CommandRouter;
use crate::scene::{SceneController, SceneHealthSupervisor};
use crate::token_store::{FileTokenStore, TokenStore};

/// Container for every wired service, returned by [`bootstrap_services`].
#[derive(Clone)]
pub struct BootstrappedServices {
    pub platform: Arc<dyn PlatformClient>,
    pub health: Arc<HealthReporter>,
    pub playback: PlaybackEngine,
    pub scene: Arc<SceneController>,
    pub router: Arc<CommandRouter>,
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Spawns the long-running loops (ingestion coordinator, scene health
    /// supervisor). Bootstrapping construction and running are kept separate
    /// so tests can build services without starting background tasks.
    pub fn start(
        &self,
        coordinator: IngestionCoordinator,
        scene_supervisor: SceneHealthSupervisor,
    ) {
        let cancel = self.cancel_token.clone();
        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            coordinator
                .run(cancel, move |event| {
                    let router = Arc::clone(&router);
                    tokio::spawn(async move { router.handle_event(event).await });
                })
                .await;
        });

        let cancel = self.cancel_token.clone();
        tokio::spawn(async move {
            scene_supervisor.run(cancel).await;
        });
    }

    /// Signals every long-running loop to stop and waits out their
    /// best-effort disconnects.
    pub async fn shutdown(&self) {
        log::info!("beginning graceful shutdown");
        self.cancel_token.cancel();
        self.scene.disconnect().await;
        log::info!("shutdown complete");
    }
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order: token store -> platform client -> health reporter -> scene
/// controller -> playback engine -> ingestion sources + coordinator ->
/// approval/search/feedback services -> command router.
pub async fn bootstrap_services(
    config: AppConfig,
    emitter: Arc<dyn EventEmitter>,
) -> AppResult<(BootstrappedServices, IngestionCoordinator, SceneHealthSupervisor)> {
    let data_dir = config
        .data_dir
        .clone()
        .or_else(dirs::data_dir)
        .map(|d| d.join("clipcaster"))
        .ok_or_else(|| AppError::Configuration("could not resolve a data directory".into()))?;

    let token_store: Arc<dyn TokenStore> = FileTokenStore::new(data_dir);
    let bundle = token_store
        .load()
        .await?
        .ok_or_else(|| AppError::Configuration("no Twitch tokens stored; run the auth flow first".into()))?;

    if !bundle.is_valid() {
        log::warn!("stored tokens are near expiry; the first API call will attempt a refresh");
    }

    let platform: Arc<dyn PlatformClient> = Arc::new(HelixClient::new(
        config.twitch.client_id.clone(),
        Arc::clone(&token_store),
    ));

    let own_broadcaster_id = match bundle.user_id.clone() {
        Some(id) => id,
        None => platform.get_authenticated_user_id().await?,
    };

    let broadcaster_id = if config.twitch.channel_login.is_empty()
        || config.twitch.channel_login.eq_ignore_ascii_case(&own_broadcaster_id)
    {
        own_broadcaster_id.clone()
    } else {
        platform
            .get_broadcaster_id_by_name(&config.twitch.channel_login)
            .await?
            .ok_or_else(|| AppError::Configuration(format!("unknown channel '{}'", config.twitch.channel_login)))?
    };

    let health = Arc::new(HealthReporter::new(Arc::clone(&emitter)));
    health.report("token_store", crate::health::HealthStatus::Healthy, None);

    let scene = SceneController::new(config.obs.clone(), config.player.url.clone(), Arc::clone(&emitter));
    let scene_supervisor = SceneHealthSupervisor::new(Arc::clone(&scene), Arc::clone(&health));

    let cancel_token = CancellationToken::new();
    let playback = PlaybackEngine::start(Arc::clone(&scene), Arc::clone(&emitter), cancel_token.child_token());

    let subscriber = {
        let helix = Arc::new(HelixClient::new(config.twitch.client_id.clone(), Arc::clone(&token_store)));
        helix
    };
    let eventsub = EventSubSource::new(broadcaster_id.clone(), subscriber);

    let irc = IrcSource::new(
        config.twitch.channel_login.clone(),
        bundle.access_token.clone(),
        config.twitch.channel_login.clone(),
    );

    let coordinator = IngestionCoordinator::new(eventsub, irc, Arc::clone(&emitter), Arc::clone(&health));

    let approval = ApprovalService::new(config.clip_search.clone());
    let feedback = Arc::new(ChatFeedbackService::new(
        Arc::clone(&platform),
        config.chat_feedback.clone(),
        broadcaster_id.clone(),
    ));

    let router = Arc::new(CommandRouter::new(
        &config,
        Arc::clone(&platform),
        approval,
        playback.clone(),
        feedback,
        own_broadcaster_id,
        cancel_token.child_token(),
    ));

    let services = BootstrappedServices {
        platform,
        health,
        playback,
        scene,
        router,
        cancel_token,
    };

    Ok((services, coordinator, scene_supervisor))
}
