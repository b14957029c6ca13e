//! OBS WebSocket v5 client for driving the clip-playback scene/source.
//!
//! Demultiplexes a single socket into request/response pairs (correlated by
//! a monotonic request id) and broadcast events, the same split the
//! reference obs-websocket client uses for its connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::SplitSink;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::ObsConfig;
use crate::error::{AppResult, SceneError};
use crate::events::{EventEmitter, SceneEvent};
use crate::health::{HealthReporter, HealthStatus};
use crate::utils::now_millis;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<WsStream, Message>;

const OP_HELLO: u8 = 0;
const OP_IDENTIFY: u8 = 1;
const OP_IDENTIFIED: u8 = 2;
const OP_REQUEST: u8 = 6;
const OP_REQUEST_RESPONSE: u8 = 7;
const RPC_VERSION: u32 = 1;

/// Drives a single OBS scene + browser source toward the clip player's
/// desired state, and answers drift-check queries for the health supervisor.
pub struct SceneController {
    config: ObsConfig,
    player_url: String,
    emitter: Arc<dyn EventEmitter>,
    write: AsyncMutex<Option<Writer>>,
    id_counter: AtomicU64,
    pending: Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    connected: Arc<AtomicBool>,
    cancel: parking_lot::Mutex<Option<CancellationToken>>,
}

impl SceneController {
    #[must_use]
    pub fn new(config: ObsConfig, player_url: String, emitter: Arc<dyn EventEmitter>) -> Arc<Self> {
        Arc::new(Self {
            config,
            player_url,
            emitter,
            write: AsyncMutex::new(None),
            id_counter: AtomicU64::new(1),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(false)),
            cancel: parking_lot::Mutex::new(None),
        })
    }

    /// A controller that reports itself disconnected and never dials out;
    /// used by callers (playback engine tests) that only need the
    /// visibility-contract surface, not a live OBS instance.
    #[must_use]
    pub fn disconnected_for_tests() -> Arc<Self> {
        Self::new(
            ObsConfig::default(),
            crate::config::PlayerConfig::default().url,
            Arc::new(crate::events::NoopEventEmitter),
        )
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> AppResult<()> {
        let url = format!("ws://{}:{}", self.config.host, self.config.port);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SceneError::WebSocket(e.to_string()))?;
        let (write, mut read) = ws.split();
        *self.write.lock().await = Some(write);

        let hello = Self::read_op(&mut read, OP_HELLO).await?;
        let identify = self.build_identify(&hello)?;
        self.send_raw(&identify).await?;
        let _identified = Self::read_op(&mut read, OP_IDENTIFIED).await?;

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());
        self.connected.store(true, Ordering::SeqCst);

        let pending = Arc::clone(&self.pending);
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = read.next() => {
                        match next {
                            Some(Ok(Message::Text(text))) => {
                                Self::dispatch(&pending, &text);
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(_)) => break,
                            _ => {}
                        }
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            pending.lock().clear();
        });

        self.emitter.emit_scene(SceneEvent::Connected { timestamp: now_millis() });
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        *self.write.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
        self.emitter.emit_scene(SceneEvent::Disconnected { timestamp: now_millis() });
    }

    fn dispatch(pending: &parking_lot::Mutex<HashMap<u64, oneshot::Sender<Value>>>, text: &str) {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let Some(op) = frame["op"].as_u64() else { return };
        if op != u64::from(OP_REQUEST_RESPONSE) {
            return;
        }
        let Some(request_id) = frame["d"]["requestId"].as_str().and_then(|s| s.parse::<u64>().ok()) else {
            return;
        };
        if let Some(tx) = pending.lock().remove(&request_id) {
            let _ = tx.send(frame["d"].clone());
        }
    }

    async fn read_op(
        read: &mut futures_util::stream::SplitStream<WsStream>,
        expected_op: u8,
    ) -> AppResult<Value> {
        loop {
            let Some(Ok(msg)) = read.next().await else {
                return Err(SceneError::WebSocket("connection closed before handshake completed".into()).into());
            };
            let Message::Text(text) = msg else { continue };
            let frame: Value =
                serde_json::from_str(&text).map_err(|e| SceneError::BadResponse(e.to_string()))?;
            if frame["op"].as_u64() == Some(u64::from(expected_op)) {
                return Ok(frame);
            }
        }
    }

    fn build_identify(&self, hello: &Value) -> AppResult<Value> {
        let mut data = json!({ "rpcVersion": RPC_VERSION });

        if let Some(auth) = hello["d"]["authentication"].as_object() {
            let password = self
                .config
                .password
                .as_deref()
                .ok_or(SceneError::AuthFailed)?;
            let salt = auth["salt"].as_str().ok_or(SceneError::AuthFailed)?;
            let challenge = auth["challenge"].as_str().ok_or(SceneError::AuthFailed)?;
            data["authentication"] = json!(Self::auth_response(password, salt, challenge));
        }

        Ok(json!({ "op": OP_IDENTIFY, "d": data }))
    }

    fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
        let base = BASE64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
        BASE64.encode(Sha256::digest(format!("{base}{challenge}").as_bytes()))
    }

    async fn send_raw(&self, frame: &Value) -> AppResult<()> {
        let mut guard = self.write.lock().await;
        let writer = guard.as_mut().ok_or(SceneError::NotConnected)?;
        writer
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| SceneError::WebSocket(e.to_string()))?;
        Ok(())
    }

    /// Sends a request and awaits its correlated response.
    async fn call(&self, request_type: &str, request_data: Value) -> AppResult<Value> {
        if !self.is_connected() {
            return Err(SceneError::NotConnected.into());
        }

        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = json!({
            "op": OP_REQUEST,
            "d": {
                "requestType": request_type,
                "requestId": id.to_string(),
                "requestData": request_data,
            }
        });

        if let Err(e) = self.send_raw(&frame).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = rx
            .await
            .map_err(|_| SceneError::Request(format!("{request_type} response channel dropped")))?;

        let ok = response["requestStatus"]["result"].as_bool().unwrap_or(false);
        if !ok {
            let comment = response["requestStatus"]["comment"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(SceneError::Request(format!("{request_type}: {comment}")).into());
        }

        Ok(response["responseData"].clone())
    }

    /// Creates the clip scene and browser source if either is missing.
    pub async fn ensure_clip_scene_and_source_exists(&self) -> AppResult<()> {
        let scenes = self.call("GetSceneList", json!({})).await?;
        let scene_exists = scenes["scenes"]
            .as_array()
            .map(|list| list.iter().any(|s| s["sceneName"].as_str() == Some(self.config.scene_name.as_str())))
            .unwrap_or(false);

        if !scene_exists {
            self.call("CreateScene", json!({ "sceneName": self.config.scene_name })).await?;
        }

        let items = self
            .call("GetSceneItemList", json!({ "sceneName": self.config.scene_name }))
            .await?;
        let source_exists = items["sceneItems"]
            .as_array()
            .map(|list| list.iter().any(|i| i["sourceName"].as_str() == Some(self.config.source_name.as_str())))
            .unwrap_or(false);

        if !source_exists {
            self.call(
                "CreateInput",
                json!({
                    "sceneName": self.config.scene_name,
                    "inputName": self.config.source_name,
                    "inputKind": "browser_source",
                    "inputSettings": {
                        "url": self.player_url,
                        "width": self.config.width,
                        "height": self.config.height,
                        "fps": 60,
                        "fps_custom": true,
                        "reroute_audio": true,
                        "restart_when_active": true,
                        "shutdown": true,
                        "webpage_control_level": 2,
                    },
                    "sceneItemEnabled": true,
                }),
            )
            .await?;
        }

        self.ensure_clip_scene_nested_in_current_scene().await?;

        Ok(())
    }

    /// Nests the clip scene into whatever top-level scene is currently
    /// live, if it isn't already the current scene and isn't already nested.
    async fn ensure_clip_scene_nested_in_current_scene(&self) -> AppResult<()> {
        let current = self.call("GetCurrentProgramScene", json!({})).await?;
        let Some(current_scene) = current["currentProgramSceneName"].as_str() else {
            return Ok(());
        };

        if current_scene == self.config.scene_name {
            return Ok(());
        }

        let items = self
            .call("GetSceneItemList", json!({ "sceneName": current_scene }))
            .await?;
        let already_nested = items["sceneItems"]
            .as_array()
            .map(|list| list.iter().any(|i| i["sourceName"].as_str() == Some(self.config.scene_name.as_str())))
            .unwrap_or(false);

        if already_nested {
            return Ok(());
        }

        self.call(
            "CreateSceneItem",
            json!({
                "sceneName": current_scene,
                "sourceName": self.config.scene_name,
                "sceneItemEnabled": true,
            }),
        )
        .await?;

        Ok(())
    }

    pub async fn set_browser_source_url(&self, url: &str) -> AppResult<()> {
        self.call(
            "SetInputSettings",
            json!({
                "inputName": self.config.source_name,
                "inputSettings": { "url": url },
                "overlay": true,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn refresh_browser_source(&self) -> AppResult<()> {
        self.call(
            "PressInputPropertiesButton",
            json!({ "inputName": self.config.source_name, "propertyName": "refreshnocache" }),
        )
        .await?;
        Ok(())
    }

    async fn scene_item_id(&self) -> AppResult<i64> {
        let res = self
            .call(
                "GetSceneItemId",
                json!({ "sceneName": self.config.scene_name, "sourceName": self.config.source_name }),
            )
            .await?;
        res["sceneItemId"]
            .as_i64()
            .ok_or_else(|| SceneError::BadResponse("GetSceneItemId".into()).into())
    }

    pub async fn set_source_visibility(&self, visible: bool) -> AppResult<()> {
        let scene_item_id = self.scene_item_id().await?;
        self.call(
            "SetSceneItemEnabled",
            json!({
                "sceneName": self.config.scene_name,
                "sceneItemId": scene_item_id,
                "sceneItemEnabled": visible,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn show_overlay(&self) -> AppResult<()> {
        self.set_source_visibility(true).await
    }

    pub async fn hide_overlay(&self) -> AppResult<()> {
        self.set_source_visibility(false).await
    }

    /// Compares live OBS state against the desired configuration and repairs
    /// it in place. Returns `true` if drift was found and repaired.
    pub async fn check_configuration_drift(&self, health: &HealthReporter) -> AppResult<bool> {
        let scenes = self.call("GetSceneList", json!({})).await?;
        let scene_exists = scenes["scenes"]
            .as_array()
            .map(|list| list.iter().any(|s| s["sceneName"].as_str() == Some(self.config.scene_name.as_str())))
            .unwrap_or(false);

        if !scene_exists {
            self.ensure_clip_scene_and_source_exists().await?;
            health.record_repair("scene_controller", "recreated missing scene");
            self.emitter
                .emit_scene(SceneEvent::ConfigurationDriftRepaired { timestamp: now_millis() });
            return Ok(true);
        }

        let items = self
            .call("GetSceneItemList", json!({ "sceneName": self.config.scene_name }))
            .await?;
        let source_exists = items["sceneItems"]
            .as_array()
            .map(|list| list.iter().any(|i| i["sourceName"].as_str() == Some(self.config.source_name.as_str())))
            .unwrap_or(false);

        if !source_exists {
            self.ensure_clip_scene_and_source_exists().await?;
            health.record_repair("scene_controller", "recreated missing browser source");
            self.emitter
                .emit_scene(SceneEvent::ConfigurationDriftRepaired { timestamp: now_millis() });
            return Ok(true);
        }

        let settings = self
            .call("GetInputSettings", json!({ "inputName": self.config.source_name }))
            .await?;
        let width_ok = settings["inputSettings"]["width"].as_u64() == Some(u64::from(self.config.width));
        let height_ok = settings["inputSettings"]["height"].as_u64() == Some(u64::from(self.config.height));
        let url_ok = settings["inputSettings"]["url"].as_str() == Some(self.player_url.as_str());

        if !width_ok || !height_ok || !url_ok {
            self.call(
                "SetInputSettings",
                json!({
                    "inputName": self.config.source_name,
                    "inputSettings": {
                        "width": self.config.width,
                        "height": self.config.height,
                        "url": self.player_url,
                    },
                    "overlay": true,
                }),
            )
            .await?;
            health.record_repair("scene_controller", "corrected browser source configuration");
            self.emitter
                .emit_scene(SceneEvent::ConfigurationDriftRepaired { timestamp: now_millis() });
            return Ok(true);
        }

        Ok(false)
    }
}
