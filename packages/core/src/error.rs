//! Centralized error types for the Clipcaster core library.
//!
//! Each concern gets its own `thiserror` enum; all of them implement
//! [`ErrorCode`] so callers can map failures to machine-readable codes
//! without matching on display strings.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code, stable across versions.
    fn code(&self) -> &'static str;
}

/// Errors from the event ingestion layer (EventSub WebSocket / IRC).
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("connection closed by remote")]
    Closed,
    #[error("frame decode error: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for IngestionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "ingestion_connect_failed",
            Self::Subscription(_) => "ingestion_subscription_failed",
            Self::Closed => "ingestion_closed",
            Self::Decode(_) => "ingestion_decode_error",
            Self::Io(_) => "ingestion_io_error",
        }
    }
}

/// Errors from the scene compositor controller.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("not connected to compositor")]
    NotConnected,
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected response shape for {0}")]
    BadResponse(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("authentication failed")]
    AuthFailed,
}

impl ErrorCode for SceneError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "scene_not_connected",
            Self::Request(_) => "scene_request_failed",
            Self::BadResponse(_) => "scene_bad_response",
            Self::WebSocket(_) => "scene_websocket_error",
            Self::AuthFailed => "scene_auth_failed",
        }
    }
}

/// Errors from the platform REST client.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {0}: {1}")]
    Status(u16, String),
    #[error("authentication expired")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("response parse error: {0}")]
    Parse(String),
}

impl ErrorCode for PlatformError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "platform_http_error",
            Self::Status(_, _) => "platform_http_status",
            Self::Unauthorized => "platform_unauthorized",
            Self::NotFound(_) => "platform_not_found",
            Self::Parse(_) => "platform_parse_error",
        }
    }
}

/// Errors from the token store.
#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("no tokens stored")]
    Empty,
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("encryption error: {0}")]
    Crypto(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ErrorCode for TokenStoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "token_store_empty",
            Self::Keyring(_) => "token_store_keyring_error",
            Self::Crypto(_) => "token_store_crypto_error",
            Self::Io(_) => "token_store_io_error",
            Self::Serde(_) => "token_store_serde_error",
        }
    }
}

/// Top-level application error, composed at service boundaries.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ErrorCode for AppError {
    fn code(&self) -> &'static str {
        match self {
            Self::Ingestion(e) => e.code(),
            Self::Scene(e) => e.code(),
            Self::Platform(e) => e.code(),
            Self::TokenStore(e) => e.code(),
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// Convenience alias for application-wide fallible operations.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_forwards_inner_code() {
        let err: AppError = SceneError::NotConnected.into();
        assert_eq!(err.code(), "scene_not_connected");
    }

    #[test]
    fn configuration_error_has_stable_code() {
        let err = AppError::Configuration("missing OBS.Host".into());
        assert_eq!(err.code(), "configuration_error");
    }
}
