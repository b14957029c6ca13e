//! Event ingestion: two interchangeable chat/event sources plus the
//! coordinator that fails over between them.

mod coordinator;
mod eventsub;
mod irc;

pub use coordinator::IngestionCoordinator;
pub use eventsub::EventSubSource;
pub use irc::IrcSource;

use async_trait::async_trait;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::AppResult;
use crate::model::Event;

/// Common contract both ingestion sources implement.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> AppResult<()>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn source_name(&self) -> &'static str;

    /// A restartable stream of events. Reconnecting produces a fresh stream;
    /// callers must call `connect` again before re-polling after an error.
    fn events(&self) -> UnboundedReceiverStream<Event>;

    /// Sends a chat message through this source, if it supports outbound chat.
    async fn send_chat_message(&self, _text: &str) -> AppResult<()> {
        Ok(())
    }
}
