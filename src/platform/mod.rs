pub mod irc;
pub mod telegram;

use async_trait::async_trait;

/// An event received from either side of the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Ordinary chat line
    TextMessage {
        /// Channel or chat the message was posted in
        source_id: String,
        author: String,
        body: String,
    },
    /// Generated by the client itself, e.g. a channel roster
    ServiceNotice { body: String },
    /// `/me` style action
    UserAction {
        source_id: String,
        author: String,
        body: String,
    },
    /// A photo, already downloaded
    MediaMessage { author: String, bytes: Vec<u8> },
}

/// One side of the bridge as the relay sees it.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Wait for the next inbound event. `None` means the source is gone.
    async fn recv(&self) -> Option<InboundEvent>;

    /// Best-effort post to the bridged conversation. Failures are logged.
    async fn post(&self, text: &str);

    /// Ask the server for the bridged conversation's member list.
    /// The answer, if any, arrives later as a `ServiceNotice`.
    async fn request_roster(&self) {}
}
