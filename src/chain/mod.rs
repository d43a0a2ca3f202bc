//! Blockchain provider boundary.
//!
//! The core talks to a node through two small traits: [`ChainProvider`]
//! opens a [`Connection`] to an endpoint, and a streaming connection hands
//! out per-class [`EventStream`]s. Each stream carries its own error
//! channel, so subscriptions are independent units of failure: an error on
//! one class never tears down the other two.
//!
//! ```text
//! Endpoint --connect--> Connection --subscribe--> EventStream{events, errors}
//! ```

pub mod node;
pub mod rpc;
pub mod ws;

use crate::config::ProviderConfig;
use crate::store::SyncStatus;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

// =============================================================================
// Endpoint selection
// =============================================================================

/// Transport kind of a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Request/response only; no streaming subscriptions.
    Http,
    /// Persistent, streaming.
    WebSocket,
}

/// A concrete provider endpoint, chosen from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub transport: Transport,
}

impl Endpoint {
    /// Pick the endpoint for a provider config: websocket preferred over
    /// RPC polling when both are configured.
    pub fn select(provider: &ProviderConfig) -> Self {
        match &provider.websocket_address {
            Some(ws) => Self {
                url: ws.clone(),
                transport: Transport::WebSocket,
            },
            None => Self {
                url: provider.rpc_address.clone(),
                transport: Transport::Http,
            },
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// The three independent event classes a streaming provider publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    NewBlocks,
    PendingTransactions,
    SyncStatus,
}

impl EventClass {
    pub fn all() -> [EventClass; 3] {
        [
            Self::NewBlocks,
            Self::PendingTransactions,
            Self::SyncStatus,
        ]
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NewBlocks => "newBlockHeaders",
            Self::PendingTransactions => "pendingTransactions",
            Self::SyncStatus => "syncing",
        }
    }

    /// `eth_subscribe` parameter for this class.
    pub(crate) fn subscribe_param(self) -> &'static str {
        match self {
            Self::NewBlocks => "newHeads",
            Self::PendingTransactions => "newPendingTransactions",
            Self::SyncStatus => "syncing",
        }
    }
}

/// A message from a provider subscription.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// New block header.
    Block(Value),
    /// Pending transaction hash or object.
    PendingTransaction(Value),
    /// Sync state change.
    Sync(SyncUpdate),
}

/// A `syncing` notification: nodes report either a bare boolean or a
/// progress object.
#[derive(Debug, Clone)]
pub enum SyncUpdate {
    Flag(bool),
    Progress { syncing: bool, status: SyncStatus },
}

/// One live subscription: its event stream plus its own error channel.
pub struct EventStream {
    pub events: mpsc::Receiver<ChainEvent>,
    pub errors: mpsc::Receiver<ProviderError>,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("failed to connect to `{0}`: {1}")]
    Connect(String, String),

    #[error("transport does not support streaming subscriptions")]
    NotStreaming,

    #[error("subscription request failed: {0}")]
    Subscribe(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("connection closed")]
    Closed,
}

// =============================================================================
// Traits
// =============================================================================

/// A live connection to a node.
pub trait Connection: Send + 'static {
    fn transport(&self) -> Transport;

    /// Open a subscription for one event class. Only meaningful on
    /// streaming transports.
    fn subscribe(&mut self, class: EventClass) -> Result<EventStream, ProviderError>;
}

/// Opens connections to provider endpoints.
pub trait ChainProvider: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(&self, endpoint: &Endpoint) -> Result<Self::Conn, ProviderError>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_prefers_websocket() {
        let provider = ProviderConfig {
            websocket_address: Some("ws://localhost:8546".into()),
            ..Default::default()
        };
        let endpoint = Endpoint::select(&provider);
        assert_eq!(endpoint.transport, Transport::WebSocket);
        assert_eq!(endpoint.url, "ws://localhost:8546");
    }

    #[test]
    fn test_endpoint_falls_back_to_rpc() {
        let endpoint = Endpoint::select(&ProviderConfig::default());
        assert_eq!(endpoint.transport, Transport::Http);
        assert_eq!(endpoint.url, "http://localhost:8545");
    }
}
