//! Default [`ChainProvider`]: dispatches on the endpoint's transport kind.

use super::rpc;
use super::ws::WsConnection;
use super::{ChainProvider, Connection, Endpoint, EventClass, EventStream, ProviderError, Transport};
use serde_json::json;

/// Connects to whatever endpoint configuration selected.
pub struct NodeProvider;

/// A connection over either transport.
pub enum NodeConnection {
    Ws(WsConnection),
    Http(HttpConnection),
}

/// Request/response connection; cannot stream events.
pub struct HttpConnection {
    url: String,
}

impl HttpConnection {
    fn open(url: &str) -> Result<Self, ProviderError> {
        // Liveness ping, so a dead endpoint fails at connect time instead of
        // at first use.
        rpc::call(url, "eth_blockNumber", json!([]))
            .map_err(|error| ProviderError::Connect(url.to_string(), error.to_string()))?;
        Ok(Self {
            url: url.to_string(),
        })
    }
}

impl Connection for HttpConnection {
    fn transport(&self) -> Transport {
        Transport::Http
    }

    fn subscribe(&mut self, _class: EventClass) -> Result<EventStream, ProviderError> {
        crate::debug!("chain"; "{} is request/response only, no subscriptions", self.url);
        Err(ProviderError::NotStreaming)
    }
}

impl Connection for NodeConnection {
    fn transport(&self) -> Transport {
        match self {
            Self::Ws(conn) => conn.transport(),
            Self::Http(conn) => conn.transport(),
        }
    }

    fn subscribe(&mut self, class: EventClass) -> Result<EventStream, ProviderError> {
        match self {
            Self::Ws(conn) => conn.subscribe(class),
            Self::Http(conn) => conn.subscribe(class),
        }
    }
}

impl ChainProvider for NodeProvider {
    type Conn = NodeConnection;

    fn connect(&self, endpoint: &Endpoint) -> Result<Self::Conn, ProviderError> {
        match endpoint.transport {
            Transport::WebSocket => WsConnection::open(&endpoint.url).map(NodeConnection::Ws),
            Transport::Http => HttpConnection::open(&endpoint.url).map(NodeConnection::Http),
        }
    }
}
