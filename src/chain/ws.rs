//! Streaming provider connection over websocket.
//!
//! One socket carries every subscription. A reader thread polls the socket
//! (short read timeout, so request writers are never starved of the lock)
//! and routes incoming frames: responses go to the pending-request table,
//! `eth_subscription` notifications go to the per-subscription routes. Each
//! route owns its own event and error channels.

use super::{ChainEvent, Connection, EventClass, EventStream, ProviderError, SyncUpdate, Transport};
use crate::chain::rpc::quantity;
use crate::debug;
use crate::store::SyncStatus;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// How long the reader holds the socket per poll; bounds request latency.
const READ_POLL: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 64;
const ERROR_BUFFER: usize = 8;

/// Per-subscription routing entry.
struct Route {
    class: EventClass,
    events: mpsc::Sender<ChainEvent>,
    errors: mpsc::Sender<ProviderError>,
}

type Routes = Arc<Mutex<FxHashMap<String, Route>>>;
type Pending = Arc<Mutex<FxHashMap<u64, std::sync::mpsc::Sender<Result<Value, ProviderError>>>>>;

/// A live websocket connection to a node.
pub struct WsConnection {
    socket: Arc<Mutex<Socket>>,
    routes: Routes,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl WsConnection {
    pub fn open(url: &str) -> Result<Self, ProviderError> {
        let (socket, _response) = tungstenite::connect(url)
            .map_err(|error| ProviderError::Connect(url.to_string(), error.to_string()))?;

        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            let _ = stream.set_read_timeout(Some(READ_POLL));
        }

        let connection = Self {
            socket: Arc::new(Mutex::new(socket)),
            routes: Arc::new(Mutex::new(FxHashMap::default())),
            pending: Arc::new(Mutex::new(FxHashMap::default())),
            next_id: AtomicU64::new(1),
            closed: Arc::new(AtomicBool::new(false)),
        };
        connection.spawn_reader();
        Ok(connection)
    }

    fn spawn_reader(&self) {
        let socket = Arc::clone(&self.socket);
        let routes = Arc::clone(&self.routes);
        let pending = Arc::clone(&self.pending);
        let closed = Arc::clone(&self.closed);
        std::thread::spawn(move || reader_loop(&socket, &routes, &pending, &closed));
    }

    /// Send one request and wait for its response.
    fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = std::sync::mpsc::channel();
        self.pending.lock().insert(id, tx);

        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        })
        .to_string();

        let sent = self.socket.lock().send(Message::Text(body.into()));
        if let Err(error) = sent {
            self.pending.lock().remove(&id);
            return Err(ProviderError::Rpc(format!("{method} send failed: {error}")));
        }

        let outcome = rx.recv_timeout(REQUEST_TIMEOUT);
        self.pending.lock().remove(&id);
        match outcome {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Subscribe(format!(
                "no response to {method} within {}s",
                REQUEST_TIMEOUT.as_secs()
            ))),
        }
    }
}

impl Connection for WsConnection {
    fn transport(&self) -> Transport {
        Transport::WebSocket
    }

    fn subscribe(&mut self, class: EventClass) -> Result<EventStream, ProviderError> {
        let result = self.request("eth_subscribe", json!([class.subscribe_param()]))?;
        let subscription_id = result
            .as_str()
            .ok_or_else(|| {
                ProviderError::Subscribe(format!("non-string subscription id: {result}"))
            })?
            .to_string();

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (error_tx, error_rx) = mpsc::channel(ERROR_BUFFER);
        self.routes.lock().insert(
            subscription_id,
            Route {
                class,
                events: event_tx,
                errors: error_tx,
            },
        );
        Ok(EventStream {
            events: event_rx,
            errors: error_rx,
        })
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut socket) = self.socket.try_lock() {
            let _ = socket.close(None);
        }
    }
}

// =============================================================================
// Reader
// =============================================================================

fn reader_loop(socket: &Mutex<Socket>, routes: &Routes, pending: &Pending, closed: &AtomicBool) {
    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }

        let message = socket.lock().read();
        match message {
            Ok(Message::Text(text)) => handle_incoming(text.as_str(), routes, pending),
            Ok(Message::Ping(payload)) => {
                let _ = socket.lock().send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => {
                notify_all(routes, &ProviderError::Closed);
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(error))
                if matches!(
                    error.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(error) => {
                if !closed.load(Ordering::SeqCst) {
                    notify_all(routes, &ProviderError::Rpc(error.to_string()));
                }
                break;
            }
        }
    }
}

/// Route one incoming frame: a response (has `id`) or a subscription
/// notification.
fn handle_incoming(text: &str, routes: &Routes, pending: &Pending) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        debug!("chain"; "unparseable frame: {text}");
        return;
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        if let Some(tx) = pending.lock().remove(&id) {
            let result = match value.get("error") {
                Some(error) => Err(ProviderError::Rpc(error.to_string())),
                None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = tx.send(result);
        }
        return;
    }

    if value.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return;
    }
    let Some(params) = value.get("params") else {
        return;
    };
    let Some(subscription) = params.get("subscription").and_then(Value::as_str) else {
        return;
    };
    let result = params.get("result").cloned().unwrap_or(Value::Null);

    let routes = routes.lock();
    let Some(route) = routes.get(subscription) else {
        return;
    };
    match map_notification(route.class, result) {
        Ok(event) => {
            if route.events.try_send(event).is_err() {
                debug!("chain"; "dropping {} event (consumer behind)", route.class.label());
            }
        }
        Err(error) => {
            let _ = route.errors.try_send(error);
        }
    }
}

/// Tell every route its connection failed. Each subscription hears about it
/// on its own error channel.
fn notify_all(routes: &Routes, error: &ProviderError) {
    for route in routes.lock().values() {
        let _ = route.errors.try_send(error.clone());
    }
}

/// Map a raw notification payload to a typed event.
fn map_notification(class: EventClass, result: Value) -> Result<ChainEvent, ProviderError> {
    match class {
        EventClass::NewBlocks => Ok(ChainEvent::Block(result)),
        EventClass::PendingTransactions => Ok(ChainEvent::PendingTransaction(result)),
        EventClass::SyncStatus => match &result {
            Value::Bool(flag) => Ok(ChainEvent::Sync(SyncUpdate::Flag(*flag))),
            Value::Object(fields) => {
                let syncing = fields
                    .get("syncing")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let status = fields
                    .get("status")
                    .map(sync_status_from)
                    .unwrap_or_default();
                Ok(ChainEvent::Sync(SyncUpdate::Progress { syncing, status }))
            }
            other => Err(ProviderError::Rpc(format!(
                "unexpected syncing payload: {other}"
            ))),
        },
    }
}

/// The node reports sync progress with capitalized field names.
fn sync_status_from(status: &Value) -> SyncStatus {
    let field = |name: &str| status.get(name).and_then(quantity).unwrap_or_default();
    SyncStatus {
        current_block: field("CurrentBlock"),
        highest_block: field("HighestBlock"),
        known_states: field("KnownStates"),
        pulled_states: field("PulledStates"),
        starting_block: field("StartingBlock"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_notification_blocks_and_transactions() {
        let block = map_notification(EventClass::NewBlocks, json!({"number": "0x10"})).unwrap();
        assert!(matches!(block, ChainEvent::Block(_)));

        let tx = map_notification(EventClass::PendingTransactions, json!("0xabc")).unwrap();
        assert!(matches!(tx, ChainEvent::PendingTransaction(_)));
    }

    #[test]
    fn test_map_notification_sync_flag() {
        let event = map_notification(EventClass::SyncStatus, json!(false)).unwrap();
        let ChainEvent::Sync(SyncUpdate::Flag(flag)) = event else {
            panic!("expected flag update");
        };
        assert!(!flag);
    }

    #[test]
    fn test_map_notification_sync_progress() {
        let payload = json!({
            "syncing": true,
            "status": {
                "CurrentBlock": "0x64",
                "HighestBlock": 200,
                "KnownStates": 0,
                "PulledStates": 0,
                "StartingBlock": 50
            }
        });
        let event = map_notification(EventClass::SyncStatus, payload).unwrap();
        let ChainEvent::Sync(SyncUpdate::Progress { syncing, status }) = event else {
            panic!("expected progress update");
        };
        assert!(syncing);
        assert_eq!(status.current_block, 100);
        assert_eq!(status.highest_block, 200);
        assert_eq!(status.starting_block, 50);
    }

    #[test]
    fn test_map_notification_rejects_malformed_sync() {
        assert!(map_notification(EventClass::SyncStatus, json!(17)).is_err());
    }

    #[tokio::test]
    async fn test_handle_incoming_routes_response_and_notification() {
        let routes: Routes = Arc::new(Mutex::new(FxHashMap::default()));
        let pending: Pending = Arc::new(Mutex::new(FxHashMap::default()));

        // Response frame resolves a pending request.
        let (tx, rx) = std::sync::mpsc::channel();
        pending.lock().insert(7, tx);
        handle_incoming(r#"{"jsonrpc":"2.0","id":7,"result":"0xsub1"}"#, &routes, &pending);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!("0xsub1"));

        // Notification frame lands on the matching route.
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (error_tx, _error_rx) = mpsc::channel(4);
        routes.lock().insert(
            "0xsub1".into(),
            Route {
                class: EventClass::PendingTransactions,
                events: event_tx,
                errors: error_tx,
            },
        );
        handle_incoming(
            r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xsub1","result":"0xdead"}}"#,
            &routes,
            &pending,
        );
        let event = event_rx.try_recv().unwrap();
        assert!(matches!(event, ChainEvent::PendingTransaction(_)));
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_all_reaches_every_route() {
        let routes: Routes = Arc::new(Mutex::new(FxHashMap::default()));
        let mut error_rxs = Vec::new();
        for (i, class) in EventClass::all().into_iter().enumerate() {
            let (event_tx, _event_rx) = mpsc::channel(1);
            let (error_tx, error_rx) = mpsc::channel(1);
            routes.lock().insert(
                format!("0x{i}"),
                Route {
                    class,
                    events: event_tx,
                    errors: error_tx,
                },
            );
            error_rxs.push(error_rx);
        }

        notify_all(&routes, &ProviderError::Closed);
        for mut rx in error_rxs {
            assert!(matches!(rx.try_recv(), Ok(ProviderError::Closed)));
        }
    }
}
