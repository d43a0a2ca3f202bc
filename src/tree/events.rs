//! Network-event scope internals.
//!
//! One pump task per event class. A pump reacts to its own stream and its
//! own error channel only; a failing subscription logs and keeps pumping,
//! and never touches the other two classes.

use crate::chain::{ChainEvent, EventClass, EventStream, SyncUpdate};
use crate::store::{Action, StateStore};
use crate::{debug, log};

/// Consume one subscription until its event channel closes.
pub(crate) async fn pump(class: EventClass, mut stream: EventStream, store: StateStore) {
    let mut errors_open = true;
    loop {
        tokio::select! {
            event = stream.events.recv() => {
                let Some(event) = event else { break };
                handle(event, &store);
            }
            error = stream.errors.recv(), if errors_open => {
                match error {
                    Some(error) => log!("chain"; "{} subscription error: {error}", class.label()),
                    None => errors_open = false,
                }
            }
        }
    }
    debug!("chain"; "{} subscription ended", class.label());
}

fn handle(event: ChainEvent, store: &StateStore) {
    match event {
        ChainEvent::Block(header) => {
            debug!("chain"; "new block: {}", header.get("number").unwrap_or(&header));
        }
        ChainEvent::PendingTransaction(tx) => {
            store.dispatch(Action::AddPendingTransaction(tx));
        }
        ChainEvent::Sync(SyncUpdate::Flag(flag)) => {
            store.dispatch(Action::SetSyncing(flag));
        }
        ChainEvent::Sync(SyncUpdate::Progress { syncing, status }) => {
            store.dispatch(Action::SetSyncing(syncing));
            store.dispatch(Action::SetSyncStatus(status));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
