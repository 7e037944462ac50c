//! Live-connection bookkeeping shared by every connection task.
//!
//! Invariants:
//! - An `unregister` is visible to every `is_live` / `handle` call that starts after it returns.
//! - Each connection has at most one in-flight streaming session (`try_begin`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::error::{CoreResult, StreamError};
use crate::model::{ConnectionId, ServerEvent};

/// Outbound handle for one connection; the gateway's writer task drains it.
pub type EventTx = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug)]
struct Entry {
    tx: EventTx,
    in_flight: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<ConnectionId, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the map itself consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<ConnectionId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, id: ConnectionId, tx: EventTx) {
        self.entries().insert(id, Entry { tx, in_flight: false });
    }

    /// Remove the connection. Returns its handle so the caller can attempt a
    /// last write.
    pub fn unregister(&self, id: &ConnectionId) -> Option<EventTx> {
        self.entries().remove(id).map(|e| e.tx)
    }

    pub fn is_live(&self, id: &ConnectionId) -> bool {
        self.entries().contains_key(id)
    }

    /// The connection's outbound handle, if it is still live.
    pub fn handle(&self, id: &ConnectionId) -> Option<EventTx> {
        self.entries().get(id).map(|e| e.tx.clone())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Claim the connection's single session slot. Fails with `Busy` while
    /// another session holds it. The slot is released when the guard drops.
    pub fn try_begin(self: &Arc<Self>, id: &ConnectionId) -> CoreResult<SessionSlot> {
        let mut entries = self.entries();
        let entry = entries.get_mut(id).ok_or_else(|| {
            StreamError::Validation(format!("connection {id} is not registered"))
        })?;
        if entry.in_flight {
            return Err(StreamError::Busy {
                connection: id.to_string(),
            });
        }
        entry.in_flight = true;
        Ok(SessionSlot {
            registry: Arc::clone(self),
            id: id.clone(),
        })
    }

    fn release(&self, id: &ConnectionId) {
        if let Some(entry) = self.entries().get_mut(id) {
            entry.in_flight = false;
        }
    }
}

/// Guard for a connection's in-flight session slot.
#[derive(Debug)]
pub struct SessionSlot {
    registry: Arc<SessionRegistry>,
    id: ConnectionId,
}

impl SessionSlot {
    pub fn connection(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (EventTx, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_then_unregister() {
        let reg = SessionRegistry::new();
        let id = ConnectionId::from("c1");
        let (tx, _rx) = channel();

        assert!(!reg.is_live(&id));
        reg.register(id.clone(), tx);
        assert!(reg.is_live(&id));
        assert_eq!(reg.len(), 1);

        assert!(reg.unregister(&id).is_some());
        assert!(!reg.is_live(&id));
        assert!(reg.handle(&id).is_none());
        assert!(reg.is_empty());
        assert!(reg.unregister(&id).is_none());
    }

    #[test]
    fn handle_delivers_to_registered_receiver() {
        let reg = SessionRegistry::new();
        let id = ConnectionId::from("c1");
        let (tx, mut rx) = channel();
        reg.register(id.clone(), tx);

        reg.handle(&id).unwrap().send(ServerEvent::chunk("hi")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::chunk("hi"));
    }

    #[test]
    fn unregister_is_seen_by_other_threads() {
        let reg = Arc::new(SessionRegistry::new());
        let id = ConnectionId::from("c1");
        let (tx, _rx) = channel();
        reg.register(id.clone(), tx);

        let r2 = Arc::clone(&reg);
        let id2 = id.clone();
        std::thread::spawn(move || {
            r2.unregister(&id2);
        })
        .join()
        .unwrap();
        assert!(!reg.is_live(&id));
    }

    #[test]
    fn second_session_on_same_connection_is_busy() {
        let reg = Arc::new(SessionRegistry::new());
        let id = ConnectionId::from("c1");
        let (tx, _rx) = channel();
        reg.register(id.clone(), tx);

        let slot = reg.try_begin(&id).unwrap();
        assert_eq!(slot.connection(), &id);
        match reg.try_begin(&id).unwrap_err() {
            StreamError::Busy { connection } => assert_eq!(connection, "c1"),
            other => panic!("expected Busy, got {other:?}"),
        }
        drop(slot);
        assert!(reg.try_begin(&id).is_ok());
    }

    #[test]
    fn sessions_on_different_connections_are_independent() {
        let reg = Arc::new(SessionRegistry::new());
        let (a, b) = (ConnectionId::from("a"), ConnectionId::from("b"));
        reg.register(a.clone(), channel().0);
        reg.register(b.clone(), channel().0);
        let _sa = reg.try_begin(&a).unwrap();
        assert!(reg.try_begin(&b).is_ok());
    }

    #[test]
    fn begin_on_unknown_connection_fails() {
        let reg = Arc::new(SessionRegistry::new());
        assert!(matches!(
            reg.try_begin(&ConnectionId::from("ghost")).unwrap_err(),
            StreamError::Validation(_)
        ));
    }

    #[test]
    fn slot_outliving_its_connection_is_harmless() {
        let reg = Arc::new(SessionRegistry::new());
        let id = ConnectionId::from("c1");
        reg.register(id.clone(), channel().0);
        let slot = reg.try_begin(&id).unwrap();
        reg.unregister(&id);
        drop(slot);
        assert!(!reg.is_live(&id));
    }
}
