use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info};
use warp::ws::Message;

use duel_types::{ClientEnvelope, ConnectionAck, ServerEnvelope, outbound};

use super::session::Session;

/// One parsed inbound frame together with the session it arrived on.
pub struct InboundFrame {
    pub session: Arc<Session>,
    pub envelope: ClientEnvelope,
}

/// Receiving halves of the hub's channels, handed to the dispatcher.
pub struct HubReceivers {
    register: mpsc::Receiver<Arc<Session>>,
    unregister: mpsc::Receiver<String>,
    inbound: mpsc::Receiver<InboundFrame>,
}

/// Session table plus the per-room subscriber index. All frame handling
/// funnels through one dispatcher task; the maps are locked only for the
/// map operation itself, never across a send.
pub struct Hub {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    room_subs: Mutex<HashMap<String, HashSet<String>>>,
    register_tx: mpsc::Sender<Arc<Session>>,
    unregister_tx: mpsc::Sender<String>,
    inbound_tx: mpsc::Sender<InboundFrame>,
}

impl Hub {
    pub fn new() -> (Arc<Self>, HubReceivers) {
        // Capacity-1 channels: the nearest tokio gets to unbuffered.
        // Backpressure propagates to the read pumps, which is intended;
        // the dispatcher is CPU-only and drains fast.
        let (register_tx, register) = mpsc::channel(1);
        let (unregister_tx, unregister) = mpsc::channel(1);
        let (inbound_tx, inbound) = mpsc::channel(1);
        let hub = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            room_subs: Mutex::new(HashMap::new()),
            register_tx,
            unregister_tx,
            inbound_tx,
        });
        let receivers = HubReceivers {
            register,
            unregister,
            inbound,
        };
        (hub, receivers)
    }

    pub async fn register(&self, session: Arc<Session>) {
        let _ = self.register_tx.send(session).await;
    }

    pub async fn unregister(&self, session_id: &str) {
        let _ = self.unregister_tx.send(session_id.to_string()).await;
    }

    pub async fn submit(&self, frame: InboundFrame) {
        let _ = self.inbound_tx.send(frame).await;
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().expect("hub lock poisoned").get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("hub lock poisoned").len()
    }

    /// Subscribe a session to a room's fan-outs. Established as a side
    /// effect of a successful join.
    pub fn subscribe(&self, room_id: &str, session_id: &str) {
        self.room_subs
            .lock()
            .expect("hub lock poisoned")
            .entry(room_id.to_string())
            .or_default()
            .insert(session_id.to_string());
    }

    pub fn unsubscribe(&self, room_id: &str, session_id: &str) {
        let mut subs = self.room_subs.lock().expect("hub lock poisoned");
        if let Some(set) = subs.get_mut(room_id) {
            set.remove(session_id);
            if set.is_empty() {
                subs.remove(room_id);
            }
        }
    }

    /// Snapshot of the sessions subscribed to a room. Taken under the
    /// lock, used after releasing it.
    pub fn room_sessions(&self, room_id: &str) -> Vec<Arc<Session>> {
        let ids: Vec<String> = {
            let subs = self.room_subs.lock().expect("hub lock poisoned");
            subs.get(room_id).into_iter().flatten().cloned().collect()
        };
        let sessions = self.sessions.lock().expect("hub lock poisoned");
        ids.iter().filter_map(|id| sessions.get(id).cloned()).collect()
    }

    /// Fan one event out to every subscriber of a room, serializing the
    /// payload once.
    pub fn broadcast(&self, room_id: &str, envelope: &ServerEnvelope) {
        let json = match serde_json::to_string(envelope) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize broadcast");
                return;
            }
        };
        for session in self.room_sessions(room_id) {
            session.send_raw(Message::text(json.clone()));
        }
    }

    fn add_session(&self, session: Arc<Session>) {
        self.sessions
            .lock()
            .expect("hub lock poisoned")
            .insert(session.id.clone(), session);
    }

    /// Drop a session from both maps, returning it with its binding so
    /// the dispatcher can notify the room.
    fn drop_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self
            .sessions
            .lock()
            .expect("hub lock poisoned")
            .remove(session_id)?;
        if let Some(binding) = session.binding() {
            self.unsubscribe(&binding.room_id, session_id);
        }
        Some(session)
    }
}

/// The dispatcher: one task owning the select loop over register,
/// unregister, and inbound. Handler code runs on this task and must stay
/// CPU-only; the only suspension points are bounded channel operations.
pub async fn run_dispatcher(
    hub: Arc<Hub>,
    mut receivers: HubReceivers,
    handler: Arc<super::handlers::MessageHandler>,
) {
    info!("hub dispatcher started");
    loop {
        tokio::select! {
            Some(session) = receivers.register.recv() => {
                debug!(session = %session.id, "session registered");
                let ack = ServerEnvelope::new(
                    outbound::CONNECTION_ACK,
                    &ConnectionAck { session_id: session.id.clone() },
                );
                session.send_frame(&ack);
                hub.add_session(session);
            }
            Some(session_id) = receivers.unregister.recv() => {
                if let Some(session) = hub.drop_session(&session_id) {
                    debug!(session = %session_id, "session unregistered");
                    handler.handle_disconnect(&session).await;
                    session.close();
                }
            }
            Some(frame) = receivers.inbound.recv() => {
                handler.handle(frame).await;
            }
            else => break,
        }
    }
    info!("hub dispatcher stopped");
}
