use std::fmt::Write as _;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::TryRngCore;
use rand::rngs::OsRng;
use tokio::sync::{mpsc, watch};
use tracing::warn;
use warp::ws::Message;

use duel_types::ServerEnvelope;

pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
const SESSION_ID_BYTES: usize = 8;

/// A session's lazily-established room membership.
#[derive(Debug, Clone)]
pub struct Binding {
    pub room_id: String,
    pub player_id: String,
}

/// One live client connection. Holds the bounded outbound queue feeding
/// the write pump; enqueueing never blocks, and a full queue marks the
/// client slow and tears the session down.
pub struct Session {
    pub id: String,
    pub client_ip: String,
    pub connected_at: Instant,
    last_pong: Mutex<Instant>,
    binding: Mutex<Option<Binding>>,
    outbound: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: String, client_ip: String) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, receiver) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let now = Instant::now();
        let session = Self {
            id,
            client_ip,
            connected_at: now,
            last_pong: Mutex::new(now),
            binding: Mutex::new(None),
            outbound,
            shutdown,
            closed: AtomicBool::new(false),
        };
        (session, receiver)
    }

    /// Opaque server-assigned identity: 16 hex chars from a
    /// cryptographic source.
    pub fn generate_id() -> String {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .expect("operating system rng unavailable");
        bytes.iter().fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
    }

    /// Serialize and enqueue one frame. See `send_raw` for the slow
    /// client contract.
    pub fn send_frame(&self, envelope: &ServerEnvelope) -> bool {
        match serde_json::to_string(envelope) {
            Ok(json) => self.send_raw(Message::text(json)),
            Err(e) => {
                warn!(session = %self.id, error = %e, "failed to serialize frame");
                false
            }
        }
    }

    /// Non-blocking enqueue into the outbound queue. A full queue means
    /// the client cannot keep up: the session is closed rather than ever
    /// making a sender wait.
    pub fn send_raw(&self, message: Message) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %self.id, "outbound queue full, closing slow session");
                self.close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Signal both pumps to wind the connection down.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn stamp_pong(&self) {
        *self.last_pong.lock().expect("pong lock poisoned") = Instant::now();
    }

    pub fn last_pong(&self) -> Instant {
        *self.last_pong.lock().expect("pong lock poisoned")
    }

    pub fn bind(&self, room_id: String, player_id: String) {
        *self.binding.lock().expect("binding lock poisoned") = Some(Binding { room_id, player_id });
    }

    pub fn unbind(&self) {
        *self.binding.lock().expect("binding lock poisoned") = None;
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding.lock().expect("binding lock poisoned").clone()
    }
}
