use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use duel_types::{GameStatus, RoomCode};

use crate::registry::RoomRegistry;
use crate::room::Room;

const REQUEST_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub cleanup_interval: Duration,
    pub empty_timeout: Duration,
    pub finished_timeout: Duration,
    pub inactive_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5 * 60),
            empty_timeout: Duration::from_secs(5 * 60),
            finished_timeout: Duration::from_secs(15 * 60),
            inactive_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// The single background sweeper that removes expired rooms. There is
/// never a per-room cleanup task; emptied rooms are batched through the
/// bounded explicit-request channel instead.
pub struct Reaper {
    registry: Arc<RoomRegistry>,
    config: ReaperConfig,
    request_tx: mpsc::Sender<RoomCode>,
    request_rx: Arc<Mutex<mpsc::Receiver<RoomCode>>>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Reaper {
    pub fn new(registry: Arc<RoomRegistry>, config: ReaperConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        Self {
            registry,
            config,
            request_tx,
            request_rx: Arc::new(Mutex::new(request_rx)),
            worker: Mutex::new(None),
        }
    }

    /// Ask the reaper to look at one specific room soon. Never blocks;
    /// overflow drops the request, which is safe because the periodic
    /// sweep will catch the room anyway.
    pub fn request_cleanup(&self, code: RoomCode) {
        if let Err(e) = self.request_tx.try_send(code) {
            warn!(error = %e, "reaper request queue full, dropping cleanup request");
        }
    }

    /// Spawn the worker task. Calling start on a running reaper is a
    /// no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let reaper = self.clone();
        let handle = tokio::spawn(reaper.run(shutdown_rx));
        *worker = Some(Worker { handle, shutdown });
        info!("reaper started");
    }

    /// Signal the worker and wait for it to finish the sweep it is in.
    /// Calling stop on a stopped reaper is a no-op.
    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(true);
            let _ = worker.handle.await;
            info!("reaper stopped");
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut requests = self.request_rx.lock().await;
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                Some(code) = requests.recv() => {
                    self.handle_request(&code).await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One full sweep over every room. Public so callers (and tests) can
    /// force a pass outside the ticker cadence.
    pub async fn sweep_once(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for code in self.registry.codes().await {
            let Ok(room) = self.registry.get_room(&code).await else {
                continue;
            };

            let rule = { expiry_rule(&*room.read().await, &self.config, now) };
            if let Some(rule) = rule {
                self.reap(&code, &room, rule).await;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "reaper sweep finished");
        }
        removed
    }

    /// Explicit requests target rooms believed dead (typically emptied by
    /// a leave). Re-check under the lock; a room that gained players in
    /// the meantime is left alone for the periodic sweep.
    async fn handle_request(&self, code: &str) {
        let Ok(room) = self.registry.get_room(code).await else {
            return;
        };
        if room.read().await.players.is_empty() {
            self.reap(code, &room, "explicit-request").await;
        }
    }

    async fn reap(&self, code: &str, room: &Arc<tokio::sync::RwLock<Room>>, rule: &'static str) {
        {
            let mut room = room.write().await;
            for player in room.players.values_mut() {
                player.guesses.clear();
            }
        }
        if self.registry.remove_room(code).await.is_ok() {
            info!(room = %code, rule, "room reaped");
        }
    }
}

/// First matching expiry rule for a room, or None if it stays.
fn expiry_rule(room: &Room, config: &ReaperConfig, now: DateTime<Utc>) -> Option<&'static str> {
    let age_exceeds = |ts: DateTime<Utc>, timeout: Duration| {
        now.signed_duration_since(ts)
            > chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX)
    };

    if room.players.is_empty() && age_exceeds(room.updated_at, config.empty_timeout) {
        return Some("empty-and-stale");
    }

    if room.game.status == GameStatus::Finished
        && let Some(finished_at) = room.game.finished_at
        && age_exceeds(finished_at, config.finished_timeout)
    {
        return Some("finished-and-stale");
    }

    if let Some(last) = room.last_activity()
        && age_exceeds(last, config.inactive_timeout)
    {
        return Some("last-activity-stale");
    }

    if room.all_disconnected()
        && room
            .players
            .values()
            .all(|p| age_exceeds(p.last_activity, config.inactive_timeout))
    {
        return Some("all-disconnected-and-stale");
    }

    None
}
