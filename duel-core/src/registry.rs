use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use rand::TryRngCore;
use rand::rngs::OsRng;
use tokio::sync::RwLock;
use tracing::{debug, info};

use duel_types::{DuelError, GameStatus, Player, RoomCode};

use crate::room::Room;

pub const CODE_LENGTH: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 100;

pub const MIN_PLAYERS_PER_ROOM: usize = 1;
pub const MAX_PLAYERS_PER_ROOM: usize = 10;

/// Thread-safe store of every live room, keyed by join code. The
/// registry lock guards the map; each room carries its own lock, taken
/// strictly after the registry's.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomCode, Arc<RwLock<Room>>>>,
    max_concurrent: AtomicUsize,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_concurrent: AtomicUsize::new(usize::MAX),
        }
    }

    /// Advisory cap on concurrent rooms.
    pub fn set_max_concurrent(&self, n: usize) {
        self.max_concurrent.store(n, Ordering::Relaxed);
    }

    /// Uppercase and validate a client-supplied code. Wrong length or a
    /// non-alphanumeric character is a format error, distinct from a
    /// lookup miss.
    pub fn normalize_code(code: &str) -> Result<RoomCode, DuelError> {
        let code = code.trim().to_uppercase();
        if code.len() != CODE_LENGTH
            || !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(DuelError::InvalidRoomId);
        }
        Ok(code)
    }

    pub async fn create_room(
        &self,
        name: String,
        max_players: usize,
    ) -> Result<Arc<RwLock<Room>>, DuelError> {
        if !(MIN_PLAYERS_PER_ROOM..=MAX_PLAYERS_PER_ROOM).contains(&max_players) {
            return Err(DuelError::InvalidMaxPlayers);
        }

        let mut rooms = self.rooms.write().await;
        if rooms.len() >= self.max_concurrent.load(Ordering::Relaxed) {
            return Err(DuelError::ServerOverloaded);
        }

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code()?;
            if rooms.contains_key(&code) {
                continue;
            }
            let room = Arc::new(RwLock::new(Room::new(code.clone(), name.clone(), max_players)));
            rooms.insert(code.clone(), room.clone());
            info!(room = %code, max_players, "room created");
            return Ok(room);
        }

        Err(DuelError::RoomCreationFailed)
    }

    pub async fn get_room(&self, code: &str) -> Result<Arc<RwLock<Room>>, DuelError> {
        let code = Self::normalize_code(code)?;
        let rooms = self.rooms.read().await;
        rooms.get(&code).cloned().ok_or(DuelError::RoomNotFound)
    }

    /// Adds a player to a room. Registry-read then room-write, in that
    /// order only.
    pub async fn join_room(
        &self,
        code: &str,
        player_id: &str,
        player_name: &str,
    ) -> Result<Arc<RwLock<Room>>, DuelError> {
        let room = self.get_room(code).await?;
        {
            let mut room = room.write().await;
            room.add_player(player_id.to_string(), player_name.to_string())?;
            debug!(room = %room.id, player = player_id, "player joined");
        }
        Ok(room)
    }

    /// Removes a player, returning the removed record.
    pub async fn leave_room(&self, code: &str, player_id: &str) -> Result<Player, DuelError> {
        let room = self.get_room(code).await?;
        let mut room = room.write().await;
        let player = room.remove_player(player_id)?;
        debug!(room = %room.id, player = player_id, "player left");
        Ok(player)
    }

    pub async fn remove_room(&self, code: &str) -> Result<(), DuelError> {
        let code = Self::normalize_code(code)?;
        let mut rooms = self.rooms.write().await;
        match rooms.remove(&code) {
            Some(_) => {
                info!(room = %code, "room removed");
                Ok(())
            }
            None => Err(DuelError::RoomNotFound),
        }
    }

    /// Remove every room whose `updated_at` is older than `timeout`.
    /// Returns the number of rooms dropped.
    pub async fn cleanup_expired(&self, timeout: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let mut rooms = self.rooms.write().await;

        let mut doomed = Vec::new();
        for (code, room) in rooms.iter() {
            if room.read().await.updated_at < cutoff {
                doomed.push(code.clone());
            }
        }
        for code in &doomed {
            rooms.remove(code);
            info!(room = %code, "expired room removed");
        }
        doomed.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Snapshot of every live room code, for sweep passes.
    pub async fn codes(&self) -> Vec<RoomCode> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Room counts grouped by game status, for health reporting.
    pub async fn status_counts(&self) -> HashMap<&'static str, usize> {
        let rooms = self.rooms.read().await;
        let mut counts =
            HashMap::from([("waiting", 0usize), ("active", 0usize), ("finished", 0usize)]);
        for room in rooms.values() {
            let status = match room.read().await.game.status {
                GameStatus::Waiting => "waiting",
                GameStatus::Active => "active",
                GameStatus::Finished => "finished",
            };
            *counts.entry(status).or_default() += 1;
        }
        counts
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_code() -> Result<RoomCode, DuelError> {
    let mut bytes = [0u8; CODE_LENGTH];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| DuelError::RoomCreationFailed)?;
    Ok(bytes
        .iter()
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect())
}
