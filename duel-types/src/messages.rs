use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DuelError, GameStatus, LetterResult, RoomView};

/// Inbound frame envelope. `player_id` and `timestamp` are untrusted and
/// overwritten server-side from the session binding and server clock.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ClientEnvelope {
    /// Deserialize this envelope's `data` into a concrete payload type.
    pub fn data_as<T: serde::de::DeserializeOwned + Default>(&self) -> Result<T, DuelError> {
        match &self.data {
            None => Ok(T::default()),
            Some(value) => {
                serde_json::from_value(value.clone()).map_err(|_| DuelError::InvalidMessage)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinData {
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub player_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuessData {
    #[serde(default)]
    pub word: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatData {
    #[serde(default)]
    pub message: String,
}

/// Outbound frame envelope. Serialized once per fan-out where the payload
/// is identical for every receiver.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

pub mod inbound {
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    pub const GUESS: &str = "guess";
    pub const CHAT: &str = "chat";
}

pub mod outbound {
    pub const CONNECTION_ACK: &str = "connection_ack";
    pub const JOIN_SUCCESS: &str = "join_success";
    pub const LEAVE_SUCCESS: &str = "leave_success";
    pub const GAME_STARTED: &str = "game_started";
    pub const GUESS_RESULT: &str = "guess_result";
    pub const GAME_UPDATE: &str = "game_update";
    pub const GAME_COMPLETED: &str = "game_completed";
    pub const PLAYER_UPDATE: &str = "player_update";
    pub const CHAT: &str = "chat";
    pub const ERROR: &str = "error";
}

impl ServerEnvelope {
    pub fn new<T: Serialize>(kind: &'static str, data: &T) -> Self {
        Self {
            kind,
            player_id: None,
            room_id: None,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            timestamp: Utc::now(),
        }
    }

    pub fn for_room<T: Serialize>(kind: &'static str, room_id: &str, data: &T) -> Self {
        let mut env = Self::new(kind, data);
        env.room_id = Some(room_id.to_string());
        env
    }

    pub fn error(err: &DuelError) -> Self {
        Self::new(outbound::ERROR, &err.payload())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAck {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSuccess {
    pub player_id: String,
    pub room: RoomView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveSuccess {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStarted {
    pub target_word_length: usize,
    pub max_guesses: usize,
    pub game_status: GameStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuessResult {
    pub word: String,
    pub results: Vec<LetterResult>,
    pub is_correct: bool,
    pub guesses_remaining: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_id: String,
    pub player_name: String,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameCompleted {
    pub winner: String,
    pub word: String,
    pub scores: Vec<PlayerScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub event: PlayerEvent,
    pub player_id: String,
    pub player_name: String,
    pub player_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerEvent {
    PlayerJoined,
    PlayerLeft,
    PlayerDisconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBroadcast {
    pub player_id: String,
    pub player_name: String,
    pub message: String,
}
