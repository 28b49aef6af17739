use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure a client can observe, with a stable textual code for
/// client programs. The display string is the human-readable half of the
/// wire payload; the target word must never appear in either.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DuelError {
    // Validation
    #[error("payload is not valid JSON")]
    InvalidJson,
    #[error("malformed message envelope")]
    InvalidMessage,
    #[error("room_id is required")]
    MissingRoomId,
    #[error("player_name is required")]
    MissingPlayerName,
    #[error("message is required")]
    MissingMessage,
    #[error("guesses must be exactly 5 letters")]
    InvalidWordLength,
    #[error("room codes are 6 letters or digits")]
    InvalidRoomId,
    #[error("unknown message type")]
    UnknownMessageType,

    // Game domain
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("a player with this id is already in the room")]
    PlayerExists,
    #[error("not joined to a room")]
    NotInRoom,
    #[error("already joined to a room")]
    AlreadyInRoom,
    #[error("player not found in room")]
    PlayerNotFound,
    #[error("game is not active")]
    GameNotActive,
    #[error("the game already has a winner")]
    GameAlreadyWon,
    #[error("no guesses remaining")]
    TooManyGuesses,
    #[error("word is not in the dictionary")]
    InvalidWord,
    #[error("max players must be between 1 and 10")]
    InvalidMaxPlayers,

    // Security / admission
    #[error("message rate limit exceeded")]
    RateLimitExceeded,
    #[error("message exceeds the size limit")]
    MessageTooLarge,
    #[error("origin not allowed")]
    InvalidOrigin,
    #[error("too many connections from this address")]
    TooManyConnections,
    #[error("server is at capacity")]
    ServerOverloaded,

    // Infrastructure
    #[error("failed to create room")]
    RoomCreationFailed,
    #[error("failed to join room")]
    JoinFailed,
    #[error("failed to process guess")]
    GuessProcessingFailed,
    #[error("internal server error")]
    InternalError,
}

impl DuelError {
    pub fn code(&self) -> &'static str {
        match self {
            DuelError::InvalidJson => "INVALID_JSON",
            DuelError::InvalidMessage => "INVALID_MESSAGE",
            DuelError::MissingRoomId => "MISSING_ROOM_ID",
            DuelError::MissingPlayerName => "MISSING_PLAYER_NAME",
            DuelError::MissingMessage => "MISSING_MESSAGE",
            DuelError::InvalidWordLength => "INVALID_WORD_LENGTH",
            DuelError::InvalidRoomId => "INVALID_ROOM_ID",
            DuelError::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            DuelError::RoomNotFound => "ROOM_NOT_FOUND",
            DuelError::RoomFull => "ROOM_FULL",
            DuelError::PlayerExists => "PLAYER_EXISTS",
            DuelError::NotInRoom => "NOT_IN_ROOM",
            DuelError::AlreadyInRoom => "ALREADY_IN_ROOM",
            DuelError::PlayerNotFound => "PLAYER_NOT_FOUND",
            DuelError::GameNotActive => "GAME_NOT_ACTIVE",
            DuelError::GameAlreadyWon => "GAME_ALREADY_WON",
            DuelError::TooManyGuesses => "TOO_MANY_GUESSES",
            DuelError::InvalidWord => "INVALID_WORD",
            DuelError::InvalidMaxPlayers => "INVALID_MAX_PLAYERS",
            DuelError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            DuelError::MessageTooLarge => "MESSAGE_TOO_LARGE",
            DuelError::InvalidOrigin => "INVALID_ORIGIN",
            DuelError::TooManyConnections => "TOO_MANY_CONNECTIONS",
            DuelError::ServerOverloaded => "SERVER_OVERLOADED",
            DuelError::RoomCreationFailed => "ROOM_CREATION_FAILED",
            DuelError::JoinFailed => "JOIN_FAILED",
            DuelError::GuessProcessingFailed => "GUESS_PROCESSING_FAILED",
            DuelError::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Wire shape of an error, both as a WS `error` frame body and as an
/// HTTP JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
