use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PlayerId = String;
pub type RoomCode = String;

pub const WORD_LENGTH: usize = 5;
pub const MAX_GUESSES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,  // Room open, players joining
    Active,   // Target chosen, guessing in progress
    Finished, // Terminal within a single match
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Active,
    Disconnected,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LetterResult {
    Correct, // Right letter, right slot
    Present, // Right letter, wrong slot, capped by remaining multiplicity
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guess {
    pub word: String,
    pub results: Vec<LetterResult>,
    pub timestamp: DateTime<Utc>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub status: PlayerStatus,
    pub guesses: Vec<Guess>,
    pub score: i32,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Player {
    pub fn new(id: PlayerId, name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            status: PlayerStatus::Active,
            guesses: Vec::new(),
            score: 0,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn has_correct_guess(&self) -> bool {
        self.guesses.iter().any(|g| g.is_correct)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub status: GameStatus,
    pub word: String, // Hidden from clients until finished
    pub max_guesses: usize,
    pub current_round: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub winner: Option<PlayerId>,
    pub round_duration_seconds: u64,
}

impl GameState {
    pub fn new(round_duration_seconds: u64) -> Self {
        Self {
            status: GameStatus::Waiting,
            word: String::new(),
            max_guesses: MAX_GUESSES,
            current_round: 0,
            started_at: None,
            finished_at: None,
            winner: None,
            round_duration_seconds,
        }
    }
}

/// Per-player slice of room state as seen by one specific viewer.
/// The viewer gets their own full guesses; everyone else is reduced to
/// the letter-pattern heatmap so guessed words never leak across players.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub status: PlayerStatus,
    pub score: i32,
    pub guess_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guesses: Option<Vec<Guess>>,
    pub results: Vec<Vec<LetterResult>>,
}

/// Game state with the target word omitted unless the game is finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateView {
    pub status: GameStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    pub max_guesses: usize,
    pub current_round: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub winner: String,
    pub round_duration_seconds: u64,
}

impl GameStateView {
    pub fn from_state(game: &GameState) -> Self {
        let word = match game.status {
            GameStatus::Finished => Some(game.word.clone()),
            _ => None,
        };
        Self {
            status: game.status,
            word,
            max_guesses: game.max_guesses,
            current_round: game.current_round,
            started_at: game.started_at,
            finished_at: game.finished_at,
            winner: game.winner.clone().unwrap_or_default(),
            round_duration_seconds: game.round_duration_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomView {
    pub id: RoomCode,
    pub name: String,
    pub max_players: usize,
    pub player_count: usize,
    pub players: Vec<PlayerView>,
    pub game: GameStateView,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
