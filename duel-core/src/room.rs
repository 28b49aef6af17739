use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use duel_types::{
    DuelError, GameState, GameStateView, GameStatus, Guess, Player, PlayerId, PlayerStatus,
    PlayerView, RoomCode, RoomView, WORD_LENGTH,
};

use crate::dictionary::Dictionary;
use crate::evaluator;

/// A single match room: the player map and the game state form one
/// invariant domain and are mutated together under the registry's
/// per-room write lock.
#[derive(Debug)]
pub struct Room {
    pub id: RoomCode,
    pub uuid: Uuid,
    pub name: String,
    pub max_players: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub players: HashMap<PlayerId, Player>,
    pub game: GameState,
}

impl Room {
    pub fn new(id: RoomCode, name: String, max_players: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            uuid: Uuid::new_v4(),
            name,
            max_players,
            created_at: now,
            updated_at: now,
            players: HashMap::new(),
            game: GameState::new(0),
        }
    }

    /// Advance `updated_at`, keeping it monotonically non-decreasing.
    fn touch(&mut self) {
        self.updated_at = self.updated_at.max(Utc::now());
    }

    pub fn add_player(&mut self, id: PlayerId, name: String) -> Result<(), DuelError> {
        if self.players.contains_key(&id) {
            return Err(DuelError::PlayerExists);
        }
        if self.players.len() >= self.max_players {
            return Err(DuelError::RoomFull);
        }
        self.players.insert(id.clone(), Player::new(id, name));
        self.touch();
        Ok(())
    }

    pub fn remove_player(&mut self, id: &str) -> Result<Player, DuelError> {
        let player = self.players.remove(id).ok_or(DuelError::PlayerNotFound)?;
        self.touch();
        Ok(player)
    }

    /// Flip a player to disconnected without removing their slot; used by
    /// the hub when a session drops mid-game.
    pub fn mark_disconnected(&mut self, id: &str) {
        if let Some(player) = self.players.get_mut(id) {
            player.status = PlayerStatus::Disconnected;
            player.last_activity = Utc::now();
            self.touch();
        }
    }

    /// waiting → active. The target is chosen by the caller; the room
    /// only validates and applies the transition.
    pub fn start_game(&mut self, target: &str) -> Result<(), DuelError> {
        let target = target.trim().to_lowercase();
        if self.game.status != GameStatus::Waiting
            || self.players.len() < 2
            || target.len() != WORD_LENGTH
        {
            return Err(DuelError::InternalError);
        }

        self.game.word = target;
        self.game.status = GameStatus::Active;
        self.game.started_at = Some(Utc::now());
        self.game.finished_at = None;
        self.game.winner = None;
        self.game.current_round = 1;

        for player in self.players.values_mut() {
            player.status = PlayerStatus::Active;
            player.guesses.clear();
            player.score = 0;
        }

        self.touch();
        Ok(())
    }

    /// active → finished. Every player not already finished is finished.
    pub fn end_game(&mut self, winner: Option<PlayerId>) {
        self.game.status = GameStatus::Finished;
        self.game.finished_at = Some(Utc::now());
        self.game.winner = winner;
        for player in self.players.values_mut() {
            if player.status != PlayerStatus::Finished {
                player.status = PlayerStatus::Finished;
            }
        }
        self.touch();
    }

    /// finished → waiting: clears the word, winner, and round timestamps
    /// so the room can host another match.
    pub fn reset_game(&mut self) {
        if self.game.status != GameStatus::Finished {
            return;
        }
        self.game.status = GameStatus::Waiting;
        self.game.word.clear();
        self.game.winner = None;
        self.game.started_at = None;
        self.game.finished_at = None;
        self.game.current_round = 0;
        self.touch();
    }

    /// The full guess pipeline. Validation order is observable through
    /// error codes, so it is fixed: length, winner, game status, player,
    /// guess budget, dictionary. The winner check runs before the status
    /// check so that a guess into a won game reports the win rather than
    /// the generic not-active state.
    pub fn submit_guess(
        &mut self,
        player_id: &str,
        word: &str,
        dict: &Dictionary,
    ) -> Result<Guess, DuelError> {
        let word = word.trim().to_lowercase();
        if word.len() != WORD_LENGTH {
            return Err(DuelError::InvalidWordLength);
        }
        if self.game.winner.is_some() {
            return Err(DuelError::GameAlreadyWon);
        }
        if self.game.status != GameStatus::Active {
            return Err(DuelError::GameNotActive);
        }
        if !self.players.contains_key(player_id) {
            return Err(DuelError::PlayerNotFound);
        }
        let guess_count = self.players[player_id].guesses.len();
        if guess_count >= self.game.max_guesses {
            return Err(DuelError::TooManyGuesses);
        }
        if !dict.is_valid_guess(&word) {
            return Err(DuelError::InvalidWord);
        }

        let results = evaluator::score(&word, &self.game.word);
        let is_correct = word == self.game.word;
        let guess = Guess {
            word,
            results: results.to_vec(),
            timestamp: Utc::now(),
            is_correct,
        };

        let player = self
            .players
            .get_mut(player_id)
            .expect("player presence checked above");
        player.guesses.push(guess.clone());
        player.last_activity = Utc::now();

        if is_correct {
            let guess_index = (player.guesses.len() - 1) as i32;
            player.score = std::cmp::max(10, 100 - guess_index * 10);
            player.status = PlayerStatus::Finished;
            self.end_game(Some(player_id.to_string()));
        } else if player.guesses.len() == self.game.max_guesses {
            player.status = PlayerStatus::Finished;
            if self
                .players
                .values()
                .all(|p| p.status == PlayerStatus::Finished)
            {
                self.end_game(None);
            }
        }

        self.touch();
        Ok(guess)
    }

    /// Most recent activity across the room's players, if any.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.players.values().map(|p| p.last_activity).max()
    }

    pub fn all_disconnected(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .values()
                .all(|p| p.status == PlayerStatus::Disconnected)
    }

    /// Room state as seen by one viewer: their own guesses in full,
    /// everyone else reduced to result patterns. `None` produces the
    /// fully redacted projection used by the HTTP surface.
    pub fn view_for(&self, viewer: Option<&str>) -> RoomView {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));

        let players = players
            .into_iter()
            .map(|p| PlayerView {
                id: p.id.clone(),
                name: p.name.clone(),
                status: p.status,
                score: p.score,
                guess_count: p.guesses.len(),
                guesses: (viewer == Some(p.id.as_str())).then(|| p.guesses.clone()),
                results: p.guesses.iter().map(|g| g.results.clone()).collect(),
            })
            .collect();

        RoomView {
            id: self.id.clone(),
            name: self.name.clone(),
            max_players: self.max_players,
            player_count: self.players.len(),
            players,
            game: GameStateView::from_state(&self.game),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
