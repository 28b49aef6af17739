use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use duel_core::{Dictionary, Reaper, RoomRegistry};
use duel_types::{
    ChatBroadcast, ChatData, ClientEnvelope, DuelError, GameCompleted, GameStarted, GameStatus,
    GuessData, GuessResult, JoinData, JoinSuccess, LeaveSuccess, PlayerEvent, PlayerScore,
    PlayerUpdate, ServerEnvelope, inbound, outbound,
};

use super::hub::{Hub, InboundFrame};
use super::session::Session;

/// Parses and dispatches inbound frames on the hub dispatcher task.
/// Every path here is memory work plus `send_frame` enqueues; anything
/// slower would stall every room.
pub struct MessageHandler {
    hub: Arc<Hub>,
    registry: Arc<RoomRegistry>,
    dictionary: Arc<Dictionary>,
    reaper: Arc<Reaper>,
}

impl MessageHandler {
    pub fn new(
        hub: Arc<Hub>,
        registry: Arc<RoomRegistry>,
        dictionary: Arc<Dictionary>,
        reaper: Arc<Reaper>,
    ) -> Self {
        Self {
            hub,
            registry,
            dictionary,
            reaper,
        }
    }

    pub async fn handle(&self, frame: InboundFrame) {
        let InboundFrame { session, envelope } = frame;
        let result = match envelope.kind.as_str() {
            inbound::JOIN => self.handle_join(&session, &envelope).await,
            inbound::LEAVE => self.handle_leave(&session).await,
            inbound::GUESS => self.handle_guess(&session, &envelope).await,
            inbound::CHAT => self.handle_chat(&session, &envelope).await,
            other => {
                warn!(session = %session.id, kind = other, "unknown message type");
                Err(DuelError::UnknownMessageType)
            }
        };

        if let Err(err) = result {
            session.send_frame(&ServerEnvelope::error(&err));
        }
    }

    /// Invoked by the dispatcher when a session unregisters: mark the
    /// player disconnected in their room and tell the rest of the room.
    pub async fn handle_disconnect(&self, session: &Session) {
        let Some(binding) = session.binding() else {
            return;
        };

        let Ok(room) = self.registry.get_room(&binding.room_id).await else {
            return;
        };

        let (player_name, player_count) = {
            let mut room = room.write().await;
            room.mark_disconnected(&binding.player_id);
            let name = room
                .players
                .get(&binding.player_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            (name, room.players.len())
        };

        info!(session = %session.id, room = %binding.room_id, "player disconnected");
        self.hub.broadcast(
            &binding.room_id,
            &ServerEnvelope::for_room(
                outbound::PLAYER_UPDATE,
                &binding.room_id,
                &PlayerUpdate {
                    event: PlayerEvent::PlayerDisconnected,
                    player_id: binding.player_id,
                    player_name,
                    player_count,
                },
            ),
        );
    }

    async fn handle_join(
        &self,
        session: &Arc<Session>,
        envelope: &ClientEnvelope,
    ) -> Result<(), DuelError> {
        if session.binding().is_some() {
            return Err(DuelError::AlreadyInRoom);
        }

        let data: JoinData = envelope.data_as()?;
        let room_id = if data.room_id.is_empty() {
            envelope.room_id.clone().unwrap_or_default()
        } else {
            data.room_id
        };
        if room_id.is_empty() {
            return Err(DuelError::MissingRoomId);
        }
        if data.player_name.trim().is_empty() {
            return Err(DuelError::MissingPlayerName);
        }

        // Identity is self-asserted: the client may bring a player id,
        // otherwise the server mints one
        let player_id = envelope
            .player_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let room_arc = self
            .registry
            .join_room(&room_id, &player_id, data.player_name.trim())
            .await?;

        let code = room_arc.read().await.id.clone();
        session.bind(code.clone(), player_id.clone());
        self.hub.subscribe(&code, &session.id);

        let (view, player_count, should_start) = {
            let room = room_arc.read().await;
            (
                room.view_for(Some(&player_id)),
                room.players.len(),
                room.players.len() >= 2 && room.game.status == GameStatus::Waiting,
            )
        };

        session.send_frame(&ServerEnvelope::for_room(
            outbound::JOIN_SUCCESS,
            &code,
            &JoinSuccess {
                player_id: player_id.clone(),
                room: view,
            },
        ));

        self.hub.broadcast(
            &code,
            &ServerEnvelope::for_room(
                outbound::PLAYER_UPDATE,
                &code,
                &PlayerUpdate {
                    event: PlayerEvent::PlayerJoined,
                    player_id,
                    player_name: data.player_name.trim().to_string(),
                    player_count,
                },
            ),
        );

        if should_start {
            self.start_game(&code, &room_arc).await;
        }

        Ok(())
    }

    /// Auto-start once a second player arrives: the handler picks the
    /// target so the room transition stays pure.
    async fn start_game(&self, code: &str, room_arc: &Arc<tokio::sync::RwLock<duel_core::Room>>) {
        let target = self.dictionary.random_target();
        let started = {
            let mut room = room_arc.write().await;
            room.start_game(&target).map(|_| GameStarted {
                target_word_length: room.game.word.len(),
                max_guesses: room.game.max_guesses,
                game_status: room.game.status,
                started_at: room.game.started_at.unwrap_or_else(chrono::Utc::now),
            })
        };

        match started {
            Ok(payload) => {
                info!(room = %code, "game started");
                self.hub.broadcast(
                    code,
                    &ServerEnvelope::for_room(outbound::GAME_STARTED, code, &payload),
                );
            }
            Err(e) => warn!(room = %code, error = %e, "failed to start game"),
        }
    }

    async fn handle_leave(&self, session: &Arc<Session>) -> Result<(), DuelError> {
        let binding = session.binding().ok_or(DuelError::NotInRoom)?;

        let player = self
            .registry
            .leave_room(&binding.room_id, &binding.player_id)
            .await?;
        self.hub.unsubscribe(&binding.room_id, &session.id);
        session.unbind();

        session.send_frame(&ServerEnvelope::for_room(
            outbound::LEAVE_SUCCESS,
            &binding.room_id,
            &LeaveSuccess {
                room_id: binding.room_id.clone(),
            },
        ));

        let player_count = match self.registry.get_room(&binding.room_id).await {
            Ok(room) => room.read().await.players.len(),
            Err(_) => 0,
        };

        self.hub.broadcast(
            &binding.room_id,
            &ServerEnvelope::for_room(
                outbound::PLAYER_UPDATE,
                &binding.room_id,
                &PlayerUpdate {
                    event: PlayerEvent::PlayerLeft,
                    player_id: binding.player_id,
                    player_name: player.name,
                    player_count,
                },
            ),
        );

        // Emptied rooms go to the reaper's explicit queue rather than a
        // one-off deletion task
        if player_count == 0 {
            self.reaper.request_cleanup(binding.room_id);
        }

        Ok(())
    }

    async fn handle_guess(
        &self,
        session: &Arc<Session>,
        envelope: &ClientEnvelope,
    ) -> Result<(), DuelError> {
        let binding = session.binding().ok_or(DuelError::NotInRoom)?;
        let data: GuessData = envelope.data_as()?;

        let room_arc = self.registry.get_room(&binding.room_id).await?;

        let (guess, remaining, finished) = {
            let mut room = room_arc.write().await;
            let guess = room.submit_guess(&binding.player_id, &data.word, &self.dictionary)?;
            let remaining = room
                .players
                .get(&binding.player_id)
                .map(|p| room.game.max_guesses.saturating_sub(p.guesses.len()))
                .unwrap_or(0);
            (guess, remaining, room.game.status == GameStatus::Finished)
        };

        session.send_frame(&ServerEnvelope::for_room(
            outbound::GUESS_RESULT,
            &binding.room_id,
            &GuessResult {
                word: guess.word.clone(),
                results: guess.results.clone(),
                is_correct: guess.is_correct,
                guesses_remaining: remaining,
            },
        ));

        // Personalized fan-out: each member sees their own words, only
        // patterns for everyone else
        {
            let room = room_arc.read().await;
            for member in self.hub.room_sessions(&binding.room_id) {
                let Some(member_binding) = member.binding() else {
                    continue;
                };
                let view = room.view_for(Some(&member_binding.player_id));
                member.send_frame(&ServerEnvelope::for_room(
                    outbound::GAME_UPDATE,
                    &binding.room_id,
                    &view,
                ));
            }
        }

        if finished {
            let payload = {
                let room = room_arc.read().await;
                let mut scores: Vec<PlayerScore> = room
                    .players
                    .values()
                    .map(|p| PlayerScore {
                        player_id: p.id.clone(),
                        player_name: p.name.clone(),
                        score: p.score,
                    })
                    .collect();
                scores.sort_by(|a, b| b.score.cmp(&a.score).then(a.player_id.cmp(&b.player_id)));
                GameCompleted {
                    winner: room.game.winner.clone().unwrap_or_default(),
                    word: room.game.word.clone(),
                    scores,
                }
            };
            info!(room = %binding.room_id, winner = %payload.winner, "game completed");
            self.hub.broadcast(
                &binding.room_id,
                &ServerEnvelope::for_room(outbound::GAME_COMPLETED, &binding.room_id, &payload),
            );
        }

        Ok(())
    }

    async fn handle_chat(
        &self,
        session: &Arc<Session>,
        envelope: &ClientEnvelope,
    ) -> Result<(), DuelError> {
        let binding = session.binding().ok_or(DuelError::NotInRoom)?;
        let data: ChatData = envelope.data_as()?;
        if data.message.trim().is_empty() {
            return Err(DuelError::MissingMessage);
        }

        let player_name = {
            let room = self.registry.get_room(&binding.room_id).await?;
            let room = room.read().await;
            room.players
                .get(&binding.player_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| binding.player_id.clone())
        };

        // Chat fans to everyone in the room, sender included
        self.hub.broadcast(
            &binding.room_id,
            &ServerEnvelope::for_room(
                outbound::CHAT,
                &binding.room_id,
                &ChatBroadcast {
                    player_id: binding.player_id,
                    player_name,
                    message: data.message.trim().to_string(),
                },
            ),
        );

        Ok(())
    }
}
