use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use warp::Filter;

use crate::config::Config;
use crate::{ServerState, create_routes};

async fn state_with(mutate: impl FnOnce(&mut Config)) -> Arc<ServerState> {
    let mut config = Config::default();
    // Keep the periodic reaper quiet during tests
    config.cleanup_interval = Duration::from_secs(3600);
    mutate(&mut config);
    let (state, receivers) = ServerState::new(config).expect("test state");
    state.spawn_dispatcher(receivers);
    state
}

async fn test_state() -> Arc<ServerState> {
    state_with(|_| {}).await
}

fn app(
    state: Arc<ServerState>,
) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone + use<> {
    create_routes(state)
}

async fn make_room(state: &Arc<ServerState>, max_players: usize) -> String {
    let room = state
        .registry
        .create_room("Test".to_string(), max_players)
        .await
        .expect("create room");
    let code = room.read().await.id.clone();
    code
}

async fn recv_json(ws: &mut warp::test::WsClient) -> Value {
    loop {
        let msg = ws.recv().await.expect("should receive a frame");
        if msg.is_text() {
            return serde_json::from_str(msg.to_str().unwrap()).expect("frames are JSON");
        }
    }
}

/// Skip frames until one of the wanted type arrives.
async fn recv_type(ws: &mut warp::test::WsClient, kind: &str) -> Value {
    for _ in 0..20 {
        let frame = recv_json(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
    panic!("never received a {kind} frame");
}

async fn send_join(ws: &mut warp::test::WsClient, room_id: &str, player_name: &str) -> String {
    ws.send_text(
        json!({
            "type": "join",
            "data": { "room_id": room_id, "player_name": player_name }
        })
        .to_string(),
    )
    .await;
    let frame = recv_type(ws, "join_success").await;
    frame["data"]["player_id"]
        .as_str()
        .expect("join_success carries the player id")
        .to_string()
}

// HTTP surface

#[tokio::test]
async fn test_create_room_endpoint() {
    let state = test_state().await;
    let app = app(state.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/api/rooms")
        .header("content-type", "application/json")
        .json(&json!({ "name": "Test", "maxPlayers": 2 }))
        .reply(&app)
        .await;

    assert_eq!(response.status(), 201);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    let code = body["roomCode"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert!(
        code.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    );
    assert_eq!(body["name"], "Test");
    assert!(body["roomId"].is_string());
    assert!(body["createdAt"].is_string());

    // The fresh room is immediately visible with no players
    let response = warp::test::request()
        .method("GET")
        .path(&format!("/api/rooms/{code}"))
        .reply(&app)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["playerCount"], 0);
    assert_eq!(body["gameStatus"], "waiting");
}

#[tokio::test]
async fn test_get_room_is_case_insensitive() {
    let state = test_state().await;
    let app = app(state.clone());
    let code = make_room(&state, 2).await;

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/api/rooms/{}", code.to_lowercase()))
        .reply(&app)
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_get_room_error_codes() {
    let state = test_state().await;
    let app = app(state.clone());

    let response = warp::test::request()
        .method("GET")
        .path("/api/rooms/nope")
        .reply(&app)
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["code"], "INVALID_ROOM_ID");

    let response = warp::test::request()
        .method("GET")
        .path("/api/rooms/ZZZZZ9")
        .reply(&app)
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["code"], "ROOM_NOT_FOUND");
}

#[tokio::test]
async fn test_create_room_clamps_max_players() {
    let state = test_state().await;
    let app = app(state.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/api/rooms")
        .header("content-type", "application/json")
        .json(&json!({ "maxPlayers": 9 }))
        .reply(&app)
        .await;
    assert_eq!(response.status(), 201);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    let code = body["roomCode"].as_str().unwrap();

    let room = state.registry.get_room(code).await.unwrap();
    assert_eq!(room.read().await.max_players, 4);
}

#[tokio::test]
async fn test_create_room_requires_json_content_type() {
    let state = test_state().await;
    let app = app(state.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/api/rooms")
        .header("content-type", "text/plain")
        .body("{}")
        .reply(&app)
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_health_endpoints() {
    let state = test_state().await;
    let app = app(state.clone());

    let response = warp::test::request().path("/health").reply(&app).await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert!(["healthy", "degraded"].contains(&body["status"].as_str().unwrap()));
    assert!(body["dependencies"]["dictionary"].is_string());
    assert!(body["rooms"]["total"].is_number());

    let response = warp::test::request()
        .path("/health/liveness")
        .reply(&app)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["status"], "alive");

    let response = warp::test::request()
        .path("/health/readiness")
        .reply(&app)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_security_headers_present() {
    let state = test_state().await;
    let app = app(state.clone());

    let response = warp::test::request().path("/health").reply(&app).await;
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
    assert_eq!(headers["content-security-policy"], "default-src 'self'");
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let state = test_state().await;
    let app = app(state.clone());

    let response = warp::test::request().path("/nope").reply(&app).await;
    assert_eq!(response.status(), 404);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

// WebSocket surface

#[tokio::test]
async fn test_connection_ack_on_upgrade() {
    let state = test_state().await;
    let mut ws = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    let frame = recv_type(&mut ws, "connection_ack").await;
    let session_id = frame["data"]["session_id"].as_str().unwrap();
    assert_eq!(session_id.len(), 16);
}

#[tokio::test]
async fn test_two_player_join_auto_starts_game() {
    let state = test_state().await;
    let code = make_room(&state, 2).await;

    let mut ws1 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    let mut ws2 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    let p1 = send_join(&mut ws1, &code, "Alice").await;
    let p2 = send_join(&mut ws2, &code, "Bob").await;
    assert_ne!(p1, p2);

    let started1 = recv_type(&mut ws1, "game_started").await;
    let started2 = recv_type(&mut ws2, "game_started").await;
    for started in [&started1, &started2] {
        assert_eq!(started["data"]["target_word_length"], 5);
        assert_eq!(started["data"]["max_guesses"], 6);
        assert_eq!(started["data"]["game_status"], "active");
    }

    // The target must never ride along on the start frames
    let room = state.registry.get_room(&code).await.unwrap();
    let target = room.read().await.game.word.clone();
    assert_eq!(target.len(), 5);
    assert!(!started1.to_string().contains(&target));
    assert!(!started2.to_string().contains(&target));
}

#[tokio::test]
async fn test_duplicate_player_id_rejected() {
    let state = test_state().await;
    let code = make_room(&state, 4).await;

    let mut ws1 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    let mut ws2 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    ws1.send_text(
        json!({
            "type": "join",
            "player_id": "dup",
            "data": { "room_id": code, "player_name": "Alice" }
        })
        .to_string(),
    )
    .await;
    recv_type(&mut ws1, "join_success").await;

    ws2.send_text(
        json!({
            "type": "join",
            "player_id": "dup",
            "data": { "room_id": code, "player_name": "Imposter" }
        })
        .to_string(),
    )
    .await;
    let frame = recv_type(&mut ws2, "error").await;
    assert_eq!(frame["data"]["code"], "PLAYER_EXISTS");
}

#[tokio::test]
async fn test_winning_guess_completes_game() {
    let state = test_state().await;
    let code = make_room(&state, 2).await;

    let mut ws1 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    let mut ws2 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    let p1 = send_join(&mut ws1, &code, "Alice").await;
    send_join(&mut ws2, &code, "Bob").await;
    recv_type(&mut ws1, "game_started").await;
    recv_type(&mut ws2, "game_started").await;

    let room = state.registry.get_room(&code).await.unwrap();
    let target = room.read().await.game.word.clone();

    ws1.send_text(json!({ "type": "guess", "data": { "word": target } }).to_string())
        .await;

    let result = recv_type(&mut ws1, "guess_result").await;
    assert_eq!(result["data"]["is_correct"], true);
    let results = result["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.as_str() == Some("correct")));

    for ws in [&mut ws1, &mut ws2] {
        let completed = recv_type(ws, "game_completed").await;
        assert_eq!(completed["data"]["winner"], p1.as_str());
        let scores = completed["data"]["scores"].as_array().unwrap();
        let winner_score = scores
            .iter()
            .find(|s| s["player_id"] == p1.as_str())
            .unwrap();
        assert_eq!(winner_score["score"], 100);
    }

    // Guessing into a won game reports the win
    ws2.send_text(json!({ "type": "guess", "data": { "word": "about" } }).to_string())
        .await;
    let frame = recv_type(&mut ws2, "error").await;
    assert_eq!(frame["data"]["code"], "GAME_ALREADY_WON");
}

#[tokio::test]
async fn test_game_update_redacts_other_players_words() {
    let state = test_state().await;
    let code = make_room(&state, 2).await;

    let mut ws1 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    let mut ws2 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    send_join(&mut ws1, &code, "Alice").await;
    send_join(&mut ws2, &code, "Bob").await;
    recv_type(&mut ws1, "game_started").await;
    recv_type(&mut ws2, "game_started").await;

    let room = state.registry.get_room(&code).await.unwrap();
    let target = room.read().await.game.word.clone();
    // A valid word that is definitely not the target
    let wrong = if target == "alarm" { "apple" } else { "alarm" };

    ws1.send_text(json!({ "type": "guess", "data": { "word": wrong } }).to_string())
        .await;
    recv_type(&mut ws1, "guess_result").await;

    // Bob sees Alice's letter patterns but neither her word nor the target
    let update = recv_type(&mut ws2, "game_update").await;
    let serialized = update.to_string();
    assert!(serialized.contains("results"));
    assert!(!serialized.contains(wrong));
    assert!(!serialized.contains(&target));
}

#[tokio::test]
async fn test_chat_fans_out_to_room_including_sender() {
    let state = test_state().await;
    let code = make_room(&state, 2).await;

    let mut ws1 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    let mut ws2 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    let p1 = send_join(&mut ws1, &code, "Alice").await;
    send_join(&mut ws2, &code, "Bob").await;

    ws1.send_text(json!({ "type": "chat", "data": { "message": "good luck" } }).to_string())
        .await;

    for ws in [&mut ws1, &mut ws2] {
        let chat = recv_type(ws, "chat").await;
        assert_eq!(chat["data"]["message"], "good luck");
        assert_eq!(chat["data"]["player_id"], p1.as_str());
        assert_eq!(chat["data"]["player_name"], "Alice");
    }
}

#[tokio::test]
async fn test_leave_room() {
    let state = test_state().await;
    let code = make_room(&state, 4).await;

    let mut ws1 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    let mut ws2 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    send_join(&mut ws1, &code, "Alice").await;
    let p2 = send_join(&mut ws2, &code, "Bob").await;

    ws2.send_text(json!({ "type": "leave" }).to_string()).await;
    recv_type(&mut ws2, "leave_success").await;

    // The remaining player hears about the departure
    loop {
        let frame = recv_type(&mut ws1, "player_update").await;
        if frame["data"]["event"] == "player_left" {
            assert_eq!(frame["data"]["player_id"], p2.as_str());
            assert_eq!(frame["data"]["player_count"], 1);
            break;
        }
    }

    let room = state.registry.get_room(&code).await.unwrap();
    assert_eq!(room.read().await.players.len(), 1);
}

#[tokio::test]
async fn test_guess_without_join_rejected() {
    let state = test_state().await;
    let mut ws = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    ws.send_text(json!({ "type": "guess", "data": { "word": "about" } }).to_string())
        .await;
    let frame = recv_type(&mut ws, "error").await;
    assert_eq!(frame["data"]["code"], "NOT_IN_ROOM");
}

#[tokio::test]
async fn test_join_validation_errors() {
    let state = test_state().await;
    let mut ws = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    ws.send_text(json!({ "type": "join", "data": { "player_name": "Alice" } }).to_string())
        .await;
    let frame = recv_type(&mut ws, "error").await;
    assert_eq!(frame["data"]["code"], "MISSING_ROOM_ID");

    ws.send_text(json!({ "type": "join", "data": { "room_id": "ABC123" } }).to_string())
        .await;
    let frame = recv_type(&mut ws, "error").await;
    assert_eq!(frame["data"]["code"], "MISSING_PLAYER_NAME");
}

#[tokio::test]
async fn test_unknown_message_type() {
    let state = test_state().await;
    let mut ws = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    ws.send_text(json!({ "type": "teleport" }).to_string()).await;
    let frame = recv_type(&mut ws, "error").await;
    assert_eq!(frame["data"]["code"], "UNKNOWN_MESSAGE_TYPE");
}

#[tokio::test]
async fn test_invalid_json_frame() {
    let state = test_state().await;
    let mut ws = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    ws.send_text("this is not json").await;
    let frame = recv_type(&mut ws, "error").await;
    assert_eq!(frame["data"]["code"], "INVALID_JSON");
}

#[tokio::test]
async fn test_rate_limit_errors_without_closing() {
    let state = test_state().await;
    let mut ws = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    recv_type(&mut ws, "connection_ack").await;

    // Budget is 5 per rolling 5 seconds; the 6th breaches
    for _ in 0..6 {
        ws.send_text(json!({ "type": "noop" }).to_string()).await;
    }

    let mut unknown = 0;
    let mut rate_limited = 0;
    for _ in 0..6 {
        let frame = recv_type(&mut ws, "error").await;
        match frame["data"]["code"].as_str().unwrap() {
            "UNKNOWN_MESSAGE_TYPE" => unknown += 1,
            "RATE_LIMIT_EXCEEDED" => rate_limited += 1,
            other => panic!("unexpected error code {other}"),
        }
    }
    assert_eq!(unknown, 5);
    assert_eq!(rate_limited, 1);

    // The session survives the breach: a further frame is answered
    ws.send_text(json!({ "type": "noop" }).to_string()).await;
    let frame = recv_type(&mut ws, "error").await;
    assert_eq!(frame["data"]["code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_oversized_frame_gets_error() {
    let state = test_state().await;
    let mut ws = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    recv_type(&mut ws, "connection_ack").await;

    let oversized = json!({ "type": "chat", "data": { "message": "x".repeat(600) } });
    ws.send_text(oversized.to_string()).await;
    let frame = recv_type(&mut ws, "error").await;
    assert_eq!(frame["data"]["code"], "MESSAGE_TOO_LARGE");
}

#[tokio::test]
async fn test_origin_rejected_before_upgrade() {
    let state = state_with(|config| {
        config.allowed_origins = vec!["https://duel.example".to_string()];
    })
    .await;

    let result = warp::test::ws()
        .path("/ws")
        .header("origin", "https://evil.example")
        .handshake(app(state.clone()))
        .await;
    assert!(result.is_err(), "handshake must fail for a bad origin");

    // An allow-listed origin upgrades fine
    let result = warp::test::ws()
        .path("/ws")
        .header("origin", "https://duel.example")
        .handshake(app(state.clone()))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_disconnect_marks_player_and_notifies_room() {
    let state = test_state().await;
    let code = make_room(&state, 2).await;

    let mut ws1 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");
    let mut ws2 = warp::test::ws()
        .path("/ws")
        .handshake(app(state.clone()))
        .await
        .expect("handshake");

    send_join(&mut ws1, &code, "Alice").await;
    let p2 = send_join(&mut ws2, &code, "Bob").await;

    drop(ws2);

    loop {
        let frame = recv_type(&mut ws1, "player_update").await;
        if frame["data"]["event"] == "player_disconnected" {
            assert_eq!(frame["data"]["player_id"], p2.as_str());
            break;
        }
    }

    let room = state.registry.get_room(&code).await.unwrap();
    let room = room.read().await;
    assert_eq!(
        room.players[&p2].status,
        duel_types::PlayerStatus::Disconnected
    );
}
