use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use duel_core::{Dictionary, Reaper, ReaperConfig, RoomRegistry};
use duel_types::{DuelError, ErrorPayload};

use crate::config::Config;
use crate::websocket::{Admission, Hub, HubReceivers, MessageHandler, RateWindow, Session};

pub mod config;
pub mod health;
pub mod websocket;

/// Everything the routes and the websocket layer share. Built once in
/// `main`, cloned as an `Arc` into every filter.
pub struct ServerState {
    pub config: Config,
    pub registry: Arc<RoomRegistry>,
    pub dictionary: Arc<Dictionary>,
    pub hub: Arc<Hub>,
    pub admission: Arc<Admission>,
    pub reaper: Arc<Reaper>,
    pub api_rate: RateWindow,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(config: Config) -> anyhow::Result<(Arc<Self>, HubReceivers)> {
        let dictionary = Arc::new(Dictionary::embedded()?);
        let registry = Arc::new(RoomRegistry::new());
        registry.set_max_concurrent(config.max_concurrent_rooms);

        let reaper = Arc::new(Reaper::new(
            registry.clone(),
            ReaperConfig {
                cleanup_interval: config.cleanup_interval,
                inactive_timeout: config.room_inactive_timeout,
                ..ReaperConfig::default()
            },
        ));

        let (hub, receivers) = Hub::new();
        let admission = Arc::new(Admission::new(&config));
        let api_rate = RateWindow::new(config.api_rate_limit, config.api_rate_window);

        let state = Arc::new(Self {
            config,
            registry,
            dictionary,
            hub,
            admission,
            reaper,
            api_rate,
            started_at: Instant::now(),
        });
        Ok((state, receivers))
    }

    /// Spawn the hub dispatcher task over the given channel halves.
    pub fn spawn_dispatcher(self: &Arc<Self>, receivers: HubReceivers) -> tokio::task::JoinHandle<()> {
        let handler = Arc::new(MessageHandler::new(
            self.hub.clone(),
            self.registry.clone(),
            self.dictionary.clone(),
            self.reaper.clone(),
        ));
        tokio::spawn(websocket::run_dispatcher(self.hub.clone(), receivers, handler))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    name: Option<String>,
    max_players: Option<usize>,
}

/// Rejection carrying a domain error for the HTTP surface.
#[derive(Debug)]
struct ApiReject(DuelError);
impl warp::reject::Reject for ApiReject {}

/// Admission failures reject the upgrade before any frame flows; they
/// always surface as HTTP 403.
#[derive(Debug)]
struct WsReject(DuelError);
impl warp::reject::Reject for WsReject {}

pub fn create_routes(
    state: Arc<ServerState>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let state_filter = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };

    let client_ip = warp::header::optional::<String>("x-forwarded-for")
        .and(warp::header::optional::<String>("x-real-ip"))
        .and(warp::addr::remote())
        .map(
            |xff: Option<String>, xrip: Option<String>, remote: Option<SocketAddr>| {
                Admission::resolve_client_ip(xff.as_deref(), xrip.as_deref(), remote)
            },
        );

    // Per-IP sliding-window rate limit over the HTTP API
    let api_guard = client_ip
        .clone()
        .and(state_filter.clone())
        .and_then(|ip: String, state: Arc<ServerState>| async move {
            if state.api_rate.check(&ip) {
                Ok(())
            } else {
                Err(warp::reject::custom(ApiReject(DuelError::RateLimitExceeded)))
            }
        })
        .untuple_one();

    let create_room = warp::path!("api" / "rooms")
        .and(warp::post())
        .and(api_guard.clone())
        .and(require_json())
        .and(warp::body::content_length_limit(1024 * 1024))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_create_room);

    let get_room = warp::path!("api" / "rooms" / String)
        .and(warp::get())
        .and(api_guard)
        .and(state_filter.clone())
        .and_then(handle_get_room);

    let health_full = warp::path!("health")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(handle_health);

    let health_liveness = warp::path!("health" / "liveness")
        .and(warp::get())
        .map(|| warp::reply::json(&health::liveness()));

    let health_readiness = warp::path!("health" / "readiness")
        .and(warp::get())
        .and(state_filter.clone())
        .map(|state: Arc<ServerState>| {
            let (body, ready) = health::readiness(&state);
            let status = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            warp::reply::with_status(warp::reply::json(&body), status)
        });

    let ws = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::header::optional::<String>("origin"))
        .and(client_ip)
        .and(state_filter.clone())
        .and_then(handle_ws_upgrade);

    let cors = {
        let config = &state.config;
        let base = warp::cors()
            .allow_headers(vec!["content-type"])
            .allow_methods(vec!["GET", "POST"]);
        if config.allows_any_origin() {
            base.allow_any_origin().build()
        } else {
            // Credentials only for allow-listed origins
            base.allow_origins(config.allowed_origins.iter().map(|s| s.as_str()))
                .allow_credentials(true)
                .build()
        }
    };

    ws.or(create_room)
        .or(get_room)
        .or(health_full)
        .or(health_liveness)
        .or(health_readiness)
        .with(warp::reply::with::header("x-content-type-options", "nosniff"))
        .with(warp::reply::with::header("x-frame-options", "DENY"))
        .with(warp::reply::with::header(
            "referrer-policy",
            "strict-origin-when-cross-origin",
        ))
        .with(warp::reply::with::header(
            "content-security-policy",
            "default-src 'self'",
        ))
        .with(cors)
        .with(warp::log("duel_server"))
        .recover(handle_rejection)
}

/// POST bodies must declare a JSON content type.
fn require_json() -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("content-type")
        .and_then(|content_type: Option<String>| async move {
            match content_type {
                Some(ct) if ct.to_lowercase().starts_with("application/json") => Ok(()),
                _ => Err(warp::reject::custom(ApiReject(DuelError::InvalidJson))),
            }
        })
        .untuple_one()
}

async fn handle_create_room(
    request: CreateRoomRequest,
    state: Arc<ServerState>,
) -> Result<impl Reply, Rejection> {
    // Room config default is 2; the HTTP surface accepts up to 4
    let max_players = request.max_players.unwrap_or(2).clamp(2, 4);
    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Word Duel".to_string());

    let room = state
        .registry
        .create_room(name, max_players)
        .await
        .map_err(|e| warp::reject::custom(ApiReject(e)))?;

    let room = room.read().await;
    let body = serde_json::json!({
        "roomId": room.uuid,
        "roomCode": room.id,
        "name": room.name,
        "createdAt": room.created_at,
    });
    Ok(warp::reply::with_status(
        warp::reply::json(&body),
        StatusCode::CREATED,
    ))
}

async fn handle_get_room(
    code: String,
    state: Arc<ServerState>,
) -> Result<impl Reply, Rejection> {
    let room = state
        .registry
        .get_room(&code)
        .await
        .map_err(|e| warp::reject::custom(ApiReject(e)))?;

    let room = room.read().await;
    let view = room.view_for(None);
    let body = serde_json::json!({
        "roomId": room.uuid,
        "roomCode": room.id,
        "name": room.name,
        "playerCount": room.players.len(),
        "maxPlayers": room.max_players,
        "gameStatus": room.game.status,
        "createdAt": room.created_at,
        "updatedAt": room.updated_at,
        "players": view.players,
        "game": view.game,
    });
    Ok(warp::reply::json(&body))
}

async fn handle_health(state: Arc<ServerState>) -> Result<impl Reply, Rejection> {
    let (body, status) = health::full_report(&state, state.started_at).await;
    let code = if status.http_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), code))
}

async fn handle_ws_upgrade(
    ws: warp::ws::Ws,
    origin: Option<String>,
    client_ip: String,
    state: Arc<ServerState>,
) -> Result<impl Reply, Rejection> {
    let session_id = Session::generate_id();
    state
        .admission
        .validate_connection(origin.as_deref(), &client_ip, &session_id)
        .map_err(|e| warp::reject::custom(WsReject(e)))?;

    Ok(ws.on_upgrade(move |socket| {
        websocket::handle_connection(socket, session_id, client_ip, state)
    }))
}

fn http_status(err: &DuelError) -> StatusCode {
    match err {
        DuelError::InvalidJson
        | DuelError::InvalidMessage
        | DuelError::MissingRoomId
        | DuelError::MissingPlayerName
        | DuelError::MissingMessage
        | DuelError::InvalidWordLength
        | DuelError::InvalidRoomId
        | DuelError::UnknownMessageType
        | DuelError::InvalidWord
        | DuelError::InvalidMaxPlayers => StatusCode::BAD_REQUEST,
        DuelError::RoomNotFound | DuelError::PlayerNotFound => StatusCode::NOT_FOUND,
        DuelError::RoomFull
        | DuelError::PlayerExists
        | DuelError::NotInRoom
        | DuelError::AlreadyInRoom
        | DuelError::GameNotActive
        | DuelError::GameAlreadyWon
        | DuelError::TooManyGuesses => StatusCode::CONFLICT,
        DuelError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        DuelError::MessageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        DuelError::InvalidOrigin | DuelError::TooManyConnections => StatusCode::FORBIDDEN,
        DuelError::ServerOverloaded => StatusCode::SERVICE_UNAVAILABLE,
        DuelError::RoomCreationFailed
        | DuelError::JoinFailed
        | DuelError::GuessProcessingFailed
        | DuelError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Every rejection becomes a JSON `{code, message}` body; unexpected
/// ones are logged and surfaced as a generic internal error.
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, payload) = if err.is_not_found() {
        (
            StatusCode::NOT_FOUND,
            ErrorPayload {
                code: "NOT_FOUND".to_string(),
                message: "resource not found".to_string(),
            },
        )
    } else if let Some(ApiReject(e)) = err.find::<ApiReject>() {
        (http_status(e), e.payload())
    } else if let Some(WsReject(e)) = err.find::<WsReject>() {
        (StatusCode::FORBIDDEN, e.payload())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            DuelError::MessageTooLarge.payload(),
        )
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, DuelError::InvalidJson.payload())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorPayload {
                code: "METHOD_NOT_ALLOWED".to_string(),
                message: "method not allowed".to_string(),
            },
        )
    } else {
        error!(?err, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            DuelError::InternalError.payload(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&payload),
        status,
    ))
}
