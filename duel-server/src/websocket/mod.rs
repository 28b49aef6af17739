use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};

use duel_types::{ClientEnvelope, DuelError, ServerEnvelope};

use crate::ServerState;

pub mod admission;
pub mod handlers;
pub mod hub;
pub mod session;

#[cfg(test)]
mod integration_tests;

pub use admission::{Admission, RateWindow};
pub use handlers::MessageHandler;
pub use hub::{Hub, HubReceivers, InboundFrame, run_dispatcher};
pub use session::Session;

const CLOSE_GRACE: Duration = Duration::from_secs(10);
const SIZE_BREACH_LIMIT: u32 = 3;

/// Full lifecycle of one admitted connection: register with the hub, run
/// the two pumps until either exits, then unregister and release the
/// admission slots.
pub async fn handle_connection(
    websocket: WebSocket,
    session_id: String,
    client_ip: String,
    state: Arc<ServerState>,
) {
    info!(session = %session_id, ip = %client_ip, "websocket connected");

    let (ws_sender, ws_receiver) = websocket.split();
    let (session, outbound_rx) = Session::new(session_id.clone(), client_ip.clone());
    let session = Arc::new(session);

    state.hub.register(session.clone()).await;

    let read_pump = read_pump(
        ws_receiver,
        session.clone(),
        state.clone(),
        state.config.read_timeout,
    );
    let write_pump = write_pump(
        ws_sender,
        outbound_rx,
        session.clone(),
        state.config.read_timeout,
        state.config.write_timeout,
    );

    tokio::select! {
        _ = read_pump => {}
        _ = write_pump => {}
    }

    session.close();
    state.hub.unregister(&session_id).await;
    state.admission.on_connection_closed(&session_id, &client_ip);
    info!(session = %session_id, "websocket disconnected");
}

/// Reads frames until error, deadline, shutdown, or a persistent size
/// breach. Control pongs stamp liveness; text frames pass the admission
/// checks, parse into envelopes, and go to the hub's inbound channel.
async fn read_pump(
    mut ws_receiver: futures_util::stream::SplitStream<WebSocket>,
    session: Arc<Session>,
    state: Arc<ServerState>,
    read_deadline: Duration,
) {
    let mut shutdown = session.shutdown_signal();
    let mut size_breaches: u32 = 0;

    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            next = timeout(read_deadline, ws_receiver.next()) => match next {
                Err(_) => {
                    debug!(session = %session.id, "read deadline expired");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!(session = %session.id, error = %e, "websocket read error");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            },
        };

        if message.is_pong() {
            session.stamp_pong();
            continue;
        }
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue; // binary and other control frames are ignored
        };

        match state.admission.check_message_rate(&session.id, text.len()) {
            Err(err @ DuelError::MessageTooLarge) => {
                size_breaches += 1;
                session.send_frame(&ServerEnvelope::error(&err));
                if size_breaches >= SIZE_BREACH_LIMIT {
                    warn!(session = %session.id, "persistent size breaches, closing");
                    break;
                }
                continue;
            }
            Err(err) => {
                // Rate breach: error frame in-band, connection survives
                session.send_frame(&ServerEnvelope::error(&err));
                continue;
            }
            Ok(()) => size_breaches = 0,
        }

        let envelope: ClientEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(_) => {
                session.send_frame(&ServerEnvelope::error(&DuelError::InvalidJson));
                continue;
            }
        };

        // Bounded send: a slow hub pushes back on this pump
        state
            .hub
            .submit(InboundFrame {
                session: session.clone(),
                envelope,
            })
            .await;
    }
}

/// Drains the outbound queue onto the socket, pinging at 9/10 of the
/// read deadline so healthy clients always have a pong in flight.
async fn write_pump(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: tokio::sync::mpsc::Receiver<Message>,
    session: Arc<Session>,
    read_deadline: Duration,
    write_deadline: Duration,
) {
    let mut shutdown = session.shutdown_signal();
    let mut ping = tokio::time::interval(read_deadline.mul_f64(0.9));
    ping.tick().await; // the first tick is immediate

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            maybe = outbound_rx.recv() => match maybe {
                None => break,
                Some(message) => {
                    match timeout(write_deadline, ws_sender.send(message)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(session = %session.id, error = %e, "websocket write error");
                            break;
                        }
                        Err(_) => {
                            warn!(session = %session.id, "write deadline expired");
                            break;
                        }
                    }
                }
            },
            _ = ping.tick() => {
                if timeout(write_deadline, ws_sender.send(Message::ping(Vec::new())))
                    .await
                    .map(|r| r.is_err())
                    .unwrap_or(true)
                {
                    break;
                }
            }
        }
    }

    // Close frame is best effort within the grace deadline
    let _ = timeout(CLOSE_GRACE, ws_sender.send(Message::close_with(1000u16, ""))).await;
}
