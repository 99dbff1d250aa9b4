//! Manages the WebSocket connection lifecycle for one coaching session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use monica_core::channel::LiveSessionDriver;
use monica_core::live::LiveEvent;
use monica_core::{OrchestratorError, Session};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;

/// Close code sent when the requested session does not exist.
pub const CLOSE_SESSION_NOT_FOUND: u16 = 4004;

type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Axum handler to upgrade an HTTP connection to a WebSocket bound to one session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Main handler for an individual WebSocket connection.
#[instrument(name = "ws_session", skip_all, fields(%session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: Uuid) {
    let (mut socket_tx, socket_rx) = socket.split();

    let session = match state.orchestrator.session_view(session_id).await {
        Ok((session, _)) => session,
        Err(e) => {
            let code = match e {
                OrchestratorError::NotFound(_) => {
                    warn!("WebSocket opened for unknown session.");
                    CLOSE_SESSION_NOT_FOUND
                }
                ref other => {
                    error!(error = ?other, "Failed to load session for WebSocket.");
                    1011
                }
            };
            let _ = send_msg(&mut socket_tx, ServerMessage::Error { message: e.to_string() }).await;
            let _ = socket_tx
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: "session unavailable".into(),
                })))
                .await;
            return;
        }
    };

    let live = open_live(&state, &session).await;
    let connected = ServerMessage::Connected {
        session_id,
        stage: session.current_stage,
        persona: session.current_persona(),
        voice: live.is_some(),
    };
    if send_msg(&mut socket_tx, connected).await.is_err() {
        error!("Failed to send Connected message to client.");
        return;
    }
    info!(stage = %session.current_stage, voice = live.is_some(), "WebSocket session started.");

    let socket_tx = Arc::new(Mutex::new(socket_tx));
    let (driver, events) = match live {
        Some((driver, events)) => (Some(Arc::new(driver)), Some(events)),
        None => (None, None),
    };

    let span = tracing::Span::current();
    let mut recv_task = tokio::spawn(
        receive_loop(state.clone(), session_id, socket_rx, socket_tx.clone(), driver.clone())
            .instrument(span.clone()),
    );
    let mut send_task = tokio::spawn(
        async move {
            match (driver, events) {
                (Some(driver), Some(events)) => relay_live_events(driver, events, socket_tx).await,
                _ => std::future::pending().await,
            }
        }
        .instrument(span),
    );

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    }
    info!("WebSocket connection closed and session channel terminated.");
}

/// Opens the live provider for the session, if one is configured.
async fn open_live(
    state: &AppState,
    session: &Session,
) -> Option<(LiveSessionDriver, mpsc::Receiver<LiveEvent>)> {
    let live = state.live.as_ref()?;
    let voice = Some(state.config.live_voice.clone());
    match LiveSessionDriver::open(state.orchestrator.clone(), live.as_ref(), session.id, voice).await {
        Ok(opened) => Some(opened),
        Err(e) => {
            error!(error = ?e, "Live provider unavailable; continuing text-only.");
            None
        }
    }
}

/// Reads client frames: typed utterances run a turn, binary frames are audio.
async fn receive_loop(
    state: Arc<AppState>,
    session_id: Uuid,
    mut socket_rx: SplitStream<WebSocket>,
    socket_tx: SocketSink,
    driver: Option<Arc<LiveSessionDriver>>,
) {
    while let Some(msg_result) = socket_rx.next().await {
        let ws_msg = match msg_result {
            Ok(ws_msg) => ws_msg,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        };
        match ws_msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::UserMessage { text }) => {
                    let outgoing = typed_turn(&state, session_id, &text, driver.as_deref()).await;
                    let mut sink = socket_tx.lock().await;
                    for msg in outgoing {
                        if send_msg(&mut sink, msg).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring malformed client message."),
            },
            Message::Binary(data) => match &driver {
                Some(driver) => {
                    if let Err(e) = driver.send_audio(data.to_vec()).await {
                        error!("Failed to send audio to provider task: {}", e);
                    }
                }
                None => warn!("Received audio data from client, but no voice provider is active."),
            },
            Message::Close(_) => {
                info!("Client sent close frame. Shutting down session.");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// Runs one turn for a typed utterance and returns the messages for the client.
async fn typed_turn(
    state: &AppState,
    session_id: Uuid,
    text: &str,
    driver: Option<&LiveSessionDriver>,
) -> Vec<ServerMessage> {
    let result = match state.orchestrator.submit(session_id, text).await {
        Ok(result) => result,
        Err(e) => {
            if !matches!(e, OrchestratorError::Validation(_)) {
                error!(error = ?e, "Turn failed.");
            }
            return vec![ServerMessage::Error { message: e.to_string() }];
        }
    };

    let transition = result.transition.clone();
    let mut outgoing = vec![ServerMessage::from(result)];
    if let Some(transition) = transition {
        if let Some(driver) = driver {
            if let Err(e) = driver.inject_stage_context(&transition).await {
                error!(error = ?e, "Failed to hand the new stage to the live provider.");
            }
        }
        outgoing.push(transition.into());
    }
    outgoing
}

/// Forwards live provider events through the driver to the client.
async fn relay_live_events(
    driver: Arc<LiveSessionDriver>,
    mut events: mpsc::Receiver<LiveEvent>,
    socket_tx: SocketSink,
) {
    while let Some(event) = events.recv().await {
        let forwarded = match driver.on_event(event).await {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                error!(error = ?e, "Failed to apply live event.");
                continue;
            }
        };
        let Some(msg) = ServerMessage::from_channel(forwarded) else {
            info!("Live provider closed.");
            break;
        };
        if let Err(e) = send_msg(&mut *socket_tx.lock().await, msg).await {
            error!(error = ?e, "Failed to relay live event to client.");
            break;
        }
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
