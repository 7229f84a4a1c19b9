use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    debug_handler,
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::{
    sync::mpsc,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::{
    auth::{AuthError, Identity, Role, CLOSE_INTERNAL},
    chat::{
        assign,
        heartbeat::{Heartbeat, Probe},
        msg, Connection, ServerEvent,
    },
    AppResult, AppState,
};

const PENDING_ASSIGNMENT: &str =
    "No company is available yet. Your conversation will start as soon as one is assigned.";

#[derive(Deserialize)]
pub(crate) struct ConnectQuery {
    token: Option<String>,
}

#[debug_handler]
pub(crate) async fn chat_ws(
    Query(ConnectQuery { token }): Query<ConnectQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = state.auth.verify(token.as_deref());

    ws.on_upgrade(move |socket| async move {
        match verified {
            Ok(identity) => handle_socket(socket, state, identity).await,
            Err(e) => reject(socket, e).await,
        }
    })
}

/// Auth failures are only reported through the close code.
async fn reject(mut socket: WebSocket, err: AuthError) {
    tracing::warn!(code = err.close_code(), "rejecting chat connection: {err}");

    let frame = axum::extract::ws::CloseFrame {
        code: err.close_code(),
        reason: err.close_reason().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Identity) {
    let (sink, mut stream) = socket.split();
    let (conn, rx) = Connection::channel();
    let heartbeat = Arc::new(Heartbeat::new());

    state.registry.add_connection(&identity.id, conn.clone());
    tracing::info!(user_id = %identity.id, role = %identity.role, conn_id = %conn.id(), "chat connection opened");

    let mut writer = tokio::spawn(write_loop(sink, rx, heartbeat.clone(), state.settings.heartbeat_interval));

    match bootstrap(&state, &identity, &conn).await {
        Ok(()) => {
            let (inbox, queued) = mpsc::unbounded_channel();
            // detached: a frame already read is handled even if the socket dies meanwhile
            tokio::spawn(inbound_loop(state.clone(), identity.clone(), conn.clone(), queued));

            tokio::select! {
                _ = &mut writer => {
                    tracing::info!(user_id = %identity.id, conn_id = %conn.id(), "chat connection terminated");
                },
                _ = read_loop(&mut stream, &inbox, &conn, &heartbeat) => {
                    tracing::info!(user_id = %identity.id, conn_id = %conn.id(), "chat connection closed");
                },
            };
        }
        Err(e) => {
            // most likely a racing connect for the same homeowner; a retry finds its row
            tracing::error!(user_id = %identity.id, conn_id = %conn.id(), "bootstrap failed: {e}");
            conn.close(CLOSE_INTERNAL, "bootstrap failed");
            let _ = (&mut writer).await;
        }
    }

    state.registry.remove_connection(&identity.id, &conn);
    writer.abort();
}

/// Pushes the initial state a client needs before it can chat.
async fn bootstrap(state: &AppState, identity: &Identity, conn: &Connection) -> AppResult<()> {
    match identity.role {
        Role::Homeowner => {
            let Some(assignment) = assign::find_or_create_assignment(&state.db_pool, &identity.id).await? else {
                conn.send(&ServerEvent::info(PENDING_ASSIGNMENT));
                return Ok(());
            };

            let messages = msg::history(&state.db_pool, &assignment.room_id).await?;
            conn.send(&ServerEvent::History {
                room_id: assignment.room_id.clone(),
                messages,
            });
            conn.send(&ServerEvent::Assigned {
                company_id: assignment.company_id,
                room_id: assignment.room_id,
            });
        }
        Role::Company => {
            let assignments = assign::assignments_for_company(&state.db_pool, &identity.id).await?;
            conn.send(&ServerEvent::Assignments { assignments });
        }
        Role::City => {}
    }
    Ok(())
}

/// Reads frames until the peer closes or the stream fails. Text frames are
/// queued for `inbound_loop` so pongs keep flowing while the store is busy.
async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    inbox: &mpsc::UnboundedSender<Utf8Bytes>,
    conn: &Connection,
    heartbeat: &Heartbeat,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if inbox.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Pong(_)) => heartbeat.acknowledge(),
            Ok(Message::Close(_)) => break,
            // pings are answered by the protocol layer; binary is not part of the protocol
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn.id(), "read failed: {e}");
                break;
            }
        }
    }
}

/// Handles queued text frames one at a time, in arrival order. Ends once the
/// reader is gone and the queue is drained.
async fn inbound_loop(
    state: AppState,
    identity: Identity,
    conn: Connection,
    mut queued: mpsc::UnboundedReceiver<Utf8Bytes>,
) {
    while let Some(text) = queued.recv().await {
        if let Err(e) = msg::handle_inbound(&state.db_pool, &state.registry, &identity, &conn, text.as_str()).await {
            tracing::error!(user_id = %identity.id, conn_id = %conn.id(), "message dropped: {e}");
        }
    }
}

/// Owns the sink: drains queued frames and probes liveness every `period`.
/// Returning drops the socket, which is how an unresponsive peer is cut off.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    heartbeat: Arc<Heartbeat>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(frame) = outbound else { break };
                let closing = matches!(frame, Message::Close(_));
                if sink.send(frame).await.is_err() || closing {
                    break;
                }
            }
            _ = ticker.tick() => match heartbeat.probe() {
                Probe::Ping => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                Probe::Terminate => {
                    tracing::info!("peer missed its heartbeat, terminating");
                    break;
                }
            },
        }
    }
}
