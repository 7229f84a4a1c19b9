//! Reconnecting chat client.
//!
//! Dropped connections are retried with backoff; the server replays the
//! room through `HISTORY` on every reconnect. Auth rejections are final.

mod reconnect;

use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{CLOSE_INVALID_TOKEN, CLOSE_TOKEN_REQUIRED},
    chat::ServerEvent,
};

pub use reconnect::{BackoffPolicy, ReconnectState, Reconnector};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server rejected the connection ({code}): {reason}")]
    Rejected { code: u16, reason: String },
}

enum SessionEnd {
    Dropped,
    Cancelled,
    Rejected { code: u16, reason: String },
}

pub struct ChatClient {
    url: String,
    policy: BackoffPolicy,
}

impl ChatClient {
    /// `server` is the base address, e.g. `ws://localhost:8080`.
    pub fn new(server: &str, token: &str, policy: BackoffPolicy) -> Self {
        Self {
            url: format!("{}/ws?token={token}", server.trim_end_matches('/')),
            policy,
        }
    }

    /// Keeps a connection up until `cancel` fires or the server refuses the
    /// token. Events go to `events`; each `outgoing` string is sent as one
    /// text frame while connected.
    pub async fn run(
        self,
        mut outgoing: mpsc::Receiver<String>,
        events: mpsc::Sender<ServerEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let mut reconnector = Reconnector::new(self.policy.clone());

        loop {
            let attempt = reconnector.begin_connect();
            let connected = tokio::select! {
                _ = cancel.cancelled() => {
                    reconnector.cancel();
                    return Ok(());
                }
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((socket, _)) => {
                    reconnector.on_connected();
                    tracing::info!(attempt, "chat client connected");

                    match session(socket, &mut outgoing, &events, &cancel).await {
                        SessionEnd::Cancelled => {
                            reconnector.cancel();
                            return Ok(());
                        }
                        SessionEnd::Rejected { code, reason } => {
                            reconnector.cancel();
                            return Err(ClientError::Rejected { code, reason });
                        }
                        SessionEnd::Dropped => tracing::info!("chat client disconnected"),
                    }
                }
                Err(e) => tracing::warn!(attempt, "chat client failed to connect: {e}"),
            }

            let delay = self.policy.jittered(reconnector.on_disconnected());
            tracing::debug!(?delay, "chat client retrying");
            tokio::select! {
                _ = cancel.cancelled() => {
                    reconnector.cancel();
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn session(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outgoing: &mut mpsc::Receiver<String>,
    events: &mpsc::Sender<ServerEvent>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            Some(payload) = outgoing.recv() => {
                if sink.send(Message::text(payload)).await.is_err() {
                    return SessionEnd::Dropped;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                    Ok(event) => {
                        if events.send(event).await.is_err() {
                            // nobody is listening any more
                            return SessionEnd::Cancelled;
                        }
                    }
                    Err(e) => tracing::warn!("unrecognised server event: {e}"),
                },
                Some(Ok(Message::Close(Some(frame)))) => {
                    let code = u16::from(frame.code);
                    if code == CLOSE_TOKEN_REQUIRED || code == CLOSE_INVALID_TOKEN {
                        return SessionEnd::Rejected { code, reason: frame.reason.to_string() };
                    }
                    return SessionEnd::Dropped;
                }
                Some(Ok(Message::Close(None))) | None => return SessionEnd::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("chat client read failed: {e}");
                    return SessionEnd::Dropped;
                }
            },
        }
    }
}
