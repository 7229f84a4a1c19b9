pub mod assign;
pub mod events;
pub mod heartbeat;
pub mod msg;
mod registry;
mod ws;

use std::time::Duration;

use axum::{routing::get, Router};

use crate::AppState;

pub use events::ServerEvent;
pub use registry::{Connection, ConnectionRegistry};

#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Time between liveness probes. A peer is dropped after missing one
    /// full interval's pong.
    pub heartbeat_interval: Duration,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
}
