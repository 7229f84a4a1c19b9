pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod db;

use std::fmt;

use axum::{extract::FromRef, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::{auth::AuthConfig, chat::{ChatSettings, ConnectionRegistry}};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub registry: ConnectionRegistry,
    pub auth: AuthConfig,
    pub settings: ChatSettings,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, auth: AuthConfig, settings: ChatSettings) -> Self {
        Self {
            db_pool,
            registry: ConnectionRegistry::new(),
            auth,
            settings,
        }
    }
}

/// Builds the service: the chat upgrade route plus request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(chat::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// True when the store rejected a write on a UNIQUE constraint,
    /// e.g. two connects racing to assign the same homeowner.
    pub fn is_unique_violation(&self) -> bool {
        self.0
            .downcast_ref::<sqlx::Error>()
            .and_then(sqlx::Error::as_database_error)
            .is_some_and(|e| e.is_unique_violation())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(sqlx::migrate::MigrateError);
apperr_impl!(axum::Error);
apperr_impl!(jsonwebtoken::errors::Error);
apperr_impl!(std::io::Error);
