//! Bearer-token verification for chat connections.
//!
//! Tokens are HS256 JWTs issued by the REST side and carry
//! `{id, email, role?, exp}`. Each way verification can fail maps to its
//! own WebSocket close code, so a client can tell "log in again" apart
//! from "server unavailable".

use std::{fmt, str::FromStr};

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Close code sent when the upgrade request carried no token.
pub const CLOSE_TOKEN_REQUIRED: u16 = 4001;
/// Close code sent when the token failed verification.
pub const CLOSE_INVALID_TOKEN: u16 = 4002;
/// Standard "internal error" close code: no signing secret is configured, or
/// the connection could not be set up.
pub const CLOSE_INTERNAL: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Homeowner,
    Company,
    City,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            Homeowner => "HOMEOWNER",
            Company => "COMPANY",
            City => "CITY",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Role::*;
        [Homeowner, Company, City]
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AuthError::UnknownRole(s.to_owned()))
    }
}

/// Who is on the other end of a connection. Fixed for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token required")]
    MissingToken,
    #[error("signing secret is not configured")]
    MissingSecret,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token carries no role")]
    MissingRole,
    #[error("unknown role {0:?}")]
    UnknownRole(String),
}

impl AuthError {
    pub fn close_code(&self) -> u16 {
        use AuthError::*;
        match self {
            MissingToken => CLOSE_TOKEN_REQUIRED,
            MissingSecret => CLOSE_INTERNAL,
            InvalidToken(_) | MissingRole | UnknownRole(_) => CLOSE_INVALID_TOKEN,
        }
    }

    /// Short reason for the close frame. Never echoes token contents.
    pub fn close_reason(&self) -> &'static str {
        use AuthError::*;
        match self {
            MissingToken => "token required",
            MissingSecret => "server misconfigured",
            InvalidToken(_) | MissingRole | UnknownRole(_) => "invalid token",
        }
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    decoding_key: Option<DecodingKey>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("decoding_key", &self.decoding_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl AuthConfig {
    pub fn new(jwt_secret: Option<String>) -> Self {
        Self {
            decoding_key: jwt_secret.map(|secret| DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    /// Verifies `token` and extracts the caller's identity.
    ///
    /// A token without a role claim is refused rather than treated as a
    /// homeowner, so a mis-issued company token can never act as one.
    pub fn verify(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        let key = self.decoding_key.as_ref().ok_or(AuthError::MissingSecret)?;

        let claims = decode::<Claims>(token, key, &Validation::default())?.claims;
        let role = claims.role.as_deref().ok_or(AuthError::MissingRole)?.parse()?;

        Ok(Identity {
            id: claims.id,
            email: claims.email,
            role,
        })
    }
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, id: &str, role: Option<&str>) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let exp = (time::OffsetDateTime::now_utc().unix_timestamp() + 3600) as u64;
    let claims = Claims {
        id: id.to_owned(),
        email: format!("{id}@example.com"),
        role: role.map(str::to_owned),
        exp,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}
