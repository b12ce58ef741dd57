//! Session identity for queued writes.
//!
//! The owner of a replayed expense is whoever is signed in when the write is
//! sent, not whoever was signed in when it was captured. The user id is read
//! from the `sub` claim of the client's current access token on every call.

use base64::Engine;
use thiserror::Error;

use super::client::{ApiClient, RemoteError};
use crate::sync::coordinator::IdentityProvider;
use crate::sync::queue::now_ms;

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("invalid JWT format")]
    Format,
    #[error("failed to decode JWT payload: {0}")]
    Decode(String),
    #[error("JWT payload missing 'sub' claim")]
    MissingSubject,
}

/// Claims read from an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClaims {
    pub user_id: String,
    /// Expiry in Unix seconds, when the token carries one.
    pub expires_at: Option<u64>,
}

impl SessionClaims {
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now_secs)
    }
}

/// Decode the payload of a JWT without verifying it.
///
/// The backend verifies the token on every request; locally we only need the
/// subject and expiry.
pub fn decode_session_claims(token: &str) -> Result<SessionClaims, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Format);
    }

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| TokenError::Decode(e.to_string()))?;

    let json: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(|e| TokenError::Decode(e.to_string()))?;

    let user_id = json["sub"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or(TokenError::MissingSubject)?;

    Ok(SessionClaims {
        user_id,
        expires_at: json["exp"].as_u64(),
    })
}

impl IdentityProvider for ApiClient {
    /// `None` when there is no token or it has expired.
    async fn current_user_id(&self) -> Result<Option<String>, RemoteError> {
        let Some(token) = self.access_token().await else {
            return Ok(None);
        };

        let claims = decode_session_claims(&token).map_err(|e| RemoteError::Unauthorized {
            status: 401,
            message: e.to_string(),
        })?;

        if claims.is_expired_at(now_ms() / 1000) {
            log::warn!("Session token for {} has expired", claims.user_id);
            return Ok(None);
        }
        Ok(Some(claims.user_id))
    }
}
