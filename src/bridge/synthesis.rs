//! Session synthesis for legacy users.
//!
//! A legacy user never went through the auth service, so there is no real
//! session to hand out. The bridge fabricates one with the same shape so the
//! rest of the client can treat both kinds of user alike. The token is
//! either the one the legacy registration endpoint issued or an unsigned
//! base64 claims blob; nothing ever verifies it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{AuthUser, LegacyUser, Session, UserMetadata};

/// Claims encoded into a locally generated token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticClaims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Encode claims as standard base64 JSON (no signature)
pub fn encode_claims(claims: &SyntheticClaims) -> Result<String, serde_json::Error> {
    Ok(BASE64.encode(serde_json::to_vec(claims)?))
}

/// Decode a locally generated token; `None` for anything else
pub fn decode_claims(token: &str) -> Option<SyntheticClaims> {
    let bytes = BASE64.decode(token).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Build a session for `user` valid for `ttl` from `now`.
///
/// Returns `None` (and logs) when the record cannot back a session.
pub fn synthesize_session(user: &LegacyUser, now: DateTime<Utc>, ttl: Duration) -> Option<Session> {
    if user.id.trim().is_empty() {
        warn!("Cannot synthesize session: legacy user has no id");
        return None;
    }

    let Some(expiry) = now.checked_add_signed(ttl) else {
        warn!(user_id = %user.id, ttl_secs = ttl.num_seconds(), "Cannot synthesize session: lifetime out of range");
        return None;
    };
    let issued_at = now.timestamp();
    let expires_at = expiry.timestamp();

    let access_token = match user.token.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(token) => token.to_string(),
        None => {
            let claims = SyntheticClaims {
                sub: user.id.clone(),
                email: user.email.clone(),
                iat: issued_at,
                exp: expires_at,
            };
            match encode_claims(&claims) {
                Ok(token) => token,
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "Failed to encode synthetic claims");
                    return None;
                }
            }
        }
    };

    let mut app_metadata = serde_json::Map::new();
    app_metadata.insert("provider".to_string(), "legacy".into());

    let session = Session {
        access_token,
        refresh_token: format!("synthetic-{}", user.id),
        expires_in: ttl.num_seconds(),
        expires_at,
        token_type: "bearer".to_string(),
        user: AuthUser {
            id: user.id.clone(),
            aud: "authenticated".to_string(),
            role: Some("authenticated".to_string()),
            email: Some(user.email.clone()),
            user_metadata: UserMetadata {
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                full_name: user.full_name(),
                is_farm: user.is_farm,
                is_admin: user.is_admin,
                extra: serde_json::Map::new(),
            },
            app_metadata,
            created_at: user
                .created_at
                .clone()
                .or_else(|| Some(now.to_rfc3339())),
        },
    };

    debug!(user_id = %user.id, expires_at = expires_at, "Synthesized session for legacy user");
    Some(session)
}
