use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Marketplace role derived from the user's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Farm,
    Consumer,
}

impl Role {
    /// Admin takes precedence over farm; everyone else is a consumer.
    pub fn from_flags(is_admin: bool, is_farm: bool) -> Self {
        if is_admin {
            Role::Admin
        } else if is_farm {
            Role::Farm
        } else {
            Role::Consumer
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Farm => "farm",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum LegacyUserError {
    #[error("Legacy user record is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Legacy user record has an empty {0}")]
    MissingField(&'static str),
}

/// A user created by the marketplace's own registration flow, stored only
/// in durable client storage under the `user` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyUser {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub is_farm: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_admin: bool,
    /// RFC 3339 text or epoch seconds, kept as written
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Token handed out by the custom registration endpoint, if any
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl LegacyUser {
    /// Parse a stored record, rejecting records without an id or email.
    pub fn parse(raw: &str) -> Result<Self, LegacyUserError> {
        let user: LegacyUser = serde_json::from_str(raw)?;
        if user.id.trim().is_empty() {
            return Err(LegacyUserError::MissingField("id"));
        }
        if user.email.trim().is_empty() {
            return Err(LegacyUserError::MissingField("email"));
        }
        Ok(user)
    }

    pub fn role(&self) -> Role {
        Role::from_flags(self.is_admin, self.is_farm)
    }

    pub fn full_name(&self) -> Option<String> {
        join_name(self.first_name.as_deref(), self.last_name.as_deref())
    }
}

/// Profile data attached to an auth user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub is_farm: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_admin: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserMetadata {
    /// Metadata sent with a sign-up request
    pub fn profile(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.to_string()),
            full_name: join_name(Some(first_name), Some(last_name)),
            ..Default::default()
        }
    }
}

/// User projection embedded in a session, in the auth service's wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    #[serde(default)]
    pub app_metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl AuthUser {
    pub fn role(&self) -> Role {
        Role::from_flags(self.user_metadata.is_admin, self.user_metadata.is_farm)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds at issue time
    pub expires_in: i64,
    /// Absolute expiry (Unix timestamp, seconds)
    pub expires_at: i64,
    pub token_type: String,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Kind of change reported by the auth provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthEvent::SignedIn => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEvent::UserUpdated => "USER_UPDATED",
            AuthEvent::PasswordRecovery => "PASSWORD_RECOVERY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub metadata: UserMetadata,
}

/// Result of a registration call
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: Option<AuthUser>,
    /// Present when the service confirms the account immediately
    pub session: Option<Session>,
}

impl SignUpOutcome {
    pub fn needs_confirmation(&self) -> bool {
        self.session.is_none()
    }
}

fn join_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Older records store numeric ids
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Optional text field; numbers are stringified, other shapes read as absent
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Truthiness as older clients wrote it: `true`, `1`, `"true"`, `"1"`, `"yes"`.
/// Anything else, `null` included, is false.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        serde_json::Value::String(s) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        }
        _ => false,
    })
}
