//! HTTP client for the hosted auth service (GoTrue REST API).
//!
//! Holds the current session in memory and, when given a storage backend,
//! persists it under its own key so a later process can pick it up again.

use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    AuthError, AuthEvent, AuthProvider, AuthStateChange, AuthUser, Session, SignUpOutcome,
    SignUpRequest, AUTH_EVENT_CAPACITY,
};
use crate::config::AuthConfig;
use crate::storage::DurableStorage;

/// Sessions this close to expiry are refreshed before being handed out
const EXPIRY_MARGIN_SECS: i64 = 10;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default = "default_token_type")]
    token_type: String,
    user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Session {
        Session {
            expires_at: self.expires_at.unwrap_or(now + self.expires_in),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            token_type: self.token_type,
            user: self.user,
        }
    }
}

/// The signup endpoint answers with a full token response when the account
/// is confirmed immediately, and with the bare user (or `{user, session:
/// null}`) when an email confirmation is pending.
fn parse_sign_up(value: serde_json::Value, now: i64) -> Result<SignUpOutcome, AuthError> {
    if value.get("access_token").is_some() {
        let session = serde_json::from_value::<TokenResponse>(value)?.into_session(now);
        return Ok(SignUpOutcome {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }

    let user_value = match value.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => value,
    };
    let user = if user_value.get("id").is_some() {
        Some(serde_json::from_value::<AuthUser>(user_value)?)
    } else {
        None
    };

    Ok(SignUpOutcome {
        user,
        session: None,
    })
}

pub struct GoTrueClient {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
    session: RwLock<Option<Session>>,
    storage: Option<Arc<dyn DurableStorage>>,
    session_key: String,
    events: broadcast::Sender<AuthStateChange>,
}

impl GoTrueClient {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let base_url = config
            .url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or(AuthError::NotConfigured)?;

        let http = reqwest::Client::builder()
            .user_agent(format!("guadzefie/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            base_url,
            anon_key: config.anon_key.clone().unwrap_or_default(),
            http,
            session: RwLock::new(None),
            storage: None,
            session_key: config.session_key.clone(),
            events,
        })
    }

    /// Persist sessions in `storage`, restoring one saved by an earlier run
    pub fn with_storage(mut self, storage: Arc<dyn DurableStorage>) -> Self {
        match storage.get(&self.session_key) {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => {
                    debug!(user_id = %session.user.id, "Restored persisted auth session");
                    *self.session.get_mut() = Some(session);
                }
                Err(e) => {
                    warn!(error = %e, key = %self.session_key, "Discarding unreadable persisted session");
                    if let Err(e) = storage.remove(&self.session_key) {
                        warn!(error = %e, "Failed to remove unreadable persisted session");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read persisted auth session");
            }
        }

        self.storage = Some(storage);
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// POST to an auth endpoint, turning non-success statuses into errors
    async fn post(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, AuthError> {
        let url = self.endpoint(path);
        debug!(url = %url, "Calling auth service");

        let response = self
            .http
            .post(&url)
            .query(query)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(self.anon_key.as_str()))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status, path = %path, "Auth service request failed");
            return Err(AuthError::from_response(status, &body));
        }

        Ok(response)
    }

    fn install_session(&self, session: Session, event: AuthEvent) {
        *self.session.write() = Some(session.clone());

        if let Some(storage) = &self.storage {
            match serde_json::to_string(&session) {
                Ok(raw) => {
                    if let Err(e) = storage.set(&self.session_key, &raw) {
                        warn!(error = %e, "Failed to persist auth session");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize auth session"),
            }
        }

        let _ = self.events.send(AuthStateChange {
            event,
            session: Some(session),
        });
    }

    fn clear_session(&self) -> Option<Session> {
        let previous = self.session.write().take();

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.remove(&self.session_key) {
                warn!(error = %e, "Failed to remove persisted auth session");
            }
        }

        previous
    }
}

#[async_trait::async_trait]
impl AuthProvider for GoTrueClient {
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        let body = json!({
            "email": request.email,
            "password": request.password,
            "data": request.metadata,
        });

        let value: serde_json::Value = self.post("signup", &[], &body, None).await?.json().await?;
        let outcome = parse_sign_up(value, Utc::now().timestamp())?;

        if let Some(session) = &outcome.session {
            self.install_session(session.clone(), AuthEvent::SignedIn);
        }

        info!(
            email = %request.email,
            needs_confirmation = outcome.needs_confirmation(),
            "Account registered"
        );
        Ok(outcome)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let body = json!({ "email": email, "password": password });
        let token: TokenResponse = self
            .post("token", &[("grant_type", "password")], &body, None)
            .await?
            .json()
            .await?;

        let session = token.into_session(Utc::now().timestamp());
        self.install_session(session.clone(), AuthEvent::SignedIn);

        info!(user_id = %session.user.id, "Signed in");
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.clear_session();
        let _ = self.events.send(AuthStateChange {
            event: AuthEvent::SignedOut,
            session: None,
        });

        // Local state is gone either way; revoking is best effort
        if let Some(session) = previous {
            self.post("logout", &[], &json!({}), Some(&session.access_token))
                .await?;
            info!(user_id = %session.user.id, "Session revoked");
        }

        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let current = self.session.read().clone();

        match current {
            Some(session) if session.is_expired(Utc::now().timestamp() + EXPIRY_MARGIN_SECS) => {
                debug!(user_id = %session.user.id, "Session expired, refreshing");
                self.refresh_session().await.map(Some)
            }
            other => Ok(other),
        }
    }

    async fn refresh_session(&self) -> Result<Session, AuthError> {
        let refresh_token = self
            .session
            .read()
            .as_ref()
            .map(|session| session.refresh_token.clone())
            .ok_or(AuthError::NoSession)?;

        let body = json!({ "refresh_token": refresh_token });
        let token: TokenResponse = self
            .post("token", &[("grant_type", "refresh_token")], &body, None)
            .await?
            .json()
            .await?;

        let session = token.into_session(Utc::now().timestamp());
        self.install_session(session.clone(), AuthEvent::TokenRefreshed);

        info!(user_id = %session.user.id, expires_at = session.expires_at, "Session refreshed");
        Ok(session)
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        let query: Vec<(&str, &str)> = redirect_to
            .map(|url| vec![("redirect_to", url)])
            .unwrap_or_default();

        self.post("recover", &query, &json!({ "email": email }), None)
            .await?;

        info!(email = %email, "Password recovery email requested");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}
