//! Primary auth store integration.
//!
//! The session bridge talks to the hosted auth service through the
//! [`AuthProvider`] port. [`GoTrueClient`] is the HTTP implementation;
//! [`NoopProvider`] stands in when no service is configured.

mod error;
mod gotrue;
mod models;
pub mod validation;

pub use error::AuthError;
pub use gotrue::GoTrueClient;
pub use models::{
    AuthEvent, AuthStateChange, AuthUser, LegacyUser, LegacyUserError, Role, Session,
    SignUpOutcome, SignUpRequest, UserMetadata,
};

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capacity of the auth state change feed
pub(crate) const AUTH_EVENT_CAPACITY: usize = 16;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Register a new account with profile metadata attached
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthError>;
    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Session, AuthError>;
    /// Drop the local session and revoke it remotely
    async fn sign_out(&self) -> Result<(), AuthError>;
    /// Current session, refreshed first if it has expired
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;
    async fn refresh_session(&self) -> Result<Session, AuthError>;
    /// Send a password recovery email that links back to `redirect_to`
    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError>;
    /// Subscribe to session changes made by this provider
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;
}

/// Provider used when no auth service is configured
pub struct NoopProvider {
    events: broadcast::Sender<AuthStateChange>,
}

impl NoopProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self { events }
    }
}

impl Default for NoopProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for NoopProvider {
    async fn sign_up(&self, _request: &SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        Err(AuthError::NotConfigured)
    }
    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Session, AuthError> {
        Err(AuthError::NotConfigured)
    }
    async fn sign_out(&self) -> Result<(), AuthError> {
        Ok(())
    }
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(None)
    }
    async fn refresh_session(&self) -> Result<Session, AuthError> {
        Err(AuthError::NotConfigured)
    }
    async fn reset_password_for_email(
        &self,
        _email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        Err(AuthError::NotConfigured)
    }
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}
