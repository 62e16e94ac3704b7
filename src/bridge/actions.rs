use tracing::{debug, info, warn};

use super::{SessionBridge, SessionSource};
use crate::auth::validation::{validate_email, validate_name, validate_password};
use crate::auth::{AuthError, SignUpOutcome, SignUpRequest, UserMetadata};
use crate::notifications::Notice;

impl SessionBridge {
    /// Register a new account with the auth service.
    ///
    /// The legacy user record is left alone; a session returned by the
    /// service arrives through the auth change feed.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let validation = validate_email(email)
            .and_then(|_| validate_password(password))
            .and_then(|_| validate_name("First name", first_name))
            .and_then(|_| validate_name("Last name", last_name));
        if let Err(message) = validation {
            return Err(self.fail("Sign up failed", AuthError::Validation(message)));
        }

        let email = email.trim();
        let request = SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            metadata: UserMetadata::profile(first_name.trim(), last_name.trim()),
        };

        match self.provider.sign_up(&request).await {
            Ok(outcome) => {
                info!(email = %email, confirmed = !outcome.needs_confirmation(), "Account registered");
                let notice = if outcome.needs_confirmation() {
                    Notice::success(
                        "Check your email",
                        format!("We sent a confirmation link to {}", email),
                    )
                } else {
                    Notice::success("Account created", "Your account is ready")
                };
                self.notifier.notify(&notice);
                Ok(outcome)
            }
            Err(e) => Err(self.fail("Sign up failed", e)),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            let error = AuthError::Validation("Email and password are required".to_string());
            return Err(self.fail("Sign in failed", error));
        }

        let session = match self.provider.sign_in_with_password(email, password).await {
            Ok(session) => session,
            Err(e) => return Err(self.fail("Sign in failed", e)),
        };

        info!(user_id = %session.user.id, "Signed in");
        self.state.write().hold(session, SessionSource::Primary);
        self.refresh_session().await;

        self.notifier
            .notify(&Notice::success("Signed in", "Welcome back"));
        Ok(())
    }

    /// Forget every trace of the current user. Never fails.
    pub async fn sign_out(&self) {
        {
            let mut state = self.state.write();
            state.clear_session();
            state.custom_user = None;
            state.legacy_snapshot = None;
        }

        for key in self.settings.keys.all() {
            if let Err(e) = self.storage.remove(key) {
                warn!(key = %key, error = %e, "Failed to remove key during sign out");
            }
        }

        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "Auth service sign out failed");
        }

        info!("Signed out");
    }

    /// Ask the auth service for a fresh session. Returns whether one came back.
    pub async fn refresh_session(&self) -> bool {
        match self.provider.refresh_session().await {
            Ok(session) => {
                debug!(user_id = %session.user.id, "Session refreshed");
                self.state.write().hold(session, SessionSource::Primary);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh session");
                false
            }
        }
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        if let Err(message) = validate_email(email) {
            return Err(self.fail("Password reset failed", AuthError::Validation(message)));
        }

        let email = email.trim();
        let redirect = self.settings.redirect_url.as_deref();

        match self.provider.reset_password_for_email(email, redirect).await {
            Ok(()) => {
                info!(email = %email, "Password reset email requested");
                self.notifier.notify(&Notice::success(
                    "Password reset email sent",
                    format!("Check {} for a link to reset your password", email),
                ));
                Ok(())
            }
            Err(e) => Err(self.fail("Password reset failed", e)),
        }
    }

    /// Log and surface a failed operation, handing the error back
    fn fail(&self, title: &str, error: AuthError) -> AuthError {
        warn!(error = %error, "{}", title);
        self.notifier
            .notify(&Notice::error(title, error.user_message()));
        error
    }
}
