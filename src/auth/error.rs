use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Auth service is not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Auth service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response from auth service: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No active session")]
    NoSession,

    #[error("Invalid input: {0}")]
    Validation(String),
}

impl AuthError {
    /// Build an error from a non-success response body.
    ///
    /// The service reports errors in a few shapes depending on the endpoint
    /// (`error_description`, `msg`, `message`, `error`); the first one found
    /// wins, falling back to the raw body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                ["error_description", "msg", "message", "error"]
                    .iter()
                    .find_map(|field| value.get(field).and_then(|v| v.as_str()))
                    .map(str::to_string)
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP {}", status)
                } else {
                    body.trim().to_string()
                }
            });

        AuthError::Api { status, message }
    }

    /// Message suitable for a user-facing notice
    pub fn user_message(&self) -> String {
        match self {
            AuthError::NotConfigured => "Authentication is not available right now".to_string(),
            AuthError::Http(_) => "Could not reach the authentication service".to_string(),
            AuthError::Api { message, .. } => message.clone(),
            AuthError::Decode(_) => "The authentication service sent an unexpected reply".to_string(),
            AuthError::NoSession => "You are not signed in".to_string(),
            AuthError::Validation(message) => message.clone(),
        }
    }
}
