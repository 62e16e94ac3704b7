//! Storage key names shared with the rest of the marketplace application.
//!
//! These names are a compatibility contract: other screens read them
//! directly, so they must not change.

/// Canonical legacy user record
pub const LEGACY_USER: &str = "user";

/// Mirror of the active session under the production project's key
pub const PRIMARY_MIRROR: &str = "sb-itbuxujsotcgexofbrwq-auth-token";

/// Older client format: `{"currentSession": .., "expiresAt": ..}`
pub const LEGACY_SESSION: &str = "supabase.auth.token";

/// Lightweight record written on every primary session change
pub const SESSION_BACKUP: &str = "guadzefie.session.backup";

/// Mirror key for a runtime-configured project id
pub fn project_mirror(project_id: &str) -> String {
    format!("sb-{}-auth-token", project_id)
}

/// Resolved key set for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    project_mirror: String,
}

impl SessionKeys {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_mirror: project_mirror(project_id),
        }
    }

    pub fn project_mirror(&self) -> &str {
        &self.project_mirror
    }

    /// Keys holding a copy of the session, canonical key first
    pub fn session_aliases(&self) -> Vec<&str> {
        let mut aliases = vec![PRIMARY_MIRROR, LEGACY_SESSION];
        if !aliases.contains(&self.project_mirror.as_str()) {
            aliases.push(&self.project_mirror);
        }
        aliases
    }

    /// Every key sign-out must clear
    pub fn all(&self) -> Vec<&str> {
        let mut all = self.session_aliases();
        all.push(SESSION_BACKUP);
        all.push(LEGACY_USER);
        all
    }
}
