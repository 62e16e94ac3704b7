//! Compatibility export of the held session.
//!
//! The bridge keeps one canonical representation, the session in the auth
//! service's wire shape (schema version 1). Other parts of the application
//! read older copies, so every change is exported to these keys:
//!
//! | key                                  | content                                   |
//! |--------------------------------------|-------------------------------------------|
//! | `sb-itbuxujsotcgexofbrwq-auth-token` | session                                   |
//! | `supabase.auth.token`                | `{"currentSession": session, "expiresAt"}` |
//! | `sb-<project-id>-auth-token`         | session                                   |
//!
//! Primary session changes also leave a `{timestamp, userId, hasSession}`
//! record under `guadzefie.session.backup`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::Session;
use crate::storage::keys::{self, SessionKeys};
use crate::storage::DurableStorage;

/// Version of the canonical stored session layout
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Layout of the `supabase.auth.token` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySessionEnvelope {
    pub current_session: Session,
    pub expires_at: i64,
}

/// Layout of the `guadzefie.session.backup` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBackup {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub user_id: String,
    /// Always `true` in records written here (a session-less change removes
    /// the record instead); kept because readers of the key expect it
    pub has_session: bool,
}

/// Render the value stored under `key` for `session`
fn render(key: &str, session: &Session) -> Result<String, serde_json::Error> {
    if key == keys::LEGACY_SESSION {
        serde_json::to_string(&LegacySessionEnvelope {
            current_session: session.clone(),
            expires_at: session.expires_at,
        })
    } else {
        serde_json::to_string(session)
    }
}

/// Write `session` under every alias. Returns how many keys were written.
pub fn export_session(storage: &dyn DurableStorage, keys: &SessionKeys, session: &Session) -> usize {
    let mut written = 0;

    for key in keys.session_aliases() {
        let value = match render(key, session) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize session");
                continue;
            }
        };

        match storage.set(key, &value) {
            Ok(()) => written += 1,
            Err(e) => warn!(key = %key, error = %e, "Failed to export session"),
        }
    }

    debug!(
        user_id = %session.user.id,
        keys = written,
        schema = SESSION_SCHEMA_VERSION,
        "Session exported"
    );
    written
}

/// Remove every session alias
pub fn clear_session_mirrors(storage: &dyn DurableStorage, keys: &SessionKeys) {
    for key in keys.session_aliases() {
        if let Err(e) = storage.remove(key) {
            warn!(key = %key, error = %e, "Failed to remove session mirror");
        }
    }
}

pub fn write_backup(storage: &dyn DurableStorage, session: &Session) {
    let backup = SessionBackup {
        timestamp: chrono::Utc::now().timestamp_millis(),
        user_id: session.user.id.clone(),
        has_session: true,
    };

    let result = serde_json::to_string(&backup)
        .map_err(|e| e.to_string())
        .and_then(|raw| {
            storage
                .set(keys::SESSION_BACKUP, &raw)
                .map_err(|e| e.to_string())
        });

    if let Err(e) = result {
        warn!(error = %e, "Failed to write session backup");
    }
}

pub fn remove_backup(storage: &dyn DurableStorage) {
    if let Err(e) = storage.remove(keys::SESSION_BACKUP) {
        warn!(error = %e, "Failed to remove session backup");
    }
}
