//! Session bridge.
//!
//! Reconciles the hosted auth service's session with the legacy user record
//! kept in durable storage, and exposes one consistent [`AuthView`] to the
//! rest of the client. A legacy user without a real session gets a
//! synthesized one; a real session always wins.

mod actions;
pub mod export;
mod legacy;
pub mod synthesis;
#[cfg(test)]
mod testing;
mod watcher;

pub use export::{LegacySessionEnvelope, SessionBackup, SESSION_SCHEMA_VERSION};
pub use synthesis::{decode_claims, synthesize_session, SyntheticClaims};
pub use watcher::BridgeHandle;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::{AuthProvider, AuthStateChange, AuthUser, LegacyUser, Role, Session};
use crate::config::Config;
use crate::notifications::Notifier;
use crate::storage::{DurableStorage, SessionKeys};

/// Where the held session came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Primary,
    Synthetic,
}

impl SessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSource::Primary => "primary",
            SessionSource::Synthetic => "synthetic",
        }
    }
}

/// Snapshot of the bridge state handed to callers
#[derive(Debug, Clone, Serialize)]
pub struct AuthView {
    pub session: Option<Session>,
    pub user: Option<AuthUser>,
    pub custom_user: Option<LegacyUser>,
    pub source: Option<SessionSource>,
    pub loading: bool,
}

impl AuthView {
    /// Role of the effective user: the session user when there is one,
    /// otherwise the legacy user.
    pub fn role(&self) -> Role {
        match (&self.user, &self.custom_user) {
            (Some(user), _) => user.role(),
            (None, Some(custom)) => custom.role(),
            (None, None) => Role::Consumer,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

/// Runtime settings for a bridge instance
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub keys: SessionKeys,
    pub poll_interval: Duration,
    pub session_ttl: chrono::Duration,
    pub redirect_url: Option<String>,
}

impl BridgeSettings {
    pub fn new(project_id: &str) -> Self {
        Self {
            keys: SessionKeys::new(project_id),
            poll_interval: Duration::from_secs(5),
            session_ttl: default_session_ttl(),
            redirect_url: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            keys: SessionKeys::new(&config.auth.project_id()),
            poll_interval: Duration::from_secs(config.bridge.poll_interval_secs),
            session_ttl: session_ttl(config.bridge.session_ttl_secs),
            redirect_url: config.auth.redirect_url.clone(),
        }
    }
}

fn default_session_ttl() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Configured lifetime, or the default when it is not a usable duration
fn session_ttl(secs: i64) -> chrono::Duration {
    match chrono::Duration::try_seconds(secs) {
        Some(ttl) if secs > 0 => ttl,
        _ => {
            warn!(session_ttl_secs = secs, "Unusable session lifetime, using default");
            default_session_ttl()
        }
    }
}

#[derive(Debug)]
struct BridgeState {
    session: Option<Session>,
    source: Option<SessionSource>,
    user: Option<AuthUser>,
    custom_user: Option<LegacyUser>,
    loading: bool,
    /// Raw legacy record seen by the last sync
    legacy_snapshot: Option<String>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            session: None,
            source: None,
            user: None,
            custom_user: None,
            loading: true,
            legacy_snapshot: None,
        }
    }
}

impl BridgeState {
    fn hold(&mut self, session: Session, source: SessionSource) {
        self.user = Some(session.user.clone());
        self.session = Some(session);
        self.source = Some(source);
    }

    fn clear_session(&mut self) {
        self.session = None;
        self.user = None;
        self.source = None;
    }

    /// A synthetic session minted from a different version of `user`
    /// (another id, email or role flags)
    fn holds_stale_synthetic(&self, user: &LegacyUser) -> bool {
        self.source == Some(SessionSource::Synthetic)
            && self.user.as_ref().is_some_and(|held| {
                held.id != user.id
                    || held.email.as_deref() != Some(user.email.as_str())
                    || held.user_metadata.is_admin != user.is_admin
                    || held.user_metadata.is_farm != user.is_farm
            })
    }
}

pub struct SessionBridge {
    storage: Arc<dyn DurableStorage>,
    provider: Arc<dyn AuthProvider>,
    notifier: Arc<dyn Notifier>,
    settings: BridgeSettings,
    state: RwLock<BridgeState>,
}

impl SessionBridge {
    pub fn new(
        storage: Arc<dyn DurableStorage>,
        provider: Arc<dyn AuthProvider>,
        notifier: Arc<dyn Notifier>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            storage,
            provider,
            notifier,
            settings,
            state: RwLock::new(BridgeState::default()),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn view(&self) -> AuthView {
        let state = self.state.read();
        AuthView {
            session: state.session.clone(),
            user: state.user.clone(),
            custom_user: state.custom_user.clone(),
            source: state.source,
            loading: state.loading,
        }
    }

    pub fn role(&self) -> Role {
        self.view().role()
    }

    /// Full reconciliation pass: legacy user first, then the auth service,
    /// whose session overrides a synthetic one.
    pub async fn reconcile(&self) {
        self.sync_legacy_user();

        match self.provider.get_session().await {
            Ok(Some(session)) => {
                info!(user_id = %session.user.id, "Using primary auth session");
                self.state.write().hold(session, SessionSource::Primary);
            }
            Ok(None) => debug!("No primary auth session"),
            Err(e) => warn!(error = %e, "Failed to query primary auth session"),
        }

        self.state.write().loading = false;
    }

    /// Re-sync when the stored legacy record differs from the last one seen.
    /// Returns whether a sync ran.
    pub fn check_legacy_user(&self) -> bool {
        let raw = legacy::read_raw(&*self.storage);
        if raw == self.state.read().legacy_snapshot {
            return false;
        }

        debug!("Legacy user record changed");
        self.sync_legacy_user();
        true
    }

    /// Load the legacy user and synthesize a session for it when none is held
    fn sync_legacy_user(&self) {
        let record = legacy::load(&*self.storage);
        let mut synthesized = None;
        let mut dropped_synthetic = false;

        {
            let mut state = self.state.write();
            state.legacy_snapshot = record.raw;

            match record.user {
                Some(user) => {
                    if state.holds_stale_synthetic(&user) {
                        debug!(user_id = %user.id, "Legacy user changed, replacing synthetic session");
                        state.clear_session();
                    }

                    if state.session.is_none() {
                        if let Some(session) =
                            synthesize_session(&user, Utc::now(), self.settings.session_ttl)
                        {
                            info!(user_id = %user.id, "Synthesized session for legacy user");
                            state.hold(session.clone(), SessionSource::Synthetic);
                            synthesized = Some(session);
                        }
                    }
                    state.custom_user = Some(user);
                }
                None => {
                    state.custom_user = None;
                    if state.source == Some(SessionSource::Synthetic) {
                        info!("Legacy user gone, dropping synthetic session");
                        state.clear_session();
                        dropped_synthetic = true;
                    }
                }
            }
        }

        if let Some(session) = synthesized {
            export::export_session(&*self.storage, &self.settings.keys, &session);
        }
        if dropped_synthetic {
            export::clear_session_mirrors(&*self.storage, &self.settings.keys);
        }
    }

    /// Apply a session change reported by the auth service
    pub fn apply_auth_change(&self, change: &AuthStateChange) {
        debug!(event = %change.event, has_session = change.session.is_some(), "Auth state changed");

        match &change.session {
            Some(session) => {
                self.state
                    .write()
                    .hold(session.clone(), SessionSource::Primary);
                export::export_session(&*self.storage, &self.settings.keys, session);
                export::write_backup(&*self.storage, session);
            }
            None => {
                let dropped_primary = {
                    let mut state = self.state.write();
                    if state.source == Some(SessionSource::Primary) {
                        state.clear_session();
                        true
                    } else {
                        false
                    }
                };

                export::remove_backup(&*self.storage);

                if dropped_primary {
                    export::clear_session_mirrors(&*self.storage, &self.settings.keys);
                    // A legacy user falls back to a synthetic session
                    self.sync_legacy_user();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::auth::AuthEvent;
    use crate::storage::keys;
    use crate::storage::MemoryStorage;
    use tokio::sync::broadcast::error::TryRecvError;

    #[tokio::test]
    async fn test_legacy_user_gets_synthetic_session() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com","is_farm":true}"#)
            .unwrap();
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());

        fixture.bridge.reconcile().await;

        let view = fixture.bridge.view();
        assert!(!view.loading);
        assert_eq!(view.source, Some(SessionSource::Synthetic));
        assert_eq!(view.session.as_ref().unwrap().user.id, "u1");
        assert_eq!(view.custom_user.as_ref().unwrap().id, "u1");
        assert_eq!(view.role(), Role::Farm);

        let now = Utc::now().timestamp();
        let expires_at = view.session.unwrap().expires_at;
        assert!((expires_at - (now + 86_400)).abs() <= 5);

        for key in [
            keys::PRIMARY_MIRROR,
            "sb-testproject-auth-token",
        ] {
            let stored: Session =
                serde_json::from_str(&storage.get(key).unwrap().unwrap()).unwrap();
            assert_eq!(stored.user.id, "u1", "key {}", key);
        }
        let envelope: LegacySessionEnvelope =
            serde_json::from_str(&storage.get(keys::LEGACY_SESSION).unwrap().unwrap()).unwrap();
        assert_eq!(envelope.current_session.user.id, "u1");
    }

    #[tokio::test]
    async fn test_malformed_legacy_user_is_removed() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(keys::LEGACY_USER, "{\"id\": \"u1\", ").unwrap();
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());

        fixture.bridge.reconcile().await;

        let view = fixture.bridge.view();
        assert!(view.custom_user.is_none());
        assert!(view.session.is_none());
        assert!(!view.loading);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_primary_session_wins_over_legacy() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        let provider = FakeProvider::with_session(primary_session("p1"));
        let fixture = Fixture::new(storage, provider);

        fixture.bridge.reconcile().await;

        let view = fixture.bridge.view();
        assert_eq!(view.source, Some(SessionSource::Primary));
        assert_eq!(view.session.unwrap().user.id, "p1");
        assert_eq!(view.user.unwrap().id, "p1");
        // The legacy record is still exposed
        assert_eq!(view.custom_user.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());

        fixture.bridge.reconcile().await;
        let first = fixture.bridge.view().session.unwrap();

        let mut writes = storage.subscribe();
        fixture.bridge.reconcile().await;

        assert!(matches!(writes.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(fixture.bridge.view().session.unwrap(), first);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_absent() {
        let storage = Arc::new(MemoryStorage::new());
        let mut provider = FakeProvider::new();
        provider.fail_get_session = true;
        let fixture = Fixture::new(storage, provider);

        fixture.bridge.reconcile().await;

        let view = fixture.bridge.view();
        assert!(!view.loading);
        assert!(!view.is_authenticated());
        assert_eq!(view.role(), Role::Consumer);
    }

    #[tokio::test]
    async fn test_nothing_stored_leaves_state_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());
        assert!(fixture.bridge.view().loading);

        fixture.bridge.reconcile().await;

        let view = fixture.bridge.view();
        assert!(!view.loading);
        assert!(view.session.is_none());
        assert!(view.custom_user.is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_check_detects_changes_only() {
        let storage = Arc::new(MemoryStorage::new());
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());
        fixture.bridge.reconcile().await;

        assert!(!fixture.bridge.check_legacy_user());

        storage
            .set(keys::LEGACY_USER, r#"{"id":"u2","email":"c@d.com","is_admin":true}"#)
            .unwrap();
        assert!(fixture.bridge.check_legacy_user());
        assert_eq!(fixture.bridge.role(), Role::Admin);
        assert!(!fixture.bridge.check_legacy_user());
    }

    #[tokio::test]
    async fn test_removed_legacy_user_drops_synthetic_session() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());
        fixture.bridge.reconcile().await;

        storage.remove(keys::LEGACY_USER).unwrap();
        assert!(fixture.bridge.check_legacy_user());

        let view = fixture.bridge.view();
        assert!(view.session.is_none());
        assert!(view.custom_user.is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_removed_legacy_user_keeps_primary_session() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        let fixture = Fixture::new(
            storage.clone(),
            FakeProvider::with_session(primary_session("p1")),
        );
        fixture.bridge.reconcile().await;

        storage.remove(keys::LEGACY_USER).unwrap();
        fixture.bridge.check_legacy_user();

        let view = fixture.bridge.view();
        assert_eq!(view.source, Some(SessionSource::Primary));
        assert!(view.custom_user.is_none());
    }

    #[tokio::test]
    async fn test_different_legacy_user_replaces_synthetic_session() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());
        fixture.bridge.reconcile().await;

        storage
            .set(keys::LEGACY_USER, r#"{"id":"u2","email":"c@d.com"}"#)
            .unwrap();
        fixture.bridge.check_legacy_user();

        assert_eq!(fixture.bridge.view().session.unwrap().user.id, "u2");
    }

    #[tokio::test]
    async fn test_auth_change_exports_and_backs_up() {
        let storage = Arc::new(MemoryStorage::new());
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());
        fixture.bridge.reconcile().await;

        fixture.bridge.apply_auth_change(&AuthStateChange {
            event: AuthEvent::SignedIn,
            session: Some(primary_session("p1")),
        });

        let view = fixture.bridge.view();
        assert_eq!(view.source, Some(SessionSource::Primary));

        let backup: SessionBackup =
            serde_json::from_str(&storage.get(keys::SESSION_BACKUP).unwrap().unwrap()).unwrap();
        assert_eq!(backup.user_id, "p1");
        assert!(backup.has_session);

        let mirror: Session =
            serde_json::from_str(&storage.get(keys::PRIMARY_MIRROR).unwrap().unwrap()).unwrap();
        assert_eq!(mirror.user.id, "p1");
    }

    #[tokio::test]
    async fn test_signed_out_change_falls_back_to_legacy() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        let fixture = Fixture::new(
            storage.clone(),
            FakeProvider::with_session(primary_session("p1")),
        );
        fixture.bridge.reconcile().await;

        fixture.bridge.apply_auth_change(&AuthStateChange {
            event: AuthEvent::SignedOut,
            session: None,
        });

        let view = fixture.bridge.view();
        assert_eq!(view.source, Some(SessionSource::Synthetic));
        assert_eq!(view.session.unwrap().user.id, "u1");
        assert!(!storage.contains(keys::SESSION_BACKUP));
        assert!(storage.contains(keys::PRIMARY_MIRROR));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.auth.url = Some("https://abc123.supabase.co".to_string());
        config.auth.redirect_url = Some("https://market.example/reset".to_string());
        config.bridge.poll_interval_secs = 7;

        let settings = BridgeSettings::from_config(&config);
        assert_eq!(settings.keys.project_mirror(), "sb-abc123-auth-token");
        assert_eq!(settings.poll_interval, Duration::from_secs(7));
        assert_eq!(settings.session_ttl.num_seconds(), 86_400);
        assert_eq!(
            settings.redirect_url.as_deref(),
            Some("https://market.example/reset")
        );
    }

    #[test]
    fn test_settings_fall_back_on_unusable_ttl() {
        let mut config = Config::default();
        config.bridge.session_ttl_secs = i64::MAX;

        let settings = BridgeSettings::from_config(&config);
        assert_eq!(settings.session_ttl.num_seconds(), 86_400);
    }

    #[tokio::test]
    async fn test_loosely_typed_legacy_record_is_kept() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                keys::LEGACY_USER,
                r#"{"id":"u1","email":"a@b.com","is_farm":1,"created_at":1700000000}"#,
            )
            .unwrap();
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());

        fixture.bridge.reconcile().await;

        let view = fixture.bridge.view();
        assert_eq!(view.custom_user.unwrap().id, "u1");
        assert_eq!(view.session.unwrap().user.id, "u1");
        assert_eq!(fixture.bridge.role(), Role::Farm);
        assert!(storage.contains(keys::LEGACY_USER));
    }

    #[tokio::test]
    async fn test_flag_change_updates_synthetic_role() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());
        fixture.bridge.reconcile().await;
        assert_eq!(fixture.bridge.role(), Role::Consumer);

        storage
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com","is_admin":true}"#)
            .unwrap();
        assert!(fixture.bridge.check_legacy_user());

        let view = fixture.bridge.view();
        assert_eq!(view.source, Some(SessionSource::Synthetic));
        assert!(view.custom_user.unwrap().is_admin);
        assert_eq!(fixture.bridge.role(), Role::Admin);

        let mirror: Session =
            serde_json::from_str(&storage.get(keys::PRIMARY_MIRROR).unwrap().unwrap()).unwrap();
        assert!(mirror.user.user_metadata.is_admin);
    }

    #[tokio::test]
    async fn test_storage_read_failure_reads_as_absent() {
        let storage = Arc::new(FailingStorage::default());
        storage
            .inner
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        storage
            .fail_get
            .lock()
            .insert(keys::LEGACY_USER.to_string());
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());

        fixture.bridge.reconcile().await;

        let view = fixture.bridge.view();
        assert!(!view.loading);
        assert!(view.custom_user.is_none());
        assert!(view.session.is_none());
        // The record is not treated as corrupted
        assert!(storage.inner.contains(keys::LEGACY_USER));
    }

    #[tokio::test]
    async fn test_export_failure_keeps_synthetic_session() {
        let storage = Arc::new(FailingStorage::default());
        storage
            .inner
            .set(keys::LEGACY_USER, r#"{"id":"u1","email":"a@b.com"}"#)
            .unwrap();
        storage
            .fail_set
            .lock()
            .insert(keys::PRIMARY_MIRROR.to_string());
        let fixture = Fixture::new(storage.clone(), FakeProvider::new());

        fixture.bridge.reconcile().await;

        let view = fixture.bridge.view();
        assert_eq!(view.source, Some(SessionSource::Synthetic));
        assert_eq!(view.session.unwrap().user.id, "u1");
        assert!(!storage.inner.contains(keys::PRIMARY_MIRROR));
        assert!(storage.inner.contains(keys::LEGACY_SESSION));
        assert!(storage.inner.contains("sb-testproject-auth-token"));
    }
}
