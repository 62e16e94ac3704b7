//! Test doubles shared by the bridge tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{BridgeSettings, SessionBridge};
use crate::auth::{
    AuthError, AuthEvent, AuthProvider, AuthStateChange, AuthUser, Session, SignUpOutcome,
    SignUpRequest, UserMetadata,
};
use crate::notifications::{Notice, NoticeLevel, Notifier};
use crate::storage::{DurableStorage, MemoryStorage, StorageError, StorageEvent};

pub fn primary_session(user_id: &str) -> Session {
    Session {
        access_token: format!("access-{}", user_id),
        refresh_token: format!("refresh-{}", user_id),
        expires_in: 3600,
        expires_at: chrono::Utc::now().timestamp() + 3600,
        token_type: "bearer".to_string(),
        user: AuthUser {
            id: user_id.to_string(),
            aud: "authenticated".to_string(),
            role: Some("authenticated".to_string()),
            email: Some(format!("{}@example.com", user_id)),
            user_metadata: UserMetadata::default(),
            app_metadata: serde_json::Map::new(),
            created_at: None,
        },
    }
}

/// Scriptable auth provider
pub struct FakeProvider {
    pub session: Mutex<Option<Session>>,
    pub fail_get_session: bool,
    pub fail_sign_out: bool,
    pub sign_in_error: Option<String>,
    pub sign_up_session: bool,
    pub calls: Mutex<Vec<String>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl FakeProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session: Mutex::new(None),
            fail_get_session: false,
            fail_sign_out: false,
            sign_in_error: None,
            sign_up_session: false,
            calls: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn with_session(session: Session) -> Self {
        let provider = Self::new();
        *provider.session.lock() = Some(session);
        provider
    }

    /// Emit a change as the real client would after a session change
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.events.send(AuthStateChange { event, session });
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls.lock().iter().any(|call| call == name)
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AuthProvider for FakeProvider {
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        self.record(format!("sign_up:{}", request.email));
        let mut session = primary_session("new-user");
        session.user.user_metadata = request.metadata.clone();
        Ok(SignUpOutcome {
            user: Some(session.user.clone()),
            session: self.sign_up_session.then_some(session),
        })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<Session, AuthError> {
        self.record(format!("sign_in:{}", email));
        if let Some(message) = &self.sign_in_error {
            return Err(AuthError::Api {
                status: 400,
                message: message.clone(),
            });
        }
        let session = primary_session("p1");
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.record("sign_out".to_string());
        *self.session.lock() = None;
        if self.fail_sign_out {
            return Err(AuthError::Api {
                status: 500,
                message: "logout failed".to_string(),
            });
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        if self.fail_get_session {
            return Err(AuthError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.session.lock().clone())
    }

    async fn refresh_session(&self) -> Result<Session, AuthError> {
        self.record("refresh".to_string());
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(AuthError::NoSession)?;
        session.access_token = format!("refreshed-{}", session.user.id);
        Ok(session.clone())
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        self.record(format!(
            "reset:{}:{}",
            email,
            redirect_to.unwrap_or_default()
        ));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn last(&self) -> Option<Notice> {
        self.notices.lock().last().cloned()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.notices
            .lock()
            .iter()
            .filter(|notice| notice.level == level)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().push(notice.clone());
    }
}

/// Memory storage whose operations can be made to fail per key
#[derive(Default)]
pub struct FailingStorage {
    pub inner: MemoryStorage,
    pub fail_get: Mutex<HashSet<String>>,
    pub fail_set: Mutex<HashSet<String>>,
    pub fail_remove: Mutex<HashSet<String>>,
}

impl FailingStorage {
    fn check(&self, failing: &Mutex<HashSet<String>>, key: &str) -> Result<(), StorageError> {
        if failing.lock().contains(key) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("storage refused {}", key),
            )));
        }
        Ok(())
    }
}

impl DurableStorage for FailingStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check(&self.fail_get, key)?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check(&self.fail_set, key)?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check(&self.fail_remove, key)?;
        self.inner.remove(key)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.subscribe()
    }
}

pub struct Fixture {
    pub bridge: Arc<SessionBridge>,
    pub provider: Arc<FakeProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    pub fn new(storage: Arc<dyn DurableStorage>, provider: FakeProvider) -> Self {
        Self::with_settings(storage, provider, BridgeSettings::new("testproject"))
    }

    pub fn with_settings(
        storage: Arc<dyn DurableStorage>,
        provider: FakeProvider,
        settings: BridgeSettings,
    ) -> Self {
        let provider = Arc::new(provider);
        let notifier = Arc::new(RecordingNotifier::default());
        let bridge = Arc::new(SessionBridge::new(
            storage,
            provider.clone(),
            notifier.clone(),
            settings,
        ));
        Self {
            bridge,
            provider,
            notifier,
        }
    }
}
