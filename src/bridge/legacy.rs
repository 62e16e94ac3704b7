use tracing::warn;

use crate::auth::LegacyUser;
use crate::storage::keys;
use crate::storage::DurableStorage;

/// What the `user` key held on the last read
#[derive(Debug, Clone, Default)]
pub(crate) struct LegacyRecord {
    /// Raw stored value, kept only when it parsed
    pub raw: Option<String>,
    pub user: Option<LegacyUser>,
}

/// Raw value of the `user` key; read failures count as absent
pub(crate) fn read_raw(storage: &dyn DurableStorage) -> Option<String> {
    match storage.get(keys::LEGACY_USER) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Failed to read legacy user");
            None
        }
    }
}

/// Read and validate the legacy user. A malformed record is deleted.
pub(crate) fn load(storage: &dyn DurableStorage) -> LegacyRecord {
    let Some(raw) = read_raw(storage) else {
        return LegacyRecord::default();
    };

    match LegacyUser::parse(&raw) {
        Ok(user) => LegacyRecord {
            raw: Some(raw),
            user: Some(user),
        },
        Err(e) => {
            warn!(error = %e, "Removing corrupted legacy user record");
            if let Err(e) = storage.remove(keys::LEGACY_USER) {
                warn!(error = %e, "Failed to remove corrupted legacy user record");
            }
            LegacyRecord::default()
        }
    }
}
