use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::store::Store;

/// Effective expiration policy for one environment lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockThreshold {
    /// No threshold configured at either level.
    Unset,
    /// A negative value switches expiration off.
    Disabled,
    After(Duration),
}

impl LockThreshold {
    /// Environment override wins over the repository default. Values are minutes.
    #[must_use]
    pub fn resolve(environment: Option<i64>, repository_default: Option<i64>) -> Self {
        match environment.or(repository_default) {
            None => Self::Unset,
            Some(minutes) if minutes < 0 => Self::Disabled,
            Some(minutes) => Self::After(Duration::minutes(minutes)),
        }
    }

    #[must_use]
    pub fn is_expired(&self, locked_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::After(ttl) => now - locked_at >= *ttl,
            Self::Unset | Self::Disabled => false,
        }
    }
}

/// Releases environment locks held longer than their threshold.
pub struct LockExpiry {
    store: Arc<dyn Store>,
}

impl LockExpiry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Returns the number of locks released. Environments are handled one at
    /// a time; a failure on one is logged and the rest are still checked.
    pub fn expire_locks(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut defaults: HashMap<i64, Option<i64>> = HashMap::new();
        let mut released = 0;

        for env in self.store.list_locked_environments()? {
            let (Some(locked_by), Some(locked_at)) = (env.locked_by.as_deref(), env.locked_at) else {
                warn!(environment_id = env.id, "Locked environment has no lock owner or time");
                continue;
            };

            let repository_default = match defaults.get(&env.repository_id) {
                Some(value) => *value,
                None => match self.store.get_repository_settings(env.repository_id) {
                    Ok(settings) => {
                        let value = settings.and_then(|s| s.lock_expiration_threshold);
                        defaults.insert(env.repository_id, value);
                        value
                    }
                    Err(e) => {
                        error!(
                            environment_id = env.id,
                            repository_id = env.repository_id,
                            "Failed to load repository lock settings: {e}"
                        );
                        continue;
                    }
                },
            };

            let threshold = LockThreshold::resolve(env.lock_expiration_threshold, repository_default);
            if !threshold.is_expired(locked_at, now) {
                continue;
            }

            match self
                .store
                .release_environment_lock(env.id, locked_by, locked_at, now)
            {
                Ok(true) => {
                    info!(
                        environment_id = env.id,
                        environment = %env.name,
                        locked_by,
                        held_minutes = (now - locked_at).num_minutes(),
                        "Released expired environment lock"
                    );
                    released += 1;
                }
                Ok(false) => debug!(environment_id = env.id, "Lock changed hands before expiry"),
                Err(e) => error!(environment_id = env.id, "Failed to release environment lock: {e}"),
            }
        }

        Ok(released)
    }
}
