use crate::error::StoreError;
use crate::types::Role;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

pub const KEY_ACCESS_TOKEN: &str = "accessToken";
pub const KEY_REFRESH_TOKEN: &str = "refreshToken";
pub const KEY_USERNAME: &str = "username";
pub const KEY_ROLES: &str = "roles";
pub const KEY_LEGACY_ROLE: &str = "role";
pub const KEY_JUST_AUTHENTICATED: &str = "_justAuthenticated";

/// Keys removed when the session ends. The fresh-auth marker is not one of
/// them; bootstrap consumes it.
pub const SESSION_KEYS: [&str; 5] = [
    KEY_ACCESS_TOKEN,
    KEY_REFRESH_TOKEN,
    KEY_USERNAME,
    KEY_ROLES,
    KEY_LEGACY_ROLE,
];

/// Durable string key-value storage the session lives in.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every session key, continuing past individual failures and
    /// reporting the first one.
    fn clear_session(&self) -> Result<(), StoreError> {
        let mut first_err = None;
        for key in SESSION_KEYS {
            if let Err(e) = self.remove(key) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn access_token(&self) -> Result<Option<String>, StoreError> {
        self.get(KEY_ACCESS_TOKEN)
    }

    fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.get(KEY_REFRESH_TOKEN)
    }

    fn cached_roles(&self) -> Result<Option<BTreeSet<Role>>, StoreError> {
        let Some(raw) = self.get(KEY_ROLES)? else {
            return Ok(None);
        };
        let names: Vec<String> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{KEY_ROLES}: {e}")))?;
        Ok(Some(names.iter().filter_map(|n| Role::parse(n)).collect()))
    }

    fn set_cached_roles(&self, roles: &BTreeSet<Role>) -> Result<(), StoreError> {
        let names: Vec<&str> = roles.iter().map(Role::as_str).collect();
        let raw = serde_json::to_string(&names)
            .map_err(|e| StoreError::Corrupt(format!("{KEY_ROLES}: {e}")))?;
        self.set(KEY_ROLES, &raw)
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_session_keeps_fresh_auth_marker() {
        let store = MemoryStore::new();
        for key in SESSION_KEYS {
            store.set(key, "v").unwrap();
        }
        store.set(KEY_JUST_AUTHENTICATED, "123").unwrap();

        store.clear_session().unwrap();

        for key in SESSION_KEYS {
            assert_eq!(store.get(key).unwrap(), None);
        }
        assert_eq!(store.get(KEY_JUST_AUTHENTICATED).unwrap().as_deref(), Some("123"));
    }

    #[test]
    fn cached_roles_are_stored_as_json_list() {
        let store = MemoryStore::new();
        store
            .set_cached_roles(&BTreeSet::from([Role::Seller, Role::Admin]))
            .unwrap();
        assert_eq!(
            store.get(KEY_ROLES).unwrap().as_deref(),
            Some(r#"["SELLER","ADMIN"]"#)
        );
        assert_eq!(
            store.cached_roles().unwrap(),
            Some(BTreeSet::from([Role::Admin, Role::Seller]))
        );
    }

    #[test]
    fn corrupt_roles_are_reported() {
        let store = MemoryStore::new();
        store.set(KEY_ROLES, "BUYER").unwrap();
        assert!(matches!(store.cached_roles(), Err(StoreError::Corrupt(_))));
    }
}
