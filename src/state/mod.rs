mod file_store;
mod refresh_bus;
mod secret_manager;
mod session_store;

pub use file_store::FileStore;
pub use refresh_bus::{RefreshBus, RefreshRequest};
pub use secret_manager::{KeyringStore, KEYRING_SERVICE};
pub use session_store::{
    MemoryStore, SessionStore, KEY_ACCESS_TOKEN, KEY_JUST_AUTHENTICATED, KEY_LEGACY_ROLE,
    KEY_REFRESH_TOKEN, KEY_ROLES, KEY_USERNAME, SESSION_KEYS,
};
