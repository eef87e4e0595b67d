//! Scripted in-process backend for exercising the session manager.

use super::{
    SessionManager, FORGOT_PASSWORD_PATH, LOGIN_PATH, LOGOUT_ALL_PATH, LOGOUT_PATH, ME_PATH,
    REFRESH_PATH, REGISTER_PATH, RESET_PASSWORD_PATH, VALIDATE_PATH,
};
use crate::error::TransportError;
use crate::settings::Settings;
use crate::state::{
    MemoryStore, SessionStore, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_ROLES, KEY_USERNAME,
};
use crate::transport::{ApiRequest, ApiResponse, Transport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const LISTINGS_PATH: &str = "/listings";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshMode {
    Succeed,
    Reject,
    Malformed,
    Offline,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Normal,
    Timeout,
    Unauthorized,
    /// Times out the way the HTTP client does: after the full request timeout.
    SlowTimeout,
}

#[derive(Debug)]
struct Script {
    valid: HashSet<String>,
    refresh: RefreshMode,
    validate: Mode,
    me: Mode,
    reject_listings: bool,
    log: Vec<ApiRequest>,
}

pub(crate) struct FakeBackend {
    script: Mutex<Script>,
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                valid: HashSet::new(),
                refresh: RefreshMode::Succeed,
                validate: Mode::Normal,
                me: Mode::Normal,
                reject_listings: false,
                log: Vec::new(),
            }),
            refresh_delay: Duration::from_millis(10),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub(crate) fn accept_token(&self, token: &str) {
        self.script().valid.insert(token.to_string());
    }

    pub(crate) fn set_refresh(&self, mode: RefreshMode) {
        self.script().refresh = mode;
    }

    pub(crate) fn set_validate(&self, mode: Mode) {
        self.script().validate = mode;
    }

    pub(crate) fn set_me(&self, mode: Mode) {
        self.script().me = mode;
    }

    pub(crate) fn reject_listings(&self) {
        self.script().reject_listings = true;
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_to(&self, path: &str) -> Vec<ApiRequest> {
        self.script()
            .log
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn is_valid(&self, request: &ApiRequest) -> bool {
        request
            .bearer
            .as_ref()
            .is_some_and(|t| self.script().valid.contains(t))
    }

    async fn refresh(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.refresh_delay).await;

        let mode = self.script().refresh;
        let presented = request
            .body
            .as_ref()
            .and_then(|b| b.get("refreshToken"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match mode {
            RefreshMode::Offline => Err(TransportError::Network("connection refused".into())),
            RefreshMode::Hang => std::future::pending().await,
            RefreshMode::Reject => Ok(respond(401, json!({ "message": "refresh token expired" }))),
            RefreshMode::Malformed => Ok(respond(200, json!({ "accessToken": "half" }))),
            RefreshMode::Succeed if presented.is_empty() => Ok(respond(400, Value::Null)),
            RefreshMode::Succeed => {
                let access = format!("access-r{n}");
                self.accept_token(&access);
                Ok(respond(
                    200,
                    json!({ "accessToken": access, "refreshToken": format!("refresh-r{n}") }),
                ))
            }
        }
    }

    async fn gated(&self, mode: Mode, request: &ApiRequest, ok: Value) -> Result<ApiResponse, TransportError> {
        match mode {
            Mode::Timeout => Err(TransportError::Timeout),
            Mode::Unauthorized => Ok(respond(401, json!({ "message": "expired" }))),
            Mode::SlowTimeout => {
                tokio::time::sleep(Settings::default().request_timeout).await;
                Err(TransportError::Timeout)
            }
            Mode::Normal if self.is_valid(request) => Ok(respond(200, ok)),
            Mode::Normal => Ok(respond(401, json!({ "message": "expired" }))),
        }
    }
}

fn respond(status: u16, body: Value) -> ApiResponse {
    ApiResponse { status, body }
}

pub(crate) fn profile() -> Value {
    json!({
        "userId": "u-42",
        "username": "sammy",
        "email": "sammy@sjsu.edu",
        "roles": ["BUYER", "SELLER"],
        "firstName": "Sam",
        "lastName": "Spartan"
    })
}

#[async_trait]
impl Transport for FakeBackend {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.script().log.push(request.clone());

        match request.path.as_str() {
            LOGIN_PATH | REGISTER_PATH => {
                let password = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("password"))
                    .and_then(Value::as_str);
                if password != Some("correct horse") {
                    return Ok(respond(401, json!({ "message": "Invalid credentials" })));
                }
                self.accept_token("access-login");
                Ok(respond(
                    200,
                    json!({
                        "accessToken": "access-login",
                        "refreshToken": "refresh-login",
                        "tokenType": "Bearer",
                        "expiresIn": 900,
                        "role": "STUDENT",
                        "username": "sammy",
                        "userId": "u-42"
                    }),
                ))
            }
            REFRESH_PATH => self.refresh(request).await,
            VALIDATE_PATH => {
                let mode = self.script().validate;
                match mode {
                    Mode::Normal => {
                        let valid = self.is_valid(request);
                        Ok(respond(200, json!({ "valid": valid })))
                    }
                    other => self.gated(other, request, Value::Null).await,
                }
            }
            ME_PATH => {
                let mode = self.script().me;
                self.gated(mode, request, profile()).await
            }
            LOGOUT_PATH | LOGOUT_ALL_PATH => Ok(respond(200, Value::Null)),
            FORGOT_PASSWORD_PATH => Ok(respond(200, json!({ "message": "reset link sent" }))),
            RESET_PASSWORD_PATH => {
                let token = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("token"))
                    .and_then(Value::as_str);
                if token != Some("reset-ok") {
                    return Ok(respond(401, json!({ "message": "reset token expired" })));
                }
                Ok(respond(200, json!({ "message": "password updated" })))
            }
            LISTINGS_PATH => {
                let reject = self.script().reject_listings;
                if reject || !self.is_valid(request) {
                    return Ok(respond(401, json!({ "message": "expired" })));
                }
                Ok(respond(200, json!({ "servedWith": request.bearer })))
            }
            _ => Ok(respond(404, Value::Null)),
        }
    }
}

pub(crate) struct Harness {
    pub(crate) backend: Arc<FakeBackend>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) manager: Arc<SessionManager>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_store(Arc::new(FakeBackend::new()), Arc::new(MemoryStore::new()))
    }

    /// A second manager over the same backend and storage, as after a remount.
    pub(crate) fn remount(&self) -> Self {
        Self::with_store(self.backend.clone(), self.store.clone())
    }

    fn with_store(backend: Arc<FakeBackend>, store: Arc<MemoryStore>) -> Self {
        let manager = SessionManager::new(Settings::default(), store.clone(), backend.clone());
        Self {
            backend,
            store,
            manager: Arc::new(manager),
        }
    }

    pub(crate) fn seed(&self, access: &str, refresh: Option<&str>) {
        self.store.set(KEY_ACCESS_TOKEN, access).unwrap();
        if let Some(refresh) = refresh {
            self.store.set(KEY_REFRESH_TOKEN, refresh).unwrap();
        }
    }

    pub(crate) fn seed_identity(&self, username: &str, roles: &str) {
        self.store.set(KEY_USERNAME, username).unwrap();
        self.store.set(KEY_ROLES, roles).unwrap();
    }

    pub(crate) fn stored(&self, key: &str) -> Option<String> {
        self.store.get(key).unwrap()
    }
}
