//! The session manager: owns the token pair, attaches it to backend calls,
//! silently refreshes it on a 401 and restores the session at startup.
//!
//! One [`SessionManager`] is built per client and shared behind an `Arc`;
//! nothing here is global, so tests construct as many as they need.

mod auth;
mod bootstrap;
mod interceptor;

use crate::error::SessionResult;
use crate::settings::Settings;
use crate::state::SessionStore;
use crate::transport::{ApiRequest, Transport};
use crate::types::{AuthSnapshot, SessionPhase, User};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub(crate) use interceptor::RefreshGate;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const LOGOUT_ALL_PATH: &str = "/auth/logout-all";
pub const VALIDATE_PATH: &str = "/auth/validate";
pub const ME_PATH: &str = "/auth/me";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";

#[derive(Debug)]
struct AuthState {
    phase: SessionPhase,
    user: Option<User>,
    loading: bool,
    fresh_auth_at: Option<Instant>,
}

pub struct SessionManager {
    settings: Settings,
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn Transport>,
    gate: Mutex<RefreshGate>,
    auth: Mutex<AuthState>,
    phase_tx: watch::Sender<SessionPhase>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionManager {
    pub fn new(
        settings: Settings,
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::LoggedOut);
        Self {
            settings,
            store,
            transport,
            gate: Mutex::new(RefreshGate::default()),
            auth: Mutex::new(AuthState {
                phase: SessionPhase::LoggedOut,
                user: None,
                loading: true,
                fresh_auth_at: None,
            }),
            phase_tx,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        let auth = lock(&self.auth);
        AuthSnapshot {
            phase: auth.phase,
            user: auth.user.clone(),
            is_loading: auth.loading,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.auth).phase
    }

    pub fn user(&self) -> Option<User> {
        lock(&self.auth).user.clone()
    }

    /// Phase changes as they happen; the auto refresh loop listens here.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    /// Sets the stored access token, if any, as the request's bearer
    /// credential. A missing or unreadable token sends the request
    /// unauthenticated.
    pub fn attach(&self, request: &mut ApiRequest) {
        match self.store.access_token() {
            Ok(token) => request.bearer = token,
            Err(e) => {
                warn!(error = %e, "could not read access token, sending unauthenticated");
                request.bearer = None;
            }
        }
    }

    /// Sends a backend call with the current credential, recovering once from
    /// an expired access token.
    pub async fn send(&self, mut request: ApiRequest) -> SessionResult<Value> {
        self.attach(&mut request);
        let response = self.transport.execute(&request).await?;
        if response.is_unauthorized() && request.refreshable && !request.retried {
            return self.handle_unauthorized(request).await;
        }
        response.into_result()
    }

    fn set_phase(&self, auth: &mut AuthState, phase: SessionPhase) {
        auth.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn set_authenticated(&self, user: User) {
        let mut auth = lock(&self.auth);
        auth.user = Some(user);
        auth.loading = false;
        self.set_phase(&mut auth, SessionPhase::Authenticated);
    }

    /// In-memory logout only; storage is left alone.
    fn set_logged_out(&self) {
        let mut auth = lock(&self.auth);
        auth.user = None;
        self.set_phase(&mut auth, SessionPhase::LoggedOut);
    }

    fn finish_loading(&self) {
        lock(&self.auth).loading = false;
    }

    /// Clears every session key and drops to `LoggedOut`.
    fn end_session(&self, reason: &str) {
        info!(reason, "ending session");
        if let Err(e) = self.store.clear_session() {
            error!(error = %e, "failed to clear session storage");
        }
        self.set_logged_out();
    }
}

#[cfg(test)]
pub(crate) mod testing;
