use super::{lock, SessionManager, ME_PATH, VALIDATE_PATH};
use crate::error::{SessionError, SessionResult, TransportError};
use crate::state::{KEY_JUST_AUTHENTICATED, KEY_ROLES, KEY_USERNAME};
use crate::transport::ApiRequest;
use crate::types::{AuthSnapshot, SessionPhase, User};
use serde_json::Value;
use std::future::Future;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{info, warn};

// Share of the bootstrap budget available to validate/me; the rest is left
// for settling on the cached identity.
const CALL_BUDGET_RATIO: f64 = 0.9;

pub(crate) fn now_millis() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

async fn within<T>(
    deadline: Option<Instant>,
    call: impl Future<Output = SessionResult<T>>,
) -> SessionResult<T> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, call)
            .await
            .unwrap_or(Err(SessionError::Connectivity(TransportError::Timeout))),
        None => call.await,
    }
}

impl SessionManager {
    /// Restores the session from storage at startup.
    ///
    /// A stored access token makes the session count as signed in right away
    /// (`Authenticating`); validation and the profile fetch then settle it.
    /// The whole sequence is bounded by the bootstrap timeout.
    pub async fn bootstrap(&self) -> AuthSnapshot {
        if self.consume_fresh_auth() {
            info!("session was just established, skipping bootstrap");
            self.adopt_fresh_session();
            self.finish_loading();
            return self.snapshot();
        }

        let has_token = match self.store.access_token() {
            Ok(token) => token.is_some(),
            Err(e) => {
                warn!(error = %e, "could not read session storage");
                false
            }
        };
        if !has_token {
            self.finish_loading();
            return self.snapshot();
        }

        {
            let mut auth = lock(&self.auth);
            if auth.phase == SessionPhase::Authenticated && auth.user.is_some() {
                auth.loading = false;
                drop(auth);
                return self.snapshot();
            }
            auth.loading = true;
            self.set_phase(&mut auth, SessionPhase::Authenticating);
        }

        let budget = self.settings.bootstrap_timeout;
        let started = Instant::now();
        let calls_deadline = started + budget.mul_f64(CALL_BUDGET_RATIO);
        if tokio::time::timeout_at(started + budget, self.check_auth(Some(calls_deadline)))
            .await
            .is_err()
        {
            warn!(timeout_ms = budget.as_millis() as u64, "session check timed out");
            self.on_bootstrap_timeout();
        }

        self.finish_loading();
        self.snapshot()
    }

    /// Re-runs validation and profile loading for the stored session.
    pub async fn refresh_auth(&self) -> AuthSnapshot {
        self.check_auth(None).await;
        self.finish_loading();
        self.snapshot()
    }

    /// Marks the session as just established so the next bootstrap within the
    /// grace window leaves it alone.
    pub fn bypass_on_fresh_auth(&self) {
        lock(&self.auth).fresh_auth_at = Some(Instant::now());
        if let Err(e) = self
            .store
            .set(KEY_JUST_AUTHENTICATED, &now_millis().to_string())
        {
            warn!(error = %e, "could not persist fresh-auth marker");
        }
    }

    /// True (once) if a login or registration happened within the grace
    /// window. The persisted marker is consumed either way.
    fn consume_fresh_auth(&self) -> bool {
        let grace = self.settings.fresh_auth_grace;
        let in_memory = lock(&self.auth)
            .fresh_auth_at
            .take()
            .is_some_and(|at| at.elapsed() < grace);

        let marker = self.store.get(KEY_JUST_AUTHENTICATED).ok().flatten();
        let persisted = marker.is_some_and(|raw| {
            let _ = self.store.remove(KEY_JUST_AUTHENTICATED);
            raw.trim().parse::<i128>().is_ok_and(|at| {
                let age = now_millis() - at;
                (0..grace.as_millis() as i128).contains(&age)
            })
        });

        in_memory || persisted
    }

    /// A login in another instance (or before a restart) left the session in
    /// storage; this instance only has the cached identity to go on.
    fn adopt_fresh_session(&self) {
        let has_user = {
            let auth = lock(&self.auth);
            auth.phase == SessionPhase::Authenticated && auth.user.is_some()
        };
        if has_user {
            return;
        }
        match self.store.access_token() {
            Ok(Some(token)) => self.restore_cached_identity(&token),
            Ok(None) => self.set_logged_out(),
            Err(e) => {
                warn!(error = %e, "could not read access token");
                self.set_logged_out();
            }
        }
    }

    fn on_bootstrap_timeout(&self) {
        let no_user = {
            let auth = lock(&self.auth);
            auth.phase != SessionPhase::Authenticated && auth.user.is_none()
        };
        if no_user {
            self.end_session("session check timed out with no user established");
        }
    }

    /// `calls_deadline` bounds validation and the profile fetch; running past
    /// it counts as a connectivity failure, not a bootstrap timeout.
    async fn check_auth(&self, calls_deadline: Option<Instant>) {
        let mut refreshed = false;
        loop {
            let token = match self.store.access_token() {
                Ok(Some(token)) => token,
                Ok(None) => {
                    self.set_logged_out();
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "could not read access token");
                    self.set_logged_out();
                    return;
                }
            };

            match within(calls_deadline, self.validate_token()).await {
                Ok(true) => {
                    self.load_profile(&token, calls_deadline).await;
                    return;
                }
                Ok(false) if refreshed => {
                    self.end_session("token still invalid after refresh");
                    return;
                }
                Ok(false) => {
                    let has_refresh = self.store.refresh_token().ok().flatten().is_some();
                    if !has_refresh {
                        self.end_session("token invalid and no refresh token stored");
                        return;
                    }
                    if self.refresh_tokens().await.is_err() {
                        // refresh_tokens has already ended the session
                        return;
                    }
                    refreshed = true;
                }
                Err(e) if e.is_auth_failure() => {
                    self.end_session(&e.to_string());
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "could not validate session, keeping it");
                    self.restore_cached_identity(&token);
                    return;
                }
            }
        }
    }

    async fn load_profile(&self, token: &str, calls_deadline: Option<Instant>) {
        match within(calls_deadline, self.me()).await {
            Ok(profile) => {
                let user = User::from_profile(&profile);
                self.cache_identity(&user);
                info!(username = %user.username, "session restored");
                self.set_authenticated(user);
            }
            Err(e) if e.is_auth_failure() => self.end_session(&e.to_string()),
            Err(e) => {
                warn!(error = %e, "could not fetch profile, keeping session");
                self.restore_cached_identity(token);
            }
        }
    }

    /// Falls back to the username and roles cached beside the tokens. With
    /// nothing cached the tokens are kept for the next attempt but no user is
    /// signed in.
    fn restore_cached_identity(&self, token: &str) {
        let username = self.store.get(KEY_USERNAME).ok().flatten();
        let roles = self.store.cached_roles().ok().flatten();
        match (username, roles) {
            (Some(username), Some(roles)) => {
                info!(%username, "using cached identity");
                self.set_authenticated(User::from_cache(token, &username, roles));
            }
            _ => {
                warn!("no cached identity, session left unresolved");
                self.set_logged_out();
            }
        }
    }

    pub(crate) fn cache_identity(&self, user: &User) {
        let username = if user.username.is_empty() {
            Ok(())
        } else {
            self.store.set(KEY_USERNAME, &user.username)
        };
        let result = username.and_then(|_| self.store.set_cached_roles(&user.roles));
        if let Err(e) = result {
            warn!(error = %e, key = KEY_ROLES, "could not cache identity");
        }
    }

    /// Asks the backend whether the stored access token is still good.
    pub async fn validate_token(&self) -> SessionResult<bool> {
        let body = self.send(ApiRequest::get(VALIDATE_PATH)).await?;
        body.get("valid").and_then(Value::as_bool).ok_or_else(|| {
            SessionError::Connectivity(TransportError::Decode(
                "validation response has no `valid` flag".to_string(),
            ))
        })
    }

    /// Current user's profile.
    pub async fn me(&self) -> SessionResult<Value> {
        self.send(ApiRequest::get(ME_PATH)).await
    }
}
