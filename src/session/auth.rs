use super::{
    SessionManager, FORGOT_PASSWORD_PATH, LOGIN_PATH, LOGOUT_ALL_PATH, LOGOUT_PATH,
    REGISTER_PATH, RESET_PASSWORD_PATH,
};
use crate::error::{SessionError, SessionResult, TransportError};
use crate::state::{KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN};
use crate::transport::ApiRequest;
use crate::types::{AuthResponse, User};
use serde_json::{json, Value};
use tracing::{info, warn};

impl SessionManager {
    /// Exchanges credentials for a session. Every failure, connectivity
    /// included, clears the session and reaches the caller.
    pub async fn login(&self, username: &str, password: &str) -> SessionResult<User> {
        let request = ApiRequest::post(
            LOGIN_PATH,
            json!({ "username": username, "password": password }),
        )
        .without_refresh();

        let result = match self.send(request).await {
            Ok(body) => self.set_auth_from_response(&body),
            Err(e) => Err(e),
        };
        let login_user = match result {
            Ok(user) => user,
            Err(e) => {
                self.end_session("login failed");
                return Err(e);
            }
        };

        // Login responses carry no profile details; fill them in if we can.
        match self.me().await {
            Ok(profile) => {
                let mut user = User::from_profile(&profile);
                if user.id.is_empty() {
                    user.id = login_user.id.clone();
                }
                if user.username.is_empty() {
                    user.username = login_user.username.clone();
                }
                self.cache_identity(&user);
                self.set_authenticated(user.clone());
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "signed in but could not fetch profile");
                Ok(login_user)
            }
        }
    }

    /// Creates an account and signs it in from the registration response.
    pub async fn register(&self, payload: Value) -> SessionResult<User> {
        let request = ApiRequest::post(REGISTER_PATH, payload).without_refresh();
        let result = match self.send(request).await {
            Ok(body) => self.set_auth_from_response(&body),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.end_session("registration failed");
        }
        result
    }

    /// Stores whatever a login/registration response carries and signs the
    /// user in. The next bootstrap within the grace window is skipped.
    pub fn set_auth_from_response(&self, body: &Value) -> SessionResult<User> {
        let response = AuthResponse::from_json(body);
        let Some(access_token) = response.access_token.as_deref() else {
            self.finish_loading();
            return Err(SessionError::Connectivity(TransportError::Decode(
                "auth response has no access token".to_string(),
            )));
        };

        self.store.set(KEY_ACCESS_TOKEN, access_token)?;
        if let Some(refresh_token) = response.refresh_token.as_deref() {
            self.store.set(KEY_REFRESH_TOKEN, refresh_token)?;
        }
        let user = response.user();
        self.cache_identity(&user);
        self.bypass_on_fresh_auth();

        info!(username = %user.username, "signed in");
        self.set_authenticated(user.clone());
        Ok(user)
    }

    /// Ends the session on the backend (best effort) and locally.
    pub async fn logout(&self) {
        match self.store.refresh_token() {
            Ok(Some(refresh_token)) => {
                let request =
                    ApiRequest::post(LOGOUT_PATH, json!({ "refreshToken": refresh_token }))
                        .without_refresh();
                if let Err(e) = self.send(request).await {
                    warn!(error = %e, "logout call failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read refresh token for logout"),
        }
        self.end_session("logout");
    }

    /// Revokes every session of this user, then ends the local one.
    pub async fn logout_all(&self) {
        if let Err(e) = self.send(ApiRequest::post(LOGOUT_ALL_PATH, json!({}))).await {
            warn!(error = %e, "logout-all call failed");
        }
        self.end_session("logout from all devices");
    }

    pub async fn request_password_reset(&self, email: &str) -> SessionResult<Value> {
        let request =
            ApiRequest::post(FORGOT_PASSWORD_PATH, json!({ "email": email })).without_refresh();
        self.send(request).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> SessionResult<Value> {
        let request = ApiRequest::post(
            RESET_PASSWORD_PATH,
            json!({ "token": token, "newPassword": new_password }),
        )
        .without_refresh();
        self.send(request).await
    }
}
