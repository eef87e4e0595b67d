use super::{lock, SessionManager, REFRESH_PATH};
use crate::error::{SessionError, SessionResult};
use crate::transport::ApiRequest;
use crate::types::{SessionPhase, TokenPair};
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

type Waiter = oneshot::Sender<SessionResult<String>>;

/// At most one refresh in flight; everyone else waits in arrival order.
#[derive(Debug, Default)]
pub(crate) struct RefreshGate {
    in_flight: bool,
    queue: Vec<Waiter>,
}

enum Ticket<'a> {
    Leader(LeaderGuard<'a>),
    Follower(oneshot::Receiver<SessionResult<String>>),
}

/// Held by the task running the refresh. If that task is dropped before it
/// settles the gate, the gate is released and every waiter is rejected.
struct LeaderGuard<'a> {
    gate: &'a Mutex<RefreshGate>,
    settled: bool,
}

impl LeaderGuard<'_> {
    fn settle(mut self, outcome: &SessionResult<String>) {
        self.settled = true;
        let queue = {
            let mut gate = lock(self.gate);
            gate.in_flight = false;
            std::mem::take(&mut gate.queue)
        };
        if !queue.is_empty() {
            debug!(waiters = queue.len(), ok = outcome.is_ok(), "releasing queued requests");
        }
        for waiter in queue {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let queue = {
            let mut gate = lock(self.gate);
            gate.in_flight = false;
            std::mem::take(&mut gate.queue)
        };
        warn!(waiters = queue.len(), "token refresh abandoned before it settled");
        for waiter in queue {
            let _ = waiter.send(Err(SessionError::RefreshExhausted(
                "refresh was cancelled".to_string(),
            )));
        }
    }
}

impl SessionManager {
    /// Recovers a request that came back 401: waits for (or runs) the single
    /// refresh, then replays the request once with the new access token.
    pub async fn handle_unauthorized(&self, mut request: ApiRequest) -> SessionResult<Value> {
        if request.retried {
            return Err(SessionError::AuthorizationRejected(
                "credentials rejected after retry".to_string(),
            ));
        }
        request.retried = true;

        // The pair may already have been rotated after this request was sent.
        let current = self.store.access_token().ok().flatten();
        let access_token = match current {
            Some(token) if request.bearer.as_deref() != Some(token.as_str()) => token,
            _ => self.refresh_tokens().await?,
        };
        request.bearer = Some(access_token);
        self.replay(request).await
    }

    /// Exchanges the stored refresh token for a new pair, sharing one call
    /// among all concurrent callers. Returns the new access token.
    ///
    /// On failure the session is cleared before any caller sees the error.
    pub async fn refresh_tokens(&self) -> SessionResult<String> {
        let leader = match self.join_gate() {
            Ticket::Follower(rx) => {
                debug!("refresh already in flight, queueing");
                return rx.await.unwrap_or_else(|_| {
                    Err(SessionError::RefreshExhausted(
                        "refresh was cancelled".to_string(),
                    ))
                });
            }
            Ticket::Leader(guard) => guard,
        };

        let was_authenticated = {
            let mut auth = lock(&self.auth);
            let was = auth.phase == SessionPhase::Authenticated;
            if was {
                self.set_phase(&mut auth, SessionPhase::RefreshingToken);
            }
            was
        };

        let outcome = self
            .exchange_refresh_token()
            .await
            .map(|pair| pair.access_token);

        match &outcome {
            Ok(_) => {
                info!("access token refreshed");
                let mut auth = lock(&self.auth);
                if was_authenticated && auth.phase == SessionPhase::RefreshingToken {
                    self.set_phase(&mut auth, SessionPhase::Authenticated);
                }
            }
            Err(e) => {
                error!(error = %e, "token refresh failed, forcing logout");
                self.end_session("refresh failed");
            }
        }

        leader.settle(&outcome);
        outcome
    }

    fn join_gate(&self) -> Ticket<'_> {
        let mut gate = lock(&self.gate);
        if gate.in_flight {
            let (tx, rx) = oneshot::channel();
            gate.queue.push(tx);
            return Ticket::Follower(rx);
        }
        gate.in_flight = true;
        drop(gate);
        Ticket::Leader(LeaderGuard {
            gate: &self.gate,
            settled: false,
        })
    }

    async fn exchange_refresh_token(&self) -> SessionResult<TokenPair> {
        let refresh_token = self
            .store
            .refresh_token()
            .map_err(|e| SessionError::RefreshExhausted(e.to_string()))?
            .ok_or_else(|| SessionError::RefreshExhausted("no refresh token stored".to_string()))?;

        let request = ApiRequest::post(REFRESH_PATH, json!({ "refreshToken": refresh_token }))
            .without_refresh();
        let response = self
            .transport
            .execute(&request)
            .await
            .map_err(|e| SessionError::RefreshExhausted(e.to_string()))?;

        if !(200..300).contains(&response.status) {
            return Err(SessionError::RefreshExhausted(format!(
                "refresh endpoint answered {}",
                response.status
            )));
        }
        let pair = TokenPair::from_json(&response.body).ok_or_else(|| {
            SessionError::RefreshExhausted("refresh response is missing the token pair".to_string())
        })?;

        self.store
            .set(crate::state::KEY_ACCESS_TOKEN, &pair.access_token)
            .and_then(|_| {
                self.store
                    .set(crate::state::KEY_REFRESH_TOKEN, &pair.refresh_token)
            })
            .map_err(|e| SessionError::RefreshExhausted(e.to_string()))?;
        Ok(pair)
    }

    /// Second and last attempt for a request; a 401 here is final.
    async fn replay(&self, request: ApiRequest) -> SessionResult<Value> {
        self.transport.execute(&request).await?.into_result()
    }
}
