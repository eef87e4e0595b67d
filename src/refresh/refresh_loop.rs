use super::policy::compute_next_delay;
use crate::error::SessionResult;
use crate::session::SessionManager;
use crate::state::{RefreshBus, RefreshRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

async fn refresh_once(manager: &SessionManager) -> SessionResult<()> {
    match manager.refresh_tokens().await {
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(error = %e, "proactive token renewal failed");
            Err(e)
        }
    }
}

/// Timer-driven renewal. Sessions that never received a refresh token are
/// left to run out on their own.
async fn scheduled_refresh(manager: &SessionManager) {
    match manager.store().refresh_token() {
        Ok(Some(_)) => {
            let _ = refresh_once(manager).await;
        }
        Ok(None) => debug!("no refresh token stored, skipping scheduled renewal"),
        Err(e) => warn!(error = %e, "could not read refresh token, skipping scheduled renewal"),
    }
}

/// Keeps the access token fresh while signed in. The loop sleeps through
/// logged-out periods, wakes on phase changes, and stops once every
/// [`RefreshBus`] handle is dropped.
pub fn spawn_refresh_loop(manager: Arc<SessionManager>) -> (RefreshBus, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RefreshRequest>();
    let bus = RefreshBus::new(tx);
    let mut phase_rx = manager.subscribe();

    let handle = tokio::spawn(async move {
        loop {
            let phase = *phase_rx.borrow_and_update();
            let next_delay = compute_next_delay(manager.settings().auto_refresh_interval, phase);
            if let Some(delay) = next_delay {
                debug!(delay_ms = delay.as_millis() as u64, "next token renewal scheduled");
            }

            let timer = async {
                match next_delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
              req = rx.recv() => {
                let Some(req) = req else { break };
                let result = refresh_once(&manager).await;
                let _ = req.respond_to.send(result);
              }
              changed = phase_rx.changed() => {
                if changed.is_err() { break; }
              }
              _ = timer => {
                scheduled_refresh(&manager).await;
              }
            }
        }
        debug!("refresh loop stopped");
    });

    (bus, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::session::testing::{Harness, RefreshMode};
    use crate::state::KEY_ACCESS_TOKEN;
    use crate::types::SessionPhase;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn refresh_now_renews_tokens() {
        let h = Harness::new();
        h.manager.login("sammy", "correct horse").await.unwrap();
        let (bus, _handle) = spawn_refresh_loop(h.manager.clone());

        bus.refresh_now().await.unwrap();

        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.stored(KEY_ACCESS_TOKEN).as_deref(), Some("access-r1"));
        assert_eq!(h.manager.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_renews_once_per_interval() {
        let h = Harness::new();
        h.manager.login("sammy", "correct horse").await.unwrap();
        let (_bus, _handle) = spawn_refresh_loop(h.manager.clone());

        tokio::time::sleep(Duration::from_secs(16 * 60)).await;

        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.stored(KEY_ACCESS_TOKEN).as_deref(), Some("access-r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn stays_idle_while_logged_out() {
        let h = Harness::new();
        let (_bus, _handle) = spawn_refresh_loop(h.manager.clone());

        tokio::time::sleep(Duration::from_secs(60 * 60)).await;

        assert_eq!(h.backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn failed_renewal_forces_logout() {
        let h = Harness::new();
        h.manager.login("sammy", "correct horse").await.unwrap();
        h.backend.set_refresh(RefreshMode::Reject);
        let (bus, _handle) = spawn_refresh_loop(h.manager.clone());

        let err = bus.refresh_now().await.unwrap_err();

        assert!(matches!(err, SessionError::RefreshExhausted(_)));
        assert_eq!(h.manager.phase(), SessionPhase::LoggedOut);
        assert_eq!(h.stored(KEY_ACCESS_TOKEN), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_leaves_session_without_refresh_token_alone() {
        let h = Harness::new();
        h.manager
            .set_auth_from_response(&json!({ "accessToken": "access-solo", "username": "sammy" }))
            .unwrap();
        let (_bus, _handle) = spawn_refresh_loop(h.manager.clone());

        tokio::time::sleep(Duration::from_secs(45 * 60)).await;

        assert_eq!(h.manager.phase(), SessionPhase::Authenticated);
        assert_eq!(h.stored(KEY_ACCESS_TOKEN).as_deref(), Some("access-solo"));
    }

    #[tokio::test]
    async fn stopped_loop_is_not_an_auth_failure() {
        let h = Harness::new();
        h.manager.login("sammy", "correct horse").await.unwrap();
        let (bus, handle) = spawn_refresh_loop(h.manager.clone());
        handle.abort();
        let _ = handle.await;

        let err = bus.refresh_now().await.unwrap_err();

        assert_eq!(err, SessionError::RefreshLoopStopped);
        assert!(!err.is_auth_failure());
        assert_eq!(h.manager.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn loop_stops_when_bus_is_dropped() {
        let h = Harness::new();
        let (bus, handle) = spawn_refresh_loop(h.manager.clone());

        drop(bus);

        handle.await.unwrap();
    }
}
