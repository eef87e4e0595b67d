use crate::error::{SessionError, SessionResult};
use tokio::sync::{mpsc, oneshot};

/// Handle for asking the auto refresh loop to renew tokens right away.
#[derive(Clone)]
pub struct RefreshBus {
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

pub struct RefreshRequest {
    pub(crate) respond_to: oneshot::Sender<SessionResult<()>>,
}

impl RefreshBus {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RefreshRequest>) -> Self {
        Self { tx }
    }

    pub async fn refresh_now(&self) -> SessionResult<()> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RefreshRequest { respond_to: tx }).is_err() {
            return Err(SessionError::RefreshLoopStopped);
        }
        rx.await.unwrap_or(Err(SessionError::RefreshLoopStopped))
    }
}
