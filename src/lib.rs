mod app;
pub mod error;
pub mod logging;
mod redact;
pub mod refresh;
pub mod session;
pub mod settings;
pub mod state;
pub mod transport;
pub mod types;

pub use error::{SessionError, SessionResult, StoreError, TransportError};
pub use redact::redact_secrets;
pub use session::SessionManager;
pub use settings::Settings;
pub use types::{AuthSnapshot, Role, SessionPhase, User};

pub async fn run() -> std::process::ExitCode {
    app::run().await
}
