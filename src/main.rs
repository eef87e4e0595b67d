use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    campus_session::run().await
}
