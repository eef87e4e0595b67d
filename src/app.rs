use crate::error::SessionError;
use crate::logging::init_logging;
use crate::refresh::spawn_refresh_loop;
use crate::session::SessionManager;
use crate::settings::Settings;
use crate::state::{FileStore, KeyringStore, MemoryStore, SessionStore};
use crate::transport::HttpTransport;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Keyring,
    File,
    Memory,
}

#[derive(Debug, Parser)]
#[command(name = "campus-session", version, about = "CampusConnect session client")]
struct Cli {
    /// Where the session tokens are kept.
    #[arg(long, value_enum, default_value_t = StoreKind::Keyring, global = true)]
    store: StoreKind,

    /// Session file for `--store file`.
    #[arg(long, global = true)]
    store_path: Option<PathBuf>,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in; the password is read from stdin when not given.
    Login {
        username: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and sign in.
    Register {
        username: String,
        email: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Restore the stored session and print it.
    Whoami {
        /// Keep the session alive by renewing tokens until interrupted.
        #[arg(long)]
        watch: bool,
    },
    /// Ask the backend whether the stored token is still valid.
    Validate,
    /// Renew the token pair now.
    Refresh,
    Logout {
        /// Revoke every session of this account.
        #[arg(long)]
        all: bool,
    },
    ForgotPassword {
        email: String,
    },
    ResetPassword {
        token: String,
        #[arg(long)]
        new_password: Option<String>,
    },
}

fn open_store(kind: StoreKind, path: Option<PathBuf>) -> Result<Arc<dyn SessionStore>, String> {
    match kind {
        StoreKind::Keyring => {
            let store = KeyringStore::default();
            if !store.is_available() {
                return Err(
                    "OS keychain/secret service is unavailable; try --store file".to_string(),
                );
            }
            Ok(Arc::new(store))
        }
        StoreKind::File => {
            let path = path
                .or_else(FileStore::default_path)
                .ok_or_else(|| "no data directory; pass --store-path".to_string())?;
            Ok(Arc::new(FileStore::new(path)))
        }
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

fn read_secret(given: Option<String>, prompt: &str) -> Result<String, String> {
    if let Some(value) = given {
        return Ok(value);
    }
    eprintln!("{prompt}: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| e.to_string())?;
    let value = line.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        return Err(format!("{prompt} is required"));
    }
    Ok(value)
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => error!(error = %e, "could not render output"),
    }
}

async fn execute(command: Command, manager: Arc<SessionManager>) -> Result<(), String> {
    let describe = |e: SessionError| e.to_string();
    match command {
        Command::Login { username, password } => {
            let password = read_secret(password, "password")?;
            let user = manager.login(&username, &password).await.map_err(describe)?;
            print_json(&user);
        }
        Command::Register {
            username,
            email,
            password,
            first_name,
            last_name,
        } => {
            let password = read_secret(password, "password")?;
            let payload = json!({
                "username": username,
                "email": email,
                "password": password,
                "firstName": first_name,
                "lastName": last_name,
            });
            let user = manager.register(payload).await.map_err(describe)?;
            print_json(&user);
        }
        Command::Whoami { watch } => {
            let snapshot = manager.bootstrap().await;
            print_json(&snapshot);
            if watch && snapshot.is_authenticated() {
                let (_bus, handle) = spawn_refresh_loop(manager.clone());
                tokio::select! {
                  _ = tokio::signal::ctrl_c() => {}
                  _ = handle => {}
                }
            }
        }
        Command::Validate => {
            let valid = manager.validate_token().await.map_err(describe)?;
            print_json(&json!({ "valid": valid }));
        }
        Command::Refresh => {
            manager.refresh_tokens().await.map_err(describe)?;
            print_json(&json!({ "refreshed": true }));
        }
        Command::Logout { all } => {
            if all {
                manager.logout_all().await;
            } else {
                manager.logout().await;
            }
            print_json(&manager.snapshot());
        }
        Command::ForgotPassword { email } => {
            let body = manager
                .request_password_reset(&email)
                .await
                .map_err(describe)?;
            print_json(&body);
        }
        Command::ResetPassword {
            token,
            new_password,
        } => {
            let new_password = read_secret(new_password, "new password")?;
            let body = manager
                .reset_password(&token, &new_password)
                .await
                .map_err(describe)?;
            print_json(&body);
        }
    }
    Ok(())
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let settings = Settings::from_env();
    let store = match open_store(cli.store, cli.store_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let transport = match HttpTransport::new(settings.clone()) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let manager = Arc::new(SessionManager::new(settings, store, transport));
    match execute(cli.command, manager).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
