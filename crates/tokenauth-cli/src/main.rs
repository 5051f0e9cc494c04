//! tokenauth - command line host for token-auth sign-in flows.
//!
//! Signs in, signs up, signs out and manages passwords against a
//! token-auth API, keeping the rotated session headers in local storage so
//! that later commands (`request`, `status`) run as the signed-in user.

mod config;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenauth_core::api::{Exchange, Method};
use tokenauth_core::signals;
use tokenauth_core::{AuthSignal, SessionCoordinator, SignInAttempt};

use config::{Config, StorageKind};

#[derive(Debug, Parser)]
#[command(name = "tokenauth", version, about = "Token-auth session client")]
struct Cli {
    /// API base URL (single "default" profile); overrides the endpoints file
    #[arg(long, env = "TOKENAUTH_API_URL", global = true)]
    api_url: Option<String>,

    /// Endpoint profiles file
    #[arg(long, env = "TOKENAUTH_ENDPOINTS", global = true)]
    endpoints: Option<PathBuf>,

    /// Endpoint profile to use
    #[arg(long, env = "TOKENAUTH_PROFILE", global = true)]
    profile: Option<String>,

    /// Where to keep the session headers
    #[arg(long, value_enum, env = "TOKENAUTH_STORAGE", global = true)]
    storage: Option<StorageKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in with email and password
    SignIn {
        #[arg(long, env = "TOKENAUTH_EMAIL")]
        email: Option<String>,
    },
    /// Register a new account
    SignUp {
        #[arg(long, env = "TOKENAUTH_EMAIL")]
        email: Option<String>,
    },
    /// Sign out and forget the stored session
    SignOut,
    /// Request a password reset email
    ResetPassword {
        #[arg(long, env = "TOKENAUTH_EMAIL")]
        email: Option<String>,
    },
    /// Change the signed-in user's password
    UpdatePassword,
    /// Show the stored session
    Status,
    /// Send an authenticated request to an API path
    Request {
        /// API path, e.g. /api/profile
        path: String,
        /// HTTP method
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,
        /// JSON request body
        #[arg(long, short = 'd')]
        data: Option<String>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Print each signal as the presentation layer would surface it.
fn spawn_signal_printer(mut rx: mpsc::Receiver<AuthSignal>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            debug!(?signal, "Signal received");
            match signal {
                AuthSignal::SignInSucceeded(user) => {
                    println!("Signed in as {}", user.uid().unwrap_or("<unknown>"));
                }
                AuthSignal::SignUpSucceeded(user) => {
                    println!("Registered {}", user.email().or(user.uid()).unwrap_or("<unknown>"));
                }
                AuthSignal::CredentialsCleared => println!("Session cleared"),
                AuthSignal::PasswordResetRequested(message) => {
                    println!("{}", message.as_deref().unwrap_or("Password reset requested"));
                }
                AuthSignal::PasswordUpdated(_) => println!("Password updated"),
                AuthSignal::SignInFailed(errors)
                | AuthSignal::SignUpFailed(errors)
                | AuthSignal::PasswordResetFailed(errors)
                | AuthSignal::PasswordUpdateFailed(errors)
                | AuthSignal::SignOutFailed(errors) => {
                    for error in errors {
                        eprintln!("Error: {}", error);
                    }
                }
            }
        }
    })
}

fn prompt_line(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("{} [{}]: ", label, d),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    match (input.is_empty(), default) {
        (true, Some(d)) => Ok(d.to_string()),
        _ => Ok(input.to_string()),
    }
}

fn prompt_password(label: &str) -> Result<String> {
    if let Ok(password) = std::env::var("TOKENAUTH_PASSWORD") {
        return Ok(password);
    }
    Ok(rpassword::prompt_password(format!("{}: ", label))?)
}

fn resolve_email(email: Option<String>, config: &Config) -> Result<String> {
    let email = match email {
        Some(email) => email,
        None => prompt_line("Email", config.last_email.as_deref())?,
    };
    if email.is_empty() {
        anyhow::bail!("Email required");
    }
    Ok(email)
}

fn fail_unless_success(outcome: &Exchange, what: &str) -> Result<()> {
    if outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("{} failed", what))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    let storage = cli.storage.unwrap_or(config.storage);
    let session = config::session_config(cli.api_url.as_deref(), cli.endpoints.as_deref())?;
    let store = config::credential_store(storage, &session)?;
    debug!(?storage, profiles = ?session.profile_names(), "Session configured");

    let (tx, rx) = signals::channel();
    let printer = spawn_signal_printer(rx);
    let coordinator = SessionCoordinator::with_reqwest(session, store)
        .context("Failed to create HTTP client")?
        .with_signals(tx);
    let profile = cli.profile.as_deref();

    let result = run(cli.command, &coordinator, &mut config, profile).await;

    // Dropping the coordinator closes the signal channel so the printer drains and exits
    drop(coordinator);
    let _ = printer.await;
    result
}

async fn run(
    command: Command,
    coordinator: &SessionCoordinator,
    config: &mut Config,
    profile: Option<&str>,
) -> Result<()> {
    match command {
        Command::SignIn { email } => {
            let email = resolve_email(email, config)?;
            let password = prompt_password("Password")?;

            let mut attempt = SignInAttempt::new();
            let outcome = coordinator
                .sign_in(&mut attempt, &email, &password, profile)
                .await?;
            if outcome.is_success() {
                config.last_email = Some(email);
                if let Err(e) = config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                info!("Sign-in complete");
            }
            fail_unless_success(&outcome, "Sign-in")
        }
        Command::SignUp { email } => {
            let email = resolve_email(email, config)?;
            let password = prompt_password("Password")?;
            let confirmation = prompt_password("Confirm password")?;
            let outcome = coordinator
                .sign_up(&email, &password, &confirmation, profile)
                .await?;
            fail_unless_success(&outcome, "Sign-up")
        }
        Command::SignOut => {
            coordinator.sign_out(profile).await?;
            Ok(())
        }
        Command::ResetPassword { email } => {
            let email = resolve_email(email, config)?;
            let outcome = coordinator.request_password_reset(&email, profile).await?;
            fail_unless_success(&outcome, "Password reset request")
        }
        Command::UpdatePassword => {
            let password = prompt_password("New password")?;
            let confirmation = prompt_password("Confirm new password")?;
            let outcome = coordinator
                .update_password(&password, &confirmation, profile)
                .await?;
            fail_unless_success(&outcome, "Password update")
        }
        Command::Status => {
            print_status(coordinator);
            Ok(())
        }
        Command::Request { path, method, data } => {
            let method: Method = method
                .to_ascii_uppercase()
                .parse()
                .with_context(|| format!("Invalid HTTP method '{}'", method))?;
            let body = data
                .map(|d| serde_json::from_str::<Value>(&d))
                .transpose()
                .context("Request body is not valid JSON")?;
            let outcome = coordinator.fetch(method, &path, body).await?;
            match outcome {
                Exchange::Success { ref body, status, .. } => {
                    debug!(%status, "Request succeeded");
                    println!("{}", serde_json::to_string_pretty(body)?);
                    Ok(())
                }
                Exchange::Failure { ref errors, status } => {
                    for error in errors {
                        eprintln!("Error: {}", error);
                    }
                    Err(anyhow::anyhow!(
                        "Request failed{}",
                        status.map(|s| format!(" with status {}", s)).unwrap_or_default()
                    ))
                }
            }
        }
    }
}

fn print_status(coordinator: &SessionCoordinator) {
    match coordinator.current_credentials() {
        Some(credentials) => {
            let state = if coordinator.is_authenticated() {
                "signed in"
            } else {
                "expired"
            };
            println!("Session: {}", state);
            println!("  uid:      {}", credentials.uid().unwrap_or("-"));
            println!("  client:   {}", credentials.client().unwrap_or("-"));
            match credentials.expires_at() {
                Some(at) => println!("  expires:  {}", at.to_rfc3339()),
                None => println!("  expires:  -"),
            }
            let endpoint = coordinator
                .store()
                .retrieve_endpoint()
                .unwrap_or_else(|| coordinator.config().default_profile().to_string());
            println!("  endpoint: {}", endpoint);
        }
        None => println!("Session: signed out"),
    }
}
