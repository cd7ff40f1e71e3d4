//! sessionguard - inspect, verify and clear the locally stored session.
//!
//! Usage:
//!   sessionguard status [--fast]
//!   sessionguard refresh
//!   sessionguard show
//!   sessionguard login <user-id> <token> [--expires-in <minutes>]
//!   sessionguard logout
//!   sessionguard stats
//!
//! `status` and `refresh` need a verify URL, from the config file or
//! `SESSIONGUARD_VERIFY_URL`. Ctrl-C abandons an in-flight verification.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sessionguard_core::{
    Cancelled, HttpVerifier, RemoteVerifier, SessionConfig, SessionManager, SessionRecord,
    Verdict, VerificationOutcome, VerifyError, VerifyMode,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment override for the verify endpoint
const VERIFY_URL_ENV: &str = "SESSIONGUARD_VERIFY_URL";

const USAGE: &str = "usage: sessionguard <status [--fast] | refresh | show | login <user-id> <token> [--expires-in <minutes>] | logout | stats>";

/// Stands in when no verify URL is configured. Only commands that never
/// reach the verifier are run with it.
struct Unconfigured;

#[async_trait]
impl RemoteVerifier for Unconfigured {
    async fn verify(&self, _token: &str, _deadline: Duration) -> Result<Verdict, VerifyError> {
        Err(VerifyError::Connectivity("no verify URL configured".to_string()))
    }
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

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(ExitCode::from(2));
    };

    let mut config = match SessionConfig::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            SessionConfig::default()
        }
    };
    if let Ok(url) = std::env::var(VERIFY_URL_ENV) {
        config.verify_url = Some(url);
    }
    debug!(?config, "Config loaded");

    match command.as_str() {
        "status" => {
            let fast = args.iter().any(|a| a == "--fast");
            let manager = build_manager(&config, true)?;
            let outcome = run_cancellable(|cancel| async move {
                manager
                    .verify_cancellable(VerifyMode::from_fast_flag(fast), &cancel)
                    .await
            })
            .await?;
            report(outcome)
        }
        "refresh" => {
            let manager = build_manager(&config, true)?;
            let outcome = run_cancellable(|cancel| async move {
                manager.refresh_cancellable(&cancel).await
            })
            .await?;
            report(outcome)
        }
        "show" => {
            let manager = build_manager(&config, false)?;
            match manager.get_stored_session().await {
                Some(record) => {
                    print_record(&record);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("No stored session");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        "login" => {
            let (user_id, token, expires_in) = parse_login(&args[1..])?;
            let expires_at = expires_in.map(expiry_from_minutes).transpose()?;
            let manager = build_manager(&config, false)?;
            let record = SessionRecord::new(token, user_id, expires_at);
            if manager.store_session(record).await {
                println!("Session stored");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("Failed to store session: no secure storage available");
                Ok(ExitCode::FAILURE)
            }
        }
        "logout" => {
            let manager = build_manager(&config, false)?;
            if manager.clear_session().await {
                println!("Session cleared");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("Failed to clear session");
                Ok(ExitCode::FAILURE)
            }
        }
        "stats" => {
            let manager = build_manager(&config, false)?;
            // Warm the record cache so the snapshot reflects this process.
            let _ = manager.get_stored_session().await;
            println!("{}", serde_json::to_string_pretty(&manager.cache_stats())?);
            Ok(ExitCode::SUCCESS)
        }
        other => {
            eprintln!("unknown command: {}\n{}", other, USAGE);
            Ok(ExitCode::from(2))
        }
    }
}

fn build_manager(config: &SessionConfig, needs_verifier: bool) -> Result<Arc<SessionManager>> {
    let verifier: Arc<dyn RemoteVerifier> = match &config.verify_url {
        Some(url) => Arc::new(HttpVerifier::new(url.clone())?),
        None if needs_verifier => {
            bail!("No verify URL configured; set verify_url in the config file or {}", VERIFY_URL_ENV)
        }
        None => Arc::new(Unconfigured),
    };
    let store = config.open_store().context("Failed to open session store")?;
    Ok(Arc::new(SessionManager::new(config, store, verifier)))
}

/// Run a verification that is abandoned on Ctrl-C.
async fn run_cancellable<F, Fut>(verification: F) -> Result<VerificationOutcome>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<VerificationOutcome, Cancelled>>,
{
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, abandoning verification");
            on_interrupt.cancel();
        }
    });

    let result = verification(cancel).await;
    watcher.abort();
    Ok(result?)
}

fn report(outcome: VerificationOutcome) -> Result<ExitCode> {
    let message = match outcome {
        VerificationOutcome::Valid => "Session valid",
        VerificationOutcome::OfflineValidLastKnown => "Session accepted offline (verifier unreachable)",
        VerificationOutcome::Invalid => "No valid session - please log in",
        VerificationOutcome::Unknown => "Could not verify session - try again later",
    };
    println!("{}", message);
    Ok(if outcome.allows_access() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_record(record: &SessionRecord) {
    println!("user:    {}", record.user_id);
    println!("issued:  {}", record.issued_at.to_rfc3339());
    match (record.expires_at, record.minutes_until_expiry()) {
        (Some(expires_at), Some(minutes)) => {
            let state = if record.is_expired() { "expired" } else { "active" };
            println!("expires: {} ({}, {}m left)", expires_at.to_rfc3339(), state, minutes);
        }
        _ => println!("expires: never"),
    }
}

fn parse_login(args: &[String]) -> Result<(String, String, Option<i64>)> {
    let mut positional = Vec::new();
    let mut expires_in = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--expires-in" {
            let value = iter.next().context("--expires-in needs a value in minutes")?;
            let minutes: i64 = value
                .parse()
                .with_context(|| format!("Invalid --expires-in value: {}", value))?;
            if minutes <= 0 {
                bail!("--expires-in must be positive");
            }
            expires_in = Some(minutes);
        } else {
            positional.push(arg.clone());
        }
    }
    match positional.as_slice() {
        [user_id, token] => Ok((user_id.clone(), token.clone(), expires_in)),
        _ => bail!("{}", USAGE),
    }
}

fn expiry_from_minutes(minutes: i64) -> Result<DateTime<Utc>> {
    chrono::Duration::try_minutes(minutes)
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .with_context(|| format!("--expires-in {} is out of range", minutes))
}
