//! PULSE session server operator tool.
//!
//! # Usage
//!
//! ```bash
//! # Fresh server secrets
//! pulse-server keygen
//!
//! # Run the background maintenance loop against a store
//! PULSE_PEPPER=... PULSE_TOKEN_SECRET=... pulse-server --db pulse.redb serve
//!
//! # Inspect and manage a user's devices
//! pulse-server devices --user 42
//! pulse-server revoke --user 42 --token 7 [--restore]
//! pulse-server revoke-all --user 42
//!
//! # Purge session secrets unused for 30 days
//! pulse-server sweep --days 30
//! ```

use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use pulse_core::{TokenId, UserId, env::Environment};
use pulse_crypto::codec;
use pulse_server::{
    AssertionExpectations, CacheSweeper, LogMailer, PasskeyAssertion, PulseConfig, RedbStorage, ServerError,
    SessionIssuer, SystemEnv, WebAuthnVerifier,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// PULSE session-security server
#[derive(Parser, Debug)]
#[command(name = "pulse-server")]
#[command(about = "PULSE session-security server and operator tool")]
#[command(version)]
struct Args {
    /// Path to the redb database
    #[arg(long, env = "PULSE_DB", default_value = "pulse.redb")]
    db: String,

    /// Key-id pepper, 64 hex characters
    #[arg(long, env = "PULSE_PEPPER", value_parser = parse_secret, hide_env_values = true)]
    pepper: Option<[u8; 32]>,

    /// Token signing secret, 64 hex characters
    #[arg(long, env = "PULSE_TOKEN_SECRET", value_parser = parse_secret, hide_env_values = true)]
    token_secret: Option<[u8; 32]>,

    /// Integrity window length in seconds
    #[arg(long, env = "PULSE_WINDOW_INTERVAL", default_value = "120")]
    window_interval: u64,

    /// Expected WebAuthn origin
    #[arg(long, env = "PULSE_ORIGIN", default_value = "http://localhost:3000")]
    origin: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh pepper and token secret
    Keygen,
    /// Open the store and run cache sweeping and key purging until Ctrl-C
    Serve {
        /// Purge session secrets unused for this many days
        #[arg(long, default_value = "30")]
        purge_after_days: u64,
    },
    /// List a user's devices
    Devices {
        /// Account id
        #[arg(long)]
        user: u64,
    },
    /// Revoke or restore one device
    Revoke {
        /// Account id
        #[arg(long)]
        user: u64,
        /// Device (refresh-token row) id
        #[arg(long)]
        token: u64,
        /// Restore instead of revoke
        #[arg(long)]
        restore: bool,
    },
    /// Revoke every active device of a user
    RevokeAll {
        /// Account id
        #[arg(long)]
        user: u64,
    },
    /// Purge session secrets unused for N days
    Sweep {
        /// Idle days before a secret is purged
        #[arg(long, default_value = "30")]
        days: u64,
    },
}

fn parse_secret(input: &str) -> Result<[u8; 32], String> {
    codec::from_hex_array(input.trim()).map_err(|err| format!("expected 64 hex characters: {err}"))
}

/// Rejects every assertion. Passkeys need an external verifier wired in by
/// the embedding service.
struct NoWebAuthn;

impl WebAuthnVerifier for NoWebAuthn {
    fn assertion_result(
        &self,
        _assertion: &PasskeyAssertion,
        _expected: &AssertionExpectations<'_>,
    ) -> Result<u32, String> {
        Err("no WebAuthn verifier configured".to_string())
    }
}

const SECS_PER_DAY: u64 = 86_400;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if matches!(args.command, Command::Keygen) {
        keygen();
        return Ok(());
    }

    let (Some(pepper), Some(token_secret)) = (args.pepper, args.token_secret) else {
        return Err(ServerError::Config("PULSE_PEPPER and PULSE_TOKEN_SECRET are required".to_string()).into());
    };
    let config = PulseConfig {
        window_interval_secs: args.window_interval,
        origin: args.origin.clone(),
        ..PulseConfig::with_secrets(pepper, token_secret)
    };

    tracing::info!(db = %args.db, "opening store");
    let storage = RedbStorage::open(&args.db)?;
    let issuer = SessionIssuer::new(storage, SystemEnv::new(), &config, Arc::new(LogMailer), Arc::new(NoWebAuthn))?;

    match args.command {
        Command::Keygen => {},
        Command::Serve { purge_after_days } => serve(&issuer, &config, purge_after_days).await?,
        Command::Devices { user } => devices(&issuer, UserId(user)).await?,
        Command::Revoke { user, token, restore } => {
            let view = issuer.lifecycle().revoke(UserId(user), TokenId(token), !restore, None).await?;
            tracing::info!(user, token, state = ?view.state, "device updated");
        },
        Command::RevokeAll { user } => {
            let revoked = issuer.lifecycle().revoke_all(UserId(user), None).await?;
            tracing::info!(user, revoked, "devices revoked");
        },
        Command::Sweep { days } => {
            let purged = issuer.keystore().purge_stale(days.saturating_mul(SECS_PER_DAY)).await?;
            tracing::info!(purged, days, "sweep complete");
        },
    }

    Ok(())
}

#[allow(clippy::print_stdout, reason = "operator output")]
fn keygen() {
    let env = SystemEnv::new();
    println!("PULSE_PEPPER={}", codec::to_hex(&env.random_array::<32>()));
    println!("PULSE_TOKEN_SECRET={}", codec::to_hex(&env.random_array::<32>()));
}

#[allow(clippy::print_stdout, reason = "operator output")]
async fn devices(issuer: &SessionIssuer<RedbStorage, SystemEnv>, user: UserId) -> Result<(), ServerError> {
    for device in issuer.lifecycle().list(user, None).await? {
        println!(
            "{}\t{:?}\t{}\t{}\tlast used {}",
            device.id, device.state, device.device_name, device.user_agent, device.last_used_at
        );
    }
    Ok(())
}

async fn serve(
    issuer: &SessionIssuer<RedbStorage, SystemEnv>,
    config: &PulseConfig,
    purge_after_days: u64,
) -> Result<(), ServerError> {
    let sweeper =
        CacheSweeper::spawn(SystemEnv::new(), issuer.sweepables(), config.sweep_interval, config.sweep_batch);
    let mut purge = tokio::time::interval(Duration::from_secs(SECS_PER_DAY));
    tracing::info!("PULSE server running, Ctrl-C to stop");

    let result = loop {
        tokio::select! {
            _ = purge.tick() => {
                if let Err(err) = issuer.keystore().purge_stale(purge_after_days.saturating_mul(SECS_PER_DAY)).await {
                    tracing::warn!(error = %err, "stale key purge failed");
                }
            }
            signal = tokio::signal::ctrl_c() => break signal,
        }
    };

    tracing::info!("shutting down");
    sweeper.shutdown().await;
    result.map_err(ServerError::from)
}
