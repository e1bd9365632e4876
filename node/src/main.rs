// Copyright (c) 2026 KairOS Contributors. MIT License.
// See LICENSE for details.

//! # KairOS Identity Node
//!
//! Entry point for the `kairos-node` binary. Parses CLI arguments,
//! initializes logging, opens the sled store under the data directory and
//! runs one subcommand:
//!
//! - `init`            — create a sealed local identity
//! - `derive`          — chip UID (+ PIN) → account JSON
//! - `register-device` — add a device key to an identity
//! - `challenge`       — issue and record a challenge
//! - `sign`            — sign a challenge with a device key
//! - `verify`          — verify a signed challenge
//! - `tap`             — simulated NFC tap through the full flow
//! - `serve`           — HTTP verification API
//!
//! Every subcommand except `serve` prints one JSON document on stdout.

mod api;
mod cli;
mod logging;
mod metrics;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::signal;

use kairos_identity::account::{AccountManager, ChipUid, DeviceType, LocalIdentity};
use kairos_identity::auth::{verify_signed, ChallengeIssuer, DeviceSigner, SignedChallenge, TapAuthenticator};
use kairos_identity::config::EngineConfig;
use kairos_identity::nfc::{SimulatedReader, TapListener};
use kairos_identity::store::{KeyValueStore, SledStore};
use kairos_identity::vault::SealedIdentity;

use cli::{Commands, GlobalArgs, KairosNodeCli};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KairosNodeCli::parse();

    let default_level = match cli.command {
        Commands::Serve(_) => "kairos_node=info,kairos_identity=info,tower_http=debug",
        _ => "kairos_node=warn,kairos_identity=warn",
    };
    logging::init_logging(default_level, cli.global.log_format);

    let config = engine_config(&cli.global);
    let store = open_store(&cli.global.data_dir)?;

    let output = match cli.command {
        Commands::Init(args) => init_identity(store, &config, args).await?,
        Commands::Derive(args) => derive_account(store, &config, args).await?,
        Commands::RegisterDevice(args) => register_device(store, &config, args).await?,
        Commands::Challenge => issue_challenge(store, &config).await?,
        Commands::Sign(args) => sign_challenge(store, &config, args).await?,
        Commands::Verify(args) => verify_challenge(store, &config, args).await?,
        Commands::Tap(args) => simulate_tap(store, &config, args).await?,
        Commands::Serve(args) => return serve(store, config, args).await,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn engine_config(global: &GlobalArgs) -> EngineConfig {
    EngineConfig {
        challenge_ttl_ms: global.challenge_ttl_ms,
        ..EngineConfig::default()
    }
}

fn open_store(data_dir: &Path) -> Result<Arc<dyn KeyValueStore>> {
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store = SledStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::debug!(path = %db_path.display(), "database opened");
    Ok(Arc::new(store))
}

async fn load_identity(
    store: &dyn KeyValueStore,
    user_id: &str,
    passphrase: &str,
) -> Result<LocalIdentity> {
    let sealed = SealedIdentity::load(store, user_id)
        .await?
        .with_context(|| format!("no identity stored for user {user_id}"))?;
    Ok(sealed.unseal(passphrase).context("failed to unseal identity")?)
}

async fn save_identity(
    store: &dyn KeyValueStore,
    identity: &LocalIdentity,
    passphrase: &str,
    config: &EngineConfig,
) -> Result<()> {
    identity
        .seal_with_version(passphrase, &config.vault_format)?
        .save(store)
        .await?;
    Ok(())
}

async fn init_identity(
    store: Arc<dyn KeyValueStore>,
    config: &EngineConfig,
    args: cli::InitArgs,
) -> Result<Value> {
    let identity = match &args.chip_uid {
        Some(uid) => LocalIdentity::from_chip(&ChipUid::parse(uid)?, args.pin.as_deref())?,
        None => LocalIdentity::generate()?,
    };
    save_identity(store.as_ref(), &identity, &args.passphrase, config).await?;
    tracing::info!(user_id = %identity.user_id, "identity initialized");

    Ok(json!({
        "userId": identity.user_id,
        "did": identity.did(),
        "vaultFormat": config.vault_format,
    }))
}

async fn derive_account(
    store: Arc<dyn KeyValueStore>,
    config: &EngineConfig,
    args: cli::DeriveArgs,
) -> Result<Value> {
    let manager = AccountManager::with_config(store, config.clone());
    let derived = manager
        .derive_account(&args.chip.chip_uid, args.chip.pin.as_deref())
        .await?;

    Ok(json!({
        "status": derived.status,
        "persisted": derived.persisted,
        "chipUID": derived.record.chip_uid.to_string(),
        "account": derived.record.summary(),
        "derivedDid": derived.derived_did(),
    }))
}

async fn register_device(
    store: Arc<dyn KeyValueStore>,
    config: &EngineConfig,
    args: cli::RegisterDeviceArgs,
) -> Result<Value> {
    let mut identity = load_identity(store.as_ref(), &args.user_id, &args.passphrase).await?;
    let device_type: DeviceType = args.device_type.parse()?;
    let chip_uid = args.chip_uid.as_deref().map(ChipUid::parse).transpose()?;

    let device_id = identity.register_device(&args.name, device_type, chip_uid)?;
    save_identity(store.as_ref(), &identity, &args.passphrase, config).await?;

    let device = identity
        .device(&device_id)
        .context("registered device missing from identity")?;
    Ok(json!({
        "device": device,
        "did": device.did()?,
    }))
}

async fn issue_challenge(store: Arc<dyn KeyValueStore>, config: &EngineConfig) -> Result<Value> {
    let issuer = ChallengeIssuer::new(store, config.challenge_ttl());
    let challenge = issuer.issue().await?;
    Ok(serde_json::to_value(challenge)?)
}

async fn sign_challenge(
    store: Arc<dyn KeyValueStore>,
    config: &EngineConfig,
    args: cli::SignArgs,
) -> Result<Value> {
    let identity = load_identity(store.as_ref(), &args.user_id, &args.passphrase).await?;
    let mut signer = DeviceSigner::new(identity);
    let signed = signer.sign_challenge(&args.device_id, &args.challenge)?;
    save_identity(store.as_ref(), signer.identity(), &args.passphrase, config).await?;
    Ok(serde_json::to_value(signed)?)
}

async fn verify_challenge(
    store: Arc<dyn KeyValueStore>,
    config: &EngineConfig,
    args: cli::VerifyArgs,
) -> Result<Value> {
    let verdict = match args.expires_at {
        Some(expires_at) => {
            let signed = SignedChallenge {
                challenge: args.challenge,
                signature: args.signature,
                public_key: args.public_key,
            };
            verify_signed(&signed, expires_at)?
        }
        None => {
            let issuer = ChallengeIssuer::new(store, config.challenge_ttl());
            let signature = hex::decode(&args.signature).unwrap_or_default();
            let public_key = hex::decode(&args.public_key).unwrap_or_default();
            issuer
                .verify(&signature, &args.challenge, &public_key)
                .await?
        }
    };

    Ok(json!({ "verdict": verdict, "verified": verdict.is_verified() }))
}

async fn simulate_tap(
    store: Arc<dyn KeyValueStore>,
    config: &EngineConfig,
    args: cli::TapArgs,
) -> Result<Value> {
    let uid = ChipUid::parse(&args.chip.chip_uid)?;
    let reader = SimulatedReader::new();
    reader.tap(&uid.to_bytes(), 1);

    let listener = TapListener::with_config(reader, config);
    let tapped = listener
        .wait_for_tap_within(Duration::from_millis(args.timeout_ms))
        .await?;

    let auth = TapAuthenticator::from_store(store, config.clone());
    let outcome = auth
        .authenticate_tap(tapped.as_str(), args.chip.pin.as_deref())
        .await?;
    Ok(serde_json::to_value(outcome)?)
}

async fn serve(store: Arc<dyn KeyValueStore>, config: EngineConfig, args: cli::ServeArgs) -> Result<()> {
    let issuer = Arc::new(ChallengeIssuer::new(Arc::clone(&store), config.challenge_ttl()));
    let state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        accounts: Arc::new(AccountManager::with_config(store, config.clone())),
        issuer: Arc::clone(&issuer),
        metrics: Arc::new(NodeMetrics::new().context("failed to register metrics")?),
    };

    let router = api::create_router(state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind API listener on {addr}"))?;
    tracing::info!(%addr, challenge_ttl_ms = config.challenge_ttl_ms, "kairos-node listening");

    // Expired challenges are never verified, but they still take space.
    let purge_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_period(&config));
        loop {
            interval.tick().await;
            match issuer.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(purged = n, "expired challenges purged"),
                Err(e) => tracing::warn!(error = %e, "challenge purge failed"),
            }
        }
    });

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    purge_loop.abort();
    served.context("API server error")?;
    tracing::info!("kairos-node stopped");
    Ok(())
}

/// How often the purge loop runs. `interval` panics on a zero period.
fn purge_period(config: &EngineConfig) -> Duration {
    config.challenge_ttl().max(Duration::from_millis(1))
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}
