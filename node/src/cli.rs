//! # CLI Interface
//!
//! Command-line structure for `kairos-node`, built with `clap` derive.
//! Global flags select the data directory, log format and challenge
//! lifetime; every flag also reads from a `KAIROS_*` environment variable.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use kairos_identity::config::{DEFAULT_CHALLENGE_TTL, DEFAULT_TAP_TIMEOUT};

use crate::logging::LogFormat;

/// KairOS identity node.
///
/// Derives deterministic Ed25519 identities from NFC chip UIDs, manages
/// device keys, and issues and verifies authentication challenges, either
/// one command at a time or as an HTTP service.
#[derive(Parser, Debug)]
#[command(
    name = "kairos-node",
    about = "KairOS NFC identity node",
    version,
    propagate_version = true
)]
pub struct KairosNodeCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding the sled database.
    ///
    /// Created on first use if it does not exist.
    #[arg(long, short = 'd', global = true, env = "KAIROS_DATA_DIR", default_value = ".kairos")]
    pub data_dir: PathBuf,

    /// Log output format: `pretty` or `json`.
    #[arg(long, global = true, env = "KAIROS_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Lifetime of issued challenges, in milliseconds. Must be positive.
    #[arg(
        long,
        global = true,
        env = "KAIROS_CHALLENGE_TTL_MS",
        default_value_t = DEFAULT_CHALLENGE_TTL.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub challenge_ttl_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a local identity and store it sealed under a passphrase.
    Init(InitArgs),
    /// Derive (or look up) the account of a chip and print it as JSON.
    Derive(DeriveArgs),
    /// Add a device key to a stored identity.
    RegisterDevice(RegisterDeviceArgs),
    /// Issue a fresh challenge and record it for later verification.
    Challenge,
    /// Sign a challenge with a registered device key.
    Sign(SignArgs),
    /// Verify a signed challenge.
    Verify(VerifyArgs),
    /// Run a simulated NFC tap through the full authentication flow.
    Tap(TapArgs),
    /// Serve the HTTP verification API.
    Serve(ServeArgs),
}

/// Chip UID and optional PIN, shared by chip-oriented subcommands.
#[derive(Args, Debug, Clone)]
pub struct ChipArgs {
    /// Chip UID, e.g. `04:A1:B2:C3:D4:E5:F6` or `04a1b2c3d4e5f6`.
    #[arg(long = "uid")]
    pub chip_uid: String,

    /// Optional 4–12 digit PIN mixed into the derivation.
    #[arg(long, env = "KAIROS_PIN", hide_env_values = true)]
    pub pin: Option<String>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Derive the master seed from this chip instead of generating one.
    #[arg(long = "uid")]
    pub chip_uid: Option<String>,

    /// PIN for chip-derived identities.
    #[arg(long, env = "KAIROS_PIN", hide_env_values = true, requires = "chip_uid")]
    pub pin: Option<String>,

    /// Passphrase sealing the master seed at rest.
    #[arg(long, env = "KAIROS_PASSPHRASE", hide_env_values = true)]
    pub passphrase: String,
}

#[derive(Args, Debug)]
pub struct DeriveArgs {
    #[command(flatten)]
    pub chip: ChipArgs,
}

#[derive(Args, Debug)]
pub struct RegisterDeviceArgs {
    /// User id printed by `init`.
    #[arg(long)]
    pub user_id: String,

    /// Human-readable device name.
    #[arg(long)]
    pub name: String,

    /// Device type: nfc-chip, phone, browser, kiosk, wearable or other.
    #[arg(long = "type", default_value = "other")]
    pub device_type: String,

    /// Chip UID to bind the device to, for `nfc-chip` devices.
    #[arg(long = "uid")]
    pub chip_uid: Option<String>,

    #[arg(long, env = "KAIROS_PASSPHRASE", hide_env_values = true)]
    pub passphrase: String,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    #[arg(long)]
    pub user_id: String,

    #[arg(long)]
    pub device_id: String,

    /// 64-char hex challenge.
    #[arg(long)]
    pub challenge: String,

    #[arg(long, env = "KAIROS_PASSPHRASE", hide_env_values = true)]
    pub passphrase: String,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// 64-char hex challenge.
    #[arg(long)]
    pub challenge: String,

    /// Hex-encoded 64-byte signature.
    #[arg(long)]
    pub signature: String,

    /// Hex-encoded 32-byte Ed25519 public key.
    #[arg(long)]
    pub public_key: String,

    /// Verify offline against this expiry (Unix ms) instead of the
    /// challenge registry.
    #[arg(long)]
    pub expires_at: Option<i64>,
}

#[derive(Args, Debug)]
pub struct TapArgs {
    #[command(flatten)]
    pub chip: ChipArgs,

    /// How long to wait for the tap, in milliseconds.
    #[arg(
        long,
        env = "KAIROS_TAP_TIMEOUT_MS",
        default_value_t = DEFAULT_TAP_TIMEOUT.as_millis() as u64
    )]
    pub timeout_ms: u64,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP API to.
    #[arg(long, env = "KAIROS_API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP API and `/metrics`.
    #[arg(long, short = 'p', env = "KAIROS_API_PORT", default_value_t = 9750)]
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        KairosNodeCli::command().debug_assert();
    }

    #[test]
    fn parses_derive_with_pin() {
        let cli = KairosNodeCli::try_parse_from([
            "kairos-node",
            "derive",
            "--uid",
            "04:A1:B2:C3:D4:E5:F6",
            "--pin",
            "1234",
        ])
        .unwrap();
        match cli.command {
            Commands::Derive(args) => {
                assert_eq!(args.chip.chip_uid, "04:A1:B2:C3:D4:E5:F6");
                assert_eq!(args.chip.pin.as_deref(), Some("1234"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = KairosNodeCli::try_parse_from([
            "kairos-node",
            "challenge",
            "--challenge-ttl-ms",
            "1000",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.global.challenge_ttl_ms, 1000);
        assert_eq!(cli.global.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Challenge));
    }

    #[test]
    fn zero_challenge_ttl_is_rejected() {
        let err = KairosNodeCli::try_parse_from([
            "kairos-node",
            "serve",
            "--challenge-ttl-ms",
            "0",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let cli =
            KairosNodeCli::try_parse_from(["kairos-node", "serve", "--challenge-ttl-ms", "1"]).unwrap();
        assert_eq!(cli.global.challenge_ttl_ms, 1);
    }
}
