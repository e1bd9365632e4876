//! Walkthrough of the KairOS identity lifecycle.
//!
//! A chip is tapped on a simulated reader, its identity derived, a
//! challenge signed and verified; then the same chip is tapped again with
//! the wrong PIN to show the mismatch path.
//!
//! Run with:
//!   cargo run --example demo --release

use std::sync::Arc;
use std::time::Instant;

use kairos_identity::account::{ChipUid, DeviceType, LocalIdentity};
use kairos_identity::auth::{DeviceSigner, TapAuthenticator, TapOutcome};
use kairos_identity::config::EngineConfig;
use kairos_identity::did::DidKey;
use kairos_identity::nfc::{SimulatedReader, TapListener};
use kairos_identity::store::MemoryStore;

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

const CHIP: [u8; 7] = [0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6];

fn section(title: &str) {
    println!("\n{BOLD}{CYAN}== {title} =={RESET}");
}

fn report(outcome: &TapOutcome) {
    let (label, color) = match outcome {
        TapOutcome::NewIdentity { .. } => ("new identity", GREEN),
        TapOutcome::Returning { .. } => ("returning", GREEN),
        TapOutcome::SignatureMismatch { .. } => ("signature mismatch", RED),
        TapOutcome::Unconfirmed { .. } => ("unconfirmed (registry offline)", RED),
    };
    let account = outcome.account();
    println!("  outcome     {color}{label}{RESET}");
    println!("  did         {}", account.did);
    println!("  accountId   {}", account.account_id);
    println!("  taps        {}", account.verification_count);
    println!("  verified    {}", outcome.is_verified());
    println!("  persisted   {}", outcome.is_persisted());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::default();
    let auth = TapAuthenticator::from_store(Arc::new(MemoryStore::new()), config.clone());

    let reader = SimulatedReader::new();
    reader.idle(2);
    reader.tap(&CHIP, 3);
    reader.idle(1);
    reader.tap(&CHIP, 2);
    reader.idle(1);
    reader.tap(&CHIP, 1);
    let listener = TapListener::with_config(reader, &config);

    section("First tap (PIN 1234)");
    let uid = listener.wait_for_tap().await?;
    println!("  {DIM}chip {uid}{RESET}");
    let started = Instant::now();
    let outcome = auth.authenticate_tap(uid.as_str(), Some("1234")).await?;
    report(&outcome);
    println!("  {DIM}derive + sign + verify in {:?}{RESET}", started.elapsed());

    section("Second tap (PIN 1234)");
    let uid = listener.wait_for_tap().await?;
    report(&auth.authenticate_tap(uid.as_str(), Some("1234")).await?);

    section("Third tap (PIN 9999)");
    let uid = listener.wait_for_tap().await?;
    report(&auth.authenticate_tap(uid.as_str(), Some("9999")).await?);

    section("DID document");
    let did = DidKey::parse(&outcome.account().did)?;
    println!("{}", did.to_document().to_json()?);

    section("Devices");
    let mut identity = LocalIdentity::from_chip(&ChipUid::from_bytes(&CHIP)?, Some("1234"))?;
    let phone = identity.register_device("Phone", DeviceType::Phone, None)?;
    let mut signer = DeviceSigner::new(identity);
    let challenge = auth.issuer().issue().await?;
    let signed = signer.sign_challenge(&phone, &challenge.challenge)?;
    let verdict = auth
        .issuer()
        .verify(
            &hex::decode(&signed.signature)?,
            &challenge.challenge,
            &hex::decode(&signed.public_key)?,
        )
        .await?;
    println!("  device      {phone}");
    println!("  verdict     {verdict}");

    Ok(())
}
