//! # Demo Subcommand
//!
//! Walks one session from wherever it is stored through to `COMPLETE`,
//! standing in for the screens: the phone step goes through a real
//! [`AuthGate`], the wallet, KYC and key-provisioning steps are fed canned
//! collaborator data.
//!
//! Without `--twilio` no provider is configured, so the gate issues a
//! local fallback challenge. That only works outside production; with
//! `VEIL_ENV=production` the demo refuses to start.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use veil_auth::{
    spawn_countdown, AuthConfig, AuthGate, CodeEntry, SubmitOutcome, TwilioConfig,
    TwilioVerifyProvider, UnavailableProvider, VerificationProvider,
};
use veil_core::{Clock, SystemClock};
use veil_onboarding::{MockKeyProvisioner, StepSequencer};
use veil_state::{DocumentKind, DocumentPayload, ExtractedData, OnboardingStep};

use crate::{open_store, parse_key, DEFAULT_STORE_DIR};

/// Arguments for the `veil demo` subcommand.
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Directory holding session documents.
    #[arg(long, env = "VEIL_STORE_DIR", default_value = DEFAULT_STORE_DIR)]
    pub store_dir: PathBuf,

    /// Session key (device identifier).
    #[arg(long, default_value = "demo-device")]
    pub key: String,

    /// National phone number to verify.
    #[arg(long, default_value = "9876543210")]
    pub phone: String,

    /// OTP to submit. Ignored with `--twilio`, where the code is read from stdin.
    #[arg(long, default_value = "123456")]
    pub code: String,

    /// Wallet address reported by the wallet collaborator.
    #[arg(long, default_value = "0x52908400098527886e0f7030069857d2e4169ee7")]
    pub wallet: String,

    /// Send a real OTP through Twilio Verify (`TWILIO_*` variables).
    #[arg(long)]
    pub twilio: bool,
}

/// Execute the demo flow. Returns 0 once the session is complete.
pub async fn run_demo(args: &DemoArgs) -> Result<u8> {
    let mut config = AuthConfig::from_env().context("invalid VEIL_* configuration")?;
    let provider: Arc<dyn VerificationProvider> = if args.twilio {
        let twilio = TwilioConfig::from_env().context("invalid TWILIO_* configuration")?;
        Arc::new(TwilioVerifyProvider::new(twilio)?)
    } else {
        config.allow_dev_fallback = true;
        config
            .validate()
            .context("the demo needs the development fallback, which production forbids")?;
        Arc::new(UnavailableProvider)
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&args.store_dir);
    let key = parse_key(&args.key)?;
    let sequencer = StepSequencer::load(store, key, Arc::clone(&clock)).await?;
    let gate = Arc::new(AuthGate::new(provider, clock, config));

    loop {
        let step = sequencer.current_step().await;
        println!("step: {step}");
        match step {
            OnboardingStep::Welcome => {
                sequencer.next_step().await?;
            }
            OnboardingStep::PhoneVerification => {
                verify_phone(args, &gate, &sequencer).await?;
                sequencer.next_step().await?;
            }
            OnboardingStep::WalletBinding => {
                sequencer
                    .set_wallet_connection(&args.wallet, "0", "demo")
                    .await?;
                sequencer.next_step().await?;
            }
            OnboardingStep::Kyc => {
                let payload = DocumentPayload {
                    reference: "demo://documents/national-id".to_string(),
                    extracted: Some(ExtractedData {
                        full_name: Some("Demo User".to_string()),
                        id_number: Some("DEMO0001".to_string()),
                        ..Default::default()
                    }),
                };
                sequencer
                    .capture_document(DocumentKind::NationalId, payload)
                    .await?;
                sequencer.complete_kyc().await?;
                sequencer.next_step().await?;
            }
            OnboardingStep::KeyProvisioning => {
                let keys = sequencer.provision_keys(&MockKeyProvisioner::new()).await?;
                println!("keys: {}", keys.key_reference);
                sequencer.next_step().await?;
            }
            OnboardingStep::Complete => break,
        }
    }

    let session = sequencer.session().await;
    println!(
        "session {} complete (revision {})",
        session.session_key(),
        session.revision()
    );
    Ok(0)
}

async fn verify_phone(args: &DemoArgs, gate: &Arc<AuthGate>, sequencer: &StepSequencer) -> Result<()> {
    let countdown = spawn_countdown(Arc::clone(gate));
    let challenge = gate.request_challenge(&args.phone).await?;
    println!(
        "code sent to {} (expires in {}s{})",
        challenge.phone.masked(),
        challenge.expires_in,
        if challenge.local_fallback { ", local fallback" } else { "" }
    );

    let raw = if args.twilio {
        read_code_from_stdin().await?
    } else {
        args.code.clone()
    };
    let mut entry = CodeEntry::new(gate.config().policy.code_length);
    let Some(code) = entry.set(&raw) else {
        bail!(
            "expected a {}-digit code, got {:?}",
            gate.config().policy.code_length,
            entry.value()
        );
    };

    let outcome = gate.submit_code(challenge.id, &code).await;
    countdown.cancel();
    match outcome? {
        SubmitOutcome::Verified(verified) => {
            gate.exit();
            sequencer.confirm_phone(&verified).await?;
            println!("phone {} verified", verified.phone().masked());
            Ok(())
        }
        SubmitOutcome::Rejected { attempts_remaining } => {
            bail!("code rejected, {attempts_remaining} attempt(s) left")
        }
        SubmitOutcome::Failed => bail!("code rejected, no attempts left"),
        SubmitOutcome::Suppressed => bail!("a verification is already in flight"),
    }
}

/// Read one line from stdin on the blocking pool, keeping the runtime
/// (and the countdown task) free while the user types.
async fn read_code_from_stdin() -> Result<String> {
    println!("enter code:");
    read_code_from(std::io::BufReader::new(std::io::stdin())).await
}

async fn read_code_from<R>(mut reader: R) -> Result<String>
where
    R: BufRead + Send + 'static,
{
    let line = tokio::task::spawn_blocking(move || {
        let mut line = String::new();
        reader.read_line(&mut line).map(|_| line)
    })
    .await
    .context("stdin reader task failed")?
    .context("failed to read code from stdin")?;
    Ok(line.trim().to_string())
}
