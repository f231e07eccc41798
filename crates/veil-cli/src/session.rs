//! # Session Subcommand
//!
//! Inspect and manage stored onboarding sessions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use veil_core::SystemClock;
use veil_onboarding::StepSequencer;

use crate::{open_store, parse_key, DEFAULT_STORE_DIR};

/// Arguments for the `veil session` subcommand.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Directory holding session documents.
    #[arg(long, env = "VEIL_STORE_DIR", default_value = DEFAULT_STORE_DIR, global = true)]
    pub store_dir: PathBuf,

    #[command(subcommand)]
    pub command: SessionCommand,
}

/// Session subcommands.
#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Print the stored session as JSON.
    Show {
        /// Session key.
        key: String,
    },
    /// Return the session to WELCOME, clearing all captured data.
    Reset {
        /// Session key.
        key: String,
    },
    /// Delete the stored session document.
    Delete {
        /// Session key.
        key: String,
    },
}

/// Execute the session subcommand.
pub async fn run_session(args: &SessionArgs) -> Result<u8> {
    let store = open_store(&args.store_dir);

    match &args.command {
        SessionCommand::Show { key } => {
            let key = parse_key(key)?;
            match store.load(&key).await? {
                Some(session) => {
                    let json = serde_json::to_string_pretty(&session)
                        .context("failed to render session")?;
                    println!("{json}");
                    Ok(0)
                }
                None => {
                    eprintln!("no stored session for {key}");
                    Ok(2)
                }
            }
        }
        SessionCommand::Reset { key } => {
            let key = parse_key(key)?;
            let sequencer = StepSequencer::load(store, key.clone(), Arc::new(SystemClock)).await?;
            let session = sequencer.reset_onboarding().await?;
            println!(
                "session {key} reset to {} (revision {})",
                session.current_step(),
                session.revision()
            );
            Ok(0)
        }
        SessionCommand::Delete { key } => {
            let key = parse_key(key)?;
            store.delete(&key).await?;
            println!("session {key} deleted");
            Ok(0)
        }
    }
}
