//! # veil-cli — Operator CLI for the Onboarding Stack
//!
//! ## Subcommands
//!
//! - `veil session show <key>`: print the stored session document.
//! - `veil session reset <key>`: return a session to `WELCOME`.
//! - `veil session delete <key>`: remove the stored document.
//! - `veil demo`: run the whole onboarding flow against the file store,
//!   resuming wherever the stored session left off.
//!
//! Sessions live under `--store-dir` (env `VEIL_STORE_DIR`, default
//! `.veil/sessions`).

pub mod demo;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use veil_core::SessionKey;
use veil_store::{FileSessionStore, SessionStore};

/// Default directory for session documents.
pub const DEFAULT_STORE_DIR: &str = ".veil/sessions";

/// Open the file store rooted at `dir`.
pub fn open_store(dir: &Path) -> Arc<dyn SessionStore> {
    tracing::debug!(store_dir = %dir.display(), "opening session store");
    Arc::new(FileSessionStore::new(dir))
}

/// Parse a session key argument.
pub fn parse_key(raw: &str) -> Result<SessionKey> {
    SessionKey::new(raw).with_context(|| format!("invalid session key {raw:?}"))
}
