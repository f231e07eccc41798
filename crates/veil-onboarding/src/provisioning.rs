//! Key-provisioning collaborator seam.
//!
//! The sequencer calls a [`KeyProvisioner`] once the session reaches
//! `KeyProvisioning` with KYC completed, and stores the returned receipt.
//! Key generation itself (including any proving-key setup) happens behind
//! the trait.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use veil_core::{PhoneNumber, SessionKey, Timestamp, WalletAddress};
use veil_state::ProvisionedKeys;

/// Key-provisioning failures. The session step is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisioningError {
    /// The collaborator could not be reached.
    #[error("key provisioner unavailable: {reason}")]
    Unavailable {
        /// Transport or service error.
        reason: String,
    },

    /// The collaborator refused or failed the request.
    #[error("key provisioning failed: {reason}")]
    Failed {
        /// Collaborator message.
        reason: String,
    },
}

/// What the collaborator is told about the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub session_key: SessionKey,
    pub phone: Option<PhoneNumber>,
    pub wallet_address: Option<WalletAddress>,
    pub requested_at: Timestamp,
}

/// External key-provisioning service.
#[async_trait]
pub trait KeyProvisioner: Send + Sync + std::fmt::Debug {
    /// Provision keys for the user described by `request`.
    async fn provision(&self, request: &ProvisioningRequest) -> Result<ProvisionedKeys, ProvisioningError>;
}

/// In-process provisioner for development and tests.
///
/// Issues random key references and placeholder public keys. Can be
/// switched to fail, and counts invocations.
#[derive(Debug, Default)]
pub struct MockKeyProvisioner {
    fail: AtomicBool,
    calls: AtomicU32,
}

impl MockKeyProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of `provision` calls.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyProvisioner for MockKeyProvisioner {
    async fn provision(&self, request: &ProvisioningRequest) -> Result<ProvisionedKeys, ProvisioningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProvisioningError::Unavailable {
                reason: "mock provisioner disabled".into(),
            });
        }
        let id = uuid::Uuid::new_v4();
        Ok(ProvisionedKeys {
            key_reference: format!("keyset-{id}"),
            public_key: format!("mock-pk:{}", id.simple()),
            provisioned_at: request.requested_at,
        })
    }
}
