//! # Error Types — Input Validation
//!
//! Validation failures are corrected locally by the caller (clear the input
//! and re-prompt). They never change session or challenge state.

use thiserror::Error;

/// Malformed user or collaborator input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Phone number does not match the configured locale.
    #[error("invalid phone number {input:?}: {reason}")]
    InvalidPhoneNumber {
        /// The rejected input, as supplied.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Verification code is not exactly `expected_len` ASCII digits.
    #[error("verification code must be exactly {expected_len} digits")]
    InvalidCode {
        /// Required number of digits.
        expected_len: usize,
    },

    /// Session key is empty, too long, or contains disallowed characters.
    #[error("invalid session key: {0:?}")]
    InvalidSessionKey(String),

    /// Email address is not of the form `local@domain`.
    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),

    /// Wallet address is empty or contains whitespace.
    #[error("invalid wallet address: {0:?}")]
    InvalidWalletAddress(String),

    /// Amount is not a non-negative decimal string.
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),

    /// A required free-form field was blank.
    #[error("field {0} must not be blank")]
    BlankField(&'static str),

    /// Timestamp could not be parsed or was not UTC.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
