//! # Identity Newtypes
//!
//! Domain-primitive newtypes used throughout the onboarding stack.
//! Each identifier is a distinct type: you cannot pass a [`ChallengeId`]
//! where a [`SessionKey`] is expected.
//!
//! ## Validation
//!
//! String-based identifiers validate format at construction time and again
//! at deserialization time, so a tampered session document cannot smuggle
//! an invalid value past the constructors. [`ChallengeId`] is UUID-based and
//! always valid by construction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Routes `Deserialize` for a string newtype through its `new()` constructor.
macro_rules! impl_validating_deserialize {
    ($ty:ident) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// UUID-based identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier of one OTP challenge issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChallengeId(Uuid);

impl ChallengeId {
    /// Generate a new random challenge identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a challenge identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChallengeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "challenge:{}", self.0)
    }
}

impl std::str::FromStr for ChallengeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("challenge:").unwrap_or(s);
        Uuid::from_str(raw).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Session key
// ---------------------------------------------------------------------------

/// Stable device/user key under which an onboarding session is persisted.
///
/// 1–128 characters drawn from `[A-Za-z0-9._:-]`. The restriction keeps the
/// key usable as a file name and a database key without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionKey(String);

impl_validating_deserialize!(SessionKey);

impl SessionKey {
    /// Maximum key length in characters.
    pub const MAX_LEN: usize = 128;

    /// Create a session key, validating its character set and length.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-');
        if s.is_empty() || s.len() > Self::MAX_LEN || !s.chars().all(allowed) || s.starts_with('.') {
            return Err(ValidationError::InvalidSessionKey(s));
        }
        Ok(Self(s))
    }

    /// Access the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Phone numbers
// ---------------------------------------------------------------------------

/// Phone numbering rules for the deployment's locale.
///
/// A locale fixes the country calling code and the exact number of national
/// significant digits. Numbers with any other digit count are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneLocale {
    /// Country calling code without the leading `+` (e.g. `"91"`).
    pub country_code: String,
    /// Exact count of national significant digits (e.g. `10`).
    pub national_digits: usize,
}

impl PhoneLocale {
    /// Create a locale, rejecting a non-numeric country code or zero digits.
    pub fn new(country_code: impl Into<String>, national_digits: usize) -> Result<Self, ValidationError> {
        let country_code = country_code.into();
        let cc = country_code.trim_start_matches('+').to_string();
        if cc.is_empty() || cc.len() > 3 || !cc.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidPhoneNumber {
                input: country_code,
                reason: "country code must be 1-3 digits".into(),
            });
        }
        if national_digits == 0 || national_digits > 14 {
            return Err(ValidationError::InvalidPhoneNumber {
                input: country_code,
                reason: format!("unsupported national digit count {national_digits}"),
            });
        }
        Ok(Self {
            country_code: cc,
            national_digits,
        })
    }

    /// India: `+91`, ten national digits.
    pub fn india() -> Self {
        Self {
            country_code: "91".into(),
            national_digits: 10,
        }
    }

    /// Parse and normalize a raw phone number under this locale.
    ///
    /// Spaces, dashes, dots and parentheses are ignored. A leading `+` must
    /// be followed by this locale's country code. Without a `+`, the input
    /// must be exactly the national digits.
    pub fn parse(&self, raw: &str) -> Result<PhoneNumber, ValidationError> {
        let reject = |reason: String| ValidationError::InvalidPhoneNumber {
            input: raw.to_string(),
            reason,
        };

        let compact: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();

        let national = match compact.strip_prefix('+') {
            Some(international) => international
                .strip_prefix(self.country_code.as_str())
                .ok_or_else(|| reject(format!("expected country code +{}", self.country_code)))?,
            None => compact.as_str(),
        };

        if !national.chars().all(|c| c.is_ascii_digit()) {
            return Err(reject("only digits are allowed".into()));
        }
        if national.len() != self.national_digits {
            return Err(reject(format!(
                "expected exactly {} digits, got {}",
                self.national_digits,
                national.len()
            )));
        }

        Ok(PhoneNumber {
            country_code: self.country_code.clone(),
            national_number: national.to_string(),
        })
    }
}

impl Default for PhoneLocale {
    fn default() -> Self {
        Self::india()
    }
}

/// A phone number normalized under a [`PhoneLocale`].
///
/// Only constructible through [`PhoneLocale::parse`]. Deserialization
/// re-validates both parts as digit strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PhoneNumber {
    country_code: String,
    national_number: String,
}

impl<'de> Deserialize<'de> for PhoneNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Stored {
            country_code: String,
            national_number: String,
        }

        let stored = Stored::deserialize(deserializer)?;
        PhoneLocale::new(stored.country_code, stored.national_number.len())
            .and_then(|locale| locale.parse(&stored.national_number))
            .map_err(serde::de::Error::custom)
    }
}

impl PhoneNumber {
    /// E.164 form, e.g. `+919876543210`.
    pub fn e164(&self) -> String {
        format!("+{}{}", self.country_code, self.national_number)
    }

    /// The national significant digits.
    pub fn national_number(&self) -> &str {
        &self.national_number
    }

    /// The country calling code without `+`.
    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// Log-safe rendering: country code and last four digits only.
    pub fn masked(&self) -> String {
        let n = self.national_number.chars().count();
        let hidden = n.saturating_sub(4);
        let tail: String = self.national_number.chars().skip(hidden).collect();
        format!("+{}{}{}", self.country_code, "*".repeat(hidden), tail)
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.e164())
    }
}

// ---------------------------------------------------------------------------
// Other validated strings
// ---------------------------------------------------------------------------

/// Email address of the form `local@domain.tld`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EmailAddress(String);

impl_validating_deserialize!(EmailAddress);

impl EmailAddress {
    /// Create an email address with a minimal structural check.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        let valid = match s.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !s.chars().any(char::is_whitespace)
                    && !domain.contains('@')
            }
            None => false,
        };
        if !valid {
            return Err(ValidationError::InvalidEmail(s));
        }
        Ok(Self(s))
    }

    /// Access the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Wallet address as reported by the wallet-binding collaborator.
///
/// The format is chain-specific and opaque to this stack; only emptiness,
/// whitespace and length are checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WalletAddress(String);

impl_validating_deserialize!(WalletAddress);

impl WalletAddress {
    /// Create a wallet address.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        if s.is_empty() || s.len() > 256 || s.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidWalletAddress(s));
        }
        Ok(Self(s))
    }

    /// Access the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-negative decimal amount kept as a string.
///
/// Amounts never pass through floating point: `"12.5"` stays `"12.5"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Amount(String);

impl_validating_deserialize!(Amount);

impl Amount {
    /// Create an amount from a decimal string such as `"0"`, `"10.25"`.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (s.as_str(), None),
        };
        let digits = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());
        let valid = digits(int_part) && frac_part.map_or(true, digits);
        if !valid {
            return Err(ValidationError::InvalidAmount(s));
        }
        Ok(Self(s))
    }

    /// Access the amount as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
