//! Gate configuration.
//!
//! Loaded from environment variables with defaults suited to local
//! development. Production deployments must leave the development fallback
//! off; [`AuthConfig::validate`] enforces that.

use veil_core::{PhoneLocale, ValidationError};
use veil_state::ChallengePolicy;

/// Deployment environment the gate runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentEnvironment {
    /// Local development.
    #[default]
    Development,
    /// Pre-production.
    Staging,
    /// Live users.
    Production,
}

impl DeploymentEnvironment {
    /// Lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for DeploymentEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DeploymentEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::InvalidValue {
                var: "VEIL_ENV".to_string(),
                value: other.to_string(),
                reason: "expected development, staging or production".to_string(),
            }),
        }
    }
}

/// Configuration for the phone verification gate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthConfig {
    /// Deployment environment.
    pub environment: DeploymentEnvironment,
    /// Country code and national digit count accepted for phone numbers.
    pub locale: PhoneLocale,
    /// Code length, expiry window, resend cooldown and attempt bound.
    pub policy: ChallengePolicy,
    /// Accept any well-formed code when the provider is unreachable.
    /// Never honored in production.
    pub allow_dev_fallback: bool,
}

impl AuthConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `VEIL_ENV` (default: `development`)
    /// - `VEIL_PHONE_COUNTRY_CODE` (default: `91`)
    /// - `VEIL_PHONE_DIGITS` (default: `10`)
    /// - `VEIL_OTP_LENGTH` (default: 6)
    /// - `VEIL_OTP_EXPIRY_SECS` (default: 30)
    /// - `VEIL_OTP_COOLDOWN_SECS` (default: 30)
    /// - `VEIL_OTP_MAX_ATTEMPTS` (default: 5)
    /// - `VEIL_ALLOW_DEV_FALLBACK` (default: `false`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let environment = match lookup("VEIL_ENV") {
            Some(raw) => raw.parse()?,
            None => defaults.environment,
        };

        let country_code =
            lookup("VEIL_PHONE_COUNTRY_CODE").unwrap_or_else(|| defaults.locale.country_code.clone());
        let national_digits = parse_var(&lookup, "VEIL_PHONE_DIGITS", defaults.locale.national_digits)?;
        let locale = PhoneLocale::new(country_code, national_digits).map_err(ConfigError::Locale)?;

        let policy = ChallengePolicy {
            code_length: parse_var(&lookup, "VEIL_OTP_LENGTH", defaults.policy.code_length)?,
            expiry_secs: parse_var(&lookup, "VEIL_OTP_EXPIRY_SECS", defaults.policy.expiry_secs)?,
            cooldown_secs: parse_var(&lookup, "VEIL_OTP_COOLDOWN_SECS", defaults.policy.cooldown_secs)?,
            max_attempts: parse_var(&lookup, "VEIL_OTP_MAX_ATTEMPTS", defaults.policy.max_attempts)?,
        };

        let allow_dev_fallback = match lookup("VEIL_ALLOW_DEV_FALLBACK") {
            Some(raw) => parse_bool("VEIL_ALLOW_DEV_FALLBACK", &raw)?,
            None => false,
        };

        let config = Self {
            environment,
            locale,
            policy,
            allow_dev_fallback,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gate must never run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allow_dev_fallback && self.environment == DeploymentEnvironment::Production {
            return Err(ConfigError::FallbackInProduction);
        }
        if self.policy.code_length == 0 {
            return Err(ConfigError::ZeroBound("VEIL_OTP_LENGTH"));
        }
        if self.policy.expiry_secs == 0 {
            return Err(ConfigError::ZeroBound("VEIL_OTP_EXPIRY_SECS"));
        }
        if self.policy.max_attempts == 0 {
            return Err(ConfigError::ZeroBound("VEIL_OTP_MAX_ATTEMPTS"));
        }
        Ok(())
    }

    /// Whether a provider failure may be replaced by a locally accepted challenge.
    pub fn fallback_permitted(&self) -> bool {
        self.allow_dev_fallback && self.environment != DeploymentEnvironment::Production
    }
}

pub(crate) fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
    #[error("{0} must be greater than zero")]
    ZeroBound(&'static str),
    #[error("VEIL_ALLOW_DEV_FALLBACK cannot be enabled in production")]
    FallbackInProduction,
    #[error("invalid phone locale: {0}")]
    Locale(ValidationError),
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
}
