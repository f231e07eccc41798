//! # Twilio Verify v2 Provider
//!
//! `POST {base}/Services/{sid}/Verifications` dispatches a code over SMS;
//! `POST {base}/Services/{sid}/VerificationCheck` checks one. Both are
//! form-encoded with HTTP basic auth (account SID and auth token). A check
//! whose `status` is `approved` means the code was correct.
//!
//! Twilio answers a wrong code either with `200 {"status": "pending"}` or
//! with `404` once the verification is no longer checkable. Both map to
//! `verified: false`; the gate owns the attempt bound.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;
use zeroize::Zeroizing;

use crate::config::{parse_var, ConfigError};
use crate::provider::{OtpCheck, OtpDispatch, ProviderError, VerificationProvider};

const PROVIDER: &str = "twilio";
const DEFAULT_BASE_URL: &str = "https://verify.twilio.com/v2/";

/// Credentials and endpoint for Twilio Verify.
///
/// Custom `Debug` implementation redacts the auth token; the token is
/// zeroized when the config is dropped.
#[derive(Clone)]
pub struct TwilioConfig {
    /// Account SID, used as the basic-auth user.
    pub account_sid: String,
    /// Auth token, used as the basic-auth password.
    pub auth_token: Zeroizing<String>,
    /// Verify service SID (`VA...`).
    pub service_sid: String,
    /// API base URL (default: `https://verify.twilio.com/v2/`).
    pub base_url: Url,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("service_sid", &self.service_sid)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl TwilioConfig {
    /// Configuration against the public Twilio endpoint.
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        service_sid: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            account_sid: account_sid.into(),
            auth_token: Zeroizing::new(auth_token.into()),
            service_sid: service_sid.into(),
            base_url: parse_base_url("TWILIO_VERIFY_BASE_URL", DEFAULT_BASE_URL)?,
            timeout_secs: 10,
        })
    }

    /// Point at a different base URL (mock servers, regional edges).
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = parse_base_url("TWILIO_VERIFY_BASE_URL", base_url)?;
        Ok(self)
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `TWILIO_ACCOUNT_SID` (required)
    /// - `TWILIO_AUTH_TOKEN` (required)
    /// - `TWILIO_VERIFY_SERVICE_SID` (required)
    /// - `TWILIO_VERIFY_BASE_URL` (default: `https://verify.twilio.com/v2/`)
    /// - `TWILIO_TIMEOUT_SECS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| lookup(var).ok_or(ConfigError::MissingVar(var));
        let base = lookup("TWILIO_VERIFY_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = parse_var(&lookup, "TWILIO_TIMEOUT_SECS", 10u64)?;
        if timeout_secs == 0 {
            return Err(ConfigError::ZeroBound("TWILIO_TIMEOUT_SECS"));
        }
        Ok(Self {
            account_sid: required("TWILIO_ACCOUNT_SID")?,
            auth_token: Zeroizing::new(required("TWILIO_AUTH_TOKEN")?),
            service_sid: required("TWILIO_VERIFY_SERVICE_SID")?,
            base_url: parse_base_url("TWILIO_VERIFY_BASE_URL", &base)?,
            timeout_secs,
        })
    }
}

/// Parse a base URL, forcing a trailing slash so `join` appends instead of replacing.
fn parse_base_url(var: &str, raw: &str) -> Result<Url, ConfigError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    sid: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    message: Option<String>,
}

/// Twilio Verify v2 client.
#[derive(Debug)]
pub struct TwilioVerifyProvider {
    client: reqwest::Client,
    config: TwilioConfig,
    verifications_url: Url,
    check_url: Url,
}

impl TwilioVerifyProvider {
    /// Build the HTTP client for `config`.
    pub fn new(config: TwilioConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let service = config
            .base_url
            .join(&format!("Services/{}/", config.service_sid))
            .map_err(|e| ProviderError::NotConfigured {
                reason: format!("invalid service SID: {e}"),
            })?;
        let join = |path: &str| {
            service.join(path).map_err(|e| ProviderError::NotConfigured {
                reason: format!("invalid endpoint: {e}"),
            })
        };
        let verifications_url = join("Verifications")?;
        let check_url = join("VerificationCheck")?;

        Ok(Self {
            client,
            config,
            verifications_url,
            check_url,
        })
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
        operation: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        self.client
            .post(url.clone())
            .basic_auth(&self.config.account_sid, Some(self.config.auth_token.as_str()))
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout { provider: PROVIDER }
                } else {
                    ProviderError::Unavailable {
                        provider: PROVIDER,
                        reason: format!("{operation}: {e}"),
                    }
                }
            })
    }

    async fn error_for(resp: reqwest::Response, operation: &str) -> ProviderError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() {
            return ProviderError::Unavailable {
                provider: PROVIDER,
                reason: format!("{operation}: HTTP {status}"),
            };
        }
        let message = serde_json::from_str::<TwilioErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);
        ProviderError::Rejected {
            provider: PROVIDER,
            status: status.as_u16(),
            message,
        }
    }

    async fn decode(resp: reqwest::Response) -> Result<VerificationResponse, ProviderError> {
        resp.json::<VerificationResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl VerificationProvider for TwilioVerifyProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn send_otp(&self, phone_e164: &str) -> Result<OtpDispatch, ProviderError> {
        let resp = self
            .post_form(
                &self.verifications_url,
                &[("To", phone_e164), ("Channel", "sms")],
                "send_otp",
            )
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp, "send_otp").await);
        }
        let body = Self::decode(resp).await?;
        tracing::debug!(status = %body.status, "twilio verification created");
        Ok(OtpDispatch {
            accepted: body.status == "pending",
            provider_challenge_id: body.sid,
        })
    }

    async fn verify_otp(&self, phone_e164: &str, code: &str) -> Result<OtpCheck, ProviderError> {
        let resp = self
            .post_form(&self.check_url, &[("To", phone_e164), ("Code", code)], "verify_otp")
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(OtpCheck { verified: false });
        }
        if !resp.status().is_success() {
            return Err(Self::error_for(resp, "verify_otp").await);
        }
        let body = Self::decode(resp).await?;
        Ok(OtpCheck {
            verified: body.status == "approved",
        })
    }
}
