//! # Twilio Verify Provider Against a Mock Server
//!
//! Checks request construction (path, basic auth, form fields) and the
//! mapping of Twilio responses onto `OtpDispatch`, `OtpCheck` and
//! `ProviderError` without touching the live API.

use veil_auth::{ProviderError, TwilioConfig, TwilioVerifyProvider, VerificationProvider};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PHONE: &str = "+919876543210";

// base64("AC123:secret")
const BASIC_AUTH: &str = "Basic QUMxMjM6c2VjcmV0";

fn provider(server: &MockServer) -> TwilioVerifyProvider {
    let config = TwilioConfig::new("AC123", "secret", "VA456")
        .expect("config")
        .with_base_url(&format!("{}/v2", server.uri()))
        .expect("base url");
    TwilioVerifyProvider::new(config).expect("provider build")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_otp_posts_form_with_basic_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/Services/VA456/Verifications"))
        .and(header("Authorization", BASIC_AUTH))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("To=%2B919876543210"))
        .and(body_string_contains("Channel=sms"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "sid": "VE0001",
            "status": "pending",
            "to": PHONE,
            "channel": "sms"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dispatch = provider(&server).send_otp(PHONE).await.expect("send");
    assert!(dispatch.accepted);
    assert_eq!(dispatch.provider_challenge_id.as_deref(), Some("VE0001"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_otp_client_error_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/Services/VA456/Verifications"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": 60200,
            "message": "Invalid parameter: To",
            "status": 400
        })))
        .mount(&server)
        .await;

    let err = provider(&server).send_otp(PHONE).await.unwrap_err();
    assert_eq!(
        err,
        ProviderError::Rejected {
            provider: "twilio",
            status: 400,
            message: "Invalid parameter: To".into(),
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_otp_server_error_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/Services/VA456/Verifications"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    assert!(matches!(
        provider(&server).send_otp(PHONE).await,
        Err(ProviderError::Unavailable { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_otp_approved() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/Services/VA456/VerificationCheck"))
        .and(header("Authorization", BASIC_AUTH))
        .and(body_string_contains("Code=123456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sid": "VE0001",
            "status": "approved",
            "valid": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let check = provider(&server).verify_otp(PHONE, "123456").await.expect("verify");
    assert!(check.verified);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_otp_pending_means_wrong_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/Services/VA456/VerificationCheck"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sid": "VE0001",
            "status": "pending",
            "valid": false
        })))
        .mount(&server)
        .await;

    let check = provider(&server).verify_otp(PHONE, "000000").await.expect("verify");
    assert!(!check.verified);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_otp_not_found_means_wrong_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/Services/VA456/VerificationCheck"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "code": 20404,
            "message": "The requested resource was not found"
        })))
        .mount(&server)
        .await;

    let check = provider(&server).verify_otp(PHONE, "000000").await.expect("verify");
    assert!(!check.verified);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_otp_garbage_body_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/Services/VA456/VerificationCheck"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    assert!(matches!(
        provider(&server).verify_otp(PHONE, "123456").await,
        Err(ProviderError::InvalidResponse { .. })
    ));
}
