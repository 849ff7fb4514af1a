//! Verification service client
//!
//! One long-lived HTTP client submits sealed payloads to the remote
//! verification service and maps its response space onto
//! [`VerificationOutcome`]. The mapping is the core business rule: every
//! remote signal has exactly one tagged variant, so a new signal is an
//! exhaustiveness gap rather than a missed branch.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::codec::EncodedPayload;

pub mod challenge;

/// Fallback reason when the service rejects liveness without detail.
pub const GENERIC_LIVENESS_REASON: &str = "liveness check failed";

/// Body shape returned by the verification endpoint. All fields are
/// optional; error statuses may carry only `detail`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponseBody {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Tagged result of one submission. Produced once; never retried
/// automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Verified; the caller persists the credential.
    Success {
        display_name: String,
        credential: String,
    },
    /// No matching user or no enrolled face data.
    UserOrFaceNotFound,
    /// The sample did not pass the liveness check.
    LivenessFailed { reason: String },
    /// More than one subject in frame.
    MultipleSubjectsDetected,
    /// Anything else: undifferentiated server or transport failure.
    ServerError { message: String },
}

/// Map a remote status and parsed body onto the submission outcome.
///
/// Status-code semantics are authoritative; body fields only refine the
/// message. Total and deterministic.
pub fn classify(status: u16, body: Option<&SubmitResponseBody>) -> VerificationOutcome {
    match status {
        200..=299 => match body {
            Some(SubmitResponseBody {
                token: Some(token),
                username: Some(username),
                ..
            }) => VerificationOutcome::Success {
                display_name: username.clone(),
                credential: token.clone(),
            },
            _ => VerificationOutcome::ServerError {
                message: "verification service issued no credential".to_string(),
            },
        },
        404 => VerificationOutcome::UserOrFaceNotFound,
        402 => VerificationOutcome::LivenessFailed {
            reason: body
                .and_then(|b| b.detail.clone())
                .unwrap_or_else(|| GENERIC_LIVENESS_REASON.to_string()),
        },
        406 => VerificationOutcome::MultipleSubjectsDetected,
        other => VerificationOutcome::ServerError {
            message: body
                .and_then(|b| b.detail.clone().or_else(|| b.message.clone()))
                .unwrap_or_else(|| format!("verification service returned status {other}")),
        },
    }
}

/// Submission seam between the workflow and the remote service.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Submit a sealed payload. The bearer credential is injected per call.
    async fn submit(
        &self,
        payload: &EncodedPayload,
        credential: Option<&str>,
    ) -> VerificationOutcome;
}

/// HTTP client for the verification service. Configured once and reused
/// for every call.
pub struct VerificationClient {
    http: Client,
    base_url: String,
}

impl VerificationClient {
    /// Client for the service at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL of this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Verifier for VerificationClient {
    #[tracing::instrument(skip_all, fields(url = %self.base_url))]
    async fn submit(
        &self,
        payload: &EncodedPayload,
        credential: Option<&str>,
    ) -> VerificationOutcome {
        let url = format!("{}/check_face/", self.base_url);
        let mut request = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "payload": payload.as_str() }));
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "verification request failed");
                return VerificationOutcome::ServerError {
                    message: format!("verification request failed: {e}"),
                };
            }
        };

        let status = response.status().as_u16();
        let body = response.json::<SubmitResponseBody>().await.ok();
        let outcome = classify(status, body.as_ref());
        tracing::debug!(status, ?outcome, "submission resolved");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body(json: serde_json::Value) -> SubmitResponseBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn success_requires_credential_and_display_name() {
        let outcome = classify(200, Some(&body(serde_json::json!({
            "message": "ok", "token": "tok1", "username": "alice"
        }))));
        assert_eq!(
            outcome,
            VerificationOutcome::Success {
                display_name: "alice".to_string(),
                credential: "tok1".to_string(),
            }
        );
    }

    #[test]
    fn two_hundred_without_credential_is_a_server_error() {
        let outcome = classify(200, Some(&body(serde_json::json!({ "message": "ok" }))));
        assert!(matches!(outcome, VerificationOutcome::ServerError { .. }));
    }

    #[test]
    fn not_found_ignores_the_body() {
        let with_body = classify(404, Some(&body(serde_json::json!({ "detail": "whatever" }))));
        let without = classify(404, None);
        assert_eq!(with_body, VerificationOutcome::UserOrFaceNotFound);
        assert_eq!(without, VerificationOutcome::UserOrFaceNotFound);
    }

    #[test]
    fn liveness_reason_comes_from_the_detail_field() {
        let outcome = classify(402, Some(&body(serde_json::json!({ "detail": "blink failed" }))));
        assert_eq!(
            outcome,
            VerificationOutcome::LivenessFailed {
                reason: "blink failed".to_string()
            }
        );
    }

    #[test]
    fn liveness_without_detail_uses_the_generic_reason() {
        let outcome = classify(402, None);
        assert_eq!(
            outcome,
            VerificationOutcome::LivenessFailed {
                reason: GENERIC_LIVENESS_REASON.to_string()
            }
        );
    }

    #[test]
    fn multiple_subjects_is_its_own_class() {
        assert_eq!(
            classify(406, None),
            VerificationOutcome::MultipleSubjectsDetected
        );
    }

    #[test]
    fn unknown_statuses_are_server_errors() {
        assert!(matches!(
            classify(500, None),
            VerificationOutcome::ServerError { .. }
        ));
        assert!(matches!(
            classify(403, Some(&body(serde_json::json!({ "detail": "no match" })))),
            VerificationOutcome::ServerError { message } if message == "no match"
        ));
    }

    fn payload() -> EncodedPayload {
        use crate::codec::PayloadCodec;
        use crate::recorder::state::{CaptureSession, Clip, ClipFormat};
        PayloadCodec::new()
            .seal(&Clip {
                session: CaptureSession::new(2000),
                format: ClipFormat::Raw,
                data: vec![1, 2, 3],
            })
            .unwrap()
    }

    #[tokio::test]
    async fn submit_sends_payload_and_bearer_credential() {
        let server = MockServer::start().await;
        let sealed = payload();
        Mock::given(method("POST"))
            .and(path("/check_face/"))
            .and(header("authorization", "Bearer prior-token"))
            .and(body_json(serde_json::json!({ "payload": sealed.as_str() })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "ok", "token": "tok1", "username": "alice"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = VerificationClient::new(&server.uri());
        let outcome = client.submit(&sealed, Some("prior-token")).await;
        assert_eq!(
            outcome,
            VerificationOutcome::Success {
                display_name: "alice".to_string(),
                credential: "tok1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn submit_maps_liveness_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check_face/"))
            .respond_with(
                ResponseTemplate::new(402)
                    .set_body_json(serde_json::json!({ "detail": "blink failed" })),
            )
            .mount(&server)
            .await;

        let client = VerificationClient::new(&server.uri());
        let outcome = client.submit(&payload(), None).await;
        assert_eq!(
            outcome,
            VerificationOutcome::LivenessFailed {
                reason: "blink failed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_a_server_error() {
        // Nothing listens on this port.
        let client = VerificationClient::new("http://127.0.0.1:9");
        let outcome = client.submit(&payload(), None).await;
        assert!(matches!(outcome, VerificationOutcome::ServerError { .. }));
    }
}
