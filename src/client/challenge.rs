//! Challenge-code interpretation
//!
//! The service reports the state of a one-time login code through
//! off-the-beaten-path 2xx statuses: 201 means no code was requested,
//! 202 expired, 203 wrong code. Only 200 with an issued credential is a
//! valid check. Everything else is a transport error classified by
//! status.

use serde::Deserialize;
use thiserror::Error;

use super::VerificationClient;

/// Body shape returned by the challenge endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeResponseBody {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Classification of a failed transport-level challenge check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Not authenticated, or the bound address is unverified.
    Auth,
    /// No account matches.
    UserNotFound,
    /// The request itself was malformed.
    Validation,
    /// Anything else.
    Other,
}

/// Tagged result of one code check. Callers persist the credential on
/// `Valid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeCheckResult {
    /// No code has been requested for this account.
    NotRequested,
    /// The code's validity window has passed.
    Expired,
    /// The submitted code does not match.
    Incorrect,
    /// Check passed; a credential was issued.
    Valid { credential: String },
    /// The check never reached a verdict.
    TransportError { kind: TransportErrorKind },
}

/// Map a challenge-check status and parsed body onto a tagged result.
/// Pure; the caller owns any persistence.
pub fn interpret(status: u16, body: Option<&ChallengeResponseBody>) -> ChallengeCheckResult {
    match status {
        201 => ChallengeCheckResult::NotRequested,
        202 => ChallengeCheckResult::Expired,
        203 => ChallengeCheckResult::Incorrect,
        200 => match body.and_then(|b| b.token.clone()) {
            Some(credential) => ChallengeCheckResult::Valid { credential },
            // A 200 that issues no credential cannot be acted on.
            None => ChallengeCheckResult::TransportError {
                kind: TransportErrorKind::Other,
            },
        },
        401 => ChallengeCheckResult::TransportError {
            kind: TransportErrorKind::Auth,
        },
        404 => ChallengeCheckResult::TransportError {
            kind: TransportErrorKind::UserNotFound,
        },
        422 => ChallengeCheckResult::TransportError {
            kind: TransportErrorKind::Validation,
        },
        _ => ChallengeCheckResult::TransportError {
            kind: TransportErrorKind::Other,
        },
    }
}

/// Errors from asking the service to issue a challenge code.
#[derive(Error, Debug)]
pub enum ChallengeRequestError {
    #[error("user not found")]
    UserNotFound,

    #[error("email address not verified")]
    EmailUnverified,

    #[error("request rejected: {0}")]
    Validation(String),

    #[error("challenge request failed: {0}")]
    Other(String),
}

impl VerificationClient {
    /// Ask the service to issue a one-time login code out-of-band.
    pub async fn request_challenge(&self, email: &str) -> Result<(), ChallengeRequestError> {
        let url = format!("{}/login/mail/", self.base_url());
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(|e| ChallengeRequestError::Other(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                tracing::info!("challenge code requested");
                Ok(())
            }
            404 => Err(ChallengeRequestError::UserNotFound),
            401 => Err(ChallengeRequestError::EmailUnverified),
            422 => {
                let body = response.json::<ChallengeResponseBody>().await.ok();
                Err(ChallengeRequestError::Validation(
                    body.and_then(|b| b.detail)
                        .unwrap_or_else(|| "invalid request".to_string()),
                ))
            }
            other => Err(ChallengeRequestError::Other(format!(
                "service returned status {other}"
            ))),
        }
    }

    /// Check a challenge code against the service and interpret the
    /// response. The caller persists the credential on `Valid`.
    pub async fn check_challenge(&self, email: &str, code: &str) -> ChallengeCheckResult {
        let url = format!("{}/login/mail_code/", self.base_url());
        let response = match self
            .http
            .post(&url)
            .json(&serde_json::json!({ "email": email, "code": code }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "challenge check failed");
                return ChallengeCheckResult::TransportError {
                    kind: TransportErrorKind::Other,
                };
            }
        };

        let status = response.status().as_u16();
        let body = response.json::<ChallengeResponseBody>().await.ok();
        let result = interpret(status, body.as_ref());
        tracing::debug!(status, ?result, "challenge check resolved");
        result
    }
}
