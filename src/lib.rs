//! Facegate - client-side facial verification capture workflow.
//!
//! Captures a short biometric video sample from a camera, seals it into a
//! transportable payload, submits it to a remote verification service and
//! interprets the graded outcome space into user-facing state. A smaller,
//! independent state machine classifies challenge-code checks.

pub mod capture;
pub mod client;
pub mod codec;
pub mod recorder;
pub mod store;
pub mod workflow;

pub use capture::{CaptureDevice, DeviceError, StreamHandle, StreamSource};
pub use client::challenge::{interpret, ChallengeCheckResult, TransportErrorKind};
pub use client::{VerificationClient, VerificationOutcome, Verifier};
pub use codec::{CodecError, EncodedPayload, PayloadCodec};
pub use recorder::{CaptureSession, Clip, ClipFormat, RecorderError, RecorderState, TimedRecorder};
pub use store::{CredentialStore, SessionStore, CREDENTIAL_KEY};
pub use workflow::{CaptureWorkflow, WorkflowConfig, WorkflowError, WorkflowEvent, WorkflowState};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for an embedding application.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facegate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
