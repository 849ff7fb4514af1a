//! Workflow state, events and configuration

use serde::{Deserialize, Serialize};

use crate::recorder::state::ClipFormat;

/// Externally observable state of a capture workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Nothing acquired yet
    Idle,
    /// Permission prompt outstanding
    AwaitingPermission,
    /// Stream live, waiting for the user to trigger capture
    Ready,
    /// Recording session running
    Recording,
    /// Encode/encrypt/submit pipeline running
    Processing,
    /// Terminal: verified
    Complete,
    /// Terminal: denied, rejected or errored
    Failed,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Events emitted as the workflow progresses
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// Camera stream acquired
    PermissionGranted,
    /// Permission prompt refused or device busy
    PermissionDenied,
    /// Recording session started
    RecordingStarted,
    /// Countdown display update (remaining whole seconds)
    CountdownTick(u64),
    /// Submission pipeline running; show the loading indicator
    Processing,
    /// Terminal resolution carrying exactly one user-facing message;
    /// clears the loading indicator
    Resolved { message: String, success: bool },
    /// Post-success navigation hint for the embedding view layer
    NavigateHome,
}

/// Configuration for a capture workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    /// Base URL of the verification service
    pub base_url: String,

    /// Hard recording duration in milliseconds
    pub record_duration_ms: u64,

    /// Preferred clip encoding; sources that cannot deliver it degrade
    /// to their native default
    pub preferred_format: ClipFormat,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            record_duration_ms: 2000,
            preferred_format: ClipFormat::Mp4,
        }
    }
}
