//! Recorder state management
//!
//! Defines the recording state machine and capture session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No recording in progress
    Idle,
    /// Currently recording
    Recording,
    /// Concatenating fragments into the finished clip
    Finalizing,
    /// Clip yielded
    Complete,
    /// Session cancelled, fragments discarded
    Cancelled,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Encoding of a finished clip.
///
/// The preferred encoding may be unavailable on a given source; the
/// recorder then falls back to the source-native default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipFormat {
    /// Containerized MP4 output
    Mp4,
    /// Raw source-native frames
    Raw,
}

impl Default for ClipFormat {
    fn default() -> Self {
        Self::Raw
    }
}

/// One capture attempt, from stream acquisition to clip completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    /// Session id
    pub id: Uuid,

    /// Wall-clock time when the session started
    pub started_at: DateTime<Utc>,

    /// Requested recording duration in milliseconds
    pub duration_ms: u64,
}

impl CaptureSession {
    /// Create a new session starting now
    pub fn new(duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms,
        }
    }
}

/// A finished binary clip. Yielded exactly once per session.
#[derive(Debug, Clone)]
pub struct Clip {
    /// The session that produced this clip
    pub session: CaptureSession,

    /// Negotiated encoding
    pub format: ClipFormat,

    /// Concatenated clip bytes
    pub data: Vec<u8>,
}
