//! Recording system module
//!
//! Bounded-duration recording sessions against an acquired capture stream:
//! - recorder state machine and session records
//! - TimedRecorder driving the hard stop and the cosmetic countdown

pub mod state;
pub mod timed;

pub use state::{CaptureSession, Clip, ClipFormat, RecorderState};
pub use timed::{RecorderError, RecorderEvent, TimedRecorder};
