//! Timed recording sessions
//!
//! Drives a bounded-duration recording against an acquired stream. Two
//! independently scheduled timers are anchored to the same session-start
//! instant: the hard stop at the configured duration, and a cosmetic 1 Hz
//! countdown that can neither shorten nor lengthen the recording.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use super::state::{CaptureSession, Clip, ClipFormat, RecorderState};
use crate::capture::StreamHandle;

/// Events emitted during a recording session
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// Recording started
    Started,
    /// Countdown display update (remaining whole seconds)
    CountdownTick(u64),
    /// Hard stop reached, fragments being concatenated
    Finalizing,
    /// Clip yielded
    Complete,
    /// Session cancelled
    Cancelled,
}

/// Recorder errors
#[derive(Error, Debug)]
pub enum RecorderError {
    /// The stream is inactive or a session already ran on this recorder.
    #[error("capture device not ready")]
    DeviceNotReady,

    #[error("no recording in progress")]
    NotRecording,

    #[error("recording cancelled")]
    Cancelled,
}

/// Pick the clip encoding for a session. Unavailable preferences degrade
/// silently to the source-native default.
fn negotiate_format(supported: &[ClipFormat], preferred: ClipFormat) -> ClipFormat {
    if supported.contains(&preferred) {
        preferred
    } else {
        tracing::debug!(
            ?preferred,
            "preferred clip format unavailable, using source default"
        );
        ClipFormat::default()
    }
}

/// One-shot timed recorder: `Idle → Recording → Finalizing → Complete`,
/// or `Cancelled`.
pub struct TimedRecorder {
    state: Arc<RwLock<RecorderState>>,
    cancelled: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

impl TimedRecorder {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            state: Arc::new(RwLock::new(RecorderState::Idle)),
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(Notify::new()),
            event_tx,
        }
    }

    /// Get the current recorder state
    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    /// Subscribe to recorder events
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.event_tx.subscribe()
    }

    /// Cancel the session. Valid while `Recording` or `Finalizing`; the
    /// in-flight [`record`](Self::record) call releases the stream and
    /// discards its fragments.
    pub fn cancel(&self) -> Result<(), RecorderError> {
        let current = *self.state.read();
        if !matches!(
            current,
            RecorderState::Recording | RecorderState::Finalizing
        ) {
            return Err(RecorderError::NotRecording);
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
        Ok(())
    }

    /// Record from the stream for exactly `duration`, yielding the
    /// concatenated clip once.
    ///
    /// Requires an active stream and an `Idle` recorder; fails with
    /// [`RecorderError::DeviceNotReady`] otherwise.
    pub async fn record(
        &self,
        stream: &StreamHandle,
        duration: Duration,
        preferred_format: ClipFormat,
    ) -> Result<Clip, RecorderError> {
        {
            let mut state = self.state.write();
            if *state != RecorderState::Idle || !stream.is_active() {
                return Err(RecorderError::DeviceNotReady);
            }
            *state = RecorderState::Recording;
        }

        let mut chunks = stream.subscribe();
        let session = CaptureSession::new(duration.as_millis() as u64);
        let start = Instant::now();
        let deadline = start + duration;

        let _ = self.event_tx.send(RecorderEvent::Started);
        tracing::info!(
            session = %session.id,
            duration_ms = session.duration_ms,
            "recording started"
        );

        // The countdown runs as its own scheduled task against the same
        // start instant; it is display-only.
        let countdown = tokio::spawn(countdown_ticks(self.event_tx.clone(), start, duration));

        let mut fragments: Vec<Vec<u8>> = Vec::new();
        let mut feed_open = true;
        let mut cancelled = false;

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            if feed_open {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = self.cancel.notified() => {
                        cancelled = true;
                        break;
                    }
                    chunk = chunks.recv() => match chunk {
                        Ok(chunk) => fragments.push(chunk),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "chunk feed lagged, fragments dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // Source went away; wait out the hard timer.
                            feed_open = false;
                        }
                    },
                }
            } else {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = self.cancel.notified() => {
                        cancelled = true;
                        break;
                    }
                }
            }
        }
        if cancelled {
            countdown.abort();
            return Err(self.cancel_session(stream, &session));
        }

        // The countdown's final tick lands at the hard-stop instant; let it
        // flush before finalizing.
        let _ = countdown.await;

        *self.state.write() = RecorderState::Finalizing;
        let _ = self.event_tx.send(RecorderEvent::Finalizing);

        // Pick up fragments delivered just before the hard stop.
        while let Ok(chunk) = chunks.try_recv() {
            fragments.push(chunk);
        }

        // Cancellation may land during finalization.
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(self.cancel_session(stream, &session));
        }

        let format = negotiate_format(stream.supported_formats(), preferred_format);
        let data = fragments.concat();

        *self.state.write() = RecorderState::Complete;
        let _ = self.event_tx.send(RecorderEvent::Complete);
        tracing::info!(
            session = %session.id,
            bytes = data.len(),
            ?format,
            "recording complete"
        );

        Ok(Clip {
            session,
            format,
            data,
        })
    }

    fn cancel_session(&self, stream: &StreamHandle, session: &CaptureSession) -> RecorderError {
        *self.state.write() = RecorderState::Cancelled;
        stream.release();
        let _ = self.event_tx.send(RecorderEvent::Cancelled);
        tracing::info!(session = %session.id, "recording cancelled, fragments discarded");
        RecorderError::Cancelled
    }
}

impl Default for TimedRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit one countdown tick per whole second, anchored to the session start
/// instant rather than to the previous tick.
async fn countdown_ticks(
    event_tx: broadcast::Sender<RecorderEvent>,
    start: Instant,
    duration: Duration,
) {
    let total = duration.as_secs();
    let _ = event_tx.send(RecorderEvent::CountdownTick(total));
    for i in 1..=total {
        tokio::time::sleep_until(start + Duration::from_secs(i)).await;
        let _ = event_tx.send(RecorderEvent::CountdownTick(total - i));
    }
}
