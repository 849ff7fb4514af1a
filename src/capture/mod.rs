//! Capture device boundary
//!
//! Platform-agnostic acquisition and release of a live camera stream.
//! A device implementation owns the hardware side and pushes binary chunks
//! through a `StreamSource`; recording sessions hold the `StreamHandle` and
//! subscribe to the chunk feed for the duration of their window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::recorder::state::ClipFormat;

#[cfg(feature = "camera")]
pub mod camera;

/// Capacity of the chunk channel between a device and a recording session.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Errors from the capture device boundary
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Permission refused, or the device is held by another session.
    /// Both collapse into one class: the user-facing remedy is identical.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
}

struct StreamShared {
    id: Uuid,
    released: AtomicBool,
    chunk_tx: broadcast::Sender<Vec<u8>>,
    formats: Vec<ClipFormat>,
}

/// Exclusively owned handle to a live capture stream.
///
/// The handle is released exactly once no matter how the owning session
/// exits: `release` is an atomic swap, and `Drop` releases as a last resort.
pub struct StreamHandle {
    shared: Arc<StreamShared>,
}

/// Producing half of a capture stream, held by the device implementation.
pub struct StreamSource {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    /// Create a connected handle/source pair advertising the clip formats
    /// the device can deliver.
    pub fn pair(formats: Vec<ClipFormat>) -> (StreamHandle, StreamSource) {
        let (chunk_tx, _) = broadcast::channel(CHUNK_CHANNEL_CAPACITY);
        let shared = Arc::new(StreamShared {
            id: Uuid::new_v4(),
            released: AtomicBool::new(false),
            chunk_tx,
            formats,
        });
        (
            StreamHandle {
                shared: shared.clone(),
            },
            StreamSource { shared },
        )
    }

    /// Unique id of this stream.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Whether the stream still holds the underlying device.
    pub fn is_active(&self) -> bool {
        !self.shared.released.load(Ordering::SeqCst)
    }

    /// Clip formats the source can deliver.
    pub fn supported_formats(&self) -> &[ClipFormat] {
        &self.shared.formats
    }

    /// Subscribe to the binary chunk feed. Each recording session takes a
    /// fresh receiver; chunks delivered outside a session are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.shared.chunk_tx.subscribe()
    }

    /// Release the underlying device. Idempotent: returns `true` only for
    /// the call that actually released the stream.
    pub fn release(&self) -> bool {
        let first = !self.shared.released.swap(true, Ordering::SeqCst);
        if first {
            tracing::debug!(stream = %self.shared.id, "capture stream released");
        }
        first
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl StreamSource {
    /// Unique id of the stream this source feeds.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Whether the consuming side has released the stream.
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Push a binary chunk to the active recording session, if any.
    /// Returns `false` once the stream has been released or when no
    /// session is listening.
    pub fn push_chunk(&self, chunk: Vec<u8>) -> bool {
        if self.is_released() {
            return false;
        }
        self.shared.chunk_tx.send(chunk).is_ok()
    }
}

/// A device that can acquire and release a live capture stream.
///
/// Acquisition triggers the platform permission prompt; refusal and
/// device-busy both map to [`DeviceError::PermissionDenied`].
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire the live stream.
    async fn acquire(&self) -> Result<StreamHandle, DeviceError>;

    /// Release a stream handle. Safe to call on an already-released handle.
    fn release(&self, stream: &StreamHandle) {
        stream.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_is_idempotent() {
        let (handle, source) = StreamHandle::pair(vec![ClipFormat::Raw]);
        assert!(handle.is_active());
        assert!(handle.release());
        assert!(!handle.release());
        assert!(!handle.is_active());
        assert!(source.is_released());
    }

    #[test]
    fn push_after_release_is_dropped() {
        let (handle, source) = StreamHandle::pair(vec![ClipFormat::Raw]);
        let mut rx = handle.subscribe();
        assert!(source.push_chunk(vec![1, 2, 3]));
        handle.release();
        assert!(!source.push_chunk(vec![4]));
        assert_eq!(rx.try_recv().ok(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn drop_releases_the_stream() {
        let (handle, source) = StreamHandle::pair(vec![ClipFormat::Mp4]);
        drop(handle);
        assert!(source.is_released());
    }

    #[test]
    fn chunks_flow_only_to_subscribers() {
        let (handle, source) = StreamHandle::pair(vec![ClipFormat::Raw]);
        // No subscriber yet: the chunk goes nowhere.
        assert!(!source.push_chunk(vec![0]));
        let mut rx = handle.subscribe();
        assert!(source.push_chunk(vec![9]));
        assert_eq!(rx.try_recv().ok(), Some(vec![9]));
    }
}
