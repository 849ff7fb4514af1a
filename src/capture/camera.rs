//! Webcam capture device using nokhwa
//!
//! Frames are read on a dedicated thread and pushed into the stream as raw
//! binary chunks until the handle is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::{CaptureDevice, DeviceError, StreamHandle};
use crate::recorder::state::ClipFormat;

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,
}

/// Get list of available cameras
pub fn get_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Capture device backed by a physical webcam.
pub struct CameraCaptureDevice {
    /// Device ID/index to capture from (None = default camera)
    device_id: Option<String>,

    /// Whether a stream is currently live on this device
    in_use: Arc<AtomicBool>,
}

impl CameraCaptureDevice {
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            device_id,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get camera index from device_id
    fn camera_index(&self) -> CameraIndex {
        match &self.device_id {
            Some(id) => {
                if let Ok(idx) = id.parse::<u32>() {
                    CameraIndex::Index(idx)
                } else {
                    CameraIndex::String(id.clone())
                }
            }
            None => CameraIndex::Index(0),
        }
    }
}

#[async_trait]
impl CaptureDevice for CameraCaptureDevice {
    async fn acquire(&self) -> Result<StreamHandle, DeviceError> {
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied("camera is busy".to_string()));
        }

        let (handle, source) = StreamHandle::pair(vec![ClipFormat::Raw]);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let camera_index = self.camera_index();
        let in_use = self.in_use.clone();

        // Camera I/O is blocking; it lives on its own thread for the whole
        // lifetime of the stream.
        std::thread::spawn(move || {
            let format = RequestedFormat::new::<RgbAFormat>(
                RequestedFormatType::AbsoluteHighestResolution,
            );

            let mut camera = match Camera::new(camera_index.clone(), format) {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!(
                        "failed to open camera {:?}: {:?}",
                        camera_index, e
                    )));
                    in_use.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if let Err(e) = camera.open_stream() {
                let _ = ready_tx.send(Err(format!("failed to open camera stream: {:?}", e)));
                in_use.store(false, Ordering::SeqCst);
                return;
            }

            let camera_format = camera.camera_format();
            tracing::info!(
                "Camera opened: {}x{} @ {}fps, format={:?}",
                camera_format.resolution().width(),
                camera_format.resolution().height(),
                camera_format.frame_rate(),
                camera_format.format(),
            );

            let _ = ready_tx.send(Ok(()));

            while !source.is_released() {
                // Blocks until the camera delivers the next frame; the
                // camera controls the timing.
                match camera.frame() {
                    Ok(frame) => {
                        source.push_chunk(frame.buffer().to_vec());
                    }
                    Err(e) => {
                        tracing::debug!("Failed to capture frame: {:?}", e);
                    }
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Error stopping camera stream: {:?}", e);
            }
            in_use.store(false, Ordering::SeqCst);
            tracing::debug!("Camera capture thread stopped");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(msg)) => Err(DeviceError::PermissionDenied(msg)),
            Err(_) => Err(DeviceError::PermissionDenied(
                "camera thread exited before the stream opened".to_string(),
            )),
        }
    }
}
