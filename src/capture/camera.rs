use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

use super::FrameSource;
use crate::error::SessionError;

/// Requested camera geometry; the driver may pick the closest mode.
pub const CAMERA_WIDTH: u32 = 640;
pub const CAMERA_HEIGHT: u32 = 480;

static CAMERA_BUSY: AtomicBool = AtomicBool::new(false);

/// Process-wide claim on the camera device.
///
/// Conflicting opens fail fast instead of blocking inside the driver.
pub(crate) struct CameraLease {
    _private: (),
}

impl CameraLease {
    pub(crate) fn acquire() -> Result<Self, SessionError> {
        if CAMERA_BUSY
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(CameraLease { _private: () })
        } else {
            Err(SessionError::SourceUnavailable(
                "camera is held by another capture session".to_string(),
            ))
        }
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        CAMERA_BUSY.store(false, Ordering::Release);
    }
}

pub struct CameraSource {
    // Stream handle and lease travel together so one close releases both.
    inner: Option<(Camera, CameraLease)>,
    width: u32,
    height: u32,
}

impl CameraSource {
    /// Open the physical device and start its stream.
    pub fn open(device_index: u32) -> Result<Self, SessionError> {
        let lease = CameraLease::acquire()?;

        tracing::info!(
            "Opening camera {} at {}x{}",
            device_index,
            CAMERA_WIDTH,
            CAMERA_HEIGHT
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(CAMERA_WIDTH, CAMERA_HEIGHT),
                FrameFormat::MJPEG,
                30,
            ),
        ));

        let mut camera = Camera::new(index, requested)
            .map_err(|e| SessionError::SourceUnavailable(format!("failed to open camera: {e}")))?;

        camera.open_stream().map_err(|e| {
            SessionError::SourceUnavailable(format!("failed to open camera stream: {e}"))
        })?;

        let resolution = camera.resolution();
        tracing::info!(
            "Camera stream ready at {}x{}",
            resolution.width(),
            resolution.height()
        );

        Ok(Self {
            width: resolution.width(),
            height: resolution.height(),
            inner: Some((camera, lease)),
        })
    }
}

impl FrameSource for CameraSource {
    fn capture_one(&mut self) -> Result<RgbImage, SessionError> {
        let (camera, _) = self
            .inner
            .as_mut()
            .ok_or_else(|| SessionError::Capture("camera source already closed".to_string()))?;

        let frame = camera
            .frame()
            .map_err(|e| SessionError::Capture(format!("camera frame failed: {e}")))?;

        frame
            .decode_image::<RgbFormat>()
            .map_err(|e| SessionError::Capture(format!("failed to decode camera frame: {e}")))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        if let Some((mut camera, lease)) = self.inner.take() {
            if let Err(e) = camera.stop_stream() {
                tracing::warn!("failed to stop camera stream: {e}");
            }
            drop(lease);
            tracing::debug!("camera released");
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
