use image::RgbImage;
use xcap::Monitor;

use super::FrameSource;
use crate::error::SessionError;

/// Grabs the current contents of the primary display.
///
/// The display has no persistent handle, so `close` is a no-op; `open`
/// resolves the monitor and probes one frame to pin the session geometry.
pub struct ScreenSource {
    monitor: Monitor,
    width: u32,
    height: u32,
}

impl ScreenSource {
    pub fn open() -> Result<Self, SessionError> {
        let mut monitors = Monitor::all().map_err(|e| {
            SessionError::SourceUnavailable(format!("failed to enumerate displays: {e}"))
        })?;

        if monitors.is_empty() {
            return Err(SessionError::SourceUnavailable(
                "no display found".to_string(),
            ));
        }

        let index = monitors
            .iter()
            .position(|m| m.is_primary())
            .unwrap_or(0);
        let monitor = monitors.swap_remove(index);

        let probe = grab(&monitor)?;
        let (width, height) = probe.dimensions();
        tracing::info!("Screen capture ready at {}x{}", width, height);

        Ok(Self {
            monitor,
            width,
            height,
        })
    }
}

impl FrameSource for ScreenSource {
    fn capture_one(&mut self) -> Result<RgbImage, SessionError> {
        let frame = grab(&self.monitor)?;

        // Resolution switches mid-session would break the encoder's fixed
        // geometry, so rescale to the dimensions probed at open.
        if frame.dimensions() != (self.width, self.height) {
            return Ok(image::imageops::resize(
                &frame,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            ));
        }

        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {}
}

fn grab(monitor: &Monitor) -> Result<RgbImage, SessionError> {
    let shot = monitor
        .capture_image()
        .map_err(|e| SessionError::Capture(format!("screen grab failed: {e}")))?;

    let (width, height) = (shot.width(), shot.height());
    let rgba = shot.into_raw();

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    rgb.extend(rgba.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]));

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| SessionError::Capture("screen frame buffer size mismatch".to_string()))
}
