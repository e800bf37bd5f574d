//! Frame acquisition: lock, convert, de-stride, unlock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::convert::row_slices;
use crate::error::{CameraError, Result};
use crate::session::{DeviceSession, SessionState};
use crate::traits::{
    CameraDriver, ColorFormat, ImageFormat, LockedFrame, OutputImage, SensorPort,
};

/// Encoding of every image the pipeline hands out.
pub const OUTPUT_COLOR_FORMAT: ColorFormat = ColorFormat::Bgr24;

/// Driver bookkeeping for one acquired frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames the driver dropped since the previous lock on the port.
    pub frames_dropped: u32,
    /// Driver sequence number of the frame.
    pub sequence: u64,
}

/// Copy `height` rows of `row_bytes` bytes, spaced `pitch` bytes apart in
/// `src`, into `dst` without padding.
///
/// `dst` is cleared first and ends up exactly `row_bytes * height` long.
pub fn destride(
    src: &[u8],
    pitch: usize,
    row_bytes: usize,
    height: usize,
    dst: &mut Vec<u8>,
) -> Result<()> {
    let rows = row_slices(src, pitch, row_bytes, height)?;
    dst.clear();
    dst.reserve(row_bytes * height);
    for row in rows {
        dst.extend_from_slice(row);
    }
    Ok(())
}

/// Produces one packed output image per call from a running session.
pub struct FrameAcquisitionPipeline<'a, D: CameraDriver> {
    session: &'a mut DeviceSession<D>,
}

impl<'a, D: CameraDriver> FrameAcquisitionPipeline<'a, D> {
    /// Borrow a running session for acquisition.
    pub fn new(session: &'a mut DeviceSession<D>) -> Self {
        Self { session }
    }

    /// Acquire one frame from `port` into a new image.
    pub fn acquire(
        &mut self,
        port: SensorPort,
        timeout: Duration,
        timestamp: DateTime<Utc>,
        frame_id: &str,
    ) -> Result<OutputImage> {
        let mut image = OutputImage::default();
        self.acquire_into(port, timeout, timestamp, frame_id, &mut image)?;
        Ok(image)
    }

    /// Acquire one frame from `port` into `out`, reusing its buffer.
    ///
    /// Waits at most `timeout` for a frame and does not retry. The locked
    /// source frame is handed back to the driver on every path after a
    /// successful lock. `out` is only meaningful if the call succeeds.
    pub fn acquire_into(
        &mut self,
        port: SensorPort,
        timeout: Duration,
        timestamp: DateTime<Utc>,
        frame_id: &str,
        out: &mut OutputImage,
    ) -> Result<FrameStats> {
        self.session
            .ensure_state("acquire frame", &[SessionState::Running])?;
        let target = self
            .session
            .target_format()
            .ok_or(CameraError::FormatNotNegotiated)?;
        let driver = self.session.driver_mut();

        let locked = match driver.lock_next_frame(port, timeout) {
            Ok(locked) => locked,
            Err(err @ CameraError::AcquisitionTimeout { .. }) => {
                warn!(
                    port = port.number(),
                    timeout_ms = timeout.as_millis(),
                    "Could not lock image"
                );
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        trace!(
            port = port.number(),
            token = locked.token(),
            sequence = locked.sequence(),
            "Frame locked"
        );

        let stats = FrameStats {
            frames_dropped: locked.frames_dropped(),
            sequence: locked.sequence(),
        };
        if stats.frames_dropped > 0 {
            warn!(
                port = port.number(),
                frames_dropped = stats.frames_dropped,
                "Frames dropped since last lock"
            );
        }

        let converted = fill_output(driver, &locked, &target, timestamp, frame_id, out);
        let unlocked = driver.unlock_frame(locked);
        converted?;
        unlocked?;

        debug!(port = port.number(), sequence = stats.sequence, "Frame acquired");
        Ok(stats)
    }
}

fn fill_output<D: CameraDriver>(
    driver: &mut D,
    locked: &LockedFrame,
    target: &ImageFormat,
    timestamp: DateTime<Utc>,
    frame_id: &str,
    out: &mut OutputImage,
) -> Result<()> {
    let converted = driver.convert_frame(locked, target)?;
    let format = converted.format;
    let step = format.row_bytes();
    destride(
        &converted.data,
        converted.pitch,
        step,
        format.height as usize,
        &mut out.data,
    )?;

    out.width = format.width;
    out.height = format.height;
    out.step = step;
    out.encoding = format.color;
    out.timestamp = timestamp;
    out.frame_id.clear();
    out.frame_id.push_str(frame_id);
    Ok(())
}
