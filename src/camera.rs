//! Left/right camera pair built on a single device session.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::acquisition::{FrameAcquisitionPipeline, FrameStats, OUTPUT_COLOR_FORMAT};
use crate::config::CameraConfig;
use crate::error::Result;
use crate::properties::{AppliedProperty, PropertyConfigurator};
use crate::session::DeviceSession;
use crate::traits::{CameraDriver, ImageFormat, OutputImage, SensorPort};

/// Two sensors of one device, configured and streaming.
///
/// Opening runs the full bring-up: optional driver logging, port activation,
/// format negotiation on the left port, property configuration and start.
/// Any failure aborts the bring-up and is returned to the caller.
pub struct StereoCamera<D: CameraDriver> {
    session: DeviceSession<D>,
    left: SensorPort,
    right: SensorPort,
    timeout: Duration,
    frame_id: String,
    source_format: ImageFormat,
    applied: Vec<AppliedProperty>,
}

impl<D: CameraDriver> StereoCamera<D> {
    /// Bring up `driver` as described by `config`.
    pub fn open(mut driver: D, config: &CameraConfig) -> Result<Self> {
        config.validate()?;
        let left = config.left_port()?;
        let right = config.right_port()?;
        let requests = config.property_requests()?;

        if config.enable_logging {
            driver.enable_logging();
            info!("Driver logging enabled");
        }

        let mut session = DeviceSession::open(driver);
        session.activate_port(left)?;
        session.activate_port(right)?;

        let source_format = session.query_source_format(left)?;
        session.negotiate_target_format(left, OUTPUT_COLOR_FORMAT)?;

        let applied = PropertyConfigurator::new(&mut session).apply_all(&requests)?;
        for property in &applied {
            info!(port = property.port.number(), "{property}");
        }

        session.start()?;

        Ok(Self {
            session,
            left,
            right,
            timeout: config.timeout(),
            frame_id: config.frame_id.clone(),
            source_format,
            applied,
        })
    }

    /// Port of the left sensor.
    pub const fn left_port(&self) -> SensorPort {
        self.left
    }

    /// Port of the right sensor.
    pub const fn right_port(&self) -> SensorPort {
        self.right
    }

    /// Native format of the left sensor.
    pub const fn source_format(&self) -> ImageFormat {
        self.source_format
    }

    /// Format frames are converted into.
    pub const fn target_format(&self) -> Option<ImageFormat> {
        self.session.target_format()
    }

    /// Outcome of every configured property, in request order.
    pub fn applied_properties(&self) -> &[AppliedProperty] {
        &self.applied
    }

    /// The underlying session.
    pub const fn session(&self) -> &DeviceSession<D> {
        &self.session
    }

    /// Grab one frame from the left sensor.
    pub fn grab_left(&mut self, timestamp: DateTime<Utc>) -> Result<OutputImage> {
        let mut image = OutputImage::default();
        self.grab_into(self.left, timestamp, &mut image)?;
        Ok(image)
    }

    /// Grab one frame from the right sensor.
    pub fn grab_right(&mut self, timestamp: DateTime<Utc>) -> Result<OutputImage> {
        let mut image = OutputImage::default();
        self.grab_into(self.right, timestamp, &mut image)?;
        Ok(image)
    }

    /// Grab one frame from the left sensor into `out`.
    pub fn grab_left_into(
        &mut self,
        timestamp: DateTime<Utc>,
        out: &mut OutputImage,
    ) -> Result<FrameStats> {
        self.grab_into(self.left, timestamp, out)
    }

    /// Grab one frame from the right sensor into `out`.
    pub fn grab_right_into(
        &mut self,
        timestamp: DateTime<Utc>,
        out: &mut OutputImage,
    ) -> Result<FrameStats> {
        self.grab_into(self.right, timestamp, out)
    }

    fn grab_into(
        &mut self,
        port: SensorPort,
        timestamp: DateTime<Utc>,
        out: &mut OutputImage,
    ) -> Result<FrameStats> {
        FrameAcquisitionPipeline::new(&mut self.session).acquire_into(
            port,
            self.timeout,
            timestamp,
            &self.frame_id,
            out,
        )
    }

    /// Stop acquisition and release the device.
    pub fn close(self) -> Result<()> {
        self.session.close()
    }
}
