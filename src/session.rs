//! Device session: the open driver, the negotiated target format and the
//! active-sensor register.

use tracing::{debug, info, warn};

use crate::error::{CameraError, Result};
use crate::traits::{CameraDriver, ColorFormat, ImageFormat, SensorPort};

/// Lifecycle state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Device handle released.
    Closed,
    /// Device open, nothing negotiated yet or acquisition stopped.
    Idle,
    /// Target format negotiated, ready to start.
    Configured,
    /// Acquisition running.
    Running,
}

/// Owns the open device and the format pair negotiated for it.
///
/// The device has a single active-sensor register shared by every
/// port-scoped call. The session remembers what it last wrote there, but
/// callers always re-activate the port they are about to address.
pub struct DeviceSession<D: CameraDriver> {
    driver: D,
    state: SessionState,
    active_port: Option<SensorPort>,
    target_format: Option<ImageFormat>,
}

impl<D: CameraDriver> DeviceSession<D> {
    /// Take ownership of an opened driver.
    pub fn open(driver: D) -> Self {
        let caps = driver.capabilities();
        info!(card = %caps.card, driver = %caps.driver, bus = %caps.bus_info, "Device opened");
        Self {
            driver,
            state: SessionState::Idle,
            active_port: None,
            target_format: None,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Port last written to the active-sensor register.
    pub const fn active_port(&self) -> Option<SensorPort> {
        self.active_port
    }

    /// Negotiated target format, if any.
    pub const fn target_format(&self) -> Option<ImageFormat> {
        self.target_format
    }

    /// Shared access to the driver.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    pub(crate) fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub(crate) fn ensure_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CameraError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Select `port` on the active-sensor register.
    pub fn activate_port(&mut self, port: SensorPort) -> Result<()> {
        self.ensure_state(
            "activate port",
            &[
                SessionState::Idle,
                SessionState::Configured,
                SessionState::Running,
            ],
        )?;
        self.driver.set_active_sensor(port.selector())?;
        self.active_port = Some(port);
        debug!(port = port.number(), "Sensor activated");
        Ok(())
    }

    /// Select a port given as a raw number, rejecting numbers outside 1..=4.
    pub fn activate_port_number(&mut self, number: u32) -> Result<()> {
        self.activate_port(SensorPort::new(number)?)
    }

    /// Pick the first target format of `port` encoded as `desired`.
    ///
    /// The selection is kept for the rest of the session and used by every
    /// frame conversion.
    pub fn negotiate_target_format(
        &mut self,
        port: SensorPort,
        desired: ColorFormat,
    ) -> Result<ImageFormat> {
        self.ensure_state(
            "negotiate target format",
            &[SessionState::Idle, SessionState::Configured],
        )?;
        self.activate_port(port)?;

        let formats = self.driver.target_formats(port)?;
        debug!(port = port.number(), count = formats.len(), "Target formats enumerated");

        let selected = formats
            .into_iter()
            .find(|format| format.color == desired)
            .ok_or(CameraError::TargetFormatNotFound {
                port,
                wanted: desired,
            })?;

        info!(port = port.number(), "Selected target format: {selected}");
        self.target_format = Some(selected);
        self.state = SessionState::Configured;
        Ok(selected)
    }

    /// Format the sensor on `port` natively produces.
    pub fn query_source_format(&mut self, port: SensorPort) -> Result<ImageFormat> {
        self.ensure_state(
            "query source format",
            &[
                SessionState::Idle,
                SessionState::Configured,
                SessionState::Running,
            ],
        )?;
        self.activate_port(port)?;
        let format = self.driver.source_format(port)?;
        info!(port = port.number(), "Source format: {format}");
        Ok(format)
    }

    /// Reset frame counters and start acquisition.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_state("start", &[SessionState::Idle, SessionState::Configured])?;
        if self.target_format.is_none() {
            return Err(CameraError::FormatNotNegotiated);
        }
        info!("Starting the camera");
        self.driver.reset_frame_counter()?;
        self.driver.start()?;
        self.state = SessionState::Running;
        info!("Beginning to grab");
        Ok(())
    }

    /// Stop acquisition. The negotiated format is kept.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_state("stop", &[SessionState::Running])?;
        self.driver.stop()?;
        self.state = SessionState::Idle;
        info!("Camera stopped");
        Ok(())
    }

    /// Stop if running and release the device.
    pub fn close(mut self) -> Result<()> {
        if self.state == SessionState::Running {
            self.stop()?;
        }
        self.state = SessionState::Closed;
        self.active_port = None;
        info!("Device closed");
        Ok(())
    }
}

impl<D: CameraDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if self.state == SessionState::Running {
            if let Err(err) = self.driver.stop() {
                warn!(error = %err, "Failed to stop camera on drop");
            }
            self.state = SessionState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;
    use crate::traits::{PropertyId, SensorSelect};

    fn port(number: u32) -> SensorPort {
        SensorPort::new(number).expect("valid port")
    }

    #[test]
    fn test_state_machine() {
        let mut session = DeviceSession::open(MockDriver::new());
        assert_eq!(session.state(), SessionState::Idle);

        assert!(matches!(session.start(), Err(CameraError::FormatNotNegotiated)));
        assert!(matches!(
            session.stop(),
            Err(CameraError::InvalidState {
                state: SessionState::Idle,
                ..
            })
        ));

        session
            .negotiate_target_format(port(1), ColorFormat::Bgr24)
            .expect("negotiation should succeed");
        assert_eq!(session.state(), SessionState::Configured);

        session.start().expect("start should succeed");
        assert_eq!(session.state(), SessionState::Running);
        assert!(session
            .negotiate_target_format(port(1), ColorFormat::Rgb24)
            .is_err());

        session.stop().expect("stop should succeed");
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.target_format().is_some());

        session.start().expect("restart keeps the negotiated format");
        assert_eq!(session.driver().calls().reset_frame_counter, 2);
        session.close().expect("close should succeed");
    }

    #[test]
    fn test_negotiation_picks_first_match() {
        let formats = vec![
            ImageFormat::new(640, 480, ColorFormat::Yuyv),
            ImageFormat::new(320, 240, ColorFormat::Bgr24),
            ImageFormat::new(640, 480, ColorFormat::Bgr24),
        ];
        let driver = MockDriver::new().with_target_formats(port(2), formats);
        let mut session = DeviceSession::open(driver);

        let selected = session
            .negotiate_target_format(port(2), ColorFormat::Bgr24)
            .expect("negotiation should succeed");

        assert_eq!(selected, ImageFormat::new(320, 240, ColorFormat::Bgr24));
        assert_eq!(session.target_format(), Some(selected));
        assert_eq!(session.active_port(), Some(port(2)));
    }

    #[test]
    fn test_negotiation_without_match_is_fatal() {
        let driver = MockDriver::new().with_target_formats(port(1), Vec::new());
        let mut session = DeviceSession::open(driver);

        let err = session
            .negotiate_target_format(port(1), ColorFormat::Bgr24)
            .expect_err("empty list has no match");

        assert!(err.is_fatal());
        assert!(matches!(err, CameraError::TargetFormatNotFound { .. }));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_activation_is_idempotent() {
        let mut session = DeviceSession::open(MockDriver::new());

        session.activate_port(port(4)).expect("activation should succeed");
        let once = session
            .driver_mut()
            .property_value(PropertyId::Gain)
            .expect("read should succeed");

        session.activate_port(port(4)).expect("activation should succeed");
        session.activate_port(port(4)).expect("activation should succeed");
        let twice = session
            .driver_mut()
            .property_value(PropertyId::Gain)
            .expect("read should succeed");

        assert_eq!(once, twice);
        assert_eq!(session.driver().active_sensor(), Some(SensorSelect::Sensor4));
    }

    #[test]
    fn test_activate_port_number_rejects_out_of_range() {
        let mut session = DeviceSession::open(MockDriver::new());
        assert!(matches!(
            session.activate_port_number(0),
            Err(CameraError::InvalidPort(0))
        ));
        assert!(matches!(
            session.activate_port_number(5),
            Err(CameraError::InvalidPort(5))
        ));
        session.activate_port_number(3).expect("port 3 is valid");
        assert_eq!(session.active_port(), Some(port(3)));
    }
}
