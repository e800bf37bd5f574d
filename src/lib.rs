//! Dual-Cam-Capture: property configuration and frame acquisition for
//! multi-sensor cameras
//!
//! This library drives a device with up to four sensor ports through a
//! trait-based driver abstraction, enabling both production use with V4L2
//! hardware and testing with a mock driver. Sensor properties are validated
//! against the ranges the hardware reports before they are written, and every
//! acquired frame is converted to BGR and copied into a packed buffer.

pub mod acquisition;
pub mod camera;
pub mod config;
pub mod convert;
pub mod device;
pub mod error;
pub mod properties;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use acquisition::{destride, FrameAcquisitionPipeline, FrameStats, OUTPUT_COLOR_FORMAT};
pub use camera::StereoCamera;
pub use config::{CameraConfig, ConfigError};
pub use device::V4l2Driver;
pub use error::{CameraError, Result};
pub use properties::{
    sanitize, AppliedProperty, PropertyConfigurator, PropertyOutcome, PropertyRequest,
};
pub use session::{DeviceSession, SessionState};
pub use traits::{
    CameraDriver, ColorFormat, DeviceCapabilities, ImageFormat, LockedFrame, OutputImage,
    PropertyAttributes, PropertyId, PropertyInfo, PropertyKind, PropertyValue, SensorPort,
    SensorSelect, StridedImage,
};
