//! Core traits and types for the dual-sensor camera abstraction.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{CameraError, Result};

/// Color encoding of an image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    /// 8-bit luminance.
    Gray8,
    /// 8-bit raw Bayer mosaic, RGGB order.
    BayerRggb8,
    /// YUYV 4:2:2 packed (2 bytes per pixel).
    Yuyv,
    /// 24-bit RGB.
    Rgb24,
    /// 24-bit BGR.
    Bgr24,
}

impl ColorFormat {
    /// Bytes used by one pixel.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 | Self::BayerRggb8 => 1,
            Self::Yuyv => 2,
            Self::Rgb24 | Self::Bgr24 => 3,
        }
    }

    /// V4L2 four character code.
    #[must_use]
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Gray8 => *b"GREY",
            Self::BayerRggb8 => *b"RGGB",
            Self::Yuyv => *b"YUYV",
            Self::Rgb24 => *b"RGB3",
            Self::Bgr24 => *b"BGR3",
        }
    }

    /// Map a four character code back to a color format.
    #[must_use]
    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        [
            Self::Gray8,
            Self::BayerRggb8,
            Self::Yuyv,
            Self::Rgb24,
            Self::Bgr24,
        ]
        .into_iter()
        .find(|format| format.fourcc() == code)
    }

    /// Encoding label used by downstream image consumers.
    #[must_use]
    pub const fn encoding(self) -> &'static str {
        match self {
            Self::Gray8 => "mono8",
            Self::BayerRggb8 => "bayer_rggb8",
            Self::Yuyv => "yuv422_yuy2",
            Self::Rgb24 => "rgb8",
            Self::Bgr24 => "bgr8",
        }
    }
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gray8 => "GRAY_8",
            Self::BayerRggb8 => "BAYER_RGGB_8",
            Self::Yuyv => "YUYV_4:2:2",
            Self::Rgb24 => "RGB_3X8",
            Self::Bgr24 => "BGR_3X8",
        };
        f.write_str(name)
    }
}

impl TryFrom<v4l::FourCC> for ColorFormat {
    type Error = CameraError;

    fn try_from(fourcc: v4l::FourCC) -> Result<Self> {
        Self::from_fourcc(fourcc.repr).ok_or_else(|| {
            CameraError::ConversionFailed(format!(
                "unsupported pixel format {}",
                String::from_utf8_lossy(&fourcc.repr)
            ))
        })
    }
}

impl From<ColorFormat> for v4l::FourCC {
    fn from(format: ColorFormat) -> Self {
        Self::new(&format.fourcc())
    }
}

/// Image dimensions and color encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Color encoding.
    pub color: ColorFormat,
}

impl ImageFormat {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, color: ColorFormat) -> Self {
        Self {
            width,
            height,
            color,
        }
    }

    /// Logical bytes per row, without padding.
    #[must_use]
    pub const fn row_bytes(&self) -> usize {
        self.width as usize * self.color.bytes_per_pixel()
    }

    /// Size of a packed frame in bytes.
    #[must_use]
    pub const fn packed_size(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} ({})", self.width, self.height, self.color)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// One of the physical sensor inputs of the device, numbered 1 to 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorPort(u8);

impl SensorPort {
    /// Validate a port number.
    pub fn new(number: u32) -> Result<Self> {
        match number {
            1..=4 => u8::try_from(number)
                .map(Self)
                .map_err(|_| CameraError::InvalidPort(number)),
            _ => Err(CameraError::InvalidPort(number)),
        }
    }

    /// Port number as wired on the device.
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0 as u32
    }

    /// Hardware selector written to the active-sensor register.
    #[must_use]
    pub const fn selector(self) -> SensorSelect {
        match self.0 {
            1 => SensorSelect::Sensor1,
            2 => SensorSelect::Sensor2,
            3 => SensorSelect::Sensor3,
            _ => SensorSelect::Sensor4,
        }
    }
}

impl fmt::Display for SensorPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value of the device's active-sensor register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorSelect {
    /// Sensor on port 1.
    Sensor1,
    /// Sensor on port 2.
    Sensor2,
    /// Sensor on port 3.
    Sensor3,
    /// Sensor on port 4.
    Sensor4,
}

impl SensorSelect {
    /// Port this selector activates.
    #[must_use]
    pub const fn port(self) -> SensorPort {
        match self {
            Self::Sensor1 => SensorPort(1),
            Self::Sensor2 => SensorPort(2),
            Self::Sensor3 => SensorPort(3),
            Self::Sensor4 => SensorPort(4),
        }
    }
}

/// Configurable sensor property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyId {
    /// Analog gain (integer).
    Gain,
    /// Exposure time in milliseconds (floating point).
    ExposureTime,
    /// Automatic gain control (boolean).
    AutoGain,
}

impl PropertyId {
    /// Type the property is expected to have on every sensor.
    #[must_use]
    pub const fn expected_kind(self) -> PropertyKind {
        match self {
            Self::Gain => PropertyKind::Int,
            Self::ExposureTime => PropertyKind::Float,
            Self::AutoGain => PropertyKind::Bool,
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gain => "Gain",
            Self::ExposureTime => "Exposure Time (ms)",
            Self::AutoGain => "Auto Gain",
        };
        f.write_str(name)
    }
}

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Signed integer.
    Int,
    /// Floating point.
    Float,
    /// Boolean.
    Bool,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        })
    }
}

/// A typed property value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    /// Integer value.
    Int(i32),
    /// Floating point value.
    Float(f32),
    /// Boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// Type of the value.
    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        match self {
            Self::Int(_) => PropertyKind::Int,
            Self::Float(_) => PropertyKind::Float,
            Self::Bool(_) => PropertyKind::Bool,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:.3}"),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for PropertyValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Valid range and default of a property, as reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyAttributes {
    /// Integer range.
    Int {
        /// Smallest accepted value.
        min: i32,
        /// Largest accepted value.
        max: i32,
        /// Power-on default.
        default: i32,
    },
    /// Floating point range.
    Float {
        /// Smallest accepted value.
        min: f32,
        /// Largest accepted value.
        max: f32,
        /// Power-on default.
        default: f32,
    },
    /// Boolean range (`false < true`).
    Bool {
        /// Smallest accepted value.
        min: bool,
        /// Largest accepted value.
        max: bool,
        /// Power-on default.
        default: bool,
    },
}

impl PropertyAttributes {
    /// Type the range applies to.
    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        match self {
            Self::Int { .. } => PropertyKind::Int,
            Self::Float { .. } => PropertyKind::Float,
            Self::Bool { .. } => PropertyKind::Bool,
        }
    }

    /// Lower bound as a value.
    #[must_use]
    pub const fn min_value(&self) -> PropertyValue {
        match *self {
            Self::Int { min, .. } => PropertyValue::Int(min),
            Self::Float { min, .. } => PropertyValue::Float(min),
            Self::Bool { min, .. } => PropertyValue::Bool(min),
        }
    }

    /// Upper bound as a value.
    #[must_use]
    pub const fn max_value(&self) -> PropertyValue {
        match *self {
            Self::Int { max, .. } => PropertyValue::Int(max),
            Self::Float { max, .. } => PropertyValue::Float(max),
            Self::Bool { max, .. } => PropertyValue::Bool(max),
        }
    }

    /// Default as a value.
    #[must_use]
    pub const fn default_value(&self) -> PropertyValue {
        match *self {
            Self::Int { default, .. } => PropertyValue::Int(default),
            Self::Float { default, .. } => PropertyValue::Float(default),
            Self::Bool { default, .. } => PropertyValue::Bool(default),
        }
    }

    /// Whether `value` lies in `[min, max]`, or `None` if the types differ.
    ///
    /// NaN is never in range.
    #[must_use]
    pub fn contains(&self, value: &PropertyValue) -> Option<bool> {
        match (*self, *value) {
            (Self::Int { min, max, .. }, PropertyValue::Int(v)) => Some((min..=max).contains(&v)),
            (Self::Float { min, max, .. }, PropertyValue::Float(v)) => {
                Some((min..=max).contains(&v))
            }
            (Self::Bool { min, max, .. }, PropertyValue::Bool(v)) => Some(min <= v && v <= max),
            _ => None,
        }
    }
}

/// Static description of a property on the active sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Declared type.
    pub kind: PropertyKind,
    /// Human-readable name reported by the device.
    pub description: String,
}

/// A source frame locked in the driver's buffer pool.
///
/// The buffer stays owned by the driver. The token must be handed back through
/// [`CameraDriver::unlock_frame`] exactly once, which consumes it.
#[derive(Debug)]
pub struct LockedFrame {
    token: u64,
    port: SensorPort,
    format: ImageFormat,
    pitch: usize,
    frames_dropped: u32,
    sequence: u64,
}

impl LockedFrame {
    /// Describe a frame the driver just locked.
    #[must_use]
    pub const fn new(token: u64, port: SensorPort, format: ImageFormat, pitch: usize) -> Self {
        Self {
            token,
            port,
            format,
            pitch,
            frames_dropped: 0,
            sequence: 0,
        }
    }

    /// Record frames dropped since the previous lock on this port.
    #[must_use]
    pub const fn with_frames_dropped(mut self, frames_dropped: u32) -> Self {
        self.frames_dropped = frames_dropped;
        self
    }

    /// Record the driver sequence number of the frame.
    #[must_use]
    pub const fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Driver token identifying the locked buffer.
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }

    /// Port the frame came from.
    #[must_use]
    pub const fn port(&self) -> SensorPort {
        self.port
    }

    /// Source format of the frame.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    /// Bytes between row starts in the source buffer.
    #[must_use]
    pub const fn pitch(&self) -> usize {
        self.pitch
    }

    /// Frames dropped since the previous lock on this port.
    #[must_use]
    pub const fn frames_dropped(&self) -> u32 {
        self.frames_dropped
    }

    /// Driver sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// A converted image whose rows may be padded.
#[derive(Debug, Clone)]
pub struct StridedImage {
    /// Format of the pixel data.
    pub format: ImageFormat,
    /// Bytes between row starts, at least `format.row_bytes()`.
    pub pitch: usize,
    /// Pixel data, `pitch * height` bytes.
    pub data: Vec<u8>,
}

/// Packed image handed to downstream consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row, always `width * bytes_per_pixel`.
    pub step: usize,
    /// Color encoding of `data`.
    pub encoding: ColorFormat,
    /// Packed pixel data, `height * step` bytes.
    pub data: Vec<u8>,
    /// Capture trigger time supplied by the caller.
    pub timestamp: DateTime<Utc>,
    /// Frame identifier supplied by the caller.
    pub frame_id: String,
}

impl Default for OutputImage {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            step: 0,
            encoding: ColorFormat::Bgr24,
            data: Vec::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            frame_id: String::new(),
        }
    }
}

impl OutputImage {
    /// Raw bytes of the pixel at (`x`, `y`), `None` if out of bounds.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.encoding.bytes_per_pixel();
        let offset = y as usize * self.step + x as usize * bpp;
        self.data.get(offset..offset + bpp)
    }
}

/// Capability surface of the vendor driver.
///
/// Property calls address whichever sensor was last selected with
/// [`CameraDriver::set_active_sensor`]. All calls are synchronous.
pub trait CameraDriver {
    /// Identification of the opened device.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Turn on driver-level call logging.
    fn enable_logging(&mut self) {}

    /// Write the active-sensor register.
    fn set_active_sensor(&mut self, selector: SensorSelect) -> Result<()>;

    /// Format the sensor on `port` natively produces.
    fn source_format(&mut self, port: SensorPort) -> Result<ImageFormat>;

    /// Formats the device can convert frames from `port` into, in device order.
    fn target_formats(&mut self, port: SensorPort) -> Result<Vec<ImageFormat>>;

    /// Declared type and description of a property on the active sensor.
    fn property_info(&mut self, property: PropertyId) -> Result<PropertyInfo>;

    /// Valid range of a property on the active sensor.
    ///
    /// Returns [`CameraError::PropertyUnsupported`] if the sensor has no such
    /// property at all.
    fn property_attributes(&mut self, property: PropertyId) -> Result<PropertyAttributes>;

    /// Whether the active sensor supports writing the property.
    fn property_supported(&mut self, property: PropertyId) -> Result<bool>;

    /// Current value of a property on the active sensor.
    fn property_value(&mut self, property: PropertyId) -> Result<PropertyValue>;

    /// Write a property on the active sensor.
    fn set_property(&mut self, property: PropertyId, value: PropertyValue) -> Result<()>;

    /// Reset the frame counters of all sensors.
    fn reset_frame_counter(&mut self) -> Result<()>;

    /// Start streaming.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming.
    fn stop(&mut self) -> Result<()>;

    /// Lock the next frame from `port`, waiting at most `timeout`.
    ///
    /// Returns [`CameraError::AcquisitionTimeout`] if no frame arrived.
    fn lock_next_frame(&mut self, port: SensorPort, timeout: Duration) -> Result<LockedFrame>;

    /// Convert a locked frame into `target`, returning a freshly allocated image.
    fn convert_frame(&mut self, frame: &LockedFrame, target: &ImageFormat) -> Result<StridedImage>;

    /// Return a locked frame to the driver.
    fn unlock_frame(&mut self, frame: LockedFrame) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range() {
        for number in 1..=4 {
            let port = SensorPort::new(number).expect("port should be valid");
            assert_eq!(port.number(), number);
            assert_eq!(port.selector().port(), port);
        }
        assert!(matches!(SensorPort::new(0), Err(CameraError::InvalidPort(0))));
        assert!(matches!(SensorPort::new(5), Err(CameraError::InvalidPort(5))));
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(ColorFormat::from_fourcc(*b"BGR3"), Some(ColorFormat::Bgr24));
        assert_eq!(ColorFormat::from_fourcc(*b"MJPG"), None);
        let fourcc: v4l::FourCC = ColorFormat::Yuyv.into();
        assert_eq!(ColorFormat::try_from(fourcc).ok(), Some(ColorFormat::Yuyv));
    }

    #[test]
    fn test_attributes_contains() {
        let gain = PropertyAttributes::Int {
            min: 0,
            max: 24,
            default: 4,
        };
        assert_eq!(gain.contains(&PropertyValue::Int(0)), Some(true));
        assert_eq!(gain.contains(&PropertyValue::Int(24)), Some(true));
        assert_eq!(gain.contains(&PropertyValue::Int(25)), Some(false));
        assert_eq!(gain.contains(&PropertyValue::Float(1.0)), None);

        let exposure = PropertyAttributes::Float {
            min: 0.1,
            max: 100.0,
            default: 10.0,
        };
        assert_eq!(exposure.contains(&PropertyValue::Float(f32::NAN)), Some(false));

        let locked_on = PropertyAttributes::Bool {
            min: true,
            max: true,
            default: true,
        };
        assert_eq!(locked_on.contains(&PropertyValue::Bool(false)), Some(false));
    }

    #[test]
    fn test_output_pixel_at() {
        let image = OutputImage {
            width: 2,
            height: 2,
            step: 6,
            data: (0..12).collect(),
            ..OutputImage::default()
        };
        assert_eq!(image.pixel_at(1, 1), Some(&[9u8, 10, 11][..]));
        assert_eq!(image.pixel_at(2, 0), None);
    }
}
