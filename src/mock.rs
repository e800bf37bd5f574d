//! Mock driver for testing without hardware.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use crate::convert::{self, yuv_to_rgb};
use crate::error::{CameraError, Result};
use crate::traits::{
    CameraDriver, ColorFormat, DeviceCapabilities, ImageFormat, LockedFrame, PropertyAttributes,
    PropertyId, PropertyInfo, PropertyKind, PropertyValue, SensorPort, SensorSelect, StridedImage,
};

/// Filler written into row padding of generated frames.
pub const PADDING_BYTE: u8 = 0xEE;

/// Default padding after each source row, in bytes.
const DEFAULT_ROW_PADDING: usize = 32;

/// Default padding after each converted row, in bytes.
const DEFAULT_TARGET_PADDING: usize = 16;

/// Number of driver calls made, per call type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `set_active_sensor` calls.
    pub set_active_sensor: usize,
    /// `property_info` calls.
    pub property_info: usize,
    /// `property_attributes` calls.
    pub property_attributes: usize,
    /// `property_supported` calls.
    pub property_supported: usize,
    /// `set_property` calls.
    pub set_property: usize,
    /// `lock_next_frame` calls.
    pub lock: usize,
    /// `convert_frame` calls.
    pub convert: usize,
    /// `unlock_frame` calls.
    pub unlock: usize,
    /// `reset_frame_counter` calls.
    pub reset_frame_counter: usize,
    /// `start` calls.
    pub start: usize,
    /// `stop` calls.
    pub stop: usize,
}

/// A property as the mock sensor reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct MockProperty {
    /// Type returned by `property_info`.
    pub reported_kind: PropertyKind,
    /// Range returned by `property_attributes`; `None` means the sensor has no
    /// such property.
    pub attributes: Option<PropertyAttributes>,
    /// Whether writes are supported.
    pub supported: bool,
    /// Current value.
    pub value: PropertyValue,
}

impl MockProperty {
    /// Supported property holding its default.
    #[must_use]
    pub const fn new(attributes: PropertyAttributes) -> Self {
        Self {
            reported_kind: attributes.kind(),
            attributes: Some(attributes),
            supported: true,
            value: attributes.default_value(),
        }
    }

    /// Property the sensor does not have at all.
    #[must_use]
    pub const fn absent(kind: PropertyKind, value: PropertyValue) -> Self {
        Self {
            reported_kind: kind,
            attributes: None,
            supported: false,
            value,
        }
    }

    /// Mark the property as not writable.
    #[must_use]
    pub const fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    /// Make `property_info` report a different type.
    #[must_use]
    pub const fn reporting_kind(mut self, kind: PropertyKind) -> Self {
        self.reported_kind = kind;
        self
    }
}

/// A source frame waiting in the mock's queue.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    /// Strided pixel data.
    pub data: Vec<u8>,
    /// Bytes between row starts.
    pub pitch: usize,
    /// Drop count reported when this frame is locked.
    pub frames_dropped: u32,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
    /// Every byte of row `r` set to [`row_marker`]`(r)`.
    RowMarkers,
}

#[derive(Debug, Clone)]
struct MockSensor {
    source_format: ImageFormat,
    target_formats: Vec<ImageFormat>,
    properties: BTreeMap<PropertyId, MockProperty>,
    frames: VecDeque<SourceFrame>,
    pattern: Option<TestPattern>,
    row_padding: usize,
    sequence: u64,
}

impl MockSensor {
    fn new(source_format: ImageFormat) -> Self {
        let properties = [
            (
                PropertyId::Gain,
                MockProperty::new(PropertyAttributes::Int {
                    min: 0,
                    max: 24,
                    default: 4,
                }),
            ),
            (
                PropertyId::ExposureTime,
                MockProperty::new(PropertyAttributes::Float {
                    min: 0.1,
                    max: 100.0,
                    default: 10.0,
                }),
            ),
            (
                PropertyId::AutoGain,
                MockProperty::new(PropertyAttributes::Bool {
                    min: false,
                    max: true,
                    default: false,
                }),
            ),
        ]
        .into_iter()
        .collect();

        Self {
            source_format,
            target_formats: default_targets(source_format),
            properties,
            frames: VecDeque::new(),
            pattern: Some(TestPattern::ColorBars),
            row_padding: DEFAULT_ROW_PADDING,
            sequence: 0,
        }
    }

    const fn pitch(&self) -> usize {
        self.source_format.row_bytes() + self.row_padding
    }
}

fn default_targets(source: ImageFormat) -> Vec<ImageFormat> {
    convert::conversions_from(source.color)
        .iter()
        .map(|&color| ImageFormat::new(source.width, source.height, color))
        .collect()
}

/// Mock driver for testing without hardware.
///
/// Four sensors on ports 1 to 4, each producing 640x480 YUYV color bars with
/// padded rows unless configured otherwise.
pub struct MockDriver {
    capabilities: DeviceCapabilities,
    sensors: BTreeMap<SensorPort, MockSensor>,
    active: Option<SensorSelect>,
    running: bool,
    logging: bool,
    fail_conversion: bool,
    target_padding: usize,
    next_token: u64,
    locked: HashMap<u64, SourceFrame>,
    calls: CallCounts,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a new mock driver with default settings.
    #[must_use]
    pub fn new() -> Self {
        let format = ImageFormat::new(640, 480, ColorFormat::Yuyv);
        let sensors = (1..=4)
            .filter_map(|number| SensorPort::new(number).ok())
            .map(|port| (port, MockSensor::new(format)))
            .collect();

        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Stereo Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            sensors,
            active: None,
            running: false,
            logging: false,
            fail_conversion: false,
            target_padding: DEFAULT_TARGET_PADDING,
            next_token: 1,
            locked: HashMap::new(),
            calls: CallCounts::default(),
        }
    }

    fn sensor_entry(&mut self, port: SensorPort) -> &mut MockSensor {
        self.sensors
            .entry(port)
            .or_insert_with(|| MockSensor::new(ImageFormat::new(640, 480, ColorFormat::Yuyv)))
    }

    /// Set the source format of a sensor. Its target list becomes every
    /// conversion available from that format.
    #[must_use]
    pub fn with_source_format(mut self, port: SensorPort, format: ImageFormat) -> Self {
        let sensor = self.sensor_entry(port);
        sensor.source_format = format;
        sensor.target_formats = default_targets(format);
        self
    }

    /// Replace the enumerated target formats of a sensor.
    #[must_use]
    pub fn with_target_formats(mut self, port: SensorPort, formats: Vec<ImageFormat>) -> Self {
        self.sensor_entry(port).target_formats = formats;
        self
    }

    /// Replace one property of a sensor.
    #[must_use]
    pub fn with_property(
        mut self,
        port: SensorPort,
        property: PropertyId,
        mock: MockProperty,
    ) -> Self {
        self.sensor_entry(port).properties.insert(property, mock);
        self
    }

    /// Pattern generated when the frame queue is empty; `None` makes every
    /// lock on an empty queue time out.
    #[must_use]
    pub fn with_pattern(mut self, port: SensorPort, pattern: Option<TestPattern>) -> Self {
        self.sensor_entry(port).pattern = pattern;
        self
    }

    /// Padding after each source row of generated frames.
    #[must_use]
    pub fn with_row_padding(mut self, port: SensorPort, padding: usize) -> Self {
        self.sensor_entry(port).row_padding = padding;
        self
    }

    /// Padding after each row of converted images.
    #[must_use]
    pub const fn with_target_padding(mut self, padding: usize) -> Self {
        self.target_padding = padding;
        self
    }

    /// Queue an explicit frame, served before any generated one.
    #[must_use]
    pub fn with_frame(mut self, port: SensorPort, frame: SourceFrame) -> Self {
        self.sensor_entry(port).frames.push_back(frame);
        self
    }

    /// Make every conversion fail.
    #[must_use]
    pub const fn with_conversion_failure(mut self) -> Self {
        self.fail_conversion = true;
        self
    }

    /// Calls made so far.
    #[must_use]
    pub const fn calls(&self) -> &CallCounts {
        &self.calls
    }

    /// Current value of the active-sensor register.
    #[must_use]
    pub const fn active_sensor(&self) -> Option<SensorSelect> {
        self.active
    }

    /// State of a property on a sensor.
    #[must_use]
    pub fn property(&self, port: SensorPort, property: PropertyId) -> Option<&MockProperty> {
        self.sensors.get(&port)?.properties.get(&property)
    }

    /// Frames locked and not yet unlocked.
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.locked.len()
    }

    /// Whether driver logging was switched on.
    #[must_use]
    pub const fn logging_enabled(&self) -> bool {
        self.logging
    }

    /// Whether the driver is streaming.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    fn active_property(&mut self, property: PropertyId) -> Result<&mut MockProperty> {
        let port = self
            .active
            .ok_or_else(|| CameraError::sdk("property access", "no active sensor"))?
            .port();
        self.sensors
            .get_mut(&port)
            .and_then(|sensor| sensor.properties.get_mut(&property))
            .ok_or(CameraError::PropertyUnsupported(property))
    }

    fn sensor(&mut self, port: SensorPort) -> Result<&mut MockSensor> {
        self.sensors
            .get_mut(&port)
            .ok_or_else(|| CameraError::sdk("sensor lookup", format!("no sensor on port {port}")))
    }
}

impl CameraDriver for MockDriver {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn enable_logging(&mut self) {
        self.logging = true;
    }

    fn set_active_sensor(&mut self, selector: SensorSelect) -> Result<()> {
        self.calls.set_active_sensor += 1;
        self.active = Some(selector);
        Ok(())
    }

    fn source_format(&mut self, port: SensorPort) -> Result<ImageFormat> {
        Ok(self.sensor(port)?.source_format)
    }

    fn target_formats(&mut self, port: SensorPort) -> Result<Vec<ImageFormat>> {
        Ok(self.sensor(port)?.target_formats.clone())
    }

    fn property_info(&mut self, property: PropertyId) -> Result<PropertyInfo> {
        self.calls.property_info += 1;
        let kind = self.active_property(property)?.reported_kind;
        Ok(PropertyInfo {
            kind,
            description: property.to_string(),
        })
    }

    fn property_attributes(&mut self, property: PropertyId) -> Result<PropertyAttributes> {
        self.calls.property_attributes += 1;
        self.active_property(property)?
            .attributes
            .ok_or(CameraError::PropertyUnsupported(property))
    }

    fn property_supported(&mut self, property: PropertyId) -> Result<bool> {
        self.calls.property_supported += 1;
        Ok(self.active_property(property)?.supported)
    }

    fn property_value(&mut self, property: PropertyId) -> Result<PropertyValue> {
        Ok(self.active_property(property)?.value)
    }

    fn set_property(&mut self, property: PropertyId, value: PropertyValue) -> Result<()> {
        self.calls.set_property += 1;
        let mock = self.active_property(property)?;
        if !mock.supported {
            return Err(CameraError::PropertyUnsupported(property));
        }
        mock.value = value;
        Ok(())
    }

    fn reset_frame_counter(&mut self) -> Result<()> {
        self.calls.reset_frame_counter += 1;
        for sensor in self.sensors.values_mut() {
            sensor.sequence = 0;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.calls.start += 1;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.calls.stop += 1;
        self.running = false;
        Ok(())
    }

    fn lock_next_frame(&mut self, port: SensorPort, timeout: Duration) -> Result<LockedFrame> {
        self.calls.lock += 1;
        if !self.running {
            return Err(CameraError::sdk("lock_next_frame", "acquisition not started"));
        }

        let sensor = self.sensor(port)?;
        let format = sensor.source_format;
        let frame = match (sensor.frames.pop_front(), sensor.pattern) {
            (Some(frame), _) => frame,
            (None, Some(pattern)) => {
                let pitch = sensor.pitch();
                SourceFrame {
                    data: generate_test_frame(&format, pitch, pattern),
                    pitch,
                    frames_dropped: 0,
                }
            }
            (None, None) => {
                std::thread::sleep(timeout);
                return Err(CameraError::AcquisitionTimeout { port, timeout });
            }
        };
        let sequence = sensor.sequence;
        sensor.sequence += 1;

        let token = self.next_token;
        self.next_token += 1;
        let locked = LockedFrame::new(token, port, format, frame.pitch)
            .with_frames_dropped(frame.frames_dropped)
            .with_sequence(sequence);
        self.locked.insert(token, frame);
        Ok(locked)
    }

    fn convert_frame(&mut self, frame: &LockedFrame, target: &ImageFormat) -> Result<StridedImage> {
        self.calls.convert += 1;
        if self.fail_conversion {
            return Err(CameraError::ConversionFailed("simulated failure".to_owned()));
        }
        let source = self
            .locked
            .get(&frame.token())
            .ok_or(CameraError::UnknownFrame(frame.token()))?;
        convert::convert(
            &source.data,
            &frame.format(),
            frame.pitch(),
            target,
            target.row_bytes() + self.target_padding,
        )
    }

    fn unlock_frame(&mut self, frame: LockedFrame) -> Result<()> {
        self.calls.unlock += 1;
        self.locked
            .remove(&frame.token())
            .map(|_| ())
            .ok_or(CameraError::UnknownFrame(frame.token()))
    }
}

/// Marker byte of row `row` in [`TestPattern::RowMarkers`] frames.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn row_marker(row: usize) -> u8 {
    (row % 251) as u8
}

/// YUV values of the eight SMPTE bars: White, Yellow, Cyan, Green, Magenta,
/// Red, Blue, Black.
const COLOR_BARS_YUV: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

/// Generate a strided frame in `format` with rows `pitch` bytes apart.
///
/// Row padding is filled with [`PADDING_BYTE`].
pub fn generate_test_frame(format: &ImageFormat, pitch: usize, pattern: TestPattern) -> Vec<u8> {
    let height = format.height as usize;
    let row_bytes = format.row_bytes();
    let mut data = vec![PADDING_BYTE; pitch * height];

    for (y, row) in data.chunks_exact_mut(pitch).enumerate() {
        let Some(pixels) = row.get_mut(..row_bytes) else {
            continue;
        };
        match pattern {
            TestPattern::RowMarkers => pixels.fill(row_marker(y)),
            _ => fill_row(pixels, format, pattern),
        }
    }

    data
}

fn pixel_yuv(pattern: TestPattern, x: u32, width: u32) -> (u8, u8, u8) {
    match pattern {
        TestPattern::ColorBars => {
            let bar_width = (width / 8).max(1);
            let index = (x / bar_width).min(7) as usize;
            COLOR_BARS_YUV.get(index).copied().unwrap_or((16, 128, 128))
        }
        TestPattern::Gradient => {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width.max(1)) as u8;
            (y_val, 128, 128)
        }
        TestPattern::Solid(y, u, v) => (y, u, v),
        TestPattern::RowMarkers => (0, 0, 0),
    }
}

fn fill_row(pixels: &mut [u8], format: &ImageFormat, pattern: TestPattern) {
    let width = format.width;
    match format.color {
        ColorFormat::Yuyv => {
            for (pair, x) in pixels.chunks_exact_mut(4).zip((0..width).step_by(2)) {
                let (y_val, u, v) = pixel_yuv(pattern, x, width);
                pair.copy_from_slice(&[y_val, u, y_val, v]);
            }
        }
        ColorFormat::Gray8 | ColorFormat::BayerRggb8 => {
            for (luma, x) in pixels.iter_mut().zip(0..width) {
                *luma = pixel_yuv(pattern, x, width).0;
            }
        }
        ColorFormat::Rgb24 | ColorFormat::Bgr24 => {
            for (pixel, x) in pixels.chunks_exact_mut(3).zip(0..width) {
                let (y_val, u, v) = pixel_yuv(pattern, x, width);
                let (r, g, b) = yuv_to_rgb(y_val, u, v);
                if format.color == ColorFormat::Bgr24 {
                    pixel.copy_from_slice(&[b, g, r]);
                } else {
                    pixel.copy_from_slice(&[r, g, b]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(number: u32) -> SensorPort {
        SensorPort::new(number).expect("valid port")
    }

    #[test]
    fn test_mock_driver_creation() {
        let driver = MockDriver::new();
        assert_eq!(driver.capabilities().driver, "mock");
        assert!(driver.capabilities().can_capture);
        assert!(driver.capabilities().can_stream);
        assert!(!driver.is_running());
    }

    #[test]
    fn test_property_access_requires_active_sensor() {
        let mut driver = MockDriver::new();
        assert!(driver.property_value(PropertyId::Gain).is_err());

        driver
            .set_active_sensor(port(2).selector())
            .expect("set_active_sensor should succeed");
        let value = driver
            .property_value(PropertyId::Gain)
            .expect("property_value should succeed");
        assert_eq!(value, PropertyValue::Int(4));
    }

    #[test]
    fn test_lock_requires_running() {
        let mut driver = MockDriver::new();
        let result = driver.lock_next_frame(port(1), Duration::from_millis(1));
        assert!(matches!(result, Err(CameraError::Sdk { .. })));
    }

    #[test]
    fn test_lock_unlock_sequence() {
        let mut driver = MockDriver::new();
        driver.start().expect("start should succeed");

        let first = driver
            .lock_next_frame(port(1), Duration::from_millis(10))
            .expect("lock should succeed");
        assert_eq!(first.sequence(), 0);
        assert_eq!(first.pitch(), 640 * 2 + DEFAULT_ROW_PADDING);
        assert_eq!(driver.locked_count(), 1);

        let second = driver
            .lock_next_frame(port(1), Duration::from_millis(10))
            .expect("lock should succeed");
        assert_eq!(second.sequence(), 1);

        driver.unlock_frame(first).expect("unlock should succeed");
        driver.unlock_frame(second).expect("unlock should succeed");
        assert_eq!(driver.locked_count(), 0);
        assert_eq!(driver.calls().unlock, 2);
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = ImageFormat::new(640, 480, ColorFormat::Yuyv);
        let data = generate_test_frame(&format, 1280, TestPattern::ColorBars);

        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = ImageFormat::new(640, 480, ColorFormat::Yuyv);
        let data = generate_test_frame(&format, 1280, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = 479 * 640 * 2;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_row_markers_keep_padding() {
        let format = ImageFormat::new(4, 3, ColorFormat::Gray8);
        let data = generate_test_frame(&format, 6, TestPattern::RowMarkers);

        assert_eq!(&data[0..6], &[0, 0, 0, 0, PADDING_BYTE, PADDING_BYTE]);
        assert_eq!(&data[6..12], &[1, 1, 1, 1, PADDING_BYTE, PADDING_BYTE]);
        assert_eq!(&data[12..16], &[2, 2, 2, 2]);
    }

    #[test]
    fn test_solid_pattern() {
        let format = ImageFormat::new(64, 64, ColorFormat::Yuyv);
        let data = generate_test_frame(&format, 128, TestPattern::Solid(128, 64, 192));

        assert_eq!(data[0], 128);
        assert_eq!(data[2], 128);
        assert_eq!(data[1], 64);
        assert_eq!(data[3], 192);
    }
}
