//! V4L2 driver implementation using the v4l crate.
//!
//! Each sensor port is backed by its own video node. The active-sensor
//! register selects which node receives property calls. Frames are dequeued
//! from an mmap stream per node and copied out so the kernel buffer can be
//! requeued immediately; the copy stays locked until [`CameraDriver::unlock_frame`].

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::control::{self, Control, Description, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream as V4lCaptureStream, Stream as V4lStream};
use v4l::video::Capture;
use v4l::Device;

use crate::config::V4l2Settings;
use crate::convert::{self, aligned_pitch, conversions_from, ROW_ALIGNMENT};
use crate::error::{CameraError, Result};
use crate::traits::{
    CameraDriver, ColorFormat, DeviceCapabilities, ImageFormat, LockedFrame, PropertyAttributes,
    PropertyId, PropertyInfo, PropertyKind, PropertyValue, SensorPort, SensorSelect, StridedImage,
};

/// `V4L2_CID_AUTOGAIN`
pub const CID_AUTOGAIN: u32 = 0x0098_0912;
/// `V4L2_CID_GAIN`
pub const CID_GAIN: u32 = 0x0098_0913;
/// `V4L2_CID_EXPOSURE_ABSOLUTE`, in units of 100 µs.
pub const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// Exposure control units per millisecond.
const EXPOSURE_UNITS_PER_MS: f32 = 10.0;

/// A video node found on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node index, `N` in `/dev/videoN`.
    pub index: usize,
    /// Device path.
    pub path: PathBuf,
    /// Card name, if the node reports one.
    pub name: Option<String>,
}

/// List the video nodes present on the system.
pub fn list_devices() -> Vec<NodeInfo> {
    let mut nodes: Vec<_> = v4l::context::enum_devices()
        .into_iter()
        .map(|node| NodeInfo {
            index: node.index(),
            path: node.path().to_path_buf(),
            name: node.name(),
        })
        .collect();
    nodes.sort_by_key(|node| node.index);
    nodes
}

const fn control_id(property: PropertyId) -> u32 {
    match property {
        PropertyId::Gain => CID_GAIN,
        PropertyId::ExposureTime => CID_EXPOSURE_ABSOLUTE,
        PropertyId::AutoGain => CID_AUTOGAIN,
    }
}

fn saturate(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

#[allow(clippy::cast_precision_loss)]
fn units_to_ms(units: i64) -> f32 {
    units as f32 / EXPOSURE_UNITS_PER_MS
}

#[allow(clippy::cast_possible_truncation)]
fn ms_to_units(ms: f32) -> i64 {
    (ms * EXPOSURE_UNITS_PER_MS).round() as i64
}

fn io_error(call: &'static str, err: &io::Error) -> CameraError {
    CameraError::sdk(call, err)
}

struct SensorNode {
    path: PathBuf,
    device: Device,
    format: ImageFormat,
    pitch: usize,
    controls: Vec<Description>,
    stream: Option<Stream<'static>>,
    last_sequence: Option<u32>,
}

impl SensorNode {
    fn open(path: &Path) -> Result<Self> {
        let device = Device::with_path(path).map_err(|err| {
            CameraError::DeviceOpenFailed(format!("{}: {err}", path.display()))
        })?;
        let controls = device.query_controls().unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "Failed to query controls");
            Vec::new()
        });
        let mut node = Self {
            path: path.to_path_buf(),
            device,
            format: ImageFormat::new(0, 0, ColorFormat::Gray8),
            pitch: 0,
            controls,
            stream: None,
            last_sequence: None,
        };
        node.refresh_format()?;
        Ok(node)
    }

    fn refresh_format(&mut self) -> Result<()> {
        let fmt = self
            .device
            .format()
            .map_err(|err| io_error("VIDIOC_G_FMT", &err))?;
        let color = ColorFormat::try_from(fmt.fourcc)?;
        self.format = ImageFormat::new(fmt.width, fmt.height, color);
        self.pitch = (fmt.stride as usize).max(self.format.row_bytes());
        Ok(())
    }

    fn control(&self, property: PropertyId) -> Option<&Description> {
        let id = control_id(property);
        self.controls.iter().find(|desc| desc.id == id)
    }
}

struct HeldFrame {
    data: Vec<u8>,
}

/// V4L2 driver over one video node per sensor port.
pub struct V4l2Driver {
    capabilities: DeviceCapabilities,
    nodes: BTreeMap<SensorPort, SensorNode>,
    active: Option<SensorSelect>,
    buffer_count: u32,
    logging: bool,
    next_token: u64,
    locked: HashMap<u64, HeldFrame>,
}

impl V4l2Driver {
    /// Open the video node of every configured sensor.
    ///
    /// Capabilities are taken from the node with the lowest port number.
    pub fn open(settings: &V4l2Settings) -> Result<Self> {
        if settings.sensors.is_empty() {
            return Err(CameraError::DeviceOpenFailed(
                "no V4L2 sensor nodes configured".to_owned(),
            ));
        }

        let mut nodes = BTreeMap::new();
        for sensor in &settings.sensors {
            let port = SensorPort::new(sensor.port)?;
            let node = SensorNode::open(&sensor.path)?;
            info!(
                port = port.number(),
                path = %sensor.path.display(),
                format = %node.format,
                pitch = node.pitch,
                "Sensor node opened"
            );
            nodes.insert(port, node);
        }

        let first = nodes
            .values()
            .next()
            .ok_or_else(|| CameraError::DeviceOpenFailed("no sensor nodes".to_owned()))?;
        let caps = first
            .device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        Ok(Self {
            capabilities,
            nodes,
            active: None,
            buffer_count: settings.buffer_count,
            logging: false,
            next_token: 1,
            locked: HashMap::new(),
        })
    }

    /// Request a capture format on the node of `port`.
    ///
    /// Returns the format the driver actually applied, which may differ.
    /// Must be called before acquisition starts.
    pub fn set_source_format(
        &mut self,
        port: SensorPort,
        format: &ImageFormat,
    ) -> Result<ImageFormat> {
        let node = self.node(port)?;
        let mut fmt = node
            .device
            .format()
            .map_err(|err| io_error("VIDIOC_G_FMT", &err))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.color.into();

        node.device
            .set_format(&fmt)
            .map_err(|err| io_error("VIDIOC_S_FMT", &err))?;
        node.refresh_format()?;
        info!(port = port.number(), "Source format set to {}", node.format);
        Ok(node.format)
    }

    /// Ports that have a video node.
    pub fn ports(&self) -> impl Iterator<Item = SensorPort> + '_ {
        self.nodes.keys().copied()
    }

    fn node(&mut self, port: SensorPort) -> Result<&mut SensorNode> {
        self.nodes.get_mut(&port).ok_or_else(|| {
            CameraError::sdk("sensor lookup", format!("no V4L2 node for port {port}"))
        })
    }

    fn active_node(&mut self) -> Result<&mut SensorNode> {
        let port = self
            .active
            .ok_or_else(|| CameraError::sdk("property access", "no active sensor"))?
            .port();
        self.node(port)
    }

    fn trace_call(&self, call: &str, port: Option<SensorPort>) {
        if self.logging {
            debug!(call, port = port.map(SensorPort::number), "V4L2 call");
        }
    }
}

impl CameraDriver for V4l2Driver {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn enable_logging(&mut self) {
        self.logging = true;
    }

    fn set_active_sensor(&mut self, selector: SensorSelect) -> Result<()> {
        let port = selector.port();
        self.trace_call("set_active_sensor", Some(port));
        self.node(port)?;
        self.active = Some(selector);
        Ok(())
    }

    fn source_format(&mut self, port: SensorPort) -> Result<ImageFormat> {
        self.trace_call("VIDIOC_G_FMT", Some(port));
        let node = self.node(port)?;
        node.refresh_format()?;
        Ok(node.format)
    }

    fn target_formats(&mut self, port: SensorPort) -> Result<Vec<ImageFormat>> {
        let source = self.source_format(port)?;
        Ok(conversions_from(source.color)
            .iter()
            .map(|&color| ImageFormat::new(source.width, source.height, color))
            .collect())
    }

    fn property_info(&mut self, property: PropertyId) -> Result<PropertyInfo> {
        self.trace_call("VIDIOC_QUERYCTRL", self.active.map(SensorSelect::port));
        let node = self.active_node()?;
        let Some(desc) = node.control(property) else {
            return Ok(PropertyInfo {
                kind: property.expected_kind(),
                description: property.to_string(),
            });
        };
        let kind = match (property, desc.typ) {
            (PropertyId::ExposureTime, control::Type::Integer | control::Type::Integer64) => {
                PropertyKind::Float
            }
            (_, control::Type::Boolean) => PropertyKind::Bool,
            (_, control::Type::Integer | control::Type::Integer64 | control::Type::Menu) => {
                PropertyKind::Int
            }
            (_, other) => {
                return Err(CameraError::sdk(
                    "VIDIOC_QUERYCTRL",
                    format!("control '{}' has unsupported type {other:?}", desc.name),
                ))
            }
        };
        Ok(PropertyInfo {
            kind,
            description: desc.name.clone(),
        })
    }

    fn property_attributes(&mut self, property: PropertyId) -> Result<PropertyAttributes> {
        let node = self.active_node()?;
        let desc = node
            .control(property)
            .ok_or(CameraError::PropertyUnsupported(property))?;
        Ok(match property.expected_kind() {
            PropertyKind::Int => PropertyAttributes::Int {
                min: saturate(desc.minimum),
                max: saturate(desc.maximum),
                default: saturate(desc.default),
            },
            PropertyKind::Float => PropertyAttributes::Float {
                min: units_to_ms(desc.minimum),
                max: units_to_ms(desc.maximum),
                default: units_to_ms(desc.default),
            },
            PropertyKind::Bool => PropertyAttributes::Bool {
                min: desc.minimum != 0,
                max: desc.maximum != 0,
                default: desc.default != 0,
            },
        })
    }

    fn property_supported(&mut self, property: PropertyId) -> Result<bool> {
        let node = self.active_node()?;
        Ok(node.control(property).is_some_and(|desc| {
            !desc
                .flags
                .intersects(control::Flags::DISABLED | control::Flags::READ_ONLY)
        }))
    }

    fn property_value(&mut self, property: PropertyId) -> Result<PropertyValue> {
        self.trace_call("VIDIOC_G_CTRL", self.active.map(SensorSelect::port));
        let node = self.active_node()?;
        if node.control(property).is_none() {
            return Err(CameraError::PropertyUnsupported(property));
        }
        let control = node
            .device
            .control(control_id(property))
            .map_err(|err| io_error("VIDIOC_G_CTRL", &err))?;
        let raw = match control.value {
            Value::Integer(value) => value,
            Value::Boolean(value) => i64::from(value),
            other => {
                return Err(CameraError::sdk(
                    "VIDIOC_G_CTRL",
                    format!("unexpected value {other:?} for {property}"),
                ))
            }
        };
        Ok(match property.expected_kind() {
            PropertyKind::Int => PropertyValue::Int(saturate(raw)),
            PropertyKind::Float => PropertyValue::Float(units_to_ms(raw)),
            PropertyKind::Bool => PropertyValue::Bool(raw != 0),
        })
    }

    fn set_property(&mut self, property: PropertyId, value: PropertyValue) -> Result<()> {
        self.trace_call("VIDIOC_S_CTRL", self.active.map(SensorSelect::port));
        let node = self.active_node()?;
        let desc = node
            .control(property)
            .ok_or(CameraError::PropertyUnsupported(property))?;
        let value = match (value, desc.typ) {
            (PropertyValue::Bool(flag), control::Type::Boolean) => Value::Boolean(flag),
            (PropertyValue::Bool(flag), _) => Value::Integer(i64::from(flag)),
            (PropertyValue::Int(raw), _) => Value::Integer(i64::from(raw)),
            (PropertyValue::Float(ms), _) => Value::Integer(ms_to_units(ms)),
        };
        node.device
            .set_control(Control {
                id: control_id(property),
                value,
            })
            .map_err(|err| io_error("VIDIOC_S_CTRL", &err))
    }

    fn reset_frame_counter(&mut self) -> Result<()> {
        for node in self.nodes.values_mut() {
            node.last_sequence = None;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let buffer_count = self.buffer_count;
        for (port, node) in &mut self.nodes {
            node.refresh_format()?;
            let stream = Stream::with_buffers(&node.device, Type::VideoCapture, buffer_count)
                .map_err(|err| io_error("VIDIOC_REQBUFS", &err))?;
            debug!(
                port = port.number(),
                path = %node.path.display(),
                buffer_count,
                "Stream created"
            );
            node.stream = Some(stream);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut result = Ok(());
        for (port, node) in &mut self.nodes {
            if let Some(mut stream) = node.stream.take() {
                if let Err(err) = stream.stop() {
                    warn!(port = port.number(), error = %err, "Failed to stop stream");
                    result = Err(io_error("VIDIOC_STREAMOFF", &err));
                }
            }
        }
        result
    }

    fn lock_next_frame(&mut self, port: SensorPort, timeout: Duration) -> Result<LockedFrame> {
        self.trace_call("VIDIOC_DQBUF", Some(port));
        let node = self.node(port)?;
        let format = node.format;
        let pitch = node.pitch;
        let stream = node
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::sdk("VIDIOC_DQBUF", "acquisition not started"))?;
        stream.set_timeout(timeout);

        let (data, sequence) = match stream.next() {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                (buf.get(..used).unwrap_or(buf).to_vec(), meta.sequence)
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                return Err(CameraError::AcquisitionTimeout { port, timeout });
            }
            Err(err) => return Err(io_error("VIDIOC_DQBUF", &err)),
        };

        let frames_dropped = node
            .last_sequence
            .map_or(0, |last| sequence.wrapping_sub(last).saturating_sub(1));
        node.last_sequence = Some(sequence);

        let token = self.next_token;
        self.next_token += 1;
        self.locked.insert(token, HeldFrame { data });
        Ok(LockedFrame::new(token, port, format, pitch)
            .with_frames_dropped(frames_dropped)
            .with_sequence(u64::from(sequence)))
    }

    fn convert_frame(&mut self, frame: &LockedFrame, target: &ImageFormat) -> Result<StridedImage> {
        let held = self
            .locked
            .get(&frame.token())
            .ok_or(CameraError::UnknownFrame(frame.token()))?;
        convert::convert(
            &held.data,
            &frame.format(),
            frame.pitch(),
            target,
            aligned_pitch(target.row_bytes(), ROW_ALIGNMENT),
        )
    }

    fn unlock_frame(&mut self, frame: LockedFrame) -> Result<()> {
        self.locked
            .remove(&frame.token())
            .map(|_| ())
            .ok_or(CameraError::UnknownFrame(frame.token()))
    }
}
