//! Validate-then-apply of typed sensor properties.
//!
//! Each request is checked against the range the sensor reports for the
//! property. Out-of-range values are replaced by the sensor default and
//! unsupported properties are skipped; both cases are logged and reported in
//! the returned [`AppliedProperty`] so the caller can see what drifted.

use std::fmt;

use tracing::{error, info, warn};

use crate::error::{CameraError, Result};
use crate::session::{DeviceSession, SessionState};
use crate::traits::{CameraDriver, PropertyAttributes, PropertyId, PropertyValue, SensorPort};

/// A property value the caller wants on one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRequest {
    /// Name used in log messages, e.g. `gainLeft`.
    pub name: String,
    /// Sensor to configure.
    pub port: SensorPort,
    /// Property to write.
    pub property: PropertyId,
    /// Requested value.
    pub value: PropertyValue,
}

impl PropertyRequest {
    /// Create a request.
    pub fn new<S, V>(name: S, port: SensorPort, property: PropertyId, value: V) -> Self
    where
        S: Into<String>,
        V: Into<PropertyValue>,
    {
        Self {
            name: name.into(),
            port,
            property,
            value: value.into(),
        }
    }
}

/// End state of one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyOutcome {
    /// Written as requested.
    Applied(PropertyValue),
    /// Requested value was out of range; the sensor default was written.
    AppliedDefault {
        /// Rejected value.
        requested: PropertyValue,
        /// Default that was written instead.
        applied: PropertyValue,
        /// Lower bound reported by the sensor.
        min: PropertyValue,
        /// Upper bound reported by the sensor.
        max: PropertyValue,
    },
    /// Sensor does not support the property; nothing was written.
    Unsupported {
        /// Value that would have been written.
        requested: PropertyValue,
    },
}

impl PropertyOutcome {
    /// Value now on the sensor as a result of the request, if any was written.
    #[must_use]
    pub const fn applied_value(&self) -> Option<PropertyValue> {
        match *self {
            Self::Applied(value) | Self::AppliedDefault { applied: value, .. } => Some(value),
            Self::Unsupported { .. } => None,
        }
    }
}

/// Report for one processed request.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedProperty {
    /// Name of the request.
    pub name: String,
    /// Sensor it targeted.
    pub port: SensorPort,
    /// Property it targeted.
    pub property: PropertyId,
    /// What happened.
    pub outcome: PropertyOutcome,
}

impl fmt::Display for AppliedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            PropertyOutcome::Applied(value) => write!(f, "{} = {value}", self.name),
            PropertyOutcome::AppliedDefault {
                requested, applied, ..
            } => write!(f, "{} = {applied} (default, {requested} rejected)", self.name),
            PropertyOutcome::Unsupported { .. } => write!(f, "{} not supported", self.name),
        }
    }
}

/// Replace `value` with the default from `attributes` if it is out of range.
///
/// Returns the rejected value when a replacement happened. A value of a
/// different type than the range is an error.
pub fn sanitize(
    name: &str,
    property: PropertyId,
    value: &mut PropertyValue,
    attributes: &PropertyAttributes,
) -> Result<Option<PropertyValue>> {
    match attributes.contains(value) {
        None => Err(CameraError::PropertyTypeMismatch {
            property,
            expected: attributes.kind(),
            reported: value.kind(),
        }),
        Some(true) => Ok(None),
        Some(false) => {
            let rejected = *value;
            *value = attributes.default_value();
            warn!(
                property = name,
                min = %attributes.min_value(),
                max = %attributes.max_value(),
                rejected = %rejected,
                "Invalid value for parameter {name}, has to be in [{}, {}], but was: {rejected}",
                attributes.min_value(),
                attributes.max_value(),
            );
            warn!(property = name, default = %value, "Default will be used for {name}: {value}");
            Ok(Some(rejected))
        }
    }
}

/// Applies property requests through a configured session.
pub struct PropertyConfigurator<'a, D: CameraDriver> {
    session: &'a mut DeviceSession<D>,
}

impl<'a, D: CameraDriver> PropertyConfigurator<'a, D> {
    /// Borrow a session for configuration.
    pub fn new(session: &'a mut DeviceSession<D>) -> Self {
        Self { session }
    }

    /// Apply every request in order, stopping at the first fatal error.
    pub fn apply_all(&mut self, requests: &[PropertyRequest]) -> Result<Vec<AppliedProperty>> {
        requests.iter().map(|request| self.apply(request)).collect()
    }

    /// Activate the request's port, sanitize its value and write it if the
    /// sensor supports the property.
    pub fn apply(&mut self, request: &PropertyRequest) -> Result<AppliedProperty> {
        self.session.ensure_state(
            "configure property",
            &[SessionState::Configured, SessionState::Running],
        )?;

        let PropertyRequest {
            ref name,
            port,
            property,
            value: requested,
        } = *request;
        let expected = property.expected_kind();
        if requested.kind() != expected {
            return Err(CameraError::PropertyTypeMismatch {
                property,
                expected,
                reported: requested.kind(),
            });
        }

        self.session.activate_port(port)?;
        let driver = self.session.driver_mut();

        let info = driver.property_info(property)?;
        if info.kind != expected {
            error!(property = name.as_str(), %expected, reported = %info.kind, "Invalid type of property!");
            return Err(CameraError::PropertyTypeMismatch {
                property,
                expected,
                reported: info.kind,
            });
        }

        let attributes = match driver.property_attributes(property) {
            Ok(attributes) => Some(attributes),
            Err(CameraError::PropertyUnsupported(_)) => None,
            Err(err) => return Err(err),
        };

        let mut value = requested;
        let rejected = match &attributes {
            Some(range) => sanitize(name, property, &mut value, range)?,
            None => None,
        };

        let report = |outcome| AppliedProperty {
            name: name.clone(),
            port,
            property,
            outcome,
        };

        let Some(range) = attributes else {
            warn!(property = name.as_str(), port = port.number(), "Property '{}' not supported!", info.description);
            return Ok(report(PropertyOutcome::Unsupported { requested }));
        };
        if !driver.property_supported(property)? {
            warn!(property = name.as_str(), port = port.number(), "Property '{}' not supported!", info.description);
            return Ok(report(PropertyOutcome::Unsupported { requested }));
        }

        driver.set_property(property, value)?;
        info!(property = name.as_str(), port = port.number(), "{} changed to: {value}", info.description);

        let outcome = match rejected {
            Some(rejected) => PropertyOutcome::AppliedDefault {
                requested: rejected,
                applied: value,
                min: range.min_value(),
                max: range.max_value(),
            },
            None => PropertyOutcome::Applied(value),
        };
        Ok(report(outcome))
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::mock::{MockDriver, MockProperty};
    use crate::traits::{ColorFormat, PropertyKind};

    fn port(number: u32) -> SensorPort {
        SensorPort::new(number).expect("valid port")
    }

    fn configured(driver: MockDriver) -> DeviceSession<MockDriver> {
        let mut session = DeviceSession::open(driver);
        session
            .negotiate_target_format(port(1), ColorFormat::Bgr24)
            .expect("negotiation should succeed");
        session
    }

    fn current_value(
        session: &DeviceSession<MockDriver>,
        port_number: u32,
        property: PropertyId,
    ) -> PropertyValue {
        session
            .driver()
            .property(port(port_number), property)
            .expect("property should exist")
            .value
    }

    #[test]
    fn test_in_range_value_is_applied_unchanged() {
        let mut session = configured(MockDriver::new());
        let request = PropertyRequest::new("gainLeft", port(1), PropertyId::Gain, 12);

        let applied = PropertyConfigurator::new(&mut session)
            .apply(&request)
            .expect("apply should succeed");

        assert_eq!(applied.outcome, PropertyOutcome::Applied(PropertyValue::Int(12)));
        assert_eq!(current_value(&session, 1, PropertyId::Gain), PropertyValue::Int(12));
        assert_eq!(session.driver().calls().set_property, 1);
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let mut session = configured(MockDriver::new());
        let mut configurator = PropertyConfigurator::new(&mut session);

        for (value, name) in [(0, "gainMin"), (24, "gainMax")] {
            let request = PropertyRequest::new(name, port(1), PropertyId::Gain, value);
            let applied = configurator.apply(&request).expect("apply should succeed");
            assert_eq!(applied.outcome, PropertyOutcome::Applied(PropertyValue::Int(value)));
        }
    }

    #[test]
    #[traced_test]
    fn test_out_of_range_value_uses_default() {
        let mut session = configured(MockDriver::new());
        let request = PropertyRequest::new("gainLeft", port(1), PropertyId::Gain, 99);

        let applied = PropertyConfigurator::new(&mut session)
            .apply(&request)
            .expect("apply should succeed");

        assert_eq!(
            applied.outcome,
            PropertyOutcome::AppliedDefault {
                requested: PropertyValue::Int(99),
                applied: PropertyValue::Int(4),
                min: PropertyValue::Int(0),
                max: PropertyValue::Int(24),
            }
        );
        assert_eq!(current_value(&session, 1, PropertyId::Gain), PropertyValue::Int(4));
        assert!(logs_contain("Invalid value for parameter gainLeft, has to be in [0, 24], but was: 99"));
        assert!(logs_contain("Default will be used for gainLeft: 4"));
    }

    #[test]
    #[traced_test]
    fn test_nan_exposure_uses_default() {
        let mut session = configured(MockDriver::new());
        let request =
            PropertyRequest::new("exposureRight", port(3), PropertyId::ExposureTime, f32::NAN);

        let applied = PropertyConfigurator::new(&mut session)
            .apply(&request)
            .expect("apply should succeed");

        assert_eq!(applied.outcome.applied_value(), Some(PropertyValue::Float(10.0)));
        assert!(logs_contain("Default will be used for exposureRight"));
    }

    #[test]
    fn test_bool_outside_locked_range_uses_default() {
        let driver = MockDriver::new().with_property(
            port(1),
            PropertyId::AutoGain,
            MockProperty::new(PropertyAttributes::Bool {
                min: true,
                max: true,
                default: true,
            }),
        );
        let mut session = configured(driver);
        let request = PropertyRequest::new("autoGainLeft", port(1), PropertyId::AutoGain, false);

        let applied = PropertyConfigurator::new(&mut session)
            .apply(&request)
            .expect("apply should succeed");

        assert_eq!(applied.outcome.applied_value(), Some(PropertyValue::Bool(true)));
    }

    #[test]
    #[traced_test]
    fn test_unsupported_property_is_not_written() {
        let attributes = PropertyAttributes::Int {
            min: 0,
            max: 24,
            default: 4,
        };
        let driver = MockDriver::new().with_property(
            port(2),
            PropertyId::Gain,
            MockProperty::new(attributes).unsupported(),
        );
        let mut session = configured(driver);
        let request = PropertyRequest::new("gainRight", port(2), PropertyId::Gain, 8);

        let applied = PropertyConfigurator::new(&mut session)
            .apply(&request)
            .expect("unsupported property is not fatal");

        assert_eq!(
            applied.outcome,
            PropertyOutcome::Unsupported {
                requested: PropertyValue::Int(8)
            }
        );
        assert_eq!(session.driver().calls().set_property, 0);
        assert_eq!(current_value(&session, 2, PropertyId::Gain), PropertyValue::Int(4));
        assert!(logs_contain("Property 'Gain' not supported!"));
    }

    #[test]
    fn test_absent_property_is_skipped() {
        let driver = MockDriver::new().with_property(
            port(1),
            PropertyId::ExposureTime,
            MockProperty::absent(PropertyKind::Float, PropertyValue::Float(5.0)),
        );
        let mut session = configured(driver);
        let request =
            PropertyRequest::new("exposureLeft", port(1), PropertyId::ExposureTime, 500.0f32);

        let applied = PropertyConfigurator::new(&mut session)
            .apply(&request)
            .expect("absent property is not fatal");

        assert!(matches!(applied.outcome, PropertyOutcome::Unsupported { .. }));
        assert_eq!(session.driver().calls().set_property, 0);
        assert_eq!(
            current_value(&session, 1, PropertyId::ExposureTime),
            PropertyValue::Float(5.0)
        );
    }

    #[test]
    fn test_reported_type_mismatch_is_fatal() {
        let attributes = PropertyAttributes::Int {
            min: 0,
            max: 24,
            default: 4,
        };
        let driver = MockDriver::new().with_property(
            port(1),
            PropertyId::Gain,
            MockProperty::new(attributes).reporting_kind(PropertyKind::Float),
        );
        let mut session = configured(driver);
        let request = PropertyRequest::new("gainLeft", port(1), PropertyId::Gain, 12);

        let result = PropertyConfigurator::new(&mut session).apply(&request);

        let err = result.expect_err("type mismatch should stop configuration");
        assert!(err.is_fatal());
        assert!(matches!(err, CameraError::PropertyTypeMismatch { .. }));
        assert_eq!(session.driver().calls().set_property, 0);
    }

    #[test]
    fn test_requested_type_mismatch_is_fatal() {
        let mut session = configured(MockDriver::new());
        let request = PropertyRequest::new("gainLeft", port(1), PropertyId::Gain, 1.5f32);

        let result = PropertyConfigurator::new(&mut session).apply(&request);

        assert!(matches!(
            result,
            Err(CameraError::PropertyTypeMismatch {
                expected: PropertyKind::Int,
                reported: PropertyKind::Float,
                ..
            })
        ));
    }

    #[test]
    fn test_requires_negotiated_session() {
        let mut session = DeviceSession::open(MockDriver::new());
        let request = PropertyRequest::new("gainLeft", port(1), PropertyId::Gain, 12);

        let result = PropertyConfigurator::new(&mut session).apply(&request);

        assert!(matches!(result, Err(CameraError::InvalidState { .. })));
    }

    #[test]
    fn test_each_request_targets_its_own_port() {
        let mut session = configured(MockDriver::new());
        let requests = [
            PropertyRequest::new("gainLeft", port(1), PropertyId::Gain, 10),
            PropertyRequest::new("gainRight", port(3), PropertyId::Gain, 20),
            PropertyRequest::new("exposureLeft", port(1), PropertyId::ExposureTime, 2.5f32),
            PropertyRequest::new("exposureRight", port(3), PropertyId::ExposureTime, 7.5f32),
        ];

        let applied = PropertyConfigurator::new(&mut session)
            .apply_all(&requests)
            .expect("apply_all should succeed");

        assert_eq!(applied.len(), 4);
        assert_eq!(current_value(&session, 1, PropertyId::Gain), PropertyValue::Int(10));
        assert_eq!(current_value(&session, 3, PropertyId::Gain), PropertyValue::Int(20));
        assert_eq!(
            current_value(&session, 1, PropertyId::ExposureTime),
            PropertyValue::Float(2.5)
        );
        assert_eq!(
            current_value(&session, 3, PropertyId::ExposureTime),
            PropertyValue::Float(7.5)
        );
        assert_eq!(session.active_port(), Some(port(3)));
    }

    #[test]
    fn test_sanitize_keeps_value_in_range() {
        let range = PropertyAttributes::Float {
            min: 0.1,
            max: 100.0,
            default: 10.0,
        };
        let mut value = PropertyValue::Float(50.0);
        let rejected = sanitize("exposureLeft", PropertyId::ExposureTime, &mut value, &range)
            .expect("sanitize should succeed");

        assert_eq!(rejected, None);
        assert_eq!(value, PropertyValue::Float(50.0));
    }
}
