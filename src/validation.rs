//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that acquired output images
//! are packed correctly and contain expected test patterns. Useful for
//! integration testing with virtual cameras.

use crate::acquisition::FrameStats;
use crate::error::{CameraError, Result};
use crate::traits::{ColorFormat, OutputImage};

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the RGB values resulting from converting the YUV values
/// used by the mock driver's color bar pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: i32 = 15;

/// RGB value of the pixel at (`x`, `y`), whatever the image's channel order.
pub fn rgb_at(image: &OutputImage, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    let pixel = image.pixel_at(x, y)?;
    match (image.encoding, pixel) {
        (ColorFormat::Bgr24, &[b, g, r]) | (ColorFormat::Rgb24, &[r, g, b]) => Some((r, g, b)),
        (ColorFormat::Gray8, &[luma]) => Some((luma, luma, luma)),
        _ => None,
    }
}

/// Validates that an image is packed: rows are exactly `width` pixels apart
/// and the buffer holds exactly `height` rows.
pub fn validate_packed_layout(image: &OutputImage) -> Result<()> {
    let row_bytes = image.width as usize * image.encoding.bytes_per_pixel();
    if image.step != row_bytes {
        return Err(CameraError::ValidationFailed(format!(
            "step {} differs from packed row size {row_bytes}",
            image.step
        )));
    }
    let expected = row_bytes * image.height as usize;
    if image.data.len() != expected {
        return Err(CameraError::ValidationFailed(format!(
            "buffer holds {} bytes, expected {expected}",
            image.data.len()
        )));
    }
    Ok(())
}

/// Validates that an image contains the SMPTE color bar pattern.
///
/// This function checks 8 vertical stripes at their center positions,
/// verifying that each stripe contains the expected color with a tolerance
/// for YUV-to-RGB conversion inaccuracies.
///
/// # Errors
///
/// Returns `ValidationFailed` if:
/// - A sample position lies outside the image
/// - Any color bar doesn't match the expected color within tolerance
pub fn validate_color_bars(image: &OutputImage) -> Result<()> {
    let bar_width = image.width / 8;
    let center_y = image.height / 2;

    for (bar_idx, expected_rgb) in SMPTE_COLOR_BARS.iter().enumerate() {
        // Sample the center of each bar
        #[allow(clippy::cast_possible_truncation)]
        let sample_x = (bar_idx as u32 * bar_width) + (bar_width / 2);

        let actual_rgb = rgb_at(image, sample_x, center_y).ok_or_else(|| {
            CameraError::ValidationFailed(format!(
                "Failed to get pixel at ({sample_x}, {center_y})"
            ))
        })?;

        if !colors_match(actual_rgb, *expected_rgb, COLOR_TOLERANCE) {
            return Err(CameraError::ValidationFailed(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that an image contains a horizontal gradient pattern.
///
/// Samples a horizontal line at the center of the image and verifies that
/// the luminance increases monotonically from left to right with a
/// significant overall change (not a solid color).
pub fn validate_gradient(image: &OutputImage) -> Result<()> {
    let center_y = image.height / 2;

    // Sample every 10 pixels to check for monotonic increase
    let sample_step = 10usize;
    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;

    for x in (0..image.width).step_by(sample_step) {
        let (r, g, b) = rgb_at(image, x, center_y).ok_or_else(|| {
            CameraError::ValidationFailed(format!("Failed to get pixel at ({x}, {center_y})"))
        })?;

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        first_luminance.get_or_insert(luminance);

        if let Some(prev) = prev_luminance {
            if luminance < prev - 1.0 {
                // Allow small decreases due to rounding
                return Err(CameraError::ValidationFailed(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        prev_luminance = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first_luminance, prev_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(CameraError::ValidationFailed(format!(
                "Insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that consecutive acquisitions have incrementing sequence
/// numbers and report no dropped frames.
pub fn validate_frame_sequence(stats: &[FrameStats]) -> Result<()> {
    if stats.is_empty() {
        return Err(CameraError::ValidationFailed(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in stats.windows(2).enumerate() {
        if let [prev, curr] = pair {
            if curr.sequence != prev.sequence + 1 || curr.frames_dropped != 0 {
                return Err(CameraError::ValidationFailed(format!(
                    "Frame sequence gap at index {}: expected {}, got {} ({} dropped)",
                    i + 1,
                    prev.sequence + 1,
                    curr.sequence,
                    curr.frames_dropped
                )));
            }
        }
    }

    Ok(())
}

/// Helper function to check if two RGB colors match within a tolerance.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: i32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    let r_diff = i32::from(ar).abs_diff(i32::from(er));
    let g_diff = i32::from(ag).abs_diff(i32::from(eg));
    let b_diff = i32::from(ab).abs_diff(i32::from(eb));

    #[allow(clippy::cast_sign_loss)]
    let tol = tolerance as u32;

    r_diff <= tol && g_diff <= tol && b_diff <= tol
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::acquisition::{FrameAcquisitionPipeline, OUTPUT_COLOR_FORMAT};
    use crate::mock::{MockDriver, TestPattern};
    use crate::session::DeviceSession;
    use crate::traits::SensorPort;

    fn capture(pattern: TestPattern) -> OutputImage {
        let port = SensorPort::new(1).expect("valid port");
        let mut session =
            DeviceSession::open(MockDriver::new().with_pattern(port, Some(pattern)));
        session
            .negotiate_target_format(port, OUTPUT_COLOR_FORMAT)
            .expect("negotiation failed");
        session.start().expect("start failed");
        let image = FrameAcquisitionPipeline::new(&mut session)
            .acquire(port, Duration::from_millis(100), Utc::now(), "test")
            .expect("acquire failed");
        image
    }

    #[test]
    fn test_validate_color_bars_success() {
        let image = capture(TestPattern::ColorBars);
        let result = validate_color_bars(&image);
        assert!(
            result.is_ok(),
            "Color bars validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_color_bars_wrong_pattern() {
        let image = capture(TestPattern::Gradient);
        let result = validate_color_bars(&image);
        assert!(
            result.is_err(),
            "Color bars validation should fail for gradient pattern"
        );
    }

    #[test]
    fn test_validate_gradient_success() {
        let image = capture(TestPattern::Gradient);
        let result = validate_gradient(&image);
        assert!(
            result.is_ok(),
            "Gradient validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_gradient_wrong_pattern() {
        let image = capture(TestPattern::Solid(128, 128, 128));
        let result = validate_gradient(&image);
        assert!(
            result.is_err(),
            "Gradient validation should fail for solid pattern"
        );
    }

    #[test]
    fn test_validate_packed_layout() {
        let image = capture(TestPattern::ColorBars);
        assert!(validate_packed_layout(&image).is_ok());

        let padded = OutputImage {
            step: image.step + 16,
            ..image
        };
        assert!(validate_packed_layout(&padded).is_err());
    }

    #[test]
    fn test_validate_frame_sequence() {
        let stats: Vec<_> = (0..5)
            .map(|sequence| FrameStats {
                frames_dropped: 0,
                sequence,
            })
            .collect();
        assert!(validate_frame_sequence(&stats).is_ok());
        assert!(validate_frame_sequence(&[]).is_err());

        let gap = [
            FrameStats {
                frames_dropped: 0,
                sequence: 0,
            },
            FrameStats {
                frames_dropped: 1,
                sequence: 2,
            },
        ];
        assert!(validate_frame_sequence(&gap).is_err());
    }

    #[test]
    fn test_rgb_at_respects_channel_order() {
        let image = OutputImage {
            width: 1,
            height: 1,
            step: 3,
            encoding: ColorFormat::Bgr24,
            data: vec![1, 2, 3],
            ..OutputImage::default()
        };
        assert_eq!(rgb_at(&image, 0, 0), Some((3, 2, 1)));
    }

    #[test]
    fn test_colors_match_exact() {
        assert!(colors_match((100, 150, 200), (100, 150, 200), 10));
    }

    #[test]
    fn test_colors_match_within_tolerance() {
        assert!(colors_match((100, 150, 200), (105, 155, 205), 10));
    }

    #[test]
    fn test_colors_match_outside_tolerance() {
        assert!(!colors_match((100, 150, 200), (120, 150, 200), 10));
    }
}
