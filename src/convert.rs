//! Software color conversion for drivers without a hardware converter.
//!
//! Conversions work row by row on strided buffers: the source pitch is only
//! used to locate row starts and the result is written with its own pitch.

use crate::error::{CameraError, Result};
use crate::traits::{ColorFormat, ImageFormat, StridedImage};

/// Row alignment of images produced by [`convert`] in drivers that pad rows.
pub const ROW_ALIGNMENT: usize = 4;

/// Smallest multiple of `alignment` that holds `row_bytes`.
#[must_use]
pub const fn aligned_pitch(row_bytes: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return row_bytes;
    }
    row_bytes.div_ceil(alignment) * alignment
}

/// Encodings a frame in `source` encoding can be converted into, identity first.
#[must_use]
pub const fn conversions_from(source: ColorFormat) -> &'static [ColorFormat] {
    match source {
        ColorFormat::Gray8 => &[ColorFormat::Gray8, ColorFormat::Bgr24, ColorFormat::Rgb24],
        ColorFormat::BayerRggb8 => &[
            ColorFormat::BayerRggb8,
            ColorFormat::Bgr24,
            ColorFormat::Rgb24,
        ],
        ColorFormat::Yuyv => &[
            ColorFormat::Yuyv,
            ColorFormat::Bgr24,
            ColorFormat::Rgb24,
            ColorFormat::Gray8,
        ],
        ColorFormat::Rgb24 => &[ColorFormat::Rgb24, ColorFormat::Bgr24],
        ColorFormat::Bgr24 => &[ColorFormat::Bgr24, ColorFormat::Rgb24],
    }
}

/// Split a strided buffer into its logical rows.
///
/// Fails if `pitch` is smaller than `row_bytes` or the buffer ends before the
/// last row does. The last row does not need trailing padding.
pub(crate) fn row_slices(
    buffer: &[u8],
    pitch: usize,
    row_bytes: usize,
    height: usize,
) -> Result<Vec<&[u8]>> {
    let invalid = || CameraError::InvalidPitch {
        pitch,
        row_bytes,
        height,
        len: buffer.len(),
    };
    if pitch < row_bytes {
        return Err(invalid());
    }
    (0..height)
        .map(|row| {
            let start = row.checked_mul(pitch).ok_or_else(invalid)?;
            buffer.get(start..start + row_bytes).ok_or_else(invalid)
        })
        .collect()
}

/// Convert a strided image into `target`, writing rows `target_pitch` apart.
pub fn convert(
    source: &[u8],
    source_format: &ImageFormat,
    source_pitch: usize,
    target: &ImageFormat,
    target_pitch: usize,
) -> Result<StridedImage> {
    if source_format.width != target.width || source_format.height != target.height {
        return Err(CameraError::ConversionFailed(format!(
            "cannot scale {source_format} to {target}"
        )));
    }
    if !conversions_from(source_format.color).contains(&target.color) {
        return Err(CameraError::UnsupportedConversion {
            from: source_format.color,
            to: target.color,
        });
    }
    if target_pitch < target.row_bytes() {
        return Err(CameraError::InvalidPitch {
            pitch: target_pitch,
            row_bytes: target.row_bytes(),
            height: target.height as usize,
            len: 0,
        });
    }

    let height = source_format.height as usize;
    let rows = row_slices(source, source_pitch, source_format.row_bytes(), height)?;
    let mut data = vec![0u8; target_pitch * height];

    match (source_format.color, target.color) {
        (ColorFormat::BayerRggb8, ColorFormat::Rgb24 | ColorFormat::Bgr24) => {
            if source_format.width % 2 != 0 || height % 2 != 0 {
                return Err(CameraError::ConversionFailed(format!(
                    "Bayer frame {source_format} must have even dimensions"
                )));
            }
            let mut out_rows = data.chunks_exact_mut(target_pitch);
            for pair in rows.chunks_exact(2) {
                if let ([top, bottom], Some(out_top), Some(out_bottom)) =
                    (pair, out_rows.next(), out_rows.next())
                {
                    demosaic_rows(top, bottom, out_top, out_bottom, target.color);
                }
            }
        }
        (ColorFormat::Yuyv, _) if source_format.width % 2 != 0 => {
            return Err(CameraError::ConversionFailed(format!(
                "YUYV frame {source_format} must have even width"
            )));
        }
        (from, to) => {
            for (row, out) in rows.iter().zip(data.chunks_exact_mut(target_pitch)) {
                convert_row(row, out, from, to);
            }
        }
    }

    Ok(StridedImage {
        format: *target,
        pitch: target_pitch,
        data,
    })
}

fn convert_row(row: &[u8], out: &mut [u8], from: ColorFormat, to: ColorFormat) {
    match (from, to) {
        _ if from == to => {
            let len = row.len().min(out.len());
            if let (Some(dst), Some(src)) = (out.get_mut(..len), row.get(..len)) {
                dst.copy_from_slice(src);
            }
        }
        (ColorFormat::Gray8, _) => {
            for (&luma, pixel) in row.iter().zip(out.chunks_exact_mut(3)) {
                write_color(pixel, to, (luma, luma, luma));
            }
        }
        (ColorFormat::Yuyv, ColorFormat::Gray8) => {
            for (pair, luma) in row.chunks_exact(4).zip(out.chunks_exact_mut(2)) {
                if let ([y0, _, y1, _], [l0, l1]) = (pair, luma) {
                    *l0 = *y0;
                    *l1 = *y1;
                }
            }
        }
        (ColorFormat::Yuyv, _) => {
            for (pair, pixels) in row.chunks_exact(4).zip(out.chunks_exact_mut(6)) {
                if let [y0, u, y1, v] = *pair {
                    let (first, second) = pixels.split_at_mut(3);
                    write_color(first, to, yuv_to_rgb(y0, u, v));
                    write_color(second, to, yuv_to_rgb(y1, u, v));
                }
            }
        }
        (ColorFormat::Rgb24 | ColorFormat::Bgr24, _) => {
            for (src, dst) in row.chunks_exact(3).zip(out.chunks_exact_mut(3)) {
                if let [a, b, c] = *src {
                    // RGB and BGR differ only in channel order.
                    write_color(dst, ColorFormat::Rgb24, (c, b, a));
                }
            }
        }
        (ColorFormat::BayerRggb8, _) => {}
    }
}

/// Nearest-neighbour demosaic of one RGGB row pair.
fn demosaic_rows(
    top: &[u8],
    bottom: &[u8],
    out_top: &mut [u8],
    out_bottom: &mut [u8],
    to: ColorFormat,
) {
    let cells = top
        .chunks_exact(2)
        .zip(bottom.chunks_exact(2))
        .zip(out_top.chunks_exact_mut(6))
        .zip(out_bottom.chunks_exact_mut(6));
    for (((upper, lower), dst_upper), dst_lower) in cells {
        if let (&[r, g1], &[g2, b]) = (upper, lower) {
            let g = u8::try_from((u16::from(g1) + u16::from(g2)) / 2).unwrap_or(u8::MAX);
            for pixel in dst_upper.chunks_exact_mut(3).chain(dst_lower.chunks_exact_mut(3)) {
                write_color(pixel, to, (r, g, b));
            }
        }
    }
}

fn write_color(pixel: &mut [u8], order: ColorFormat, (r, g, b): (u8, u8, u8)) {
    if let [first, second, third] = pixel {
        let (x, y, z) = if order == ColorFormat::Bgr24 {
            (b, g, r)
        } else {
            (r, g, b)
        };
        *first = x;
        *second = y;
        *third = z;
    }
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
///
/// # Arguments
///
/// * `y` - Luminance value (16-235 for studio range)
/// * `u` - Blue-difference chroma value (16-240)
/// * `v` - Red-difference chroma value (16-240)
///
/// # Returns
///
/// RGB tuple with values clamped to 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}
