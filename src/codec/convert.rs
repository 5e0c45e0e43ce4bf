//! Raw pixel formats to packed RGB888

use crate::capture::PixelFormat;
use crate::error::CodecError;

/// Convert a raw frame buffer into packed RGB888.
///
/// The buffer must hold exactly `width * height` pixels of `format`.
pub fn to_rgb888(
    data: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, CodecError> {
    let expected = format
        .frame_len(width, height)
        .ok_or(CodecError::Unsupported(format))?;
    if data.len() != expected {
        return Err(CodecError::InvalidLength {
            format,
            expected,
            actual: data.len(),
        });
    }

    let pixels = width as usize * height as usize;
    // Every YUYV macropixel carries two pixels
    if format == PixelFormat::Yuyv4 && pixels % 2 != 0 {
        return Err(CodecError::UnpairedPixel { width, height });
    }
    let mut out = Vec::with_capacity(pixels * 3);

    match format {
        PixelFormat::Rgb24 => out.extend_from_slice(data),
        PixelFormat::Bgr24 => {
            for px in data.chunks_exact(3) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        PixelFormat::Rgb565 => {
            for px in data.chunks_exact(2) {
                let (hb, lb) = (px[0], px[1]);
                out.extend_from_slice(&[
                    hb & 0xF8,
                    ((hb & 0x07) << 5) | ((lb & 0xE0) >> 3),
                    (lb & 0x1F) << 3,
                ]);
            }
        }
        PixelFormat::Yuyv4 => {
            // Two pixels share one U/V pair: Y0 U Y1 V
            for quad in data.chunks_exact(4) {
                let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
                out.extend_from_slice(&yuv_to_rgb(y0, u, v));
                out.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
        }
        PixelFormat::Grayscale => {
            for &y in data {
                out.extend_from_slice(&[y, y, y]);
            }
        }
        PixelFormat::Jpeg => return Err(CodecError::Unsupported(format)),
    }

    Ok(out)
}

/// BT.601 full-range YUV to RGB, fixed point
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = y + ((359 * v) >> 8);
    let g = y - ((88 * u + 183 * v) >> 8);
    let b = y + ((454 * u) >> 8);

    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}
