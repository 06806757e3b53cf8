//! Final conversion from the floating-point render to 8-bit pixels.

use image::RgbImage;
use ndarray::Array3;

/// Convert an `(h, w, 3)` float image to 8-bit pixels.
///
/// Values are clamped to `[0, 1]` before scaling so out-of-range floats clip
/// rather than wrap; the sigmoid parameterization keeps values inside the
/// range anyway, but the clamp makes the cast semantics explicit.
pub fn to_image(rgb: &Array3<f32>) -> RgbImage {
    let (h, w, _) = rgb.dim();
    let mut img = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let px = image::Rgb([
                quantize(rgb[[y, x, 0]]),
                quantize(rgb[[y, x, 1]]),
                quantize(rgb[[y, x, 2]]),
            ]);
            img.put_pixel(x as u32, y as u32, px);
        }
    }
    img
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_clamps_out_of_range() {
        assert_eq!(quantize(-0.5), 0);
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 128);
        assert_eq!(quantize(1.0), 255);
        assert_eq!(quantize(1.7), 255);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn test_image_dimensions_and_values() {
        let rgb = Array3::from_shape_fn((4, 6, 3), |(y, x, c)| {
            (y as f32 + x as f32 + c as f32) / 12.0
        });
        let img = to_image(&rgb);
        assert_eq!(img.width(), 6);
        assert_eq!(img.height(), 4);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(5, 3).0[2], quantize(10.0 / 12.0));
    }
}
