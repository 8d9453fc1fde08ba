//! Small shared helpers.

use image::{GrayImage, RgbaImage};

/// Convert an RGBA capture buffer to grayscale using ITU-R BT.601 luma
/// weights.
///
/// The frame capture adapter may hand either format; the engines work on
/// grayscale.
pub fn rgba_to_gray(rgba: &RgbaImage) -> GrayImage {
    let mut gray = GrayImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, _a] = pixel.0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        gray.put_pixel(x, y, image::Luma([luma.round() as u8]));
    }
    gray
}
