//! Grayscale normalization shared by the face and classification paths.
//!
//! Every face region and every classifier image goes through the same
//! steps: luma conversion, global histogram equalization, then a light
//! Gaussian blur. This tolerates moderate lighting changes; it does not
//! make comparisons illumination-invariant.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::filter::gaussian_blur_f32;

/// Sigma OpenCV derives for a 3×3 Gaussian kernel.
pub const BLUR_SIGMA: f32 = 0.8;

/// Gain and bias of the brightness-boosted enrollment variant.
const BOOST_GAIN: f32 = 1.2;
const BOOST_BIAS: f32 = 30.0;

/// Convert a color frame to a normalized grayscale image.
pub fn preprocess_frame(frame: &RgbImage) -> GrayImage {
    normalize(imageops::grayscale(frame))
}

/// Convert any decoded image to a normalized grayscale image.
pub fn preprocess_image(image: &DynamicImage) -> GrayImage {
    normalize(image.to_luma8())
}

/// Equalize and blur an image that is already grayscale.
pub fn normalize(gray: GrayImage) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray;
    }
    blur(&equalize_histogram(&gray))
}

/// Light noise suppression.
pub fn blur(gray: &GrayImage) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    gaussian_blur_f32(gray, BLUR_SIGMA)
}

/// Linear brightness/contrast boost: `out = in * 1.2 + 30`, clamped to [0, 255].
pub fn boost_brightness(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    for Luma([p]) in out.pixels_mut() {
        *p = (*p as f32 * BOOST_GAIN + BOOST_BIAS).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Resize `image` to exactly `width` × `height` with bilinear filtering.
/// Equal dimensions return an untouched copy.
pub fn resize_to(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}
