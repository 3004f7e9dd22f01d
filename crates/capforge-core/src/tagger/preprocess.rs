//! Image preprocessing for the WD14 taggers.
//!
//! The taggers expect:
//! - Alpha composited onto a white background
//! - Channel order: BGR
//! - Padded to a centred square with white, then resized to 448×448
//! - Raw 0–255 float values (no normalization)
//! - Tensor layout: NHWC [batch, height, width, channels]

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

const CHANNELS: usize = 3;

const WHITE: u8 = 255;

/// Preprocess an image into a `[1, size, size, 3]` BGR tensor.
pub fn preprocess(image: &DynamicImage, image_size: u32) -> Array4<f32> {
    let flattened = flatten_on_white(image);
    let squared = pad_to_square(&flattened);

    let filter = if squared.width() > image_size {
        // Downscale: box-like averaging
        FilterType::Triangle
    } else {
        FilterType::CatmullRom
    };
    let resized = image::imageops::resize(&squared, image_size, image_size, filter);

    let size = image_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, CHANNELS));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        tensor[[0, y, x, 0]] = b as f32;
        tensor[[0, y, x, 1]] = g as f32;
        tensor[[0, y, x, 2]] = r as f32;
    }

    tensor
}

/// Composite any transparency onto a white background.
fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + WHITE as u32 * (255 - alpha)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

/// Centre the image on a white square canvas of side `max(w, h)`.
fn pad_to_square(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let side = w.max(h);
    if w == h {
        return image.clone();
    }
    let mut canvas = RgbImage::from_pixel(side, side, Rgb([WHITE; 3]));
    let x = ((side - w) / 2) as i64;
    let y = ((side - h) / 2) as i64;
    image::imageops::overlay(&mut canvas, image, x, y);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_preprocess_shape() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(640, 480));
        let tensor = preprocess(&img, 448);
        assert_eq!(tensor.shape(), &[1, 448, 448, 3]);
    }

    #[test]
    fn test_channels_are_bgr_and_unnormalized() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([200, 100, 10])));
        let tensor = preprocess(&img, 4);
        assert_eq!(tensor[[0, 2, 2, 0]], 10.0);
        assert_eq!(tensor[[0, 2, 2, 1]], 100.0);
        assert_eq!(tensor[[0, 2, 2, 2]], 200.0);
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let flat = flatten_on_white(&img);
        assert_eq!(flat.get_pixel(1, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_pad_centres_image() {
        let img = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        let padded = pad_to_square(&img);
        assert_eq!(padded.dimensions(), (4, 4));
        assert_eq!(padded.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(padded.get_pixel(0, 1), &Rgb([0, 0, 0]));
        assert_eq!(padded.get_pixel(0, 2), &Rgb([0, 0, 0]));
        assert_eq!(padded.get_pixel(0, 3), &Rgb([255, 255, 255]));
    }
}
