//! Image decoding with content-based format detection.

use image::DynamicImage;
use std::path::Path;

use crate::error::PipelineError;

/// Decode an image from disk, detecting the format from its bytes.
///
/// A PNG saved with a `.jpg` name still decodes.
pub fn load_image(path: &Path) -> Result<DynamicImage, PipelineError> {
    let reader = image::ImageReader::open(path)
        .map_err(|e| PipelineError::Decode {
            path: path.to_path_buf(),
            message: format!("Cannot open image: {e}"),
        })?
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode {
            path: path.to_path_buf(),
            message: format!("Cannot detect image format: {e}"),
        })?;

    reader.decode().map_err(|e| PipelineError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Decode an image and convert it to 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<DynamicImage, PipelineError> {
    Ok(DynamicImage::ImageRgb8(load_image(path)?.to_rgb8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_format_detected_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("real.png");
        RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]))
            .save(&png)
            .unwrap();
        let misnamed = dir.path().join("misnamed.jpg");
        std::fs::copy(&png, &misnamed).unwrap();

        let image = load_rgb(&misnamed).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 3);
        assert!(image.as_rgb8().is_some());
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        let err = load_image(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
    }
}
