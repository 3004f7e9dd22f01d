//! Per-image caption drivers.
//!
//! - **blip**: BLIP captioner running locally on candle; always overwrites
//! - **fewshot**: few-shot multimodal captioner over HTTP; skips existing
//!   output

pub mod blip;
pub mod fewshot;

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::DynamicImage;

use crate::error::PipelineError;
use crate::pipeline::{load_rgb, sidecar_path, write_sidecar};
use crate::types::RunStats;

/// A synchronous captioning model that owns its weights.
pub trait ImageCaptioner {
    /// Generate a caption for an RGB image.
    fn caption(&mut self, image: &DynamicImage, path: &Path) -> Result<String, PipelineError>;
}

/// Caption every image and write `<stem>.<ext>` next to it, overwriting.
///
/// Decode and generation failures are logged and counted; a write failure
/// ends the run.
pub fn caption_images(
    captioner: &mut dyn ImageCaptioner,
    images: &[PathBuf],
    extension: &str,
) -> Result<RunStats, PipelineError> {
    let mut stats = RunStats::default();

    for path in images {
        let start = Instant::now();
        let caption = match load_rgb(path).and_then(|image| captioner.caption(&image, path)) {
            Ok(caption) => caption,
            Err(e) => {
                stats.failed += 1;
                tracing::error!("{e}");
                continue;
            }
        };
        tracing::info!(
            "Time taken for {:?}: {:.2} seconds",
            path,
            start.elapsed().as_secs_f64()
        );

        let out = sidecar_path(path, extension);
        write_sidecar(&out, &caption)?;
        tracing::info!("{} -> {caption}", out.display());
        stats.written += 1;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ImageDiscovery;
    use image::{Rgb, RgbImage};

    struct EchoCaptioner {
        calls: usize,
    }

    impl ImageCaptioner for EchoCaptioner {
        fn caption(&mut self, image: &DynamicImage, _path: &Path) -> Result<String, PipelineError> {
            self.calls += 1;
            Ok(format!("a {}x{} picture", image.width(), image.height()))
        }
    }

    #[test]
    fn test_caption_images_overwrites_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]))
            .save(dir.path().join("cat.png"))
            .unwrap();
        std::fs::write(dir.path().join("cat.b2cap"), "old caption").unwrap();

        let images = ImageDiscovery::flat().discover(dir.path());
        let mut captioner = EchoCaptioner { calls: 0 };
        let stats = caption_images(&mut captioner, &images, ".b2cap").unwrap();

        assert_eq!(stats.written, 1);
        assert_eq!(captioner.calls, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("cat.b2cap")).unwrap(),
            "a 3x2 picture"
        );
    }

    #[test]
    fn test_decode_failure_does_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"garbage").unwrap();
        RgbImage::new(2, 2).save(dir.path().join("b.png")).unwrap();

        let images = ImageDiscovery::flat().discover(dir.path());
        let mut captioner = EchoCaptioner { calls: 0 };
        let stats = caption_images(&mut captioner, &images, "b2cap").unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.written, 1);
        assert!(dir.path().join("b.b2cap").exists());
    }

    struct PaddedCaptioner;

    impl ImageCaptioner for PaddedCaptioner {
        fn caption(
            &mut self,
            _image: &DynamicImage,
            _path: &Path,
        ) -> Result<String, PipelineError> {
            Ok(" a cat on a mat \n".to_string())
        }
    }

    #[test]
    fn test_caption_written_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(2, 2).save(dir.path().join("cat.png")).unwrap();

        let images = ImageDiscovery::flat().discover(dir.path());
        caption_images(&mut PaddedCaptioner, &images, "b2cap").unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("cat.b2cap")).unwrap(),
            " a cat on a mat \n"
        );
    }
}
