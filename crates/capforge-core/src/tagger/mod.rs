//! WD14 tag-classifier ensemble.
//!
//! One or more ONNX taggers score every image; their scores are merged by
//! [`ensemble::combine`] and written as a single `[tag: 0.00], ` line.
//!
//! # Usage
//!
//! ```rust,ignore
//! use capforge_core::{Config, ModelHub, Wd14Tagger};
//!
//! let config = Config::default();
//! let hub = ModelHub::new(config.model_dir());
//! let tagger = Wd14Tagger::load(&config.tagger, &hub).await?;
//! let tags = tagger.tag_image(Path::new("photo.jpg"))?;
//! ```

pub mod ensemble;
pub mod preprocess;
pub(crate) mod session;
pub mod tags_table;

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::DynamicImage;

use crate::config::TaggerConfig;
use crate::error::PipelineError;
use crate::hub::ModelHub;
use crate::pipeline::{load_image, sidecar_path, write_sidecar};
use crate::types::{RunStats, Tag};

use self::session::TaggerSession;
use self::tags_table::TagsTable;

/// Model file inside each tagger repo.
pub const MODEL_FILENAME: &str = "model.onnx";

/// Vocabulary file inside each tagger repo.
pub const TAGS_FILENAME: &str = "selected_tags.csv";

/// Rows logged per model at debug level.
const DEBUG_TOP_N: usize = 10;

/// A single scoring model in the ensemble.
pub trait TagSource: Send + Sync {
    /// Identifier for logging (the model repo).
    fn name(&self) -> &str;

    /// Raw `(tag, score)` rows for an image over this model's vocabulary.
    fn score(&self, image: &DynamicImage, path: &Path) -> Result<Vec<Tag>, PipelineError>;
}

/// An ONNX tagger paired with its tags table.
pub struct OnnxTagSource {
    repo: String,
    session: TaggerSession,
    table: TagsTable,
    image_size: u32,
}

impl OnnxTagSource {
    /// Load from local model and tags files.
    pub fn load(
        repo: &str,
        model_path: &Path,
        tags_path: &Path,
        image_size: u32,
    ) -> Result<Self, PipelineError> {
        let table = TagsTable::load(tags_path)?;
        let session = TaggerSession::load(model_path)?;
        tracing::info!("Loaded tagger {repo} ({} tags)", table.len());
        Ok(Self {
            repo: repo.to_string(),
            session,
            table,
            image_size,
        })
    }
}

impl TagSource for OnnxTagSource {
    fn name(&self) -> &str {
        &self.repo
    }

    fn score(&self, image: &DynamicImage, path: &Path) -> Result<Vec<Tag>, PipelineError> {
        let tensor = preprocess::preprocess(image, self.image_size);
        let scores = self.session.predict(&tensor, path)?;
        Ok(ensemble::label_scores(self.table.names(), &scores))
    }
}

/// The tagger ensemble plus its output settings.
pub struct Wd14Tagger {
    sources: Vec<Box<dyn TagSource>>,
    threshold: f32,
    filter: Vec<String>,
    output_extension: String,
}

impl Wd14Tagger {
    /// Download (if needed) and load every configured tagger.
    ///
    /// Aborts before any image is touched if a model cannot be initialized.
    pub async fn load(config: &TaggerConfig, hub: &ModelHub) -> Result<Self, PipelineError> {
        let mut sources: Vec<Box<dyn TagSource>> = Vec::new();
        for repo in config.effective_repos() {
            tracing::info!("Preparing tagger {repo}");
            let model_path = hub.fetch_main(&repo, MODEL_FILENAME).await?;
            let tags_path = hub.fetch_main(&repo, TAGS_FILENAME).await?;
            let source = OnnxTagSource::load(&repo, &model_path, &tags_path, config.image_size)?;
            sources.push(Box::new(source));
        }
        Ok(Self::from_sources(sources, config))
    }

    /// Build an ensemble from already-loaded sources.
    pub fn from_sources(sources: Vec<Box<dyn TagSource>>, config: &TaggerConfig) -> Self {
        Self {
            sources,
            threshold: config.threshold,
            filter: config.filter.clone(),
            output_extension: config.output_extension.clone(),
        }
    }

    /// Number of models in the ensemble.
    pub fn model_count(&self) -> usize {
        self.sources.len()
    }

    /// Score an image with every model and merge the results.
    pub fn tag_image(&self, path: &Path) -> Result<Vec<Tag>, PipelineError> {
        let image = load_image(path)?;

        let mut sessions = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let rows = source.score(&image, path)?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let top: Vec<String> = ensemble::top_n(&rows, DEBUG_TOP_N)
                    .iter()
                    .map(|t| format!("{}={:.3}", t.name, t.score))
                    .collect();
                tracing::debug!("{} top tags: {}", source.name(), top.join(" "));
            }
            sessions.push(rows);
        }

        Ok(ensemble::combine(sessions, &self.filter, self.threshold))
    }

    /// Tag one image and write its sidecar next to it. Overwrites.
    pub fn tag_file(&self, path: &Path) -> Result<PathBuf, PipelineError> {
        let tags = self.tag_image(path)?;
        let out = sidecar_path(path, &self.output_extension);
        write_sidecar(&out, &ensemble::format_tag_line(&tags))?;
        tracing::debug!("{} tags above threshold for {:?}", tags.len(), path);
        Ok(out)
    }

    /// Tag every image in `images`, calling `on_done` after each one.
    ///
    /// Images that fail to decode or score are logged and counted; a sidecar
    /// write failure ends the run.
    pub fn run(
        &self,
        images: &[PathBuf],
        mut on_done: impl FnMut(&Path),
    ) -> Result<RunStats, PipelineError> {
        let mut stats = RunStats::default();
        for path in images {
            let start = Instant::now();
            match self.tag_file(path) {
                Ok(_) => {
                    stats.written += 1;
                    tracing::info!(
                        "Tagged {:?} in {}ms",
                        path.file_name().unwrap_or_default(),
                        start.elapsed().as_millis()
                    );
                }
                Err(e @ PipelineError::Sidecar { .. }) => return Err(e),
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!("{e}");
                }
            }
            on_done(path);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ImageDiscovery;
    use image::{Rgb, RgbImage};

    /// Scores every image with a fixed table.
    struct FixedSource {
        name: String,
        rows: Vec<Tag>,
    }

    impl FixedSource {
        fn boxed(name: &str, pairs: &[(&str, f32)]) -> Box<dyn TagSource> {
            Box::new(Self {
                name: name.to_string(),
                rows: pairs.iter().map(|&(n, s)| Tag::new(n, s)).collect(),
            })
        }
    }

    impl TagSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn score(&self, _image: &DynamicImage, _path: &Path) -> Result<Vec<Tag>, PipelineError> {
            Ok(self.rows.clone())
        }
    }

    fn write_png(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        RgbImage::from_pixel(8, 8, Rgb([120, 80, 40])).save(path).unwrap();
    }

    #[test]
    fn test_tag_file_writes_sidecar_next_to_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("nested").join("cat.png");
        write_png(&image);

        let config = TaggerConfig::default();
        let tagger = Wd14Tagger::from_sources(
            vec![FixedSource::boxed(
                "one",
                &[("solo", 0.99), ("cat", 0.91), ("indoors", 0.62), ("dog", 0.2)],
            )],
            &config,
        );

        let out = tagger.tag_file(&image).unwrap();
        assert_eq!(out, dir.path().join("nested").join("cat.wd14cap"));
        assert_eq!(
            std::fs::read_to_string(out).unwrap(),
            "[cat: 0.91], [indoors: 0.62], "
        );
    }

    #[test]
    fn test_stacked_sources_are_averaged() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.png");
        write_png(&image);

        let config = TaggerConfig {
            threshold: 0.3,
            ..TaggerConfig::default()
        };
        let tagger = Wd14Tagger::from_sources(
            vec![
                FixedSource::boxed("a", &[("cat", 0.9), ("tail", 0.4)]),
                FixedSource::boxed("b", &[("cat", 0.7)]),
            ],
            &config,
        );

        let tags = tagger.tag_image(&image).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "cat");
        assert!((tags[0].score - 0.8).abs() < 1e-6);
        assert_eq!(tags[1], Tag::new("tail", 0.4));
    }

    #[test]
    fn test_rerun_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.png");
        write_png(&image);
        std::fs::write(dir.path().join("a.wd14cap"), "stale").unwrap();

        let tagger = Wd14Tagger::from_sources(
            vec![FixedSource::boxed("a", &[("cat", 0.9)])],
            &TaggerConfig::default(),
        );
        let images = ImageDiscovery::recursive().discover(dir.path());
        let mut visited = 0;
        let stats = tagger.run(&images, |_| visited += 1).unwrap();

        assert_eq!(stats.written, 1);
        assert_eq!(visited, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.wd14cap")).unwrap(),
            "[cat: 0.90], "
        );
    }

    #[test]
    fn test_undecodable_image_is_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"nope").unwrap();
        write_png(&dir.path().join("ok.png"));

        let tagger = Wd14Tagger::from_sources(
            vec![FixedSource::boxed("a", &[("cat", 0.9)])],
            &TaggerConfig::default(),
        );
        let images = ImageDiscovery::recursive().discover(dir.path());
        let stats = tagger.run(&images, |_| {}).unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.written, 1);
        assert!(!dir.path().join("broken.wd14cap").exists());
    }
}
