//! The `capforge tag` command: WD14 tag ensemble.

use std::path::PathBuf;
use std::time::Instant;

use capforge_core::config::TaggerConfig;
use capforge_core::{Config, ImageDiscovery, ModelHub, Wd14Tagger};
use clap::Args;

use super::{create_progress_bar, existing_dir, print_summary};

/// Arguments for the `tag` command.
#[derive(Args, Debug)]
pub struct TagArgs {
    /// The folder with the images to process (searched recursively)
    #[arg(long, alias = "input_directory")]
    pub input_directory: PathBuf,

    /// Tagger model repos to run and average
    #[arg(long, alias = "model_repo_id", num_args = 1..)]
    pub model_repo_id: Vec<String>,

    /// Tag confidence threshold (tags must score strictly above it)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// File extension to save tags with
    #[arg(long, alias = "output_extension")]
    pub output_extension: Option<String>,

    /// Tags to filter out (pass with no values to disable filtering)
    #[arg(long, num_args = 0..)]
    pub filter: Option<Vec<String>>,

    /// Run the convnext, vit and swinv2 taggers and average their scores
    #[arg(long, alias = "stack_models")]
    pub stack_models: bool,
}

impl TagArgs {
    /// Apply flag overrides on top of the loaded config.
    pub fn apply(&self, config: &mut TaggerConfig) {
        if !self.model_repo_id.is_empty() {
            config.repos = self.model_repo_id.clone();
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(ext) = &self.output_extension {
            config.output_extension = ext.clone();
        }
        if let Some(filter) = &self.filter {
            config.filter = filter.clone();
        }
        if self.stack_models {
            config.stack_models = true;
        }
    }
}

/// Execute the tag command.
pub async fn execute(args: TagArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config.tagger);
    config.check()?;

    let Some(dir) = existing_dir(&args.input_directory, "Input directory") else {
        return Ok(());
    };

    let images = ImageDiscovery::recursive().discover(&dir);
    if images.is_empty() {
        tracing::warn!("No supported image files found in {:?}", dir);
        return Ok(());
    }
    tracing::info!("Found {} image(s) to tag", images.len());

    let hub = ModelHub::new(config.model_dir());
    let tagger = Wd14Tagger::load(&config.tagger, &hub).await?;
    tracing::info!("Tagging with {} model(s)", tagger.model_count());

    let progress = create_progress_bar(images.len() as u64);
    let bar = progress.clone();
    let start = Instant::now();

    // The tagger is moved into the blocking task and dropped when it ends.
    let stats = tokio::task::spawn_blocking(move || {
        tagger.run(&images, |path| {
            if let Some(name) = path.file_name() {
                bar.set_message(name.to_string_lossy().into_owned());
            }
            bar.inc(1);
        })
    })
    .await??;

    progress.finish_and_clear();
    print_summary("WD14 tagging", &stats, start.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: TagArgs,
    }

    fn parse(argv: &[&str]) -> TagArgs {
        TestCli::parse_from(std::iter::once("tag").chain(argv.iter().copied())).args
    }

    #[test]
    fn tag_args_defaults_leave_config_untouched() {
        let args = parse(&["--input-directory", "imgs"]);
        let mut config = TaggerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.filter.len(), 6);
        assert_eq!(config.output_extension, "wd14cap");
        assert!(!config.stack_models);
    }

    #[test]
    fn tag_args_override_config() {
        let args = parse(&[
            "--input-directory",
            "imgs",
            "--threshold",
            "0.35",
            "--model-repo-id",
            "a/one",
            "b/two",
            "--output-extension",
            "tags",
            "--stack-models",
        ]);
        let mut config = TaggerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.threshold, 0.35);
        assert_eq!(config.repos, vec!["a/one", "b/two"]);
        assert_eq!(config.output_extension, "tags");
        assert_eq!(config.effective_repos().len(), 3);
    }

    #[test]
    fn empty_filter_disables_block_list() {
        let args = parse(&["--input-directory", "imgs", "--filter"]);
        let mut config = TaggerConfig::default();
        args.apply(&mut config);
        assert!(config.filter.is_empty());
    }

    #[tokio::test]
    async fn missing_directory_returns_ok() {
        let args = parse(&["--input-directory", "/definitely/not/a/dir"]);
        assert!(execute(args, Config::default()).await.is_ok());
    }
}
