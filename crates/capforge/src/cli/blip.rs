//! The `capforge blip` command: single-image BLIP captions.

use std::path::PathBuf;
use std::time::Instant;

use capforge_core::caption::blip;
use capforge_core::config::BlipConfig;
use capforge_core::{Config, ImageDiscovery, ModelHub};
use clap::Args;

use super::{existing_dir, print_summary};

/// Arguments for the `blip` command.
#[derive(Args, Debug)]
pub struct BlipArgs {
    /// Directory with the images to caption
    #[arg(long)]
    pub dir: PathBuf,

    /// Model repo with the full-precision weights
    #[arg(long)]
    pub model: Option<String>,

    /// Use the quantized GGUF weights
    #[arg(long)]
    pub quantized: bool,

    /// Sample with top-p instead of greedy decoding
    #[arg(long, alias = "use_nucleus_sampling")]
    pub use_nucleus_sampling: bool,

    /// Maximum caption length in tokens
    #[arg(long, alias = "max_length")]
    pub max_length: Option<usize>,

    /// Minimum caption length in tokens
    #[arg(long, alias = "min_length")]
    pub min_length: Option<usize>,

    /// Nucleus sampling probability mass
    #[arg(long, alias = "top_p")]
    pub top_p: Option<f64>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Sampling seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run on the CPU even when a GPU is available
    #[arg(long)]
    pub cpu: bool,

    /// Extension for the generated caption files
    #[arg(long, alias = "output_file_extension", visible_alias = "output-extension")]
    pub output_file_extension: Option<String>,
}

impl BlipArgs {
    pub fn apply(&self, config: &mut BlipConfig) {
        if let Some(model) = &self.model {
            config.model_repo = model.clone();
        }
        if self.quantized {
            config.quantized = true;
        }
        if self.use_nucleus_sampling {
            config.use_nucleus_sampling = true;
        }
        if let Some(n) = self.max_length {
            config.max_length = n;
        }
        if let Some(n) = self.min_length {
            config.min_length = n;
        }
        if let Some(p) = self.top_p {
            config.top_p = p;
        }
        if let Some(t) = self.temperature {
            config.temperature = t;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.cpu {
            config.cpu = true;
        }
        if let Some(ext) = &self.output_file_extension {
            config.output_extension = ext.clone();
        }
    }
}

/// Execute the blip command.
pub async fn execute(args: BlipArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config.blip);
    config.check()?;

    let Some(dir) = existing_dir(&args.dir, "Image directory") else {
        return Ok(());
    };

    let images = ImageDiscovery::flat().discover(&dir);
    if images.is_empty() {
        tracing::warn!("No supported image files found in {:?}", dir);
        return Ok(());
    }

    let hub = ModelHub::new(config.model_dir());
    let start = Instant::now();
    let stats = blip::run(&config.blip, &hub, images).await?;
    print_summary("BLIP captioning", &stats, start.elapsed());
    Ok(())
}
