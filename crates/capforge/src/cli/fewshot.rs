//! The `capforge fewshot` command: caption images from example pairs.

use std::path::PathBuf;
use std::time::Instant;

use capforge_core::caption::fewshot::{load_examples, OllamaFewShot};
use capforge_core::config::FewShotConfig;
use capforge_core::{Config, FewShotCaptioner, ImageDiscovery};
use clap::Args;

use super::{existing_dir, print_summary};

/// Arguments for the `fewshot` command.
#[derive(Args, Debug)]
pub struct FewShotArgs {
    /// Directory with the images to caption (searched recursively)
    #[arg(long, alias = "img_dir", default_value = "input")]
    pub img_dir: PathBuf,

    /// Directory of example images, each with a `.txt` caption
    #[arg(long, alias = "example_img_dir", visible_alias = "example-dir")]
    pub example_img_dir: Option<PathBuf>,

    /// Generation endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Multimodal model served by the endpoint
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum number of tokens to generate
    #[arg(long, alias = "max_new_tokens")]
    pub max_new_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Top-k sampling (0 disables)
    #[arg(long, alias = "top_k")]
    pub top_k: Option<u32>,

    /// Top-p sampling
    #[arg(long, alias = "top_p")]
    pub top_p: Option<f32>,

    /// Repetition penalty
    #[arg(long, alias = "repetition_penalty")]
    pub repetition_penalty: Option<f32>,

    /// Marker that follows each image in the prompt
    #[arg(long)]
    pub prompt: Option<String>,

    /// Sampling seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Extension for the generated caption files
    #[arg(long, alias = "output_extension")]
    pub output_extension: Option<String>,
}

impl FewShotArgs {
    pub fn apply(&self, config: &mut FewShotConfig) {
        if let Some(dir) = &self.example_img_dir {
            config.example_dir = dir.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(n) = self.max_new_tokens {
            config.max_new_tokens = n;
        }
        if let Some(t) = self.temperature {
            config.temperature = t;
        }
        if let Some(k) = self.top_k {
            config.top_k = k;
        }
        if let Some(p) = self.top_p {
            config.top_p = p;
        }
        if let Some(r) = self.repetition_penalty {
            config.repetition_penalty = r;
        }
        if let Some(prompt) = &self.prompt {
            config.output_prompt = prompt.clone();
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(ext) = &self.output_extension {
            config.output_extension = ext.clone();
        }
    }
}

/// Execute the fewshot command.
pub async fn execute(args: FewShotArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config.fewshot);
    config.check()?;

    let Some(img_dir) = existing_dir(&args.img_dir, "Image directory") else {
        return Ok(());
    };
    let Some(example_dir) = existing_dir(&config.fewshot.example_dir, "Example directory") else {
        return Ok(());
    };

    let examples = load_examples(&example_dir)?;
    if examples.is_empty() {
        tracing::warn!("No captioned examples in {:?}; prompting without examples", example_dir);
    } else {
        tracing::info!("Loaded {} example pair(s)", examples.len());
    }

    let images = ImageDiscovery::recursive().discover(&img_dir);
    if images.is_empty() {
        tracing::warn!("No supported image files found in {:?}", img_dir);
        return Ok(());
    }

    let backend = OllamaFewShot::from_config(&config.fewshot);
    let captioner = FewShotCaptioner::new(
        Box::new(backend),
        &examples,
        &config.fewshot,
        config.retry.clone(),
    )?;

    let start = Instant::now();
    let stats = captioner.run(&images).await?;
    print_summary("Few-shot captioning", &stats, start.elapsed());
    Ok(())
}
