//! The `capforge summarize` command: merge caption artifacts into one caption.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use capforge_core::config::{LocalLlmConfig, SummarizeConfig};
use capforge_core::summarize::local::{LocalLlm, LocalLlmFiles};
use capforge_core::summarize::openai::{resolve_api_key, OpenAiChat, API_KEY_ENV};
use capforge_core::summarize::{load_system_prompt, CostTracker};
use capforge_core::{Config, ImageDiscovery, ModelHub, SummaryBackend, Synthesizer};
use clap::{Args, Subcommand};

use super::{existing_dir, print_summary};

/// Arguments for the `summarize` command.
#[derive(Args, Debug)]
pub struct SummarizeArgs {
    #[command(subcommand)]
    pub backend: SummarizeBackend,
}

#[derive(Subcommand, Debug)]
pub enum SummarizeBackend {
    /// Synthesize with the OpenAI Chat Completions API
    Openai(OpenAiArgs),

    /// Synthesize with a local quantized llama model
    Local(LocalArgs),
}

/// Flags shared by both backends.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Directory with the images and their caption files
    #[arg(long, alias = "input_dir")]
    pub input_dir: PathBuf,

    /// Directory for the synthesized captions (defaults to the input directory)
    #[arg(long, alias = "output_dir")]
    pub output_dir: Option<PathBuf>,

    /// Caption extensions to gather, in message order
    #[arg(long, alias = "caption_exts", num_args = 1..)]
    pub caption_exts: Vec<String>,

    /// Extension whose contents are sent as tags
    #[arg(long, alias = "tags_extension")]
    pub tags_extension: Option<String>,

    /// File holding the system prompt
    #[arg(long, alias = "prompt_file_path", visible_alias = "prompt-file")]
    pub prompt_file_path: Option<PathBuf>,

    /// Extension of the synthesized caption
    #[arg(long, alias = "output_extension")]
    pub output_extension: Option<String>,
}

impl CommonArgs {
    pub fn apply(&self, config: &mut SummarizeConfig) {
        if !self.caption_exts.is_empty() {
            config.caption_exts = self.caption_exts.clone();
        }
        if let Some(ext) = &self.tags_extension {
            config.tags_extension = ext.clone();
        }
        if let Some(path) = &self.prompt_file_path {
            config.prompt_file = Some(path.clone());
        }
        if let Some(ext) = &self.output_extension {
            config.output_extension = ext.clone();
        }
    }

    /// Resolve input and output directories, logging an error for a missing one.
    fn directories(&self) -> Option<(PathBuf, PathBuf)> {
        let input = existing_dir(&self.input_dir, "Input directory")?;
        let output = match &self.output_dir {
            Some(dir) => existing_dir(dir, "Output directory")?,
            None => input.clone(),
        };
        Some((input, output))
    }
}

#[derive(Args, Debug)]
pub struct OpenAiArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// API key (falls back to the config, then OPENAI_API_KEY)
    #[arg(long, alias = "api_key")]
    pub api_key: Option<String>,

    /// Chat model; must have a known price
    #[arg(long)]
    pub model: Option<String>,

    /// Max tokens per completion
    #[arg(long, alias = "max_tokens")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Chat Completions endpoint
    #[arg(long)]
    pub endpoint: Option<String>,
}

impl OpenAiArgs {
    pub fn apply(&self, config: &mut SummarizeConfig) {
        self.common.apply(config);
        let openai = &mut config.openai;
        if let Some(model) = &self.model {
            openai.model = model.clone();
        }
        if let Some(n) = self.max_tokens {
            openai.max_tokens = n;
        }
        if let Some(t) = self.temperature {
            openai.temperature = t;
        }
        if let Some(endpoint) = &self.endpoint {
            openai.endpoint = endpoint.clone();
        }
    }
}

#[derive(Args, Debug)]
pub struct LocalArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Named model preset applied before the other flags
    #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(LocalLlmConfig::PRESETS))]
    pub preset: Option<String>,

    /// Hub repo holding the weights
    #[arg(long, alias = "hf_repo_id")]
    pub hf_repo_id: Option<String>,

    /// Weights filename within the repo
    #[arg(long, alias = "hf_filename")]
    pub hf_filename: Option<String>,

    /// Hub repo holding tokenizer.json
    #[arg(long, alias = "tokenizer_repo")]
    pub tokenizer_repo: Option<String>,

    #[arg(long, alias = "max_tokens")]
    pub max_tokens: Option<usize>,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long, alias = "top_p")]
    pub top_p: Option<f64>,

    #[arg(long, alias = "frequency_penalty")]
    pub frequency_penalty: Option<f32>,

    #[arg(long, alias = "presence_penalty")]
    pub presence_penalty: Option<f32>,

    #[arg(long, alias = "n_threads")]
    pub n_threads: Option<usize>,

    #[arg(long, alias = "n_batch")]
    pub n_batch: Option<usize>,

    #[arg(long, alias = "n_gpu_layers")]
    pub n_gpu_layers: Option<usize>,

    #[arg(long, alias = "n_gqa")]
    pub n_gqa: Option<usize>,

    #[arg(long, alias = "n_ctx")]
    pub n_ctx: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,
}

impl LocalArgs {
    pub fn apply(&self, config: &mut SummarizeConfig) {
        self.common.apply(config);
        if let Some(preset) = self.preset.as_deref().and_then(LocalLlmConfig::preset) {
            config.local = preset;
        }

        let local = &mut config.local;
        if let Some(repo) = &self.hf_repo_id {
            local.repo = repo.clone();
        }
        if let Some(file) = &self.hf_filename {
            local.filename = file.clone();
        }
        if let Some(repo) = &self.tokenizer_repo {
            local.tokenizer_repo = repo.clone();
        }
        if let Some(v) = self.max_tokens {
            local.max_tokens = v;
        }
        if let Some(v) = self.temperature {
            local.temperature = v;
        }
        if let Some(v) = self.top_p {
            local.top_p = v;
        }
        if let Some(v) = self.frequency_penalty {
            local.frequency_penalty = v;
        }
        if let Some(v) = self.presence_penalty {
            local.presence_penalty = v;
        }
        if let Some(v) = self.n_threads {
            local.n_threads = v;
        }
        if let Some(v) = self.n_batch {
            local.n_batch = v;
        }
        if let Some(v) = self.n_gpu_layers {
            local.n_gpu_layers = v;
        }
        if let Some(v) = self.n_gqa {
            local.n_gqa = v;
        }
        if let Some(v) = self.n_ctx {
            local.n_ctx = v;
        }
        if self.seed.is_some() {
            local.seed = self.seed;
        }
    }
}

/// CPU kernel threads for a `summarize local` run, resolved the same way
/// as the run itself. `None` for the cloud backend.
pub fn cpu_threads(args: &SummarizeArgs, config: &Config) -> Option<usize> {
    match &args.backend {
        SummarizeBackend::Local(local) => {
            let mut summarize = config.summarize.clone();
            local.apply(&mut summarize);
            Some(summarize.local.n_threads)
        }
        SummarizeBackend::Openai(_) => None,
    }
}

/// Execute the summarize command.
pub async fn execute(args: SummarizeArgs, config: Config) -> anyhow::Result<()> {
    match args.backend {
        SummarizeBackend::Openai(args) => execute_openai(args, config).await,
        SummarizeBackend::Local(args) => execute_local(args, config).await,
    }
}

async fn execute_openai(args: OpenAiArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config.summarize);
    config.check()?;

    let Some(api_key) = resolve_api_key(args.api_key.as_deref(), &config.summarize.openai) else {
        tracing::error!("Please set {API_KEY_ENV} env variable.");
        return Ok(());
    };
    let Some((input_dir, output_dir)) = args.common.directories() else {
        return Ok(());
    };

    // Unknown models fail here, before any request is sent.
    let tracker = CostTracker::for_model(&config.summarize.openai.model)?;
    let system_prompt = load_system_prompt(&config.summarize)?;

    let timeout = Duration::from_millis(config.retry.timeout_ms);
    let backend = OpenAiChat::new(&api_key, &config.summarize.openai, timeout);
    tracing::info!("Synthesizing with {}", backend.model());

    let mut synthesizer = Synthesizer::new(
        Box::new(backend),
        system_prompt,
        &config.summarize,
        &output_dir,
        config.retry.clone(),
    )
    .with_cost_tracking(tracker);

    run_synthesizer(&mut synthesizer, &input_dir).await?;
    if let Some(total) = synthesizer.total_cost() {
        eprintln!("    Total cost:   ${total:.4}");
    }
    Ok(())
}

async fn execute_local(args: LocalArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config.summarize);
    config.check()?;

    let Some((input_dir, output_dir)) = args.common.directories() else {
        return Ok(());
    };
    let system_prompt = load_system_prompt(&config.summarize)?;

    let hub = ModelHub::new(config.model_dir());
    let files = LocalLlmFiles::fetch(&config.summarize.local, &hub).await?;
    let local_config = config.summarize.local.clone();
    let backend = tokio::task::spawn_blocking(move || LocalLlm::load(&files, &local_config))
        .await??;

    let mut synthesizer = Synthesizer::new(
        Box::new(backend) as Box<dyn SummaryBackend>,
        system_prompt,
        &config.summarize,
        &output_dir,
        config.retry.clone(),
    );
    run_synthesizer(&mut synthesizer, &input_dir).await
}

async fn run_synthesizer(synthesizer: &mut Synthesizer, input_dir: &Path) -> anyhow::Result<()> {
    let images = ImageDiscovery::flat().discover(input_dir);
    if images.is_empty() {
        tracing::warn!("No supported image files found in {:?}", input_dir);
        return Ok(());
    }

    let start = Instant::now();
    let stats = synthesizer.run(&images).await?;
    print_summary("Caption synthesis", &stats, start.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: SummarizeArgs,
    }

    fn parse(argv: &[&str]) -> SummarizeBackend {
        TestCli::parse_from(std::iter::once("summarize").chain(argv.iter().copied()))
            .args
            .backend
    }

    #[test]
    fn openai_args_override_config() {
        let SummarizeBackend::Openai(args) = parse(&[
            "openai",
            "--input-dir",
            "imgs",
            "--model",
            "gpt-3.5-turbo",
            "--max-tokens",
            "100",
            "--caption-exts",
            "b2cap",
            "wd14cap",
        ]) else {
            panic!("expected openai");
        };
        let mut config = SummarizeConfig::default();
        args.apply(&mut config);
        assert_eq!(config.openai.model, "gpt-3.5-turbo");
        assert_eq!(config.openai.max_tokens, 100);
        assert_eq!(config.caption_exts, vec!["b2cap", "wd14cap"]);
        assert_eq!(config.openai.temperature, 0.8);
    }

    #[test]
    fn local_preset_then_flags() {
        let SummarizeBackend::Local(args) = parse(&[
            "local",
            "--input-dir",
            "imgs",
            "--preset",
            "llama2-70b",
            "--n-ctx",
            "2048",
        ]) else {
            panic!("expected local");
        };
        let mut config = SummarizeConfig::default();
        args.apply(&mut config);
        assert_eq!(config.local.n_gqa, 8);
        assert_eq!(config.local.n_ctx, 2048);
        assert_eq!(config.local.repo, "TheBloke/Llama-2-70B-Chat-GGML");
    }

    #[test]
    fn cpu_threads_follow_preset_and_flag() {
        let config = Config::default();
        let local = SummarizeArgs {
            backend: parse(&["local", "--input-dir", "imgs", "--preset", "llama2-70b"]),
        };
        assert_eq!(cpu_threads(&local, &config), Some(8));

        let flagged = SummarizeArgs {
            backend: parse(&["local", "--input-dir", "imgs", "--n-threads", "2"]),
        };
        assert_eq!(cpu_threads(&flagged, &config), Some(2));

        let cloud = SummarizeArgs {
            backend: parse(&["openai", "--input-dir", "imgs"]),
        };
        assert_eq!(cpu_threads(&cloud, &config), None);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let result = TestCli::try_parse_from([
            "summarize",
            "local",
            "--input-dir",
            "imgs",
            "--preset",
            "mystery",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_input_directory_returns_ok() {
        let backend = parse(&[
            "openai",
            "--input-dir",
            "/definitely/not/a/dir",
            "--api-key",
            "sk-test",
        ]);
        let args = SummarizeArgs { backend };
        assert!(execute(args, Config::default()).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_model_price_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = parse(&[
            "openai",
            "--input-dir",
            dir.path().to_str().unwrap(),
            "--api-key",
            "sk-test",
            "--model",
            "davinci",
        ]);
        let args = SummarizeArgs { backend };
        assert!(execute(args, Config::default()).await.is_err());
    }
}
