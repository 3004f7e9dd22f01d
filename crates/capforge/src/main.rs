//! Capforge CLI - batch image captioning, tagging and caption synthesis.
//!
//! Each subcommand runs one stage over a directory of images and writes a
//! sidecar text file per image. Stages are independent; `summarize` merges
//! whatever sidecars earlier stages left behind.
//!
//! # Usage
//!
//! ```bash
//! # Tag with the three stacked WD14 models
//! capforge tag --input-directory ./photos --stack-models
//!
//! # Caption with BLIP
//! capforge blip --dir ./photos
//!
//! # Merge every caption into <stem>.txt
//! capforge summarize openai --input-dir ./photos --model gpt-3.5-turbo
//!
//! # Manage models
//! capforge models download all
//! ```

use std::path::PathBuf;

use capforge_core::summarize::local::CPU_THREADS_ENV;
use capforge_core::Config;
use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Capforge - batch image captioning, tagging and caption synthesis.
#[derive(Parser, Debug)]
#[command(name = "capforge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "CAPFORGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Tag images with one or more WD14 taggers
    Tag(cli::tag::TagArgs),

    /// Caption images with BLIP
    Blip(cli::blip::BlipArgs),

    /// Caption images with a few-shot multimodal model
    Fewshot(cli::fewshot::FewShotArgs),

    /// Merge caption files into one caption per image
    Summarize(cli::summarize::SummarizeArgs),

    /// Manage models (download, list, etc.)
    Models(cli::models::ModelsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

/// Load the config, falling back to defaults when the default file is broken.
///
/// An explicitly requested file must load.
fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        return Ok(Config::load_from(path)?);
    }
    // Logging isn't initialized yet, so use eprintln for config warnings.
    Ok(Config::load().unwrap_or_else(|e| {
        eprintln!(
            "Warning: Failed to load config: {e}\n  \
             Using default configuration. Check your config file with `capforge config path`."
        );
        Config::default()
    }))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = match (&cli.command, &cli.config) {
        // `config init` must work even when the target file is missing or broken.
        (Commands::Config(_), Some(path)) if !path.exists() => Config::default(),
        _ => load_config(cli.config.as_ref())?,
    };

    // The CPU kernels size their pool from the environment; set it while
    // the process is still single-threaded.
    if let Commands::Summarize(args) = &cli.command {
        if let Some(threads) = cli::summarize::cpu_threads(args, &config) {
            std::env::set_var(CPU_THREADS_ENV, threads.to_string());
        }
    }

    logging::init_from_config(&config, cli.verbose, cli.json_logs);
    tracing::debug!("Capforge v{}", capforge_core::VERSION);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli.command, config, config_path))
}

async fn run(command: Commands, config: Config, config_path: PathBuf) -> anyhow::Result<()> {
    match command {
        Commands::Tag(args) => cli::tag::execute(args, config).await,
        Commands::Blip(args) => cli::blip::execute(args, config).await,
        Commands::Fewshot(args) => cli::fewshot::execute(args, config).await,
        Commands::Summarize(args) => cli::summarize::execute(args, config).await,
        Commands::Models(args) => cli::models::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, config, &config_path).await,
    }
}
