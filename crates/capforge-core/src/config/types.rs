//! Sub-configuration structs, one per driver.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The three WD14 v2 taggers combined by `--stack-models`.
pub const STACKED_TAGGER_REPOS: [&str; 3] = [
    "SmilingWolf/wd-v1-4-convnext-tagger-v2",
    "SmilingWolf/wd-v1-4-vit-tagger-v2",
    "SmilingWolf/wd-v1-4-swinv2-tagger-v2",
];

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory where downloaded models are cached
    pub model_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("~/.capforge/models"),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Retry policy for remote model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Max retry attempts after the first request
    pub attempts: u32,

    /// Base delay for exponential backoff in milliseconds
    pub delay_ms: u64,

    /// Fixed pause before re-submitting after an HTTP 429
    pub rate_limit_pause_ms: u64,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1000,
            rate_limit_pause_ms: 10_000,
            timeout_ms: 60_000,
        }
    }
}

/// WD14 tagger ensemble settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggerConfig {
    /// Model repos to run; more than one enables score averaging
    pub repos: Vec<String>,

    /// Replace `repos` with the three stacked v2 taggers
    pub stack_models: bool,

    /// Tags must score strictly above this to be written
    pub threshold: f32,

    /// Tags dropped before aggregation
    pub filter: Vec<String>,

    /// Sidecar extension for tag files
    pub output_extension: String,

    /// Square input resolution expected by the taggers
    pub image_size: u32,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            repos: vec!["SmilingWolf/wd-v1-4-swinv2-tagger-v2".to_string()],
            stack_models: false,
            threshold: 0.5,
            filter: [
                "1girl",
                "solo",
                "questionable",
                "realistic",
                "general",
                "sensitive",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            output_extension: "wd14cap".to_string(),
            image_size: 448,
        }
    }
}

impl TaggerConfig {
    /// Repos that will actually be loaded, honoring `stack_models`.
    pub fn effective_repos(&self) -> Vec<String> {
        if self.stack_models {
            STACKED_TAGGER_REPOS.iter().map(|s| s.to_string()).collect()
        } else {
            self.repos.clone()
        }
    }
}

/// BLIP captioner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlipConfig {
    /// Full-precision model repo
    pub model_repo: String,

    /// Revision holding the safetensors weights
    pub revision: String,

    /// Use the quantized GGUF weights instead
    pub quantized: bool,

    /// Repo holding the quantized weights
    pub quantized_repo: String,

    /// Quantized weights filename
    pub quantized_file: String,

    /// Maximum caption length in tokens
    pub max_length: usize,

    /// Minimum caption length in tokens
    pub min_length: usize,

    /// Sample with top-p instead of greedy decoding
    pub use_nucleus_sampling: bool,

    /// Nucleus sampling probability mass
    pub top_p: f64,

    /// Sampling temperature (only used with nucleus sampling)
    pub temperature: f64,

    /// Sampling seed; random when unset
    pub seed: Option<u64>,

    /// Force CPU inference
    pub cpu: bool,

    /// Sidecar extension for captions
    pub output_extension: String,
}

impl Default for BlipConfig {
    fn default() -> Self {
        Self {
            model_repo: "Salesforce/blip-image-captioning-large".to_string(),
            revision: "refs/pr/18".to_string(),
            quantized: false,
            quantized_repo: "lmz/candle-blip".to_string(),
            quantized_file: "blip-image-captioning-large-q4k.gguf".to_string(),
            max_length: 48,
            min_length: 0,
            use_nucleus_sampling: false,
            top_p: 1.0,
            temperature: 1.0,
            seed: None,
            cpu: false,
            output_extension: "b2cap".to_string(),
        }
    }
}

/// Few-shot multimodal captioner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FewShotConfig {
    /// Multimodal generation endpoint (Ollama API)
    pub endpoint: String,

    /// Model name served by the endpoint
    pub model: String,

    /// Directory of pre-captioned example images
    pub example_dir: PathBuf,

    /// Marker placed after each `<image>` in the prompt
    pub output_prompt: String,

    /// Maximum number of tokens to generate
    pub max_new_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Top-k sampling (0 disables)
    pub top_k: u32,

    /// Top-p sampling
    pub top_p: f32,

    /// Repetition penalty
    pub repetition_penalty: f32,

    /// Sampling seed
    pub seed: Option<u64>,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Sidecar extension for captions
    pub output_extension: String,
}

impl Default for FewShotConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llava".to_string(),
            example_dir: PathBuf::from("examples"),
            output_prompt: "Output:".to_string(),
            max_new_tokens: 48,
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            repetition_penalty: 1.0,
            seed: None,
            timeout_ms: 120_000,
            output_extension: "flamcap".to_string(),
        }
    }
}

/// Caption synthesis settings shared by the cloud and local backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizeConfig {
    /// Caption extensions to gather, in message order
    pub caption_exts: Vec<String>,

    /// Extension whose contents are sent as "Tags: " instead of a numbered caption
    pub tags_extension: String,

    /// System instruction used when no prompt file is given
    pub system_prompt: String,

    /// File whose contents replace `system_prompt`
    pub prompt_file: Option<PathBuf>,

    /// Extension of the synthesized caption
    pub output_extension: String,

    /// OpenAI backend
    pub openai: OpenAiConfig,

    /// Local quantized model backend
    pub local: LocalLlmConfig,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            caption_exts: vec![
                "b2cap".to_string(),
                "flamcap".to_string(),
                "wd14cap".to_string(),
            ],
            tags_extension: "wd14cap".to_string(),
            system_prompt: "You will receive several machine-generated captions and a list of \
                            scored tags describing one image. Merge them into a single accurate, \
                            concise caption. Ignore details the sources disagree on. Reply with \
                            the caption only."
                .to_string(),
            prompt_file: None,
            output_extension: "txt".to_string(),
            openai: OpenAiConfig::default(),
            local: LocalLlmConfig::default(),
        }
    }
}

/// OpenAI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Chat Completions endpoint
    pub endpoint: String,

    /// Model name; must have an entry in the price table
    pub model: String,

    /// Max tokens per completion
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: "${OPENAI_API_KEY}".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 75,
            temperature: 0.8,
        }
    }
}

/// Local quantized language model record.
///
/// Collapses the per-model driver variants into one parameter set; use
/// [`LocalLlmConfig::preset`] for the known model pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalLlmConfig {
    /// Hub repo holding the weights
    pub repo: String,

    /// Weights filename (`.gguf`, or GGML `.bin`)
    pub filename: String,

    /// Hub repo holding `tokenizer.json`
    pub tokenizer_repo: String,

    /// Max tokens to generate
    pub max_tokens: usize,

    /// Sampling temperature (<= 0 means greedy)
    pub temperature: f64,

    /// Nucleus sampling probability mass
    pub top_p: f64,

    /// Penalty proportional to how often a token was already generated
    pub frequency_penalty: f32,

    /// Flat penalty for any token already generated
    pub presence_penalty: f32,

    /// CPU threads used by the inference kernels
    pub n_threads: usize,

    /// Max prompt tokens evaluated in the first forward pass
    pub n_batch: usize,

    /// Layers to offload; any positive value selects the GPU when available
    pub n_gpu_layers: usize,

    /// Grouped-query-attention factor for GGML weights
    pub n_gqa: usize,

    /// Context window (prompt + generated tokens)
    pub n_ctx: usize,

    /// Sampling seed; random when unset
    pub seed: Option<u64>,
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            repo: "TheBloke/Luna-AI-Llama2-Uncensored-GGML".to_string(),
            filename: "luna-ai-llama2-uncensored.ggmlv3.q6_K.bin".to_string(),
            tokenizer_repo: "hf-internal-testing/llama-tokenizer".to_string(),
            max_tokens: 256,
            temperature: 0.5,
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            n_threads: 4,
            n_batch: 512,
            n_gpu_layers: 32,
            n_gqa: 1,
            n_ctx: 2048,
            seed: None,
        }
    }
}

impl LocalLlmConfig {
    /// Names accepted by [`LocalLlmConfig::preset`].
    pub const PRESETS: [&'static str; 2] = ["luna", "llama2-70b"];

    /// Look up a named model preset.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "luna" => Some(Self::default()),
            "llama2-70b" => Some(Self {
                repo: "TheBloke/Llama-2-70B-Chat-GGML".to_string(),
                filename: "llama-2-70b-chat.ggmlv3.q4_K_M.bin".to_string(),
                max_tokens: 75,
                temperature: 0.8,
                top_p: 0.9,
                frequency_penalty: 0.2,
                presence_penalty: 0.2,
                n_threads: 8,
                n_gpu_layers: 83,
                n_gqa: 8,
                n_ctx: 4096,
                ..Self::default()
            }),
            _ => None,
        }
    }
}
