//! Local quantized llama backend for caption synthesis.
//!
//! Runs GGUF or GGML weights with candle. The model is shared behind an
//! `Arc<Mutex<_>>` so each generation can run on the blocking pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use candle_core::quantized::{ggml_file, gguf_file};
use candle_core::{Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::quantized_llama::{ModelWeights, MAX_SEQ_LEN};
use tokenizers::Tokenizer;

use super::conversation::Conversation;
use super::{Summary, SummaryBackend};
use crate::config::LocalLlmConfig;
use crate::error::PipelineError;
use crate::hub::ModelHub;

pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Environment variable sizing the CPU kernel thread pool.
pub const CPU_THREADS_ENV: &str = "RAYON_NUM_THREADS";

const EOS_TOKEN: &str = "</s>";

/// Local files needed to build a [`LocalLlm`].
#[derive(Debug, Clone)]
pub struct LocalLlmFiles {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
}

impl LocalLlmFiles {
    pub async fn fetch(config: &LocalLlmConfig, hub: &ModelHub) -> Result<Self, PipelineError> {
        Ok(Self {
            weights: hub.fetch_main(&config.repo, &config.filename).await?,
            tokenizer: hub.fetch_main(&config.tokenizer_repo, TOKENIZER_FILE).await?,
        })
    }
}

/// Sampling and context settings applied per generation.
#[derive(Debug, Clone)]
struct GenerationSettings {
    max_tokens: usize,
    temperature: f64,
    top_p: f64,
    frequency_penalty: f32,
    presence_penalty: f32,
    n_batch: usize,
    n_ctx: usize,
    seed: u64,
}

struct LoadedLlama {
    model: ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token: Option<u32>,
}

/// A loaded quantized llama model.
pub struct LocalLlm {
    inner: Arc<Mutex<LoadedLlama>>,
    settings: GenerationSettings,
}

impl LocalLlm {
    /// Load weights and tokenizer.
    ///
    /// `n_threads` is read by the CPU kernels from `RAYON_NUM_THREADS`, which
    /// must be set by the binary before any thread is spawned; see
    /// [`CPU_THREADS_ENV`].
    pub fn load(files: &LocalLlmFiles, config: &LocalLlmConfig) -> Result<Self, PipelineError> {
        let model_err = |message: String| PipelineError::Model {
            message: format!("{}: {message}", files.weights.display()),
        };

        let device = if config.n_gpu_layers > 0 {
            Device::cuda_if_available(0).unwrap_or(Device::Cpu)
        } else {
            Device::Cpu
        };
        tracing::info!("Loading {:?} on {:?}", files.weights, device);

        let mut file = std::fs::File::open(&files.weights).map_err(|e| model_err(e.to_string()))?;
        let model = if is_gguf(&files.weights) {
            let content = gguf_file::Content::read(&mut file)
                .map_err(|e| model_err(e.with_path(&files.weights).to_string()))?;
            ModelWeights::from_gguf(content, &mut file, &device)
                .map_err(|e| model_err(e.to_string()))?
        } else {
            let content = ggml_file::Content::read(&mut file, &device)
                .map_err(|e| model_err(e.with_path(&files.weights).to_string()))?;
            ModelWeights::from_ggml(content, config.n_gqa).map_err(|e| model_err(e.to_string()))?
        };

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| model_err(format!("tokenizer: {e}")))?;
        let eos_token = tokenizer.token_to_id(EOS_TOKEN);

        tracing::info!("Local model loaded successfully");
        Ok(Self {
            inner: Arc::new(Mutex::new(LoadedLlama {
                model,
                tokenizer,
                device,
                eos_token,
            })),
            settings: GenerationSettings {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                top_p: config.top_p,
                frequency_penalty: config.frequency_penalty,
                presence_penalty: config.presence_penalty,
                n_batch: config.n_batch,
                n_ctx: config.n_ctx.min(MAX_SEQ_LEN),
                seed: config.seed.unwrap_or_else(rand::random),
            },
        })
    }
}

impl LoadedLlama {
    fn generate(&mut self, prompt: &str, settings: &GenerationSettings) -> Result<String, String> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| format!("tokenize: {e}"))?;
        let prompt_tokens = encoding.get_ids().to_vec();

        if prompt_tokens.len() >= settings.n_ctx {
            return Err(format!(
                "prompt is {} tokens, context window is {}",
                prompt_tokens.len(),
                settings.n_ctx
            ));
        }
        let budget = settings
            .max_tokens
            .min(settings.n_ctx - prompt_tokens.len());

        let sampling = if settings.temperature <= 0.0 {
            Sampling::ArgMax
        } else {
            Sampling::TopP {
                p: settings.top_p,
                temperature: settings.temperature,
            }
        };
        let mut sampler = LogitsProcessor::from_sampling(settings.seed, sampling);

        // First pass takes up to n_batch prompt tokens; the rest go one at a
        // time so the causal mask never spans a non-zero offset.
        let first = settings.n_batch.clamp(1, prompt_tokens.len());
        let mut logits = self.forward(&prompt_tokens[..first], 0)?;
        for (offset, &token) in prompt_tokens[first..].iter().enumerate() {
            logits = self.forward(&[token], first + offset)?;
        }

        let mut generated: Vec<u32> = Vec::with_capacity(budget);
        for index in 0..budget {
            let mut values = logits.to_vec1::<f32>().map_err(|e| e.to_string())?;
            apply_penalties(
                &mut values,
                &generated,
                settings.frequency_penalty,
                settings.presence_penalty,
            );
            let penalized =
                Tensor::new(values.as_slice(), &Device::Cpu).map_err(|e| e.to_string())?;
            let next = sampler.sample(&penalized).map_err(|e| e.to_string())?;

            if Some(next) == self.eos_token {
                break;
            }
            generated.push(next);
            if index + 1 < budget {
                logits = self.forward(&[next], prompt_tokens.len() + index)?;
            }
        }

        self.tokenizer
            .decode(&generated, true)
            .map_err(|e| format!("decode: {e}"))
    }

    /// Run the model over `tokens` at `index_pos`, returning last-position logits.
    fn forward(&mut self, tokens: &[u32], index_pos: usize) -> Result<Tensor, String> {
        let input = Tensor::new(tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| e.to_string())?;
        self.model
            .forward(&input, index_pos)
            .and_then(|logits| logits.squeeze(0))
            .and_then(|logits| logits.to_dtype(candle_core::DType::F32))
            .and_then(|logits| logits.to_device(&Device::Cpu))
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SummaryBackend for LocalLlm {
    fn name(&self) -> &str {
        "local"
    }

    async fn summarize(&self, conversation: &Conversation) -> Result<Summary, PipelineError> {
        let prompt = conversation.prompt();
        let inner = Arc::clone(&self.inner);
        let settings = self.settings.clone();

        let text = tokio::task::spawn_blocking(move || {
            let mut llama = inner
                .lock()
                .map_err(|e| format!("Model lock poisoned: {e}"))?;
            llama.generate(&prompt, &settings)
        })
        .await
        .map_err(|e| PipelineError::Llm {
            message: format!("Local generation task failed: {e}"),
            status_code: None,
        })?
        .map_err(|message| PipelineError::Llm {
            message,
            status_code: None,
        })?;

        Ok(Summary { text, usage: None })
    }
}

fn is_gguf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gguf"))
}

/// Subtract `count * frequency + presence` from every already-generated token.
pub fn apply_penalties(logits: &mut [f32], history: &[u32], frequency: f32, presence: f32) {
    if history.is_empty() || (frequency == 0.0 && presence == 0.0) {
        return;
    }
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &token in history {
        *counts.entry(token).or_insert(0) += 1;
    }
    for (token, count) in counts {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit -= count as f32 * frequency + presence;
        }
    }
}
