//! Few-shot captioning with a multimodal generator.
//!
//! Example images with known captions are prepended to every request so the
//! model copies their style. The prompt is built once and reused for every
//! target image; the generator sees all example images followed by the
//! target image.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::{FewShotConfig, RetryConfig};
use crate::error::PipelineError;
use crate::pipeline::{read_sidecar, sidecar_path, write_sidecar, ImageDiscovery};
use crate::retry::{send_error, with_retry};
use crate::types::RunStats;

/// Placeholder marking where each image sits in the prompt.
pub const IMAGE_TOKEN: &str = "<image>";

/// Caption file paired with each example image.
const EXAMPLE_CAPTION_EXT: &str = "txt";

/// An example image and its reference caption.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub image: PathBuf,
    pub caption: String,
}

/// Load every example image (recursively) that has a `<stem>.txt` caption.
///
/// Images without a caption file are skipped with a warning.
pub fn load_examples(dir: &Path) -> Result<Vec<Example>, PipelineError> {
    let mut examples = Vec::new();
    for image in ImageDiscovery::recursive().discover(dir) {
        let caption_path = sidecar_path(&image, EXAMPLE_CAPTION_EXT);
        match read_sidecar(&caption_path)? {
            Some(caption) => {
                tracing::info!(" ** Example: {caption}");
                examples.push(Example { image, caption });
            }
            None => tracing::warn!("Example {:?} has no caption file, skipping", image),
        }
    }
    Ok(examples)
}

/// Build the shared prompt: one `<image> {output_prompt}{caption}` block per
/// example, then a trailing `<image> {output_prompt}`. Newlines are removed.
pub fn build_prompt(examples: &[Example], output_prompt: &str) -> String {
    let per_image = format!("{IMAGE_TOKEN} {output_prompt}");
    let mut prompt: String = examples
        .iter()
        .map(|e| format!("{per_image}{}", e.caption))
        .collect();
    prompt.push_str(&per_image);
    prompt.replace('\n', "")
}

/// Keep only the text before the model starts another example.
pub fn cut_at_output_prompt<'a>(text: &'a str, output_prompt: &str) -> &'a str {
    if output_prompt.is_empty() {
        return text;
    }
    text.split(output_prompt).next().unwrap_or(text)
}

/// Sampling options passed to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub max_new_tokens: u32,
    pub temperature: f32,
    /// 0 disables top-k filtering
    pub top_k: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub seed: Option<u64>,
}

impl From<&FewShotConfig> for GenerationOptions {
    fn from(config: &FewShotConfig) -> Self {
        Self {
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            repetition_penalty: config.repetition_penalty,
            seed: config.seed,
        }
    }
}

/// One generation call: the shared prompt plus base64 images in order.
#[derive(Debug, Clone)]
pub struct FewShotRequest {
    pub prompt: String,
    pub images: Vec<String>,
    pub options: GenerationOptions,
}

/// Trait that few-shot generators implement.
#[async_trait]
pub trait FewShotBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Generate the continuation of `request.prompt`.
    async fn generate(&self, request: &FewShotRequest) -> Result<String, PipelineError>;
}

/// Multimodal generation through an Ollama server.
pub struct OllamaFewShot {
    endpoint: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaFewShot {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &FewShotConfig) -> Self {
        Self::new(
            &config.endpoint,
            &config.model,
            Duration::from_millis(config.timeout_ms),
        )
    }
}

/// Ollama /api/generate request body.
#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: &'a [String],
    stream: bool,
    raw: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    top_p: f32,
    repeat_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

impl From<&GenerationOptions> for OllamaOptions {
    fn from(o: &GenerationOptions) -> Self {
        Self {
            num_predict: o.max_new_tokens,
            temperature: o.temperature,
            top_k: (o.top_k > 0).then_some(o.top_k),
            top_p: o.top_p,
            repeat_penalty: o.repetition_penalty,
            seed: o.seed,
        }
    }
}

/// Ollama /api/generate response.
#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl FewShotBackend for OllamaFewShot {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &FewShotRequest) -> Result<String, PipelineError> {
        let url = format!("{}/api/generate", self.endpoint);

        let body = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            images: &request.images,
            stream: false,
            raw: true,
            options: OllamaOptions::from(&request.options),
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| send_error("fewshot", self.timeout, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Llm {
                message: format!("Ollama HTTP {status}: {text}"),
                status_code: Some(status.as_u16()),
            });
        }

        let parsed: OllamaResponse = resp.json().await.map_err(|e| PipelineError::Llm {
            message: format!("Failed to parse Ollama response: {e}"),
            status_code: None,
        })?;
        Ok(parsed.response)
    }
}

/// Reads an image file as base64.
fn encode_image(path: &Path) -> Result<String, PipelineError> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::Decode {
        path: path.to_path_buf(),
        message: format!("Cannot read image: {e}"),
    })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Few-shot captioning driver.
pub struct FewShotCaptioner {
    backend: Box<dyn FewShotBackend>,
    prompt: String,
    example_images: Vec<String>,
    output_prompt: String,
    options: GenerationOptions,
    extension: String,
    retry: RetryConfig,
}

impl FewShotCaptioner {
    /// Prepare the shared prompt and encode the example images once.
    pub fn new(
        backend: Box<dyn FewShotBackend>,
        examples: &[Example],
        config: &FewShotConfig,
        retry: RetryConfig,
    ) -> Result<Self, PipelineError> {
        let prompt = build_prompt(examples, &config.output_prompt);
        tracing::info!("Final full prompt with example pairs: {prompt}");

        let example_images = examples
            .iter()
            .map(|e| encode_image(&e.image))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            backend,
            prompt,
            example_images,
            output_prompt: config.output_prompt.clone(),
            options: GenerationOptions::from(config),
            extension: config.output_extension.clone(),
            retry,
        })
    }

    /// The prompt shared by every request.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Caption one image, returning the trimmed-at-output-prompt text.
    pub async fn caption(&self, path: &Path) -> Result<String, PipelineError> {
        let mut images = self.example_images.clone();
        images.push(encode_image(path)?);

        let request = FewShotRequest {
            prompt: self.prompt.clone(),
            images,
            options: self.options.clone(),
        };

        let raw = with_retry(&self.retry, self.backend.name(), || {
            self.backend.generate(&request)
        })
        .await?;
        Ok(cut_at_output_prompt(&raw, &self.output_prompt).to_string())
    }

    /// Caption every image that has no `<stem>.<ext>` yet.
    ///
    /// Existing outputs are left untouched, so re-runs write nothing new.
    pub async fn run(&self, images: &[PathBuf]) -> Result<RunStats, PipelineError> {
        let mut stats = RunStats::default();

        for path in images {
            let out = sidecar_path(path, &self.extension);
            if out.exists() {
                tracing::debug!("{} exists, skipping", out.display());
                stats.skipped += 1;
                continue;
            }

            let start = Instant::now();
            let caption = match self.caption(path).await {
                Ok(caption) => caption,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!("Few-shot caption failed for {:?}: {e}", path);
                    continue;
                }
            };
            tracing::info!("Caption: {caption}");
            tracing::info!(
                "Time taken for {:?}: {:.2} seconds",
                path,
                start.elapsed().as_secs_f64()
            );

            write_sidecar(&out, &caption)?;
            stats.written += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records requests and replies with a canned continuation.
    struct MockBackend {
        reply: String,
        call_count: Arc<AtomicU32>,
        last_request: Arc<Mutex<Option<FewShotRequest>>>,
    }

    #[async_trait]
    impl FewShotBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        async fn generate(&self, request: &FewShotRequest) -> Result<String, PipelineError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn write_png(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        RgbImage::from_pixel(4, 4, Rgb([9, 9, 9])).save(path).unwrap();
    }

    fn example(caption: &str) -> Example {
        Example {
            image: PathBuf::from("x.png"),
            caption: caption.to_string(),
        }
    }

    #[test]
    fn test_build_prompt() {
        let prompt = build_prompt(&[example("a red car"), example("two\ndogs")], "Output:");
        assert_eq!(
            prompt,
            "<image> Output:a red car<image> Output:twodogs<image> Output:"
        );
    }

    #[test]
    fn test_build_prompt_without_examples() {
        assert_eq!(build_prompt(&[], "Output:"), "<image> Output:");
    }

    #[test]
    fn test_cut_at_output_prompt() {
        assert_eq!(
            cut_at_output_prompt("a cat sleeping<image> Output:a dog", "Output:"),
            "a cat sleeping<image> "
        );
        assert_eq!(cut_at_output_prompt("plain", "Output:"), "plain");
        assert_eq!(cut_at_output_prompt("plain", ""), "plain");
    }

    #[test]
    fn test_load_examples_skips_uncaptioned() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"));
        std::fs::write(dir.path().join("a.txt"), "a grey square").unwrap();
        write_png(&dir.path().join("sub/b.jpg"));

        let examples = load_examples(dir.path()).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].caption, "a grey square");
    }

    #[test]
    fn test_top_k_zero_is_omitted() {
        let options = GenerationOptions::from(&FewShotConfig::default());
        let json = serde_json::to_value(OllamaOptions::from(&options)).unwrap();
        assert!(json.get("top_k").is_none());
        assert_eq!(json["num_predict"], 48);
    }

    #[tokio::test]
    async fn test_run_sends_examples_then_target_and_skips_existing() {
        let examples_dir = tempfile::tempdir().unwrap();
        write_png(&examples_dir.path().join("e1.png"));
        std::fs::write(examples_dir.path().join("e1.txt"), "grey block").unwrap();

        let input = tempfile::tempdir().unwrap();
        write_png(&input.path().join("new.png"));
        write_png(&input.path().join("done.png"));
        std::fs::write(input.path().join("done.flamcap"), "kept").unwrap();

        let call_count = Arc::new(AtomicU32::new(0));
        let last_request = Arc::new(Mutex::new(None));
        let backend = MockBackend {
            reply: "a small square Output: something else".to_string(),
            call_count: call_count.clone(),
            last_request: last_request.clone(),
        };

        let examples = load_examples(examples_dir.path()).unwrap();
        let captioner = FewShotCaptioner::new(
            Box::new(backend),
            &examples,
            &FewShotConfig::default(),
            RetryConfig::default(),
        )
        .unwrap();

        let images = ImageDiscovery::recursive().discover(input.path());
        let stats = captioner.run(&images).await.unwrap();

        assert_eq!(stats.written, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(
            std::fs::read_to_string(input.path().join("new.flamcap")).unwrap(),
            "a small square "
        );
        assert_eq!(
            std::fs::read_to_string(input.path().join("done.flamcap")).unwrap(),
            "kept"
        );

        let request = last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.images.len(), 2);
        assert_eq!(request.prompt, "<image> Output:grey block<image> Output:");

        // Second pass: everything exists, nothing is generated
        let stats = captioner.run(&images).await.unwrap();
        assert_eq!(stats.written, 0);
        assert_eq!(stats.skipped, 2);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let backend = OllamaFewShot::new(
            &format!("http://127.0.0.1:{port}"),
            "llava",
            Duration::from_secs(5),
        );
        let request = FewShotRequest {
            prompt: "<image> Output:".to_string(),
            images: Vec::new(),
            options: GenerationOptions::from(&FewShotConfig::default()),
        };

        let err = backend.generate(&request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Connection { .. }), "{err:?}");
        assert!(crate::retry::is_retryable(&err));
    }
}
