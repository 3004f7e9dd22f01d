//! Caption synthesis: merge every caption artifact of an image into one.
//!
//! The [`Synthesizer`] gathers `<stem>.<ext>` sidecars in configured order,
//! labels them into a [`Conversation`], asks a [`SummaryBackend`] for a
//! synthesis and writes it as `<stem>.txt` in the output directory.

pub mod conversation;
pub mod local;
pub mod openai;
pub mod pricing;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use conversation::{ChatMessage, Conversation};
pub use pricing::{CostTracker, Usage};

use crate::config::{RetryConfig, SummarizeConfig};
use crate::error::PipelineError;
use crate::pipeline::{sidecar_path_in, write_sidecar};
use crate::retry::with_retry;
use crate::types::RunStats;

/// A synthesized caption.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    /// Token usage, when the backend reports it
    pub usage: Option<Usage>,
}

/// Trait that synthesis backends implement.
///
/// Uses `async_trait` so the synthesizer can hold `Box<dyn SummaryBackend>`.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Produce a synthesis for one image's conversation.
    async fn summarize(&self, conversation: &Conversation) -> Result<Summary, PipelineError>;
}

/// Read the system prompt: the prompt file (trimmed) if set, else the
/// configured text.
pub fn load_system_prompt(config: &SummarizeConfig) -> Result<String, PipelineError> {
    match &config.prompt_file {
        Some(path) => {
            let path = crate::config::expand_path(path);
            std::fs::read_to_string(&path)
                .map(|s| s.trim().to_string())
                .map_err(|source| PipelineError::Sidecar { path, source })
        }
        None => Ok(config.system_prompt.trim().to_string()),
    }
}

/// Drives a backend over a directory of images.
pub struct Synthesizer {
    backend: Box<dyn SummaryBackend>,
    system_prompt: String,
    caption_exts: Vec<String>,
    tags_extension: String,
    output_extension: String,
    output_dir: PathBuf,
    retry: RetryConfig,
    cost: Option<CostTracker>,
}

impl Synthesizer {
    pub fn new(
        backend: Box<dyn SummaryBackend>,
        system_prompt: String,
        config: &SummarizeConfig,
        output_dir: &Path,
        retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            system_prompt,
            caption_exts: config.caption_exts.clone(),
            tags_extension: config.tags_extension.clone(),
            output_extension: config.output_extension.clone(),
            output_dir: output_dir.to_path_buf(),
            retry,
            cost: None,
        }
    }

    /// Track spend with a price table entry.
    pub fn with_cost_tracking(mut self, tracker: CostTracker) -> Self {
        self.cost = Some(tracker);
        self
    }

    /// Running total, when cost tracking is on.
    pub fn total_cost(&self) -> Option<f64> {
        self.cost.as_ref().map(CostTracker::total)
    }

    /// Build the conversation for one image, or `None` when it has no artifacts.
    pub fn conversation_for(&self, image: &Path) -> Result<Option<Conversation>, PipelineError> {
        let artifacts = conversation::collect_artifacts(image, &self.caption_exts)?;
        if artifacts.is_empty() {
            return Ok(None);
        }
        Ok(Some(Conversation::new(
            &self.system_prompt,
            &artifacts,
            &self.tags_extension,
        )))
    }

    /// Synthesize captions for every image with at least one artifact.
    ///
    /// Unreadable artifacts and write failures end the run; a backend
    /// failure (after retries) is logged and the image is counted as failed.
    pub async fn run(&mut self, images: &[PathBuf]) -> Result<RunStats, PipelineError> {
        let mut stats = RunStats::default();

        for image in images {
            tracing::info!("{}", image.display());
            let Some(conversation) = self.conversation_for(image)? else {
                tracing::debug!("No caption artifacts for {:?}, skipping", image);
                stats.skipped += 1;
                continue;
            };

            let backend = &self.backend;
            let summary = match with_retry(&self.retry, backend.name(), || {
                backend.summarize(&conversation)
            })
            .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!("Synthesis failed for {:?}: {e}", image);
                    continue;
                }
            };

            tracing::info!("Response content: {}", summary.text);
            if let (Some(tracker), Some(usage)) = (self.cost.as_mut(), summary.usage) {
                tracker.add(usage);
                tracing::info!("Total cost so far: {:.4}", tracker.total());
            }

            let out = sidecar_path_in(&self.output_dir, image, &self.output_extension);
            write_sidecar(&out, &summary.text)?;
            stats.written += 1;
        }

        Ok(stats)
    }
}
