//! Gathering caption artifacts and shaping them into a synthesis request.

use std::path::Path;

use serde::Serialize;

use crate::error::PipelineError;
use crate::pipeline::{read_sidecar, sidecar_path};
use crate::types::CaptionArtifact;

/// Prefix for the tagger's output.
pub const TAGS_PREFIX: &str = "Tags: ";

/// Read every `<stem>.<ext>` sidecar that exists, in `extensions` order.
///
/// A sidecar that exists but cannot be read is an error.
pub fn collect_artifacts(
    image: &Path,
    extensions: &[String],
) -> Result<Vec<CaptionArtifact>, PipelineError> {
    let mut artifacts = Vec::new();
    for ext in extensions {
        if let Some(text) = read_sidecar(&sidecar_path(image, ext))? {
            artifacts.push(CaptionArtifact {
                extension: ext.trim_start_matches('.').to_string(),
                text,
            });
        }
    }
    Ok(artifacts)
}

/// One labelled artifact in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// `"Tags: "` or `"Caption N: "`
    pub label: String,
    /// Artifact text, verbatim
    pub text: String,
}

/// A system instruction plus one turn per artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub system: String,
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Label artifacts: the tags extension gets `"Tags: "`; every other
    /// artifact gets `"Caption N: "` with N counting from 1 in order.
    pub fn new(system: &str, artifacts: &[CaptionArtifact], tags_extension: &str) -> Self {
        let tags_extension = tags_extension.trim_start_matches('.');
        let mut caption_number = 1;
        let turns = artifacts
            .iter()
            .map(|artifact| {
                let label = if artifact.extension == tags_extension {
                    TAGS_PREFIX.to_string()
                } else {
                    let label = format!("Caption {caption_number}: ");
                    caption_number += 1;
                    label
                };
                Turn {
                    label,
                    text: artifact.text.clone(),
                }
            })
            .collect();

        Self {
            system: system.to_string(),
            turns,
        }
    }

    /// Chat messages: the system instruction then one user message per turn.
    pub fn messages(&self) -> Vec<ChatMessage> {
        std::iter::once(ChatMessage::system(&self.system))
            .chain(
                self.turns
                    .iter()
                    .map(|t| ChatMessage::user(format!("{}{}", t.label, t.text))),
            )
            .collect()
    }

    /// Single-string prompt for a local instruction-tuned model.
    ///
    /// Artifact text is trimmed here, unlike [`Conversation::messages`].
    pub fn prompt(&self) -> String {
        let mut prompt = format!("SYSTEM: {}\n\nUSER: ", self.system);
        for turn in &self.turns {
            prompt.push_str(&turn.label);
            prompt.push_str(turn.text.trim());
            prompt.push('\n');
        }
        prompt.push_str("\nASSISTANT: ");
        prompt
    }
}

/// A Chat Completions message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}
