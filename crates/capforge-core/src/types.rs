//! Core data types shared by the captioning drivers.

use serde::{Deserialize, Serialize};

/// A tag with its (possibly averaged) confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// The tag label as it appears in the tagger's vocabulary
    pub name: String,

    /// Confidence score from 0.0 to 1.0
    pub score: f32,
}

impl Tag {
    /// Create a new tag.
    pub fn new(name: impl Into<String>, score: f32) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// A caption sidecar found next to an image.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionArtifact {
    /// Producer extension (e.g. "b2cap", "wd14cap")
    pub extension: String,

    /// File contents, verbatim
    pub text: String,
}

/// Counters reported at the end of a driver run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// Images that produced a sidecar
    pub written: usize,

    /// Images skipped (existing output, or nothing to summarize)
    pub skipped: usize,

    /// Images whose inference or write failed
    pub failed: usize,
}

impl RunStats {
    /// Total images visited.
    pub fn total(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}
