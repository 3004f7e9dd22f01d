//! File discovery for finding images in directories.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Image extensions every driver accepts.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Discovers image files in a directory.
#[derive(Debug, Clone)]
pub struct ImageDiscovery {
    extensions: Vec<String>,
    recursive: bool,
}

impl ImageDiscovery {
    /// Discovery over the top-level entries of a directory.
    pub fn flat() -> Self {
        Self {
            extensions: IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            recursive: false,
        }
    }

    /// Discovery over a whole directory tree.
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::flat()
        }
    }

    /// Find all supported images under `dir`, sorted by path.
    ///
    /// Unreadable entries are skipped; a missing directory yields no files.
    pub fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(if self.recursive { usize::MAX } else { 1 })
            .follow_links(true);

        let mut files: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && self.is_supported(e.path()))
            .map(|e| e.into_path())
            .collect();

        // Sort by path for deterministic ordering
        files.sort();
        files
    }

    /// Check if a file has a supported extension (case-insensitive).
    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext_lower = ext.to_lowercase();
                self.extensions.iter().any(|e| *e == ext_lower)
            })
            .unwrap_or(false)
    }
}
