//! Model file downloads from the Hugging Face hub.
//!
//! Files are cached under `{model_dir}/{owner}--{name}/{file}` and reused on
//! later runs. Downloads stream into a `.part` file that is renamed only once
//! the transfer completes, so an interrupted run never leaves a truncated
//! model behind.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::PipelineError;

/// Default hub endpoint.
pub const HUB_ENDPOINT: &str = "https://huggingface.co";

/// Default branch used when a repo has no pinned revision.
pub const MAIN_REVISION: &str = "main";

/// Downloads and caches model files.
#[derive(Debug, Clone)]
pub struct ModelHub {
    root: PathBuf,
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ModelHub {
    /// Create a hub rooted at `model_dir`.
    ///
    /// `HF_TOKEN` is picked up from the environment for gated repos.
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: model_dir.into(),
            endpoint: HUB_ENDPOINT.to_string(),
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
            client: reqwest::Client::new(),
        }
    }

    /// Override the hub endpoint (mirrors, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// The cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory holding files from `repo`.
    pub fn repo_dir(&self, repo: &str) -> PathBuf {
        self.root.join(repo.replace('/', "--"))
    }

    /// Local path for `file` from `repo`, whether or not it exists yet.
    pub fn cached_path(&self, repo: &str, file: &str) -> PathBuf {
        self.repo_dir(repo).join(file)
    }

    /// Whether `file` from `repo` is already in the cache.
    pub fn is_cached(&self, repo: &str, file: &str) -> bool {
        self.cached_path(repo, file).is_file()
    }

    /// Remote URL for `file` at `revision` of `repo`.
    pub fn url(&self, repo: &str, revision: &str, file: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint,
            repo,
            revision.replace('/', "%2F"),
            file
        )
    }

    /// Return the cached path of `file`, downloading it first if needed.
    pub async fn fetch(
        &self,
        repo: &str,
        revision: &str,
        file: &str,
    ) -> Result<PathBuf, PipelineError> {
        let dest = self.cached_path(repo, file);
        if dest.is_file() {
            tracing::debug!("Using cached {repo}/{file} at {:?}", dest);
            return Ok(dest);
        }

        let url = self.url(repo, revision, file);
        tracing::info!("Downloading {repo}/{file}...");
        tracing::info!("  Source: {}", url);
        tracing::info!("  Destination: {:?}", dest);

        self.download_file(&url, &dest).await?;

        if let Ok(meta) = std::fs::metadata(&dest) {
            tracing::info!(
                "  {file} complete ({:.1} MB)",
                meta.len() as f64 / (1024.0 * 1024.0)
            );
        }
        Ok(dest)
    }

    /// Fetch from the `main` branch.
    pub async fn fetch_main(&self, repo: &str, file: &str) -> Result<PathBuf, PipelineError> {
        self.fetch(repo, MAIN_REVISION, file).await
    }

    async fn download_file(&self, url: &str, dest: &Path) -> Result<(), PipelineError> {
        let fail = |message: String| PipelineError::Download {
            url: url.to_string(),
            message,
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(format!("Cannot create {}: {e}", parent.display())))?;
        }

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?
            .error_for_status()
            .map_err(|e| fail(e.to_string()))?;

        let total_size = response.content_length();
        if let Some(size) = total_size {
            tracing::info!("  Size: {:.1} MB", size as f64 / (1024.0 * 1024.0));
        }

        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| fail(format!("Cannot create {}: {e}", partial.display())))?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fail(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| fail(e.to_string()))?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total_size {
                if downloaded % (50 * 1024 * 1024) < chunk.len() as u64 {
                    tracing::info!(
                        "  Progress: {:.0}%",
                        downloaded as f64 / total as f64 * 100.0
                    );
                }
            }
        }

        file.flush().await.map_err(|e| fail(e.to_string()))?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| fail(format!("Cannot move download into place: {e}")))
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_path_layout() {
        let hub = ModelHub::new("/models");
        assert_eq!(
            hub.cached_path("SmilingWolf/wd-v1-4-vit-tagger-v2", "model.onnx"),
            PathBuf::from("/models/SmilingWolf--wd-v1-4-vit-tagger-v2/model.onnx")
        );
    }

    #[test]
    fn test_url_encodes_revision() {
        let hub = ModelHub::new("/models");
        assert_eq!(
            hub.url(
                "Salesforce/blip-image-captioning-large",
                "refs/pr/18",
                "model.safetensors"
            ),
            "https://huggingface.co/Salesforce/blip-image-captioning-large/resolve/refs%2Fpr%2F18/model.safetensors"
        );
    }

    #[test]
    fn test_custom_endpoint() {
        let hub = ModelHub::new("/models").with_endpoint("http://mirror.local/");
        assert_eq!(
            hub.url("a/b", "main", "f.bin"),
            "http://mirror.local/a/b/resolve/main/f.bin"
        );
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/m/model.onnx")),
            PathBuf::from("/m/model.onnx.part")
        );
    }

    #[tokio::test]
    async fn test_fetch_uses_cache_without_network() {
        let dir = tempfile::tempdir().unwrap();
        // Unroutable endpoint: any network attempt would fail
        let hub = ModelHub::new(dir.path()).with_endpoint("http://127.0.0.1:9");
        let cached = hub.cached_path("org/repo", "selected_tags.csv");
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, "tag_id,name\n").unwrap();

        assert!(hub.is_cached("org/repo", "selected_tags.csv"));
        let path = hub.fetch_main("org/repo", "selected_tags.csv").await.unwrap();
        assert_eq!(path, cached);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let hub = ModelHub::new(dir.path()).with_endpoint("http://127.0.0.1:9");
        let err = hub.fetch_main("org/repo", "model.onnx").await.unwrap_err();
        assert!(matches!(err, PipelineError::Download { .. }));
        assert!(!hub.is_cached("org/repo", "model.onnx"));
    }
}
