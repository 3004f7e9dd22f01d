//! Configuration management for Capforge.
//!
//! Configuration is loaded from the platform config directory, falling back
//! to defaults. CLI flags override individual values before the resolved
//! sections are handed to the drivers.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for Capforge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Retry policy for remote calls
    pub retry: RetryConfig,

    /// WD14 tagger ensemble
    pub tagger: TaggerConfig,

    /// BLIP captioner
    pub blip: BlipConfig,

    /// Few-shot captioner
    pub fewshot: FewShotConfig,

    /// Caption synthesizers
    pub summarize: SummarizeConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.capforge.capforge/config.toml
    /// - Linux: ~/.config/capforge/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\capforge\config\config.toml
    ///
    /// Falls back to ~/.capforge/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "capforge", "capforge")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".capforge").join("config.toml")
            })
    }

    /// Get the resolved model cache directory (with ~ expansion).
    pub fn model_dir(&self) -> PathBuf {
        expand_path(&self.general.model_dir)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Re-run validation after CLI overrides have been applied.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
    }
}

/// Expand a leading `~` in a path.
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tagger.threshold, 0.5);
        assert_eq!(config.summarize.openai.max_tokens, 75);
        assert_eq!(config.blip.output_extension, "b2cap");
        assert_eq!(config.fewshot.output_extension, "flamcap");
        assert_eq!(config.retry.rate_limit_pause_ms, 10_000);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[tagger]"));
        assert!(toml.contains("[summarize.openai]"));
        assert!(toml.contains("[summarize.local]"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [tagger]
            threshold = 0.35

            [summarize.openai]
            model = "gpt-3.5-turbo"
            "#,
        )
        .unwrap();
        assert_eq!(config.tagger.threshold, 0.35);
        assert_eq!(config.tagger.output_extension, "wd14cap");
        assert_eq!(config.summarize.openai.model, "gpt-3.5-turbo");
        assert_eq!(config.summarize.openai.max_tokens, 75);
        assert_eq!(config.summarize.caption_exts.len(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[blip]\nmax_length = 30\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.blip.max_length, 30);
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tagger]\nthreshold = 2.0\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_stack_models_overrides_repos() {
        let mut config = TaggerConfig::default();
        assert_eq!(config.effective_repos().len(), 1);
        config.stack_models = true;
        let repos = config.effective_repos();
        assert_eq!(repos.len(), 3);
        assert!(repos.iter().any(|r| r.ends_with("convnext-tagger-v2")));
    }

    #[test]
    fn test_local_presets() {
        let luna = LocalLlmConfig::preset("luna").unwrap();
        assert_eq!(luna, LocalLlmConfig::default());
        let big = LocalLlmConfig::preset("llama2-70b").unwrap();
        assert_eq!(big.n_gqa, 8);
        assert_eq!(big.tokenizer_repo, luna.tokenizer_repo);
        assert!(LocalLlmConfig::preset("mystery").is_none());
    }

    #[test]
    fn test_expand_path_without_tilde() {
        assert_eq!(expand_path(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
