//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

/// Largest context the quantized llama implementation supports.
const MAX_LOCAL_CONTEXT: usize = 4096;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.tagger.threshold) {
            return Err(ConfigError::ValidationError(
                "tagger.threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if self.tagger.effective_repos().is_empty() {
            return Err(ConfigError::ValidationError(
                "tagger.repos must name at least one model".into(),
            ));
        }
        if self.tagger.image_size == 0 {
            return Err(ConfigError::ValidationError(
                "tagger.image_size must be > 0".into(),
            ));
        }
        if self.blip.max_length == 0 {
            return Err(ConfigError::ValidationError(
                "blip.max_length must be > 0".into(),
            ));
        }
        if self.blip.min_length > self.blip.max_length {
            return Err(ConfigError::ValidationError(
                "blip.min_length must not exceed blip.max_length".into(),
            ));
        }
        if self.blip.top_p <= 0.0 || self.blip.top_p > 1.0 {
            return Err(ConfigError::ValidationError(
                "blip.top_p must be in (0.0, 1.0]".into(),
            ));
        }
        if self.fewshot.max_new_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "fewshot.max_new_tokens must be > 0".into(),
            ));
        }
        if self.summarize.caption_exts.is_empty() {
            return Err(ConfigError::ValidationError(
                "summarize.caption_exts must list at least one extension".into(),
            ));
        }
        if self.summarize.openai.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "summarize.openai.max_tokens must be > 0".into(),
            ));
        }
        let local = &self.summarize.local;
        if local.max_tokens == 0 || local.n_batch == 0 || local.n_threads == 0 {
            return Err(ConfigError::ValidationError(
                "summarize.local.max_tokens, n_batch and n_threads must be > 0".into(),
            ));
        }
        if local.n_gqa == 0 {
            return Err(ConfigError::ValidationError(
                "summarize.local.n_gqa must be > 0".into(),
            ));
        }
        if local.n_ctx == 0 || local.n_ctx > MAX_LOCAL_CONTEXT {
            return Err(ConfigError::ValidationError(format!(
                "summarize.local.n_ctx must be between 1 and {MAX_LOCAL_CONTEXT}"
            )));
        }
        if self.retry.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "retry.timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_invalid_threshold() {
        let mut config = Config::default();
        config.tagger.threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("threshold"));

        config.tagger.threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_repos() {
        let mut config = Config::default();
        config.tagger.repos.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tagger.repos"));

        // Stacking supplies its own repos
        config.tagger.stack_models = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_min_above_max_length() {
        let mut config = Config::default();
        config.blip.min_length = 60;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_length"));
    }

    #[test]
    fn test_validate_rejects_empty_caption_exts() {
        let mut config = Config::default();
        config.summarize.caption_exts.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("caption_exts"));
    }

    #[test]
    fn test_validate_rejects_oversized_context() {
        let mut config = Config::default();
        config.summarize.local.n_ctx = 8192;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("n_ctx"));
    }
}
