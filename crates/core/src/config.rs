use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub data_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub provider: ProviderConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// OpenAI-compatible endpoint settings. The API key is not part of the file
/// config; callers pass it in when they build a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_batch_size: usize,
    pub chat_model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_dimensions: 1_536,
            embedding_batch_size: 64,
            chat_model: "gpt-3.5-turbo".to_string(),
            temperature: 0.2,
            request_timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ChatConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&raw)?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be at least 1".to_string()));
        }
        if self.provider.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "provider.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.provider.embedding_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "provider.embedding_batch_size must be at least 1".to_string(),
            ));
        }
        if self.provider.embedding_dimensions == 0 {
            return Err(ConfigError::Invalid(
                "provider.embedding_dimensions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() -> Result<(), ConfigError> {
        let config = ChatConfig::from_toml(
            r#"
            data_dir = "/srv/pdf-chat"

            [provider]
            chat_model = "gpt-4o-mini"
            "#,
        )?;

        assert_eq!(config.data_dir, PathBuf::from("/srv/pdf-chat"));
        assert_eq!(config.chunking, ChunkingConfig::default());
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.provider.chat_model, "gpt-4o-mini");
        assert_eq!(config.provider.embedding_model, "text-embedding-ada-002");
        Ok(())
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let result = ChatConfig::from_toml(
            r#"
            [chunking]
            chunk_size = 100
            chunk_overlap = 100
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let result = ChatConfig::from_toml("[retrieval]\ntop_k = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_file_is_read_from_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pdf-chat.toml");
        std::fs::write(&path, "[retrieval]\ntop_k = 3\n")?;

        let config = ChatConfig::load(&path)?;
        assert_eq!(config.retrieval.top_k, 3);
        Ok(())
    }
}
