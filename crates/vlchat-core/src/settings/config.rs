use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::texts::Locale;
use crate::repositories::RepositoryResult;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "nvidia/nemotron-nano-12b-v2-vl:free";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and harmless assistant.";

/// Runtime configuration for a chat session.
///
/// Loaded from `<config_dir>/vlchat/config.json` when present, then
/// overridden by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// API key for the completion endpoint. No key means no client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Model used when the conversation has thinking enabled.
    pub thinking_model: String,
    pub system_prompt: String,
    /// Header text shown on assistant turns.
    pub assistant_header: String,
    pub locale: Locale,
    /// Object name prefix for uploaded media.
    pub upload_prefix: String,
    pub signed_url_ttl_secs: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub referer: String,
    pub app_title: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            thinking_model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            assistant_header: "Qwen3-VL".to_string(),
            locale: Locale::En,
            upload_prefix: "studio-temp/vlchat".to_string(),
            signed_url_ttl_secs: 60 * 60,
            connect_timeout_secs: 30,
            read_timeout_secs: 300,
            referer: "https://qwen3-vl-demo.com".to_string(),
            app_title: "Qwen3-VL Demo".to_string(),
        }
    }
}

impl AppConfig {
    /// Default config file location (XDG-compliant).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vlchat").join("config.json"))
    }

    /// Load from `path` (or the default location), then apply environment overrides.
    ///
    /// A missing file is not an error: defaults are used.
    pub async fn load(path: Option<&Path>) -> RepositoryResult<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading config file");
                let contents = tokio::fs::read_to_string(&path).await?;
                serde_json::from_str::<AppConfig>(&contents)?
            }
            _ => AppConfig::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        info!(
            base_url = %config.base_url,
            model = %config.model,
            thinking_model = %config.thinking_model,
            has_api_key = config.api_key.is_some(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = non_empty("BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = non_empty("VLCHAT_MODEL") {
            self.model = model;
        }
        if let Some(model) = non_empty("VLCHAT_THINKING_MODEL") {
            self.thinking_model = model;
        }
        if let Some(prompt) = non_empty("VLCHAT_SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }
        if let Some(locale) = non_empty("VLCHAT_LOCALE").and_then(|v| Locale::parse(&v)) {
            self.locale = locale;
        } else if lookup("MODELSCOPE_ENVIRONMENT").as_deref() == Some("studio") {
            self.locale = Locale::Zh;
        }
    }

    /// Pick the model variant for a conversation.
    pub fn model_for(&self, enable_thinking: bool) -> &str {
        if enable_thinking {
            &self.thinking_model
        } else {
            &self.model
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::RepositoryError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("API_KEY", "sk-test"),
            ("VLCHAT_MODEL", "plain"),
            ("VLCHAT_THINKING_MODEL", "deep"),
        ]));

        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model_for(false), "plain");
        assert_eq!(config.model_for(true), "deep");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_empty_api_key_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("API_KEY", "  ")]));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_studio_environment_selects_chinese() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("MODELSCOPE_ENVIRONMENT", "studio")]));
        assert_eq!(config.locale, Locale::Zh);

        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("MODELSCOPE_ENVIRONMENT", "studio"),
            ("VLCHAT_LOCALE", "en"),
        ]));
        assert_eq!(config.locale, Locale::En);
    }

    #[tokio::test]
    async fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"upload_prefix":"custom/","signed_url_ttl_secs":120}"#).unwrap();

        let loaded = AppConfig::load(Some(&path)).await.unwrap();
        assert_eq!(loaded.upload_prefix, "custom/");
        assert_eq!(loaded.signed_url_ttl_secs, 120);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{model").unwrap();

        assert!(matches!(
            AppConfig::load(Some(&path)).await,
            Err(RepositoryError::Malformed(_))
        ));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"model":"m"}"#).unwrap();
        assert_eq!(config.model, "m");
        assert_eq!(config.thinking_model, DEFAULT_MODEL);
        assert_eq!(config.read_timeout(), Duration::from_secs(300));
    }
}
