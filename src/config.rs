use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_poll_interval_secs() -> u64 {
    crate::payment::POLL_INTERVAL.as_secs()
}

fn default_poll_max_attempts() -> u32 {
    crate::payment::MAX_POLL_ATTEMPTS
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Where credentials and consent are persisted. Defaults to
    /// `~/.sellerkit`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            data_dir: None,
            poll_interval_secs: default_poll_interval_secs(),
            poll_max_attempts: default_poll_max_attempts(),
        }
    }
}

impl Config {
    /// Load configuration from the default path (~/.sellerkit/config.toml),
    /// falling back to defaults when no file exists.
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".sellerkit").join("config.toml");
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the data directory, defaulting to ~/.sellerkit (or a
    /// relative fallback when no home directory is available).
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|home| home.join(".sellerkit"))
            .unwrap_or_else(|| PathBuf::from(".sellerkit"))
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(ValidationError {
                field: "base_url".to_string(),
                message: format!(
                    "Must start with http:// or https://, got '{}'",
                    self.base_url
                ),
            });
        }

        if self.poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "poll_interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.poll_max_attempts == 0 {
            errors.push(ValidationError {
                field: "poll_max_attempts".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
