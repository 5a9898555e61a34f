use crate::error::SentimentError;
use config::{Config, Environment};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Prefix shared by every environment variable this function reads
pub const ENV_PREFIX: &str = "SENTIMENT";

/// Which deserializer turns the fetched artifact into a classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// ONNX sequence classifier, tokenizer shipped with the deployment package
    Onnx,
    /// TF-IDF + logistic regression pipeline serialized as JSON
    Linear,
}

/// Runtime configuration, read once during cold start.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bucket")]
    pub model_bucket: String,
    #[serde(default = "default_key")]
    pub model_key: String,
    /// Where the downloaded artifact lives; derived from the key when unset
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    #[serde(default = "default_format")]
    pub model_format: ModelFormat,
    #[serde(default = "default_tokenizer_path")]
    pub tokenizer_path: PathBuf,
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,
    #[serde(default = "default_max_review_chars")]
    pub max_review_chars: usize,
    /// Path that triggers an administrative model reload; disabled when unset
    #[serde(default)]
    pub reload_route: Option<String>,
    #[serde(default)]
    pub aws_region: Option<String>,
}

fn default_bucket() -> String {
    "mla-c01-sentiment-model".to_string()
}

fn default_key() -> String {
    "sentiment_pipeline.onnx".to_string()
}

fn default_format() -> ModelFormat {
    ModelFormat::Onnx
}

fn default_tokenizer_path() -> PathBuf {
    PathBuf::from("model/tokenizer.json")
}

fn default_max_sequence_length() -> usize {
    512
}

fn default_max_review_chars() -> usize {
    100_000
}

impl Settings {
    /// Reads `SENTIMENT_*` variables from the process environment.
    pub fn from_env() -> Result<Self, SentimentError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    pub(crate) fn from_environment(env: Environment) -> Result<Self, SentimentError> {
        let settings: Settings = Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SentimentError::InvalidSettings(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SentimentError> {
        if self.model_bucket.trim().is_empty() {
            return Err(SentimentError::InvalidSettings(
                "model_bucket cannot be empty".into(),
            ));
        }
        if self.model_key.trim().is_empty() {
            return Err(SentimentError::InvalidSettings(
                "model_key cannot be empty".into(),
            ));
        }
        if self.max_sequence_length == 0 || self.max_review_chars == 0 {
            return Err(SentimentError::InvalidSettings(
                "length limits must be greater than zero".into(),
            ));
        }
        if let Some(route) = &self.reload_route {
            if !route.starts_with('/') {
                return Err(SentimentError::InvalidSettings(format!(
                    "reload_route must start with '/': {}",
                    route
                )));
            }
        }
        Ok(())
    }

    /// Local path of the artifact copy.
    ///
    /// Falls back to `/tmp/<file name of the key>`, the only writable
    /// location inside a Lambda execution environment.
    pub fn artifact_path(&self) -> PathBuf {
        if let Some(path) = &self.local_path {
            return path.clone();
        }
        let file_name = Path::new(&self.model_key)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "model_artifact".into());
        Path::new("/tmp").join(file_name)
    }
}
