use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Line ending used for text that has no terminator of its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DefaultEol {
    #[default]
    Lf,
    Crlf,
}

impl DefaultEol {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultEol::Lf => "\n",
            DefaultEol::Crlf => "\r\n",
        }
    }
}

/// Tunables of a text buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BufferConfig {
    /// Target size in bytes of the chunks backing a buffer. Inserts larger
    /// than this are split, and line ending normalization re-chunks to
    /// roughly this size.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// How many recent node lookups are remembered to speed up nearby queries
    #[serde(default = "default_search_cache_limit")]
    pub search_cache_limit: usize,

    /// Edit batches at least this large (and without identifiers) are
    /// applied as one combined operation
    #[serde(default = "default_reduce_operations_threshold")]
    pub reduce_operations_threshold: usize,

    /// Line ending for documents that contain none
    #[serde(default)]
    pub default_eol: DefaultEol,

    /// Rewrite every line ending of a loaded document to the detected one
    #[serde(default = "default_true")]
    pub normalize_eol: bool,
}

fn default_chunk_size() -> usize {
    65535
}

fn default_search_cache_limit() -> usize {
    1
}

fn default_reduce_operations_threshold() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            search_cache_limit: default_search_cache_limit(),
            reduce_operations_threshold: default_reduce_operations_threshold(),
            default_eol: DefaultEol::default(),
            normalize_eol: true,
        }
    }
}

impl BufferConfig {
    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: BufferConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;

        tracing::debug!(path = %path.as_ref().display(), "loaded buffer config");
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        self.validate()?;

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path.as_ref(), contents).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // A chunk must hold at least a \r\n pair
        if self.chunk_size < 2 {
            return Err(ConfigError::ValidationError(
                "chunk_size must be at least 2".to_string(),
            ));
        }

        if self.reduce_operations_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "reduce_operations_threshold must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(msg) => write!(f, "IO error: {msg}"),
            ConfigError::ParseError(msg) => write!(f, "Parse error: {msg}"),
            ConfigError::SerializeError(msg) => write!(f, "Serialize error: {msg}"),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BufferConfig::default();
        assert_eq!(config.chunk_size, 65535);
        assert_eq!(config.search_cache_limit, 1);
        assert_eq!(config.reduce_operations_threshold, 1000);
        assert_eq!(config.default_eol, DefaultEol::Lf);
        assert!(config.normalize_eol);
    }

    #[test]
    fn test_config_validation() {
        let mut config = BufferConfig::default();
        assert!(config.validate().is_ok());

        config.chunk_size = 1;
        assert!(config.validate().is_err());

        config.chunk_size = 16;
        config.reduce_operations_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("buffer.json");

        let config = BufferConfig {
            chunk_size: 4096,
            default_eol: DefaultEol::Crlf,
            ..BufferConfig::default()
        };
        config.save_to_file(&config_path).unwrap();

        let loaded = BufferConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_sparse_config_uses_defaults() {
        let json = r#"{ "default_eol": "crlf", "normalize_eol": false }"#;
        let config: BufferConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.default_eol, DefaultEol::Crlf);
        assert!(!config.normalize_eol);
        assert_eq!(config.chunk_size, 65535);
    }

    #[test]
    fn test_load_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing.json");
        assert!(matches!(
            BufferConfig::load_from_file(&missing),
            Err(ConfigError::IoError(_))
        ));

        let broken = temp_dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            BufferConfig::load_from_file(&broken),
            Err(ConfigError::ParseError(_))
        ));

        let invalid = temp_dir.path().join("invalid.json");
        std::fs::write(&invalid, r#"{ "chunk_size": 0 }"#).unwrap();
        assert!(matches!(
            BufferConfig::load_from_file(&invalid),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = schemars::schema_for!(BufferConfig);
        let json = serde_json::to_value(&schema).unwrap();
        let properties = json["properties"].as_object().unwrap();
        assert!(properties.contains_key("chunk_size"));
        assert!(properties.contains_key("default_eol"));
    }
}
