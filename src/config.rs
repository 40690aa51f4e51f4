use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::disambiguation::HYBRID_PROVENANCE;
use crate::entity::DEFAULT_ENTITY_SUFFIX;
use crate::error::RuleCoreError;
use crate::validator::{DEFAULT_DTD_PUBLIC_ID, DEFAULT_SCHEMA_CACHE_CAPACITY};

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

impl From<ConfigError> for RuleCoreError {
    fn from(err: ConfigError) -> Self {
        RuleCoreError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const CONFIG_DIR_NAME: &str = "rulecore";
const CONFIG_FILE_NAMES: [&str; 2] = ["rulecore.toml", "rulecore.json"];

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub resources: ResourceConfig,
    pub language_model: LanguageModelConfig,
    pub validation: ValidationConfig,
    pub disambiguation: DisambiguationConfig,
}

/// Where rule files, entity fragments, DTDs and schemas are read from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceConfig {
    /// Root directory of the resource set
    pub root: Option<PathBuf>,
    /// System ids ending in this suffix are served as internal entities
    pub entity_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LanguageModelConfig {
    /// Directory holding one n-gram index per language short code
    pub index_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum number of compiled schemas kept in memory
    pub schema_cache_capacity: u64,
    /// Public id written into inserted DOCTYPE declarations
    pub dtd_public_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisambiguationConfig {
    /// Resource name of the multiword list
    pub multiwords: Option<String>,
    /// Exempt tokens of recognised multiwords from spell checking
    pub ignore_spelling: bool,
    /// Label recorded on tokens rewritten by span propagation
    pub provenance: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            root: None,
            entity_suffix: DEFAULT_ENTITY_SUFFIX.to_string(),
        }
    }
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            index_root: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(CONFIG_DIR_NAME)
                .join("ngram-index"),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            schema_cache_capacity: DEFAULT_SCHEMA_CACHE_CAPACITY,
            dtd_public_id: DEFAULT_DTD_PUBLIC_ID.to_string(),
        }
    }
}

impl Default for DisambiguationConfig {
    fn default() -> Self {
        Self {
            multiwords: None,
            ignore_spelling: true,
            provenance: HYBRID_PROVENANCE.to_string(),
        }
    }
}

/// Loads configuration with precedence: defaults -> file -> environment
pub struct ConfigManager;

impl ConfigManager {
    /// Load from the first configuration file found in the standard
    /// locations, then apply environment overrides and validate
    pub fn load_config() -> Result<Config> {
        let config = Self::find_config_file()?.unwrap_or_default();
        let config = Self::apply_environment_overrides(config)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Same as [`ConfigManager::load_config`] with an explicit file
    pub fn load_config_from(path: &Path) -> Result<Config> {
        let config = Self::load_from_file(path)?;
        let config = Self::apply_environment_overrides(config)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in the working directory, then the user
    /// config directory
    pub fn find_config_file() -> Result<Option<Config>> {
        let mut search_dirs = vec![PathBuf::from(".")];
        if let Some(config_dir) = dirs::config_dir() {
            search_dirs.push(config_dir.join(CONFIG_DIR_NAME));
        }
        Self::find_config_file_in(&search_dirs)
    }

    pub fn find_config_file_in(search_dirs: &[PathBuf]) -> Result<Option<Config>> {
        for dir in search_dirs {
            for name in CONFIG_FILE_NAMES {
                let path = dir.join(name);
                if path.is_file() {
                    tracing::debug!("Loading configuration from {}", path.display());
                    return Ok(Some(Self::load_from_file(&path)?));
                }
            }
        }
        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Resource settings
        if let Some(root) = env.get("RULECORE_RESOURCE_ROOT") {
            config.resources.root = Some(PathBuf::from(root));
        }

        if let Some(suffix) = env.get("RULECORE_ENTITY_SUFFIX") {
            config.resources.entity_suffix = suffix;
        }

        // Language model settings
        if let Some(index_root) = env.get("RULECORE_NGRAM_INDEX") {
            config.language_model.index_root = PathBuf::from(index_root);
        }

        // Validation settings
        if let Some(capacity) = env.get("RULECORE_SCHEMA_CACHE_CAPACITY") {
            config.validation.schema_cache_capacity = capacity.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid RULECORE_SCHEMA_CACHE_CAPACITY value: {}",
                    capacity
                ))
            })?;
        }

        if let Some(public_id) = env.get("RULECORE_DTD_PUBLIC_ID") {
            config.validation.dtd_public_id = public_id;
        }

        // Disambiguation settings
        if let Some(multiwords) = env.get("RULECORE_MULTIWORDS") {
            config.disambiguation.multiwords = Some(multiwords).filter(|m| !m.is_empty());
        }

        if let Some(ignore_spelling) = env.get("RULECORE_IGNORE_SPELLING") {
            config.disambiguation.ignore_spelling = ignore_spelling.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid RULECORE_IGNORE_SPELLING value: {}",
                    ignore_spelling
                ))
            })?;
        }

        if let Some(provenance) = env.get("RULECORE_PROVENANCE") {
            config.disambiguation.provenance = provenance;
        }

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        let suffix = &config.resources.entity_suffix;
        if suffix.len() < 2 || !suffix.starts_with('.') {
            return Err(ConfigError::Validation(format!(
                "Entity suffix must start with '.' and name an extension: '{}'",
                suffix
            )));
        }
        if suffix.contains('/') || suffix.contains('\\') {
            return Err(ConfigError::Validation(format!(
                "Invalid entity suffix: {}",
                suffix
            )));
        }

        if let Some(root) = &config.resources.root {
            if !root.is_dir() {
                return Err(ConfigError::Validation(format!(
                    "Resource root is not a directory: {}",
                    root.display()
                )));
            }
        }

        if config.validation.schema_cache_capacity == 0 {
            return Err(ConfigError::Validation(
                "Schema cache capacity must be greater than 0".to_string(),
            ));
        }

        if config.validation.dtd_public_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "DTD public id cannot be empty".to_string(),
            ));
        }

        if config.disambiguation.provenance.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Disambiguation provenance label cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.resources.root, None);
        assert_eq!(config.resources.entity_suffix, ".ent");
        assert!(config.language_model.index_root.ends_with("rulecore/ngram-index"));
        assert_eq!(config.validation.schema_cache_capacity, 64);
        assert_eq!(config.validation.dtd_public_id, "-//W3C//DTD Rules 0.1//EN");
        assert_eq!(config.disambiguation.multiwords, None);
        assert!(config.disambiguation.ignore_spelling);
        assert_eq!(config.disambiguation.provenance, "HybridDisambiguator");
        ConfigManager::validate_config(&config).unwrap();
    }

    #[test]
    fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rulecore.toml");

        let toml_content = r#"
[resources]
root = "/opt/languagetool/resource"
entity_suffix = ".entities"

[language_model]
index_root = "/data/ngrams"

[validation]
schema_cache_capacity = 8

[disambiguation]
multiwords = "en/multiwords.txt"
ignore_spelling = false
"#;
        fs::write(&config_path, toml_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).unwrap();
        assert_eq!(
            config.resources.root,
            Some(PathBuf::from("/opt/languagetool/resource"))
        );
        assert_eq!(config.resources.entity_suffix, ".entities");
        assert_eq!(config.language_model.index_root, PathBuf::from("/data/ngrams"));
        assert_eq!(config.validation.schema_cache_capacity, 8);
        // omitted keys keep their defaults
        assert_eq!(config.validation.dtd_public_id, DEFAULT_DTD_PUBLIC_ID);
        assert_eq!(config.disambiguation.multiwords.as_deref(), Some("en/multiwords.txt"));
        assert!(!config.disambiguation.ignore_spelling);
        assert_eq!(config.disambiguation.provenance, HYBRID_PROVENANCE);
    }

    #[test]
    fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rulecore.json");

        let json_content = r#"{
  "validation": { "schema_cache_capacity": 16, "dtd_public_id": "-//Example//DTD Rules//EN" },
  "disambiguation": { "provenance": "EN_HybridDisambiguator" }
}"#;
        fs::write(&config_path, json_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).unwrap();
        assert_eq!(config.validation.schema_cache_capacity, 16);
        assert_eq!(config.validation.dtd_public_id, "-//Example//DTD Rules//EN");
        assert_eq!(config.disambiguation.provenance, "EN_HybridDisambiguator");
        assert_eq!(config.resources.entity_suffix, ".ent");
    }

    #[test]
    fn test_extensionless_file_falls_back_to_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rulecore");
        fs::write(&config_path, r#"{"validation": {"schema_cache_capacity": 3}}"#).unwrap();

        let config = ConfigManager::load_from_file(&config_path).unwrap();
        assert_eq!(config.validation.schema_cache_capacity, 3);
    }

    #[test]
    fn test_unsupported_file_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rulecore.yaml");
        fs::write(&config_path, "validation: {}").unwrap();

        match ConfigManager::load_from_file(&config_path) {
            Err(ConfigError::UnsupportedFormat(ext)) => assert_eq!(ext, "yaml"),
            other => panic!("Expected UnsupportedFormat error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rulecore.toml");
        fs::write(&config_path, "[validation\nschema_cache_capacity = ").unwrap();

        assert!(matches!(
            ConfigManager::load_from_file(&config_path),
            Err(ConfigError::TomlParsing(_))
        ));
    }

    #[test]
    fn test_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rulecore.json");
        fs::write(&config_path, "{ \"validation\": ").unwrap();

        assert!(matches!(
            ConfigManager::load_from_file(&config_path),
            Err(ConfigError::JsonParsing(_))
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let mut mock_env = MockEnvProvider::default();
        mock_env.set("RULECORE_RESOURCE_ROOT", "/srv/rules");
        mock_env.set("RULECORE_ENTITY_SUFFIX", ".entities");
        mock_env.set("RULECORE_NGRAM_INDEX", "/srv/ngrams");
        mock_env.set("RULECORE_SCHEMA_CACHE_CAPACITY", "5");
        mock_env.set("RULECORE_MULTIWORDS", "de/multiwords.txt");
        mock_env.set("RULECORE_IGNORE_SPELLING", "false");
        mock_env.set("RULECORE_PROVENANCE", "DE_Hybrid");

        let config =
            ConfigManager::apply_environment_overrides_with(&mock_env, Config::default()).unwrap();

        assert_eq!(config.resources.root, Some(PathBuf::from("/srv/rules")));
        assert_eq!(config.resources.entity_suffix, ".entities");
        assert_eq!(config.language_model.index_root, PathBuf::from("/srv/ngrams"));
        assert_eq!(config.validation.schema_cache_capacity, 5);
        assert_eq!(config.disambiguation.multiwords.as_deref(), Some("de/multiwords.txt"));
        assert!(!config.disambiguation.ignore_spelling);
        assert_eq!(config.disambiguation.provenance, "DE_Hybrid");
    }

    #[test]
    fn test_invalid_environment_values() {
        let mut mock_env = MockEnvProvider::default();
        mock_env.set("RULECORE_SCHEMA_CACHE_CAPACITY", "many");

        match ConfigManager::apply_environment_overrides_with(&mock_env, Config::default()) {
            Err(ConfigError::Environment(message)) => {
                assert!(message.contains("RULECORE_SCHEMA_CACHE_CAPACITY"))
            }
            other => panic!("Expected Environment error, got {:?}", other),
        }

        let mut mock_env = MockEnvProvider::default();
        mock_env.set("RULECORE_IGNORE_SPELLING", "sometimes");
        assert!(
            ConfigManager::apply_environment_overrides_with(&mock_env, Config::default()).is_err()
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.resources.entity_suffix = "ent".to_string();
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.resources.entity_suffix = "./x".to_string();
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.validation.schema_cache_capacity = 0;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.resources.root = Some(PathBuf::from("/definitely/not/here"));
        assert!(ConfigManager::validate_config(&config).is_err());

        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.resources.root = Some(temp_dir.path().to_path_buf());
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[test]
    fn test_find_config_file_in_search_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(
            second.path().join("rulecore.json"),
            r#"{"validation": {"schema_cache_capacity": 2}}"#,
        )
        .unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let config = ConfigManager::find_config_file_in(&dirs).unwrap().unwrap();
        assert_eq!(config.validation.schema_cache_capacity, 2);

        fs::write(
            first.path().join("rulecore.toml"),
            "[validation]\nschema_cache_capacity = 1\n",
        )
        .unwrap();
        let config = ConfigManager::find_config_file_in(&dirs).unwrap().unwrap();
        assert_eq!(config.validation.schema_cache_capacity, 1);
    }

    #[test]
    fn test_find_config_file_not_found() {
        let empty = TempDir::new().unwrap();
        let found = ConfigManager::find_config_file_in(&[empty.path().to_path_buf()]).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: RuleCoreError = ConfigError::Validation("bad".to_string()).into();
        assert!(matches!(err, RuleCoreError::Config(message) if message.contains("bad")));
    }

    #[test]
    fn test_load_config_from_file_validates() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rulecore.toml");
        fs::write(&config_path, "[validation]\nschema_cache_capacity = 0\n").unwrap();

        assert!(matches!(
            ConfigManager::load_config_from(&config_path),
            Err(ConfigError::Validation(_))
        ));
    }
}
