use crate::cli::{Cli, OutputFormat};
use crate::directive::CaptureKind;
use crate::parser::DEFAULT_READ_BUFFER;
use crate::rules::{Rule, RuleSet};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

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

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionConfig,
    pub output: OutputConfig,
    pub files: FileConfig,
    pub rules: Vec<Rule>,
}

/// Extraction-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Number of documents processed concurrently
    pub threads: Option<usize>,
    /// Stop on the first document that fails
    pub fail_fast: bool,
    /// Stop reading a document after this many captured items
    pub max_items: Option<usize>,
    /// Read buffer per document, in bytes
    pub read_buffer_size: usize,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormat,
    /// Directory receiving extracted files
    pub directory: Option<PathBuf>,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (errors only)
    pub quiet: bool,
}

/// File processing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// File extensions to process
    pub extensions: Vec<String>,
    /// Include patterns (glob syntax)
    pub include_patterns: Vec<String>,
    /// Exclude patterns (glob syntax)
    pub exclude_patterns: Vec<String>,
    /// Maximum directory depth (unlimited when absent)
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            threads: None,
            fail_fast: false,
            max_items: None,
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![],
            max_depth: None,
            follow_symlinks: false,
        }
    }
}

const CONFIG_NAMES: [&str; 4] = [
    "vers-xml.toml",
    "vers-xml.json",
    ".vers-xml.toml",
    ".vers-xml.json",
];

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(cli, &SystemEnvProvider).await
    }

    /// Same as [`ConfigManager::load_config`] with a custom environment provider
    pub async fn load_config_with(cli: &Cli, env: &impl EnvProvider) -> Result<Config> {
        let mut config = match &cli.config {
            Some(config_path) => Self::load_from_file(config_path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);
        Self::validate_config(&config)?;

        tracing::debug!(
            rules = config.rules.len(),
            extensions = ?config.files.extensions,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str(&content)?),
            },
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        for name in &CONFIG_NAMES {
            let path = PathBuf::from(name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("vers-xml");
            for name in &CONFIG_NAMES {
                let path = app_config_dir.join(name);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(Some(Self::load_from_file(&path).await?));
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
        if let Some(threads) = parse_env(env, "VERS_XML_THREADS")? {
            config.extraction.threads = Some(threads);
        }
        if let Some(fail_fast) = parse_env(env, "VERS_XML_FAIL_FAST")? {
            config.extraction.fail_fast = fail_fast;
        }
        if let Some(max_items) = parse_env(env, "VERS_XML_MAX_ITEMS")? {
            config.extraction.max_items = Some(max_items);
        }

        if let Some(directory) = env.get("VERS_XML_OUTPUT_DIR") {
            config.output.directory = Some(PathBuf::from(directory));
        }
        if let Some(verbose) = parse_env(env, "VERS_XML_VERBOSE")? {
            config.output.verbose = verbose;
        }
        if let Some(quiet) = parse_env(env, "VERS_XML_QUIET")? {
            config.output.quiet = quiet;
        }
        if let Some(format) = env.get("VERS_XML_FORMAT") {
            config.output.format = <OutputFormat as ValueEnum>::from_str(&format, true).map_err(|_| {
                ConfigError::Environment(format!("Invalid VERS_XML_FORMAT value: {}", format))
            })?;
        }

        if let Some(extensions) = env.get("VERS_XML_EXTENSIONS") {
            config.files.extensions = split_list(&extensions, ',');
        }

        // Rules from the environment are added after those from the file.
        if let Some(rules) = env.get("VERS_XML_RULES") {
            for spec in split_list(&rules, ';') {
                let rule = spec.parse::<Rule>().map_err(|e| {
                    ConfigError::Environment(format!("Invalid VERS_XML_RULES entry: {}", e))
                })?;
                config.rules.push(rule);
            }
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.threads.is_some() {
            config.extraction.threads = cli.threads;
        }
        if cli.fail_fast {
            config.extraction.fail_fast = true;
        }
        if cli.max_items.is_some() {
            config.extraction.max_items = cli.max_items;
        }

        if let Some(format) = cli.output_format {
            config.output.format = format;
        }
        if let Some(directory) = &cli.output_dir {
            config.output.directory = Some(directory.clone());
        }
        if cli.verbose || cli.quiet {
            config.output.verbose = cli.verbose;
            config.output.quiet = cli.quiet;
        }

        if let Some(extensions) = cli.get_extensions() {
            config.files.extensions = extensions;
        }
        if !cli.include_patterns.is_empty() {
            config.files.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.files.exclude_patterns = cli.exclude_patterns.clone();
        }

        // Rules given on the command line take priority over configured ones.
        if !cli.rules.is_empty() {
            let mut rules = cli.rules.clone();
            rules.append(&mut config.rules);
            config.rules = rules;
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(threads) = config.extraction.threads {
            if threads == 0 {
                return Err(ConfigError::Validation(
                    "Number of threads must be greater than 0".to_string(),
                ));
            }
            if threads > 1000 {
                return Err(ConfigError::Validation(
                    "Number of threads cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.extraction.max_items == Some(0) {
            return Err(ConfigError::Validation(
                "Maximum number of items must be greater than 0".to_string(),
            ));
        }

        if config.extraction.read_buffer_size == 0 {
            return Err(ConfigError::Validation(
                "Read buffer size must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.files.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one file extension must be specified".to_string(),
            ));
        }

        for ext in &config.files.extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Invalid file extension: {}",
                    ext
                )));
            }
        }

        if config.rules.is_empty() {
            return Err(ConfigError::Validation(
                "At least one capture rule must be specified".to_string(),
            ));
        }

        let rules = RuleSet::new(config.rules.clone())?;
        if rules.has_file_rules() && config.output.directory.is_none() {
            return Err(ConfigError::Validation(
                "Rules with the 'file' action need an output directory".to_string(),
            ));
        }

        for rule in &config.rules {
            if rule.action == CaptureKind::Element && rule.decode_base64 {
                return Err(ConfigError::Validation(format!(
                    "Rule '{}': base64 decoding applies to value and file actions only",
                    rule.path
                )));
            }
            if let Some(extension) = &rule.extension
                && (extension.is_empty() || extension.contains(['/', '\\', '.']))
            {
                return Err(ConfigError::Validation(format!(
                    "Rule '{}': invalid file extension '{}'",
                    rule.path, extension
                )));
            }
        }

        Ok(())
    }

    /// Get the effective thread count
    pub fn get_thread_count(config: &Config) -> usize {
        config.extraction.threads.unwrap_or_else(num_cpus::get)
    }
}

fn parse_env<T: FromStr>(env: &impl EnvProvider, key: &str) -> Result<Option<T>> {
    match env.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, raw))),
        None => Ok(None),
    }
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn new() -> Self {
            Self {
                vars: HashMap::new(),
            }
        }

        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    fn valid_config() -> Config {
        Config {
            rules: vec![Rule::new("**/vers:Title", CaptureKind::Value)],
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.extraction.threads, None);
        assert!(!config.extraction.fail_fast);
        assert_eq!(config.extraction.max_items, None);
        assert_eq!(config.extraction.read_buffer_size, DEFAULT_READ_BUFFER);

        assert_eq!(config.output.format, OutputFormat::Human);
        assert!(config.output.directory.is_none());
        assert!(!config.output.verbose);
        assert!(!config.output.quiet);

        assert_eq!(config.files.extensions, vec!["xml"]);
        assert!(config.files.include_patterns.is_empty());
        assert!(config.rules.is_empty());
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let toml_content = r#"
[extraction]
threads = 8
fail_fast = true
max_items = 20

[output]
format = "json"
directory = "/tmp/extracted"
verbose = true

[files]
extensions = ["xml", "veo"]
exclude_patterns = ["**/draft/**"]

[[rules]]
path = "vers:VEO/**/vers:DocumentData"
action = "file"
decode_base64 = true
extension = "pdf"

[[rules]]
path = "**/vers:Title"
action = "value"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.extraction.threads, Some(8));
        assert!(config.extraction.fail_fast);
        assert_eq!(config.extraction.max_items, Some(20));
        assert_eq!(config.extraction.read_buffer_size, DEFAULT_READ_BUFFER);

        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.output.directory, Some(PathBuf::from("/tmp/extracted")));
        assert!(config.output.verbose);
        assert!(!config.output.quiet);

        assert_eq!(config.files.extensions, vec!["xml", "veo"]);
        assert_eq!(config.files.exclude_patterns, vec!["**/draft/**"]);

        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].action, CaptureKind::File);
        assert!(config.rules[0].decode_base64);
        assert_eq!(config.rules[0].file_extension(), "pdf");
        assert_eq!(config.rules[1].action, CaptureKind::Value);
        assert!(!config.rules[1].decode_base64);
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let json_content = r#"{
  "extraction": { "threads": 4 },
  "output": { "format": "summary" },
  "rules": [
    { "path": "record/signature", "action": "element" }
  ]
}"#;

        fs::write(&config_path, json_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.extraction.threads, Some(4));
        assert_eq!(config.output.format, OutputFormat::Summary);
        assert_eq!(config.files.extensions, vec!["xml"]);
        assert_eq!(config.rules[0].action, CaptureKind::Element);
    }

    #[tokio::test]
    async fn test_unsupported_file_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "rules: []").unwrap();

        let result = ConfigManager::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn test_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[extraction\nthreads = ").unwrap();

        let result = ConfigManager::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::TomlParsing(_))));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, "{ \"extraction\": ").unwrap();

        let result = ConfigManager::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::JsonParsing(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = MockEnvProvider::new();
        env.set("VERS_XML_THREADS", "16");
        env.set("VERS_XML_FAIL_FAST", "true");
        env.set("VERS_XML_OUTPUT_DIR", "/srv/out");
        env.set("VERS_XML_FORMAT", "JSON");
        env.set("VERS_XML_EXTENSIONS", "xml, veo");
        env.set("VERS_XML_RULES", "a/b=value; **/c=file:base64");

        let config = ConfigManager::apply_environment_overrides_with(&env, valid_config()).unwrap();

        assert_eq!(config.extraction.threads, Some(16));
        assert!(config.extraction.fail_fast);
        assert_eq!(config.output.directory, Some(PathBuf::from("/srv/out")));
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.files.extensions, vec!["xml", "veo"]);
        assert_eq!(config.rules.len(), 3);
        assert_eq!(config.rules[2].path, "**/c");
        assert!(config.rules[2].decode_base64);
    }

    #[test]
    fn test_invalid_environment_values() {
        let mut env = MockEnvProvider::new();
        env.set("VERS_XML_THREADS", "many");
        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        assert!(matches!(result, Err(ConfigError::Environment(_))));

        let mut env = MockEnvProvider::new();
        env.set("VERS_XML_FORMAT", "xml");
        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        assert!(matches!(result, Err(ConfigError::Environment(_))));

        let mut env = MockEnvProvider::new();
        env.set("VERS_XML_RULES", "broken");
        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        assert!(matches!(result, Err(ConfigError::Environment(_))));
    }

    #[test]
    fn test_merge_with_cli() {
        let cli = Cli::try_parse_from([
            "vers-xml",
            "--threads",
            "3",
            "--rule",
            "x/y=element",
            "--format",
            "summary",
            "--quiet",
            "records",
        ])
        .unwrap();

        let mut config = valid_config();
        config.output.verbose = true;
        config.extraction.fail_fast = true;

        let merged = ConfigManager::merge_with_cli(config, &cli);

        assert_eq!(merged.extraction.threads, Some(3));
        // Flags that were not given keep the configured value
        assert!(merged.extraction.fail_fast);
        assert!(merged.output.quiet);
        assert!(!merged.output.verbose);
        assert_eq!(merged.output.format, OutputFormat::Summary);
        assert_eq!(merged.rules[0].path, "x/y");
        assert_eq!(merged.rules[1].path, "**/vers:Title");
    }

    #[test]
    fn test_config_validation() {
        assert!(ConfigManager::validate_config(&valid_config()).is_ok());

        let mut config = valid_config();
        config.extraction.threads = Some(0);
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = valid_config();
        config.extraction.threads = Some(1001);
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = valid_config();
        config.output.verbose = true;
        config.output.quiet = true;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = valid_config();
        config.files.extensions = vec!["x.ml".to_string()];
        assert!(ConfigManager::validate_config(&config).is_err());

        assert!(ConfigManager::validate_config(&Config::default()).is_err());

        let mut config = valid_config();
        config.rules = vec![Rule::new("**/data", CaptureKind::File)];
        let err = ConfigManager::validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("output directory"));

        config.output.directory = Some(PathBuf::from("/tmp/out"));
        assert!(ConfigManager::validate_config(&config).is_ok());

        let mut config = valid_config();
        config.rules = vec![Rule::new("a/[", CaptureKind::Value)];
        assert!(ConfigManager::validate_config(&config).is_err());
    }

    #[test]
    fn test_thread_count() {
        let mut config = valid_config();
        config.extraction.threads = Some(7);
        assert_eq!(ConfigManager::get_thread_count(&config), 7);

        config.extraction.threads = None;
        assert!(ConfigManager::get_thread_count(&config) >= 1);
    }

    #[tokio::test]
    async fn test_load_config_integration() {
        let temp_dir = TempDir::new().unwrap();

        let config_path = temp_dir.path().join("test.toml");
        let toml_content = r#"
[extraction]
threads = 6
fail_fast = true

[[rules]]
path = "**/title"
action = "value"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let args = vec![
            "vers-xml",
            "--config",
            config_path.to_str().unwrap(),
            "--threads",
            "8",
            "--verbose",
            temp_dir.path().to_str().unwrap(),
        ];

        let cli = Cli::try_parse_from(args).unwrap();
        let config = ConfigManager::load_config_with(&cli, &MockEnvProvider::new())
            .await
            .unwrap();

        assert_eq!(config.extraction.threads, Some(8));
        assert!(config.output.verbose);
        assert!(config.extraction.fail_fast);
        assert_eq!(config.rules.len(), 1);
    }
}
