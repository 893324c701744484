use docbind::{Credentials, EmulatorConfig, InitOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_PROJECT_ID: &str = "demo-docbind";

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Backing store credentials
    pub credentials: ConfigValue<Credentials>,
    /// Local emulator to route traffic to, if any
    pub emulator: ConfigValue<Option<EmulatorConfig>>,
    /// Whether to keep an offline cache
    pub offline_persistence: ConfigValue<bool>,
    /// Directory holding the offline cache
    pub data_dir: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    credentials: Option<Credentials>,
    emulator: Option<EmulatorConfig>,
    offline_persistence: Option<bool>,
    data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with(config_path, |name| std::env::var(name).ok())
    }

    /// Like [`Config::load`], reading environment variables through `env`.
    pub fn load_with(
        config_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self {
            credentials: ConfigValue::new(
                Credentials::for_project(DEFAULT_PROJECT_ID),
                ConfigSource::Default,
            ),
            emulator: ConfigValue::new(None, ConfigSource::Default),
            offline_persistence: ConfigValue::new(true, ConfigSource::Default),
            data_dir: ConfigValue::new(Self::default_data_dir(), ConfigSource::Default),
            config_file: None,
        };

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
            config.apply_file(file_config, &path);
            config.config_file = Some(path);
        }

        config.apply_env(env)?;

        if config.credentials.value.project_id.trim().is_empty() {
            config.credentials.value.project_id = DEFAULT_PROJECT_ID.to_string();
        }
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile, path: &Path) {
        if let Some(credentials) = file.credentials {
            self.credentials = ConfigValue::new(credentials, ConfigSource::File);
        }
        if let Some(emulator) = file.emulator {
            self.emulator = ConfigValue::new(Some(emulator), ConfigSource::File);
        }
        if let Some(enabled) = file.offline_persistence {
            self.offline_persistence = ConfigValue::new(enabled, ConfigSource::File);
        }
        if let Some(dir) = file.data_dir {
            // Resolve relative paths against config file's directory
            let resolved = if dir.is_relative() {
                path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
            } else {
                dir
            };
            self.data_dir = ConfigValue::new(resolved, ConfigSource::File);
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let credential_vars: [(&str, fn(&mut Credentials, String)); 7] = [
            ("DOCBIND_API_KEY", |c, v| c.api_key = Some(v)),
            ("DOCBIND_AUTH_DOMAIN", |c, v| c.auth_domain = Some(v)),
            ("DOCBIND_PROJECT_ID", |c, v| c.project_id = v),
            ("DOCBIND_STORAGE_BUCKET", |c, v| c.storage_bucket = Some(v)),
            ("DOCBIND_MESSAGING_SENDER_ID", |c, v| c.messaging_sender_id = Some(v)),
            ("DOCBIND_APP_ID", |c, v| c.app_id = Some(v)),
            ("DOCBIND_MEASUREMENT_ID", |c, v| c.measurement_id = Some(v)),
        ];
        for (name, assign) in credential_vars {
            if let Some(value) = env(name) {
                assign(&mut self.credentials.value, value);
                self.credentials.source = ConfigSource::Environment;
            }
        }

        if let Some(value) = env("DOCBIND_EMULATOR_HOST") {
            let emulator = parse_emulator_host(&value)
                .ok_or_else(|| ConfigError::InvalidEnv("DOCBIND_EMULATOR_HOST", value))?;
            self.emulator = ConfigValue::new(Some(emulator), ConfigSource::Environment);
        }
        if let Some(value) = env("DOCBIND_OFFLINE_PERSISTENCE") {
            let enabled = parse_flag(&value)
                .ok_or_else(|| ConfigError::InvalidEnv("DOCBIND_OFFLINE_PERSISTENCE", value))?;
            self.offline_persistence = ConfigValue::new(enabled, ConfigSource::Environment);
        }
        if let Some(dir) = env("DOCBIND_DATA_DIR") {
            self.data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        Ok(())
    }

    /// Options for `Database::initialize`.
    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            emulator: self.emulator.value.clone(),
            offline_persistence: self.offline_persistence.value,
            data_dir: Some(self.data_dir.value.clone()),
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/docbind/
    /// - macOS: ~/Library/Application Support/docbind/
    /// - Windows: %APPDATA%/docbind/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docbind")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/docbind/
    /// - macOS: ~/Library/Application Support/docbind/
    /// - Windows: %APPDATA%/docbind/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docbind")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

/// Parses `host:port`.
pub fn parse_emulator_host(value: &str) -> Option<EmulatorConfig> {
    let (host, port) = value.trim().rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some(EmulatorConfig {
        host: host.to_string(),
        port: port.parse().ok()?,
    })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
