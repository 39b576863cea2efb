use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub mailer: MailerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Outbound mail gateway settings. Notifications are fire-and-forget, so a
/// disabled mailer is a valid production configuration.
#[derive(Clone, Debug)]
pub struct MailerConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_token: Option<SecretString>,
    pub from_address: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Directory that holds attachment payloads.
    pub root: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub mailer_enabled: Option<bool>,
    pub mailer_api_token: Option<String>,
    pub storage_root: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://docflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            mailer: MailerConfig {
                enabled: false,
                base_url: "http://localhost:8025".to_string(),
                api_token: None,
                from_address: "approvals@docflow.local".to_string(),
                timeout_secs: 10,
            },
            storage: StorageConfig { root: PathBuf::from("storage/attachments") },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    /// Layering order: defaults, then the config file, then `DOCFLOW_*`
    /// environment variables, then programmatic overrides. Validation runs on
    /// the final result only.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match locate_file(options.config_path.as_deref()) {
            Some(path) => read_file_patch(&path)?.apply(&mut config),
            None if options.require_file => {
                let expected =
                    options.config_path.unwrap_or_else(|| PathBuf::from("docflow.toml"));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => {}
        }

        config.database.overlay_env()?;
        config.mailer.overlay_env()?;
        config.storage.overlay_env();
        config.logging.overlay_env()?;

        let overrides = options.overrides;
        put(&mut config.database.url, overrides.database_url);
        put(&mut config.logging.level, overrides.log_level);
        put(&mut config.mailer.enabled, overrides.mailer_enabled);
        if let Some(token) = overrides.mailer_api_token {
            config.mailer.api_token = Some(token.into());
        }
        put(&mut config.storage.root, overrides.storage_root);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.mailer.validate()?;
        self.storage.validate()?;
        self.logging.validate()
    }
}

impl DatabaseConfig {
    fn overlay_env(&mut self) -> Result<(), ConfigError> {
        put(&mut self.url, env_text("DOCFLOW_DATABASE_URL"));
        put(&mut self.max_connections, env_parsed("DOCFLOW_DATABASE_MAX_CONNECTIONS")?);
        put(&mut self.timeout_secs, env_parsed("DOCFLOW_DATABASE_TIMEOUT_SECS")?);
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        let sqlite_url =
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
        if !sqlite_url {
            return invalid(
                "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
            );
        }
        if self.max_connections == 0 {
            return invalid("database.max_connections must be greater than zero");
        }
        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            return invalid("database.timeout_secs must be in range 1..=300");
        }
        Ok(())
    }
}

impl MailerConfig {
    fn overlay_env(&mut self) -> Result<(), ConfigError> {
        put(&mut self.enabled, env_parsed("DOCFLOW_MAILER_ENABLED")?);
        put(&mut self.base_url, env_text("DOCFLOW_MAILER_BASE_URL"));
        if let Some(token) = env_text("DOCFLOW_MAILER_API_TOKEN") {
            self.api_token = Some(token.into());
        }
        put(&mut self.from_address, env_text("DOCFLOW_MAILER_FROM_ADDRESS"));
        put(&mut self.timeout_secs, env_parsed("DOCFLOW_MAILER_TIMEOUT_SECS")?);
        Ok(())
    }

    /// A disabled mailer skips every check; enabling it makes the gateway
    /// settings mandatory.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return invalid("mailer.base_url must start with http:// or https://");
        }
        let token_missing = self
            .api_token
            .as_ref()
            .map(|token| token.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if token_missing {
            return invalid("mailer.api_token is required when the mailer is enabled");
        }
        if self.from_address.trim().is_empty() || !self.from_address.contains('@') {
            return invalid("mailer.from_address must be a mail address");
        }
        if self.timeout_secs == 0 || self.timeout_secs > 120 {
            return invalid("mailer.timeout_secs must be in range 1..=120");
        }
        Ok(())
    }
}

impl StorageConfig {
    fn overlay_env(&mut self) {
        if let Some(root) = env_text("DOCFLOW_STORAGE_ROOT") {
            self.root = PathBuf::from(root);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return invalid("storage.root must not be empty");
        }
        Ok(())
    }
}

impl LoggingConfig {
    // DOCFLOW_LOG_* aliases are kept for operators used to the short form.
    fn overlay_env(&mut self) -> Result<(), ConfigError> {
        put(
            &mut self.level,
            env_text("DOCFLOW_LOGGING_LEVEL").or_else(|| env_text("DOCFLOW_LOG_LEVEL")),
        );
        let format = env_text("DOCFLOW_LOGGING_FORMAT").or_else(|| env_text("DOCFLOW_LOG_FORMAT"));
        if let Some(value) = format {
            self.format = value.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => invalid("logging.level must be one of trace|debug|info|warn|error"),
        }
    }
}

fn put<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Validation(message.to_string()))
}

fn env_text(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    let Some(raw) = env_text(key) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: raw })
}

fn locate_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("docflow.toml"), PathBuf::from("config/docflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_file_patch(path: &Path) -> Result<FilePatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env(&raw)?;
    toml::from_str::<FilePatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Substitutes `${VAR}` expressions before the TOML parser sees the text, so
/// secrets can live in the environment while the file stays checked in.
fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let expression = &rest[start + 2..];
        let Some(end) = expression.find('}') else {
            return Err(ConfigError::UnterminatedInterpolation);
        };
        let var = &expression[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &expression[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

/// File-side view of the config: every field optional, applied over the
/// defaults section by section.
#[derive(Debug, Default, Deserialize)]
struct FilePatch {
    database: Option<DatabaseSection>,
    mailer: Option<MailerSection>,
    storage: Option<StorageSection>,
    logging: Option<LoggingSection>,
}

impl FilePatch {
    fn apply(self, config: &mut AppConfig) {
        if let Some(section) = self.database {
            put(&mut config.database.url, section.url);
            put(&mut config.database.max_connections, section.max_connections);
            put(&mut config.database.timeout_secs, section.timeout_secs);
        }
        if let Some(section) = self.mailer {
            put(&mut config.mailer.enabled, section.enabled);
            put(&mut config.mailer.base_url, section.base_url);
            if let Some(token) = section.api_token {
                config.mailer.api_token = Some(token.into());
            }
            put(&mut config.mailer.from_address, section.from_address);
            put(&mut config.mailer.timeout_secs, section.timeout_secs);
        }
        if let Some(section) = self.storage {
            put(&mut config.storage.root, section.root);
        }
        if let Some(section) = self.logging {
            put(&mut config.logging.level, section.level);
            put(&mut config.logging.format, section.format);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MailerSection {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_token: Option<String>,
    from_address: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    format: Option<LogFormat>,
}
