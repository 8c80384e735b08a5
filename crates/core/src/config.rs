use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub max_sessions: usize,
    pub purge_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Ollama,
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
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_timeout_secs: Option<u64>,
    pub server_port: Option<u16>,
    pub session_ttl_secs: Option<u64>,
    pub session_max_sessions: Option<usize>,
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
                url: "sqlite://regdesk.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            session: SessionConfig { ttl_secs: 3600, max_sessions: 10_000, purge_interval_secs: 60 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
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
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("regdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            assign(&mut self.database.url, database.url);
            assign(&mut self.database.max_connections, database.max_connections);
            assign(&mut self.database.timeout_secs, database.timeout_secs);
        }

        if let Some(llm) = patch.llm {
            assign(&mut self.llm.provider, llm.provider);
            assign_some(&mut self.llm.api_key, llm.api_key.map(secret_value));
            assign_some(&mut self.llm.base_url, llm.base_url);
            assign(&mut self.llm.model, llm.model);
            assign(&mut self.llm.timeout_secs, llm.timeout_secs);
            assign(&mut self.llm.max_retries, llm.max_retries);
        }

        if let Some(server) = patch.server {
            assign(&mut self.server.bind_address, server.bind_address);
            assign(&mut self.server.port, server.port);
            assign(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }

        if let Some(session) = patch.session {
            assign(&mut self.session.ttl_secs, session.ttl_secs);
            assign(&mut self.session.max_sessions, session.max_sessions);
            assign(&mut self.session.purge_interval_secs, session.purge_interval_secs);
        }

        if let Some(logging) = patch.logging {
            assign(&mut self.logging.level, logging.level);
            assign(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        assign(&mut self.database.url, read_env("REGDESK_DATABASE_URL"));
        assign(
            &mut self.database.max_connections,
            parse_env("REGDESK_DATABASE_MAX_CONNECTIONS")?,
        );
        assign(&mut self.database.timeout_secs, parse_env("REGDESK_DATABASE_TIMEOUT_SECS")?);

        if let Some(value) = read_env("REGDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        assign_some(&mut self.llm.api_key, read_env("REGDESK_LLM_API_KEY").map(secret_value));
        assign_some(&mut self.llm.base_url, read_env("REGDESK_LLM_BASE_URL"));
        assign(&mut self.llm.model, read_env("REGDESK_LLM_MODEL"));
        assign(&mut self.llm.timeout_secs, parse_env("REGDESK_LLM_TIMEOUT_SECS")?);
        assign(&mut self.llm.max_retries, parse_env("REGDESK_LLM_MAX_RETRIES")?);

        assign(&mut self.server.bind_address, read_env("REGDESK_SERVER_BIND_ADDRESS"));
        assign(&mut self.server.port, parse_env("REGDESK_SERVER_PORT")?);
        assign(
            &mut self.server.graceful_shutdown_secs,
            parse_env("REGDESK_SERVER_GRACEFUL_SHUTDOWN_SECS")?,
        );

        assign(&mut self.session.ttl_secs, parse_env("REGDESK_SESSION_TTL_SECS")?);
        assign(&mut self.session.max_sessions, parse_env("REGDESK_SESSION_MAX_SESSIONS")?);
        assign(
            &mut self.session.purge_interval_secs,
            parse_env("REGDESK_SESSION_PURGE_INTERVAL_SECS")?,
        );

        // The short LOG_* spellings are accepted as aliases.
        assign(
            &mut self.logging.level,
            read_env("REGDESK_LOGGING_LEVEL").or_else(|| read_env("REGDESK_LOG_LEVEL")),
        );
        let log_format =
            read_env("REGDESK_LOGGING_FORMAT").or_else(|| read_env("REGDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        assign(&mut self.database.url, overrides.database_url);
        assign(&mut self.logging.level, overrides.log_level);
        assign_some(&mut self.llm.base_url, overrides.llm_base_url);
        assign(&mut self.llm.model, overrides.llm_model);
        assign(&mut self.llm.timeout_secs, overrides.llm_timeout_secs);
        assign(&mut self.server.port, overrides.server_port);
        assign(&mut self.session.ttl_secs, overrides.session_ttl_secs);
        assign(&mut self.session.max_sessions, overrides.session_max_sessions);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_session(&self.session)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("regdesk.toml"), PathBuf::from("config/regdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let expanded = expand_env_references(&raw)?;
    toml::from_str(&expanded)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${NAME}` with the value of environment variable `NAME`.
fn expand_env_references(input: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let name = &after[..end];
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;
        expanded.push_str(&value);
        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

fn check(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_string()))
    }
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    check(
        url.starts_with("sqlite:") || url == ":memory:",
        "database.url must be a sqlite URL (`sqlite://...`, `sqlite::memory:`, or `:memory:`)",
    )?;
    check(database.max_connections > 0, "database.max_connections must be greater than zero")?;
    check(
        (1..=300).contains(&database.timeout_secs),
        "database.timeout_secs must be in range 1..=300",
    )
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    check((1..=600).contains(&llm.timeout_secs), "llm.timeout_secs must be in range 1..=600")?;
    check(llm.max_retries <= 10, "llm.max_retries must be at most 10")?;
    check(!llm.model.trim().is_empty(), "llm.model must not be empty")?;

    let base_url = llm.base_url.as_deref().map(str::trim).unwrap_or_default();
    check(!base_url.is_empty(), "llm.base_url is required for the ollama provider")?;
    check(
        base_url.starts_with("http://") || base_url.starts_with("https://"),
        "llm.base_url must start with http:// or https://",
    )?;

    let blank_key = llm.api_key.as_ref().is_some_and(|key| key.expose_secret().trim().is_empty());
    check(!blank_key, "llm.api_key must not be blank when set")
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    check(!server.bind_address.trim().is_empty(), "server.bind_address must not be empty")?;
    check(server.port > 0, "server.port must be greater than zero")?;
    check(
        server.graceful_shutdown_secs > 0,
        "server.graceful_shutdown_secs must be greater than zero",
    )
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    check(session.ttl_secs > 0, "session.ttl_secs must be greater than zero")?;
    check(session.max_sessions > 0, "session.max_sessions must be greater than zero")?;
    check(
        session.purge_interval_secs > 0,
        "session.purge_interval_secs must be greater than zero",
    )
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    check(
        matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error"),
        "logging.level must be one of trace|debug|info|warn|error",
    )
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    read_env(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

fn assign<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn assign_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    session: Option<SessionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    ttl_secs: Option<u64>,
    max_sessions: Option<usize>,
    purge_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        expand_env_references, AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat,
    };

    /// Holds the process-wide env lock and removes the listed variables on drop.
    struct EnvVars {
        names: Vec<&'static str>,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvVars {
        fn set(pairs: &[(&'static str, &str)]) -> Self {
            static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
            let lock = LOCK
                .get_or_init(|| Mutex::new(()))
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (name, value) in pairs {
                env::set_var(name, value);
            }
            Self { names: pairs.iter().map(|(name, _)| *name).collect(), _lock: lock }
        }
    }

    impl Drop for EnvVars {
        fn drop(&mut self) {
            for name in &self.names {
                env::remove_var(name);
            }
        }
    }

    fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("regdesk.toml");
        fs::write(&path, contents).expect("write config file");
        path
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.session.ttl_secs, 3600);
        assert_eq!(config.llm.model, "llama3.1");
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn env_references_expand_and_report_gaps() {
        let _env = EnvVars::set(&[("TEST_REGDESK_EXPAND", "value")]);

        let expanded = expand_env_references("a=${TEST_REGDESK_EXPAND};b").expect("expand");
        assert_eq!(expanded, "a=value;b");
        assert_eq!(expand_env_references("plain $ text").expect("expand"), "plain $ text");
        assert!(matches!(
            expand_env_references("${TEST_REGDESK_ABSENT}"),
            Err(ConfigError::MissingEnvInterpolation { var }) if var == "TEST_REGDESK_ABSENT"
        ));
        assert!(matches!(
            expand_env_references("${TEST_REGDESK_EXPAND"),
            Err(ConfigError::UnterminatedInterpolation)
        ));
    }

    #[test]
    fn file_values_can_reference_the_environment() {
        let _env = EnvVars::set(&[("TEST_REGDESK_LLM_KEY", "key-from-env")]);
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            "[llm]\napi_key = \"${TEST_REGDESK_LLM_KEY}\"\nmodel = \"llama3.2\"\n",
        );

        let config =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                .expect("config should load");

        let key = config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string());
        assert_eq!(key.as_deref(), Some("key-from-env"));
        assert_eq!(config.llm.model, "llama3.2");
    }

    #[test]
    fn short_logging_env_names_are_accepted() {
        let _env =
            EnvVars::set(&[("REGDESK_LOG_LEVEL", "warn"), ("REGDESK_LOG_FORMAT", "pretty")]);

        let config = AppConfig::load(LoadOptions::default()).expect("config should load");

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_beat_env_which_beats_file() {
        let _env = EnvVars::set(&[
            ("REGDESK_DATABASE_URL", "sqlite://from-env.db"),
            ("REGDESK_SESSION_TTL_SECS", "120"),
        ]);
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            "[database]\nurl = \"sqlite://from-file.db\"\n\n\
             [session]\nttl_secs = 60\nmax_sessions = 50\n",
        );

        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            overrides: ConfigOverrides {
                database_url: Some("sqlite://from-override.db".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("config should load");

        assert_eq!(config.database.url, "sqlite://from-override.db");
        assert_eq!(config.session.ttl_secs, 120);
        assert_eq!(config.session.max_sessions, 50);
        assert_eq!(config.session.purge_interval_secs, 60);
    }

    #[test]
    fn a_required_file_must_exist() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("absent.toml");

        let error = AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            ..LoadOptions::default()
        })
        .expect_err("missing file should fail");

        assert!(matches!(error, ConfigError::MissingConfigFile(path) if path == missing));
    }

    #[test]
    fn oracle_url_without_scheme_is_rejected() {
        let _env = EnvVars::set(&[("REGDESK_LLM_BASE_URL", "localhost:11434")]);

        let error = AppConfig::load(LoadOptions::default()).expect_err("validation should fail");

        assert!(matches!(
            error,
            ConfigError::Validation(message) if message.contains("llm.base_url")
        ));
    }

    #[test]
    fn non_numeric_env_override_names_the_variable() {
        let _env = EnvVars::set(&[("REGDESK_SESSION_MAX_SESSIONS", "lots")]);

        let error = AppConfig::load(LoadOptions::default()).expect_err("override should fail");

        assert!(matches!(
            error,
            ConfigError::InvalidEnvOverride { key, value }
                if key == "REGDESK_SESSION_MAX_SESSIONS" && value == "lots"
        ));
    }

    #[test]
    fn api_key_stays_out_of_debug_output() {
        let _env = EnvVars::set(&[("REGDESK_LLM_API_KEY", "super-secret-value")]);

        let config = AppConfig::load(LoadOptions::default()).expect("config should load");

        assert!(config.llm.api_key.is_some());
        assert!(!format!("{config:?}").contains("super-secret-value"));
    }
}
