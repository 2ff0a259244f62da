use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::DEFAULT_HISTORY_LIMIT;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub mail: MailConfig,
    pub telegram: TelegramConfig,
    pub runtime: RuntimeConfig,
    pub server: ServerConfig,
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
    pub api_base: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub vision_model: String,
    pub timeout_secs: u64,
    pub fallback: Option<LlmEndpoint>,
}

/// Secondary chat-completions provider tried once when the primary fails.
#[derive(Clone, Debug)]
pub struct LlmEndpoint {
    pub api_base: String,
    pub api_key: Option<SecretString>,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub sendgrid_api_key: Option<SecretString>,
    pub api_base: String,
    pub from_address: String,
    pub address_domain: String,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub api_base: String,
    pub poll_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub reconcile_interval_secs: u64,
    pub notifier_interval_secs: u64,
    pub history_limit: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
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
    pub llm_model: Option<String>,
    pub health_check_port: Option<u16>,
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
                url: "sqlite://fleet.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                vision_model: "gpt-4o".to_string(),
                timeout_secs: 60,
                fallback: None,
            },
            mail: MailConfig {
                sendgrid_api_key: None,
                api_base: "https://api.sendgrid.com".to_string(),
                from_address: "assistant@example.com".to_string(),
                address_domain: "example.com".to_string(),
            },
            telegram: TelegramConfig {
                api_base: "https://api.telegram.org".to_string(),
                poll_timeout_secs: 30,
            },
            runtime: RuntimeConfig {
                reconcile_interval_secs: 30,
                notifier_interval_secs: 60,
                history_limit: DEFAULT_HISTORY_LIMIT,
            },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), health_check_port: 8080 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("fleet.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn mail_enabled(&self) -> bool {
        self.mail
            .sendgrid_api_key
            .as_ref()
            .map(|key| !key.expose_secret().trim().is_empty())
            .unwrap_or(false)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_base) = llm.api_base {
                self.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(vision_model) = llm.vision_model {
                self.llm.vision_model = vision_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            self.set_fallback(llm.fallback_api_base, llm.fallback_api_key, llm.fallback_model);
        }

        if let Some(mail) = patch.mail {
            if let Some(api_key) = mail.sendgrid_api_key {
                self.mail.sendgrid_api_key = Some(secret_value(api_key));
            }
            if let Some(api_base) = mail.api_base {
                self.mail.api_base = api_base;
            }
            if let Some(from_address) = mail.from_address {
                self.mail.from_address = from_address;
            }
            if let Some(address_domain) = mail.address_domain {
                self.mail.address_domain = address_domain;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(api_base) = telegram.api_base {
                self.telegram.api_base = api_base;
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
            }
        }

        if let Some(runtime) = patch.runtime {
            if let Some(value) = runtime.reconcile_interval_secs {
                self.runtime.reconcile_interval_secs = value;
            }
            if let Some(value) = runtime.notifier_interval_secs {
                self.runtime.notifier_interval_secs = value;
            }
            if let Some(value) = runtime.history_limit {
                self.runtime.history_limit = value;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn set_fallback(
        &mut self,
        api_base: Option<String>,
        api_key: Option<String>,
        model: Option<String>,
    ) {
        if api_base.is_none() && api_key.is_none() && model.is_none() {
            return;
        }

        let current = self.llm.fallback.take();
        let endpoint = LlmEndpoint {
            api_base: api_base
                .or_else(|| current.as_ref().map(|endpoint| endpoint.api_base.clone()))
                .unwrap_or_default(),
            api_key: api_key
                .map(secret_value)
                .or_else(|| current.as_ref().and_then(|endpoint| endpoint.api_key.clone())),
            model: model
                .or_else(|| current.as_ref().map(|endpoint| endpoint.model.clone()))
                .unwrap_or_default(),
        };
        self.llm.fallback = Some(endpoint);
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FLEET_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FLEET_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("FLEET_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FLEET_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FLEET_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FLEET_LLM_API_BASE") {
            self.llm.api_base = value;
        }
        if let Some(value) = read_env("FLEET_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FLEET_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("FLEET_LLM_VISION_MODEL") {
            self.llm.vision_model = value;
        }
        if let Some(value) = read_env("FLEET_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("FLEET_LLM_TIMEOUT_SECS", &value)?;
        }
        self.set_fallback(
            read_env("FLEET_LLM_FALLBACK_API_BASE"),
            read_env("FLEET_LLM_FALLBACK_API_KEY"),
            read_env("FLEET_LLM_FALLBACK_MODEL"),
        );

        if let Some(value) = read_env("FLEET_MAIL_SENDGRID_API_KEY") {
            self.mail.sendgrid_api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FLEET_MAIL_API_BASE") {
            self.mail.api_base = value;
        }
        if let Some(value) = read_env("FLEET_MAIL_FROM_ADDRESS") {
            self.mail.from_address = value;
        }
        if let Some(value) = read_env("FLEET_MAIL_ADDRESS_DOMAIN") {
            self.mail.address_domain = value;
        }

        if let Some(value) = read_env("FLEET_TELEGRAM_API_BASE") {
            self.telegram.api_base = value;
        }
        if let Some(value) = read_env("FLEET_TELEGRAM_POLL_TIMEOUT_SECS") {
            self.telegram.poll_timeout_secs =
                parse_u64("FLEET_TELEGRAM_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FLEET_RUNTIME_RECONCILE_INTERVAL_SECS") {
            self.runtime.reconcile_interval_secs =
                parse_u64("FLEET_RUNTIME_RECONCILE_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("FLEET_RUNTIME_NOTIFIER_INTERVAL_SECS") {
            self.runtime.notifier_interval_secs =
                parse_u64("FLEET_RUNTIME_NOTIFIER_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("FLEET_RUNTIME_HISTORY_LIMIT") {
            self.runtime.history_limit = parse_usize("FLEET_RUNTIME_HISTORY_LIMIT", &value)?;
        }

        if let Some(value) = read_env("FLEET_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FLEET_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("FLEET_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        let log_level = read_env("FLEET_LOGGING_LEVEL").or_else(|| read_env("FLEET_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("FLEET_LOGGING_FORMAT").or_else(|| read_env("FLEET_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(health_check_port) = overrides.health_check_port {
            self.server.health_check_port = health_check_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_mail(&self.mail)?;
        validate_telegram(&self.telegram)?;
        validate_runtime(&self.runtime)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("fleet.toml"), PathBuf::from("config/fleet.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if !is_http_url(&llm.api_base) {
        return Err(ConfigError::Validation(
            "llm.api_base must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() || llm.vision_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.model and llm.vision_model must not be empty".to_string(),
        ));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(fallback) = &llm.fallback {
        if !is_http_url(&fallback.api_base) {
            return Err(ConfigError::Validation(
                "llm.fallback_api_base must be set to an http(s) URL when a fallback provider is configured"
                    .to_string(),
            ));
        }
        if fallback.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "llm.fallback_model is required when a fallback provider is configured"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_mail(mail: &MailConfig) -> Result<(), ConfigError> {
    if !is_http_url(&mail.api_base) {
        return Err(ConfigError::Validation(
            "mail.api_base must start with http:// or https://".to_string(),
        ));
    }

    if !mail.from_address.contains('@') {
        return Err(ConfigError::Validation(
            "mail.from_address must be an email address".to_string(),
        ));
    }

    let domain = mail.address_domain.trim().trim_start_matches('@');
    if domain.is_empty() || !domain.contains('.') {
        return Err(ConfigError::Validation(
            "mail.address_domain must be a domain such as `mail.example.com`".to_string(),
        ));
    }

    Ok(())
}

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    if !is_http_url(&telegram.api_base) {
        return Err(ConfigError::Validation(
            "telegram.api_base must start with http:// or https://".to_string(),
        ));
    }

    if telegram.poll_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be in range 0..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_runtime(runtime: &RuntimeConfig) -> Result<(), ConfigError> {
    if runtime.reconcile_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "runtime.reconcile_interval_secs must be greater than zero".to_string(),
        ));
    }

    if runtime.notifier_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "runtime.notifier_interval_secs must be greater than zero".to_string(),
        ));
    }

    if runtime.history_limit == 0 {
        return Err(ConfigError::Validation(
            "runtime.history_limit must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    mail: Option<MailPatch>,
    telegram: Option<TelegramPatch>,
    runtime: Option<RuntimePatch>,
    server: Option<ServerPatch>,
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
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    vision_model: Option<String>,
    timeout_secs: Option<u64>,
    fallback_api_base: Option<String>,
    fallback_api_key: Option<String>,
    fallback_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MailPatch {
    sendgrid_api_key: Option<String>,
    api_base: Option<String>,
    from_address: Option<String>,
    address_domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    api_base: Option<String>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimePatch {
    reconcile_interval_secs: Option<u64>,
    notifier_interval_secs: Option<u64>,
    history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
