use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use fleet_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct ConfigEntry {
    key_path: &'static str,
    env_key: &'static str,
    value: String,
}

fn entry(key_path: &'static str, env_key: &'static str, value: impl Into<String>) -> ConfigEntry {
    ConfigEntry { key_path, env_key, value: value.into() }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in effective_entries(&config) {
        let source = field_source(
            entry.key_path,
            entry.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", entry.key_path, entry.value));
    }

    lines.join("\n")
}

fn effective_entries(config: &AppConfig) -> Vec<ConfigEntry> {
    let fallback = config.llm.fallback.as_ref();
    vec![
        entry("database.url", "FLEET_DATABASE_URL", config.database.url.as_str()),
        entry(
            "database.max_connections",
            "FLEET_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            "FLEET_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        entry("llm.api_base", "FLEET_LLM_API_BASE", config.llm.api_base.as_str()),
        entry("llm.api_key", "FLEET_LLM_API_KEY", redact_secret(config.llm.api_key.as_ref())),
        entry("llm.model", "FLEET_LLM_MODEL", config.llm.model.as_str()),
        entry("llm.vision_model", "FLEET_LLM_VISION_MODEL", config.llm.vision_model.as_str()),
        entry("llm.timeout_secs", "FLEET_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        entry(
            "llm.fallback_model",
            "FLEET_LLM_FALLBACK_MODEL",
            fallback.map(|endpoint| endpoint.model.as_str()).unwrap_or("<unset>"),
        ),
        entry(
            "llm.fallback_api_key",
            "FLEET_LLM_FALLBACK_API_KEY",
            redact_secret(fallback.and_then(|endpoint| endpoint.api_key.as_ref())),
        ),
        entry(
            "mail.sendgrid_api_key",
            "FLEET_MAIL_SENDGRID_API_KEY",
            redact_secret(config.mail.sendgrid_api_key.as_ref()),
        ),
        entry("mail.from_address", "FLEET_MAIL_FROM_ADDRESS", config.mail.from_address.as_str()),
        entry(
            "mail.address_domain",
            "FLEET_MAIL_ADDRESS_DOMAIN",
            config.mail.address_domain.as_str(),
        ),
        entry("telegram.api_base", "FLEET_TELEGRAM_API_BASE", config.telegram.api_base.as_str()),
        entry(
            "telegram.poll_timeout_secs",
            "FLEET_TELEGRAM_POLL_TIMEOUT_SECS",
            config.telegram.poll_timeout_secs.to_string(),
        ),
        entry(
            "runtime.reconcile_interval_secs",
            "FLEET_RUNTIME_RECONCILE_INTERVAL_SECS",
            config.runtime.reconcile_interval_secs.to_string(),
        ),
        entry(
            "runtime.notifier_interval_secs",
            "FLEET_RUNTIME_NOTIFIER_INTERVAL_SECS",
            config.runtime.notifier_interval_secs.to_string(),
        ),
        entry(
            "runtime.history_limit",
            "FLEET_RUNTIME_HISTORY_LIMIT",
            config.runtime.history_limit.to_string(),
        ),
        entry(
            "server.bind_address",
            "FLEET_SERVER_BIND_ADDRESS",
            config.server.bind_address.as_str(),
        ),
        entry(
            "server.health_check_port",
            "FLEET_SERVER_HEALTH_CHECK_PORT",
            config.server.health_check_port.to_string(),
        ),
        entry("logging.level", "FLEET_LOGGING_LEVEL", config.logging.level.as_str()),
        entry("logging.format", "FLEET_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("fleet.toml"), PathBuf::from("config/fleet.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        Some(value) if !value.expose_secret().trim().is_empty() => "<redacted>",
        Some(_) => "<empty>",
        None => "<unset>",
    }
}

#[cfg(test)]
mod tests {
    use fleet_core::config::AppConfig;
    use secrecy::SecretString;

    use super::{contains_path, effective_entries};

    #[test]
    fn secrets_never_appear_in_effective_entries() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some(SecretString::from("sk-live-123".to_string()));
        config.mail.sendgrid_api_key = Some(SecretString::from("SG.secret".to_string()));

        let entries = effective_entries(&config);

        assert!(entries.iter().all(|entry| !entry.value.contains("sk-live")));
        assert!(entries.iter().all(|entry| !entry.value.contains("SG.secret")));
        let llm_key = entries.iter().find(|entry| entry.key_path == "llm.api_key").expect("llm key");
        assert_eq!(llm_key.value, "<redacted>");
    }

    #[test]
    fn nested_key_paths_resolve_in_toml_documents() {
        let doc = "[runtime]\nhistory_limit = 10\n".parse::<toml::Value>().expect("toml");
        assert!(contains_path(&doc, "runtime.history_limit"));
        assert!(!contains_path(&doc, "runtime.reconcile_interval_secs"));
    }
}
