use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::message::Role;
use crate::union::DEFAULT_PROPERTY_NAME;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_allowed_roles")]
    pub allowed_roles: Vec<Role>,
    #[serde(default = "default_role")]
    pub default_role: Role,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            stream: false,
            temperature: None,
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            allowed_roles: default_allowed_roles(),
            default_role: default_role(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_allowed_roles() -> Vec<Role> {
    vec![Role::System, Role::User, Role::Assistant, Role::Tool]
}

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_property_name")]
    pub property_name: String,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            property_name: default_property_name(),
            allow_multiple: false,
            max_parse_retries: default_max_parse_retries(),
            max_steps: default_max_steps(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_property_name() -> String {
    DEFAULT_PROPERTY_NAME.into()
}

fn default_max_parse_retries() -> usize {
    1
}

fn default_max_steps() -> usize {
    6
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help answer the user.".into()
}

/// OAuth2 client-credentials settings for the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies overrides from `lookup`, typically the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL_NAME") {
            self.model.model = model;
        }
        if let Some(stream) = lookup("TOOL_UNION_STREAMING") {
            self.model.stream = parse_flag("TOOL_UNION_STREAMING", &stream)?;
        }
        if let Some(property) = lookup("TOOL_UNION_PROPERTY_NAME") {
            self.agent.property_name = property;
        }
        if let Some(multiple) = lookup("TOOL_UNION_ALLOW_MULTIPLE") {
            self.agent.allow_multiple = parse_flag("TOOL_UNION_ALLOW_MULTIPLE", &multiple)?;
        }
        if let Some(retries) = lookup("TOOL_UNION_MAX_PARSE_RETRIES") {
            self.agent.max_parse_retries = parse("TOOL_UNION_MAX_PARSE_RETRIES", &retries)?;
        }
        if let Some(level) = lookup("TOOL_UNION_LOG") {
            self.logging.level = level;
        }

        let token_url = lookup("API_OAUTH_URL");
        let client_id = lookup("API_KEY");
        let client_secret = lookup("API_SECRET");
        if token_url.is_some() || client_id.is_some() || client_secret.is_some() {
            let auth = self.auth.get_or_insert_with(AuthConfig::default);
            if let Some(url) = token_url {
                auth.token_url = url;
            }
            if let Some(id) = client_id {
                auth.client_id = id;
            }
            if let Some(secret) = client_secret {
                auth.client_secret = secret;
            }
        }
        Ok(())
    }

    /// Loads `.env`, then the file when it exists, then environment overrides.
    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_env(|key| env::var(key).ok())?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nmodel='gpt-4o'\nstream=false\n[agent]\nmax_steps=4\n[logging]\nformat='json'"
        )
        .unwrap();

        let mut cfg = AppConfig::from_file(file.path()).unwrap();
        cfg.apply_env(lookup(&[
            ("TOOL_UNION_STREAMING", "true"),
            ("TOOL_UNION_MAX_PARSE_RETRIES", "3"),
            ("API_OAUTH_URL", "https://auth.example/token"),
            ("API_KEY", "client"),
        ]))
        .unwrap();

        assert_eq!(cfg.model.model, "gpt-4o");
        assert!(cfg.model.stream);
        assert_eq!(cfg.agent.max_steps, 4);
        assert_eq!(cfg.agent.max_parse_retries, 3);
        assert_eq!(cfg.agent.property_name, "selected_tool");
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let auth = cfg.auth.unwrap();
        assert_eq!(auth.token_url, "https://auth.example/token");
        assert_eq!(auth.client_id, "client");
        assert_eq!(auth.client_secret, "");
    }

    #[test]
    fn defaults_cover_missing_sections() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.model.timeout_secs, 60);
        assert_eq!(cfg.model.default_role, Role::User);
        assert_eq!(
            cfg.model.allowed_roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool]
        );
        assert!(cfg.auth.is_none());
    }

    #[test]
    fn rejects_invalid_overrides() {
        let mut cfg = AppConfig::default();
        let err = cfg
            .apply_env(lookup(&[("TOOL_UNION_ALLOW_MULTIPLE", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TOOL_UNION_ALLOW_MULTIPLE"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = AppConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
