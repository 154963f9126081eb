//! Runtime configuration.
//!
//! Values come from an optional TOML file named by `CHATRELAY_CONFIG`, then
//! individual environment variables override whatever the file set. Every
//! field has a default, so an empty file (or none at all) is valid as long as
//! the local backend's location can be derived.
//!
//! ```toml
//! system_prompt = "You are a helpful, friendly assistant."
//!
//! [server]
//! bind = "127.0.0.1:8787"
//! assets_dir = "public"
//!
//! [local]
//! account_id = "0123abcd"
//! model = "@cf/meta/llama-3.1-8b-instruct"
//!
//! [remote]
//! model = "gemini-2.5-flash"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_LOCAL_MODEL: &str = "@cf/meta/llama-3.1-8b-instruct";
pub const DEFAULT_REMOTE_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, friendly assistant.";

const WORKERS_AI_ACCOUNT_URL: &str = "https://api.cloudflare.com/client/v4/accounts";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing configuration: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    /// Used when a request carries no system prompt of its own.
    pub system_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory served for non-API paths. No directory means every asset 404s.
    pub assets_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            assets_dir: None,
        }
    }
}

/// The token-streaming backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Endpoint prefix; the model id is appended. Takes precedence over `account_id`.
    pub base_url: Option<String>,
    pub account_id: Option<String>,
    pub model: String,
    pub token: Option<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            account_id: None,
            model: DEFAULT_LOCAL_MODEL.to_string(),
            token: None,
        }
    }
}

impl LocalConfig {
    /// The full inference URL for the configured model.
    pub fn endpoint(&self) -> Result<String, ConfigError> {
        let base = match (&self.base_url, &self.account_id) {
            (Some(base), _) => base.trim_end_matches('/').to_string(),
            (None, Some(account)) => format!("{WORKERS_AI_ACCOUNT_URL}/{account}/ai/run"),
            (None, None) => {
                return Err(ConfigError::Missing(
                    "local.base_url or local.account_id \
                     (WORKERS_AI_BASE_URL / WORKERS_AI_ACCOUNT_ID)",
                ));
            }
        };
        Ok(format!("{base}/{}", self.model.trim_start_matches('/')))
    }
}

/// The batch-only backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            model: DEFAULT_REMOTE_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl RemoteConfig {
    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

impl Config {
    /// Loads the file named by `CHATRELAY_CONFIG` (if any), then applies
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("CHATRELAY_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overrides fields from `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CHATRELAY_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("CHATRELAY_ASSETS") {
            self.server.assets_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("WORKERS_AI_BASE_URL") {
            self.local.base_url = Some(v);
        }
        if let Some(v) = get("WORKERS_AI_ACCOUNT_ID") {
            self.local.account_id = Some(v);
        }
        if let Some(v) = get("WORKERS_AI_TOKEN") {
            self.local.token = Some(v);
        }
        if let Some(v) = get("WORKERS_AI_MODEL") {
            self.local.model = v;
        }
        if let Some(v) = get("GEMINI_BASE_URL") {
            self.remote.base_url = v;
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.remote.api_key = Some(v);
        }
        if let Some(v) = get("GEMINI_MODEL") {
            self.remote.model = v;
        }
        if let Some(v) = get("CHATRELAY_SYSTEM_PROMPT") {
            self.system_prompt = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.local.model, DEFAULT_LOCAL_MODEL);
        assert_eq!(config.remote.model, "gemini-2.5-flash");
        assert_eq!(config.system_prompt, "You are a helpful, friendly assistant.");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [local]
            account_id = "acct"

            [remote]
            api_key = "k"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(
            config.local.endpoint().unwrap(),
            "https://api.cloudflare.com/client/v4/accounts/acct/ai/run\
             /@cf/meta/llama-3.1-8b-instruct"
        );
        assert_eq!(config.remote.api_key.as_deref(), Some("k"));
        assert_eq!(
            config.remote.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta\
             /models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn base_url_wins_over_account() {
        let local = LocalConfig {
            base_url: Some("http://127.0.0.1:9000/run/".into()),
            account_id: Some("ignored".into()),
            model: "m".into(),
            token: None,
        };
        assert_eq!(local.endpoint().unwrap(), "http://127.0.0.1:9000/run/m");
    }

    #[test]
    fn local_location_is_required() {
        assert!(matches!(
            LocalConfig::default().endpoint(),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::from_toml("system_prompt = \"from file\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("CHATRELAY_BIND", "0.0.0.0:80"),
            ("CHATRELAY_SYSTEM_PROMPT", "from env"),
            ("GEMINI_MODEL", "gemini-pro"),
            ("WORKERS_AI_TOKEN", ""),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.bind, "0.0.0.0:80");
        assert_eq!(config.system_prompt, "from env");
        assert_eq!(config.remote.model, "gemini-pro");
        assert_eq!(config.local.token, None);
    }

    #[test]
    fn unreadable_and_malformed_files() {
        let missing = Config::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbind = 1").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
