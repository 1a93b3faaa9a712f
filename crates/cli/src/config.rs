use proto::ConfigError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level `parley` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chat server endpoints.
    #[serde(default)]
    pub server: ServerConfig,
    /// Client behaviour.
    #[serde(default)]
    pub client: ClientConfig,
    /// Bearer-token storage.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Chat server endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API root.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the session channel endpoint.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_ws_path() -> String {
    "/ai/ws/chat".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_path: default_ws_path(),
        }
    }
}

/// Client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Model selected on start. Empty = first entry of the model list.
    #[serde(default)]
    pub default_model: String,
    /// Per-model broadcast buffer shared by tabs.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_bus_capacity() -> usize {
    client::DEFAULT_BUS_CAPACITY
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_model: String::new(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

/// Bearer-token storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token file path; a leading `~/` expands to `$HOME`.
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Token from `PARLEY_TOKEN`; never read from the file.
    #[serde(skip)]
    pub token_override: Option<String>,
}

fn default_token_path() -> String {
    "~/.parley/token".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_path: default_token_path(),
            token_override: None,
        }
    }
}

impl AuthConfig {
    /// Token file path with `~/` expanded.
    pub fn token_file(&self) -> PathBuf {
        expand_tilde(&self.token_path)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("parley.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".parley").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        // Environment variable overrides
        if let Ok(url) = std::env::var("PARLEY_SERVER_URL")
            && !url.trim().is_empty()
        {
            config.server.base_url = url.trim().to_string();
        }
        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            config.client.default_model = model.trim().to_string();
        }
        if let Ok(token) = std::env::var("PARLEY_TOKEN")
            && !token.trim().is_empty()
        {
            config.auth.token_override = Some(token.trim().to_string());
        }

        if config.client.bus_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "client.bus_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        debug!(
            base_url = %config.server.base_url,
            default_model = %config.client.default_model,
            token_override = config.auth.token_override.is_some(),
            "Config loaded"
        );
        Ok(config)
    }

    /// HTTP API root as a URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.server.base_url).map_err(|e| ConfigError::InvalidValue {
            field: "server.base_url".to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidValue {
                field: "server.base_url".to_string(),
                reason: format!("unsupported scheme `{other}`"),
            }),
        }
    }

    /// Session channel URL: `base_url` with `http→ws`, `https→wss`, and
    /// the path replaced by `ws_path`.
    pub fn ws_url(&self) -> Result<Url, ConfigError> {
        let base = self.base_url()?;
        let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: "server.ws_path".to_string(),
            reason,
        };
        let rest = &base.as_str()[base.scheme().len()..];
        let mut url = Url::parse(&format!("{scheme}{rest}")).map_err(|e| invalid(e.to_string()))?;
        if !self.server.ws_path.starts_with('/') {
            return Err(invalid("must start with `/`".to_string()));
        }
        url.set_path(&self.server.ws_path);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// Model to select on start, if configured.
    pub fn default_model(&self) -> Option<&str> {
        let model = self.client.default_model.trim();
        (!model.is_empty()).then_some(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{remove_env_var, set_env_var, with_locked_env};

    const ENV_KEYS: &[&str] = &["PARLEY_SERVER_URL", "PARLEY_MODEL", "PARLEY_TOKEN"];

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, content).expect("write config");
    }

    fn clear_env() {
        for key in ENV_KEYS {
            remove_env_var(key);
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.base_url, "http://127.0.0.1:8000");
        assert_eq!(cfg.server.ws_path, "/ai/ws/chat");
        assert_eq!(cfg.client.bus_capacity, 64);
        assert_eq!(cfg.default_model(), None);
        assert_eq!(cfg.auth.token_path, "~/.parley/token");
        assert!(cfg.auth.token_override.is_none());
    }

    #[test]
    fn load_reads_explicit_file_path() {
        with_locked_env(|| {
            clear_env();
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("parley.toml");
            write_file(
                &config_path,
                r#"
[server]
base_url = "https://chat.example.com"

[client]
default_model = "groq"
bus_capacity = 8

[auth]
token_path = "/tmp/parley-token"
"#,
            );
            let cfg = Config::load(Some(&config_path)).expect("config should parse");
            assert_eq!(cfg.server.base_url, "https://chat.example.com");
            assert_eq!(cfg.server.ws_path, "/ai/ws/chat");
            assert_eq!(cfg.default_model(), Some("groq"));
            assert_eq!(cfg.client.bus_capacity, 8);
            assert_eq!(cfg.auth.token_file(), PathBuf::from("/tmp/parley-token"));
        });
    }

    #[test]
    fn env_overrides_take_precedence_over_file() {
        with_locked_env(|| {
            clear_env();
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("parley.toml");
            write_file(
                &config_path,
                r#"
[server]
base_url = "http://file.example.com"

[client]
default_model = "gemini"
"#,
            );
            set_env_var("PARLEY_SERVER_URL", "http://env.example.com:9000");
            set_env_var("PARLEY_MODEL", "groq");
            set_env_var("PARLEY_TOKEN", " env-token ");

            let cfg = Config::load(Some(&config_path)).expect("config should parse");
            clear_env();

            assert_eq!(cfg.server.base_url, "http://env.example.com:9000");
            assert_eq!(cfg.default_model(), Some("groq"));
            assert_eq!(cfg.auth.token_override.as_deref(), Some("env-token"));
        });
    }

    #[test]
    fn load_returns_toml_error_for_invalid_content() {
        with_locked_env(|| {
            clear_env();
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("parley.toml");
            write_file(&config_path, "[server\nbase_url = \"broken\"");
            let err = Config::load(Some(&config_path)).expect_err("invalid toml must fail");
            assert!(matches!(err, ConfigError::Toml(_)));
        });
    }

    #[test]
    fn zero_bus_capacity_is_rejected() {
        with_locked_env(|| {
            clear_env();
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("parley.toml");
            write_file(&config_path, "[client]\nbus_capacity = 0\n");
            let err = Config::load(Some(&config_path)).expect_err("zero capacity must fail");
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
        });
    }

    #[test]
    fn ws_url_maps_scheme_and_replaces_path() {
        let mut cfg = Config::default();
        cfg.server.base_url = "http://127.0.0.1:8000/api/".to_string();
        assert_eq!(
            cfg.ws_url().expect("ws url").as_str(),
            "ws://127.0.0.1:8000/ai/ws/chat"
        );

        cfg.server.base_url = "https://chat.example.com".to_string();
        cfg.server.ws_path = "/socket".to_string();
        assert_eq!(
            cfg.ws_url().expect("ws url").as_str(),
            "wss://chat.example.com/socket"
        );
    }

    #[test]
    fn invalid_base_url_is_an_invalid_value() {
        let mut cfg = Config::default();
        cfg.server.base_url = "not a url".to_string();
        assert!(matches!(
            cfg.ws_url(),
            Err(ConfigError::InvalidValue { .. })
        ));

        cfg.server.base_url = "ftp://example.com".to_string();
        assert!(matches!(
            cfg.base_url(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn token_path_expands_home() {
        with_locked_env(|| {
            let original = std::env::var("HOME").ok();
            set_env_var("HOME", "/home/tester");
            let path = AuthConfig::default().token_file();
            match original {
                Some(home) => set_env_var("HOME", &home),
                None => remove_env_var("HOME"),
            }
            assert_eq!(path, PathBuf::from("/home/tester/.parley/token"));
        });
    }
}
