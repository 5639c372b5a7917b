//! Configuration loading for Docent.
//!
//! The config file lives at `~/.docent/config.toml`. A missing file is not an
//! error; every section is optional and falls back to defaults. String values
//! may reference environment variables as `${VAR}`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use docent_types::ConversationConfig;
use serde::Deserialize;

/// Default number of in-flight generations the registry retains.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 10;
/// Default age after which a registry entry is evicted.
pub const DEFAULT_REGISTRY_TTL_SECS: u64 = 30 * 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Environment variable consulted when no token is configured.
pub const TOKEN_ENV_VAR: &str = "DOCENT_TOKEN";

const fn default_capacity() -> usize {
    DEFAULT_REGISTRY_CAPACITY
}

const fn default_ttl_secs() -> u64 {
    DEFAULT_REGISTRY_TTL_SECS
}

#[derive(Debug, Default, Deserialize)]
pub struct DocentConfig {
    pub server: Option<ServerConfig>,
    pub registry: Option<RegistryConfig>,
    pub conversation: Option<ConversationDefaults>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config at {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

// Manual Debug impl to prevent leaking tokens in logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("base_url", &self.base_url)
            .field(
                "token",
                &if self.token.is_some() { "[REDACTED]" } else { "None" },
            )
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Bounds for the active stream registry.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_REGISTRY_CAPACITY,
            ttl_secs: DEFAULT_REGISTRY_TTL_SECS,
        }
    }
}

/// Retrieval settings applied to new conversations.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConversationDefaults {
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub web_search: bool,
    pub source: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"docent_engine=debug,info"`.
    pub filter: Option<String>,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

impl DocentConfig {
    /// Load the config from its default location. `Ok(None)` when absent.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;

        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(registry) = &self.registry {
            if registry.capacity == 0 {
                return Err("registry.capacity must be at least 1".to_string());
            }
            if registry.ttl_secs == 0 {
                return Err("registry.ttl_secs must be at least 1".to_string());
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Server base URL with environment references expanded.
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.server
            .as_ref()
            .and_then(|server| server.base_url.as_deref())
            .map(expand_env_vars)
            .filter(|url| !url.trim().is_empty())
    }

    /// Bearer token: the configured value, else `$DOCENT_TOKEN`.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.server
            .as_ref()
            .and_then(|server| server.token.as_deref())
            .map(expand_env_vars)
            .or_else(|| env::var(TOKEN_ENV_VAR).ok())
            .filter(|token| !token.trim().is_empty())
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.server
                .as_ref()
                .and_then(|server| server.connect_timeout_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    #[must_use]
    pub fn registry(&self) -> RegistryConfig {
        self.registry.clone().unwrap_or_default()
    }

    /// Starting configuration for conversations created by this client.
    #[must_use]
    pub fn conversation_config(&self) -> ConversationConfig {
        let defaults = self.conversation.clone().unwrap_or_default();
        ConversationConfig {
            knowledge_base_ids: defaults.knowledge_base_ids,
            document_ids: defaults.document_ids,
            web_search: defaults.web_search,
            locked: false,
            source: defaults.source,
        }
    }

    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|logging| logging.filter.as_deref())
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".docent").join("config.toml"))
}
