use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Namespaces served by this proxy
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,
}

// ============================================================================
// Namespace Configuration
// ============================================================================

/// Namespace: a tenant with its own users and backend pool
#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceConfig {
    /// Unique namespace name
    pub name: String,
    /// Database selected for new client sessions
    #[serde(default)]
    pub default_database: Option<String>,
    /// Users allowed to authenticate into this namespace
    #[serde(default)]
    pub users: Vec<UserConfig>,
    /// Backend server for this namespace
    pub backend: BackendConfig,
    /// Pool sizing for connections to `backend`
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Proxy-level credentials for a client user
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
}

impl BackendConfig {
    /// Get the address string (host:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: None,
        }
    }
}

// ============================================================================
// Pool Configuration
// ============================================================================

/// Backend connection pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum connections leased at once
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum number of idle connections to keep
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    /// How long an acquire waits for a free slot (milliseconds)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Maximum connection age before recycling (seconds)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Maximum idle time before closing (seconds)
    #[serde(default = "default_max_idle_time_secs")]
    pub max_idle_time_secs: u64,
}

fn default_max_connections() -> usize {
    32
}

fn default_max_idle() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    3000
}

fn default_max_age_secs() -> u64 {
    3600
}

fn default_max_idle_time_secs() -> u64 {
    300
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_idle: default_max_idle(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_age_secs: default_max_age_secs(),
            max_idle_time_secs: default_max_idle_time_secs(),
        }
    }
}

impl Config {
    /// Check cross-namespace invariants the deserializer cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut users = HashSet::new();

        for ns in &self.namespaces {
            if ns.name.is_empty() {
                return Err(ConfigError::Invalid("namespace name must not be empty".into()));
            }
            if !names.insert(ns.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate namespace '{}'",
                    ns.name
                )));
            }
            if ns.pool.max_connections == 0 {
                return Err(ConfigError::Invalid(format!(
                    "namespace '{}': pool.max_connections must be positive",
                    ns.name
                )));
            }
            for user in &ns.users {
                if !users.insert(user.username.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "user '{}' is configured in more than one namespace",
                        user.username
                    )));
                }
            }
        }

        Ok(())
    }
}
