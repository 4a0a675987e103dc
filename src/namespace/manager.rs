//! Namespace manager implementation

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError, NamespaceConfig, UserConfig};
use crate::metrics::metrics;
use crate::pool::{BackendPool, Connector, MySqlConnector, PoolError, PooledBackendConn};
use crate::protocol::verify_auth_response;

use super::{Namespace, NamespaceRegistry};

/// A namespace served by one bounded backend pool
pub struct PooledNamespace<C: Connector> {
    name: String,
    default_database: Option<String>,
    pool: BackendPool<C>,
}

impl<C: Connector> PooledNamespace<C> {
    pub fn new(name: impl Into<String>, default_database: Option<String>, pool: BackendPool<C>) -> Self {
        Self {
            name: name.into(),
            default_database,
            pool,
        }
    }

    /// Backend pool for this namespace
    pub fn pool(&self) -> &BackendPool<C> {
        &self.pool
    }
}

impl PooledNamespace<MySqlConnector> {
    /// Build a namespace and its pool from configuration
    pub fn from_config(config: &NamespaceConfig) -> Self {
        let connector = MySqlConnector::new(config.backend.clone());
        debug!(
            namespace = %config.name,
            backend = %connector.backend_addr(),
            max_connections = config.pool.max_connections,
            "Creating backend pool"
        );
        let pool = BackendPool::new(config.name.clone(), connector, config.pool.clone());
        Self::new(config.name.clone(), config.default_database.clone(), pool)
    }
}

#[async_trait]
impl<C: Connector> Namespace for PooledNamespace<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    async fn acquire_connection(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PooledBackendConn>, PoolError> {
        let lease = self.pool.acquire(cancel).await?;
        Ok(Box::new(lease))
    }
}

/// Credentials of one user and the namespace they belong to
struct UserEntry {
    password: String,
    namespace: String,
}

/// Manages all namespaces and the users that log into them
///
/// Usernames are unique across namespaces, so a username alone selects
/// the namespace.
pub struct NamespaceManager {
    /// Namespaces by name
    namespaces: DashMap<String, Arc<dyn Namespace>>,
    /// Users by username
    users: DashMap<String, UserEntry>,
}

impl NamespaceManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
            users: DashMap::new(),
        }
    }

    /// Create a manager with one MySQL-backed namespace per config entry
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let manager = Self::new();
        for ns_config in &config.namespaces {
            let namespace = PooledNamespace::from_config(ns_config);
            manager.register(Arc::new(namespace), &ns_config.users);
            info!(
                namespace = %ns_config.name,
                users = ns_config.users.len(),
                "Registered namespace"
            );
        }

        if manager.namespaces.is_empty() {
            warn!("No namespaces configured, every client will fail authentication");
        }
        Ok(manager)
    }

    /// Add a namespace and the users allowed into it
    ///
    /// Replaces any namespace of the same name; a username already bound
    /// elsewhere is rebound to this namespace.
    pub fn register(&self, namespace: Arc<dyn Namespace>, users: &[UserConfig]) {
        let name = namespace.name().to_string();
        for user in users {
            self.users.insert(
                user.username.clone(),
                UserEntry {
                    password: user.password.clone(),
                    namespace: name.clone(),
                },
            );
        }
        self.namespaces.insert(name, namespace);
    }

    /// Get namespace by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Namespace>> {
        self.namespaces.get(name).map(|r| r.value().clone())
    }

    /// Get list of all namespace names
    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.iter().map(|r| r.key().clone()).collect()
    }
}

impl Default for NamespaceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry for NamespaceManager {
    fn authenticate(&self, username: &str, response: &[u8], salt: &[u8]) -> Option<Arc<dyn Namespace>> {
        let namespace = {
            let Some(user) = self.users.get(username) else {
                debug!(user = %username, "Unknown user");
                metrics().record_auth(false);
                return None;
            };

            if !verify_auth_response(&user.password, salt, response) {
                debug!(user = %username, "Password mismatch");
                metrics().record_auth(false);
                return None;
            }
            user.namespace.clone()
        };

        let found = self.get(&namespace);
        if found.is_none() {
            warn!(user = %username, namespace = %namespace, "User bound to unknown namespace");
        }
        metrics().record_auth(found.is_some());
        found
    }
}
