//! Integration test entry point
//!
//! Run with: NSPROXY_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - NSPROXY_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - NSPROXY_TEST_MYSQL_HOST: Backend host (default: 127.0.0.1)
//! - NSPROXY_TEST_MYSQL_PORT: Backend port (default: 3306)
//! - NSPROXY_TEST_MYSQL_USER: Backend user (default: root)
//! - NSPROXY_TEST_MYSQL_PASS: Backend password (default: empty)
//! - NSPROXY_TEST_MYSQL_DB: Database created for the tests (default: nsproxy_test)

mod field_list;
mod transaction;

use std::env;
use std::sync::{Arc, Once};

use mysql::prelude::*;
use mysql::{OptsBuilder, Pool, PooledConn};
use nsproxy::config::{BackendConfig, Config, NamespaceConfig, PoolConfig, UserConfig};
use nsproxy::namespace::NamespaceManager;
use nsproxy::parser::SqlAnalyzer;
use nsproxy::protocol::compute_auth_response;
use nsproxy::session::QueryContext;
use rand::Rng;
use tracing_subscriber::EnvFilter;

/// Namespace every test context authenticates into
pub const NAMESPACE: &str = "it_tenant";
pub const PROXY_USER: &str = "app_user";
pub const PROXY_PASS: &str = "test123";

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("NSPROXY_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set NSPROXY_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Backend MySQL connection config
#[derive(Debug, Clone)]
pub struct MysqlTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Get backend MySQL connection config from environment
pub fn get_mysql_config() -> MysqlTestConfig {
    MysqlTestConfig {
        host: env::var("NSPROXY_TEST_MYSQL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("NSPROXY_TEST_MYSQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306),
        user: env::var("NSPROXY_TEST_MYSQL_USER").unwrap_or_else(|_| "root".to_string()),
        password: env::var("NSPROXY_TEST_MYSQL_PASS").unwrap_or_default(),
        database: env::var("NSPROXY_TEST_MYSQL_DB").unwrap_or_else(|_| "nsproxy_test".to_string()),
    }
}

impl MysqlTestConfig {
    /// Direct connection to the backend, bypassing the proxy
    ///
    /// Creates the test database and `orders` table on first use.
    pub fn conn(&self) -> PooledConn {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(&self.host))
            .tcp_port(self.port)
            .user(Some(&self.user))
            .pass(Some(&self.password));
        let pool = Pool::new(opts).expect("Failed to create connection pool");
        let mut conn = pool.get_conn().expect("Failed to get connection");

        conn.query_drop(format!("CREATE DATABASE IF NOT EXISTS `{}`", self.database))
            .expect("CREATE DATABASE should succeed");
        conn.as_mut().select_db(&self.database);
        conn.query_drop(
            "CREATE TABLE IF NOT EXISTS orders (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                user_id VARCHAR(64) NOT NULL,
                order_no VARCHAR(64) NOT NULL,
                amount DECIMAL(10, 2) NOT NULL DEFAULT 0
            ) ENGINE=InnoDB",
        )
        .expect("CREATE TABLE should succeed");
        conn
    }

    /// Single-namespace proxy config pointing at this backend
    pub fn proxy_config(&self, pool: PoolConfig) -> Config {
        Config {
            namespaces: vec![NamespaceConfig {
                name: NAMESPACE.to_string(),
                default_database: Some(self.database.clone()),
                users: vec![UserConfig {
                    username: PROXY_USER.to_string(),
                    password: PROXY_PASS.to_string(),
                }],
                backend: BackendConfig {
                    host: self.host.clone(),
                    port: self.port,
                    user: self.user.clone(),
                    password: self.password.clone(),
                    database: Some(self.database.clone()),
                },
                pool,
            }],
        }
    }
}

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// An authenticated context over a fresh namespace manager
pub fn authenticated_context(conn_id: u32, config: &Config) -> (QueryContext, Arc<NamespaceManager>) {
    init_tracing();
    let manager = Arc::new(NamespaceManager::from_config(config).expect("valid config"));
    let mut ctx = QueryContext::new(conn_id, manager.clone(), Arc::new(SqlAnalyzer::new()));

    let mut salt = [0u8; 20];
    rand::thread_rng().fill(&mut salt[..]);
    let response = compute_auth_response(PROXY_PASS, &salt);
    assert!(ctx.authenticate(PROXY_USER, &response, &salt), "authentication should succeed");
    (ctx, manager)
}

/// Delete test rows with the given user_id directly on the backend
pub fn cleanup_user_id(conn: &mut PooledConn, user_id: &str) {
    let sql = format!("DELETE FROM orders WHERE user_id = '{}'", user_id);
    let _ = conn.query_drop(&sql);
}
