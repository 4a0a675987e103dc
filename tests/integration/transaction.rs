//! Transaction integration tests

use std::sync::Arc;

use mysql::prelude::*;
use nsproxy::config::PoolConfig;
use nsproxy::parser::SqlAnalyzer;
use nsproxy::protocol::compute_auth_response;
use nsproxy::session::{QueryContext, QueryError};
use tokio_util::sync::CancellationToken;

use crate::{
    authenticated_context, cleanup_user_id, get_mysql_config, skip_if_not_enabled, PROXY_PASS,
    PROXY_USER,
};

const TEST_PREFIX: &str = "it_tx_";

fn parse_amount(s: &str) -> i64 {
    s.parse::<f64>().unwrap_or(0.0) as i64
}

fn backend_amount(conn: &mut mysql::PooledConn, user_id: &str) -> Option<i64> {
    let sql = format!("SELECT amount FROM orders WHERE user_id = '{}'", user_id);
    let value: Option<String> = conn.query_first(&sql).expect("SELECT should succeed");
    value.map(|s| parse_amount(&s))
}

#[tokio::test]
async fn test_transaction_rollback() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let mut direct = mysql.conn();
    let user_id = format!("{}rollback", TEST_PREFIX);
    cleanup_user_id(&mut direct, &user_id);

    let (mut ctx, _manager) = authenticated_context(1, &mysql.proxy_config(PoolConfig::default()));
    let cancel = CancellationToken::new();

    ctx.execute(&cancel, "BEGIN").await.expect("BEGIN should succeed");
    let sql = format!(
        "INSERT INTO orders (user_id, order_no, amount) VALUES ('{}', 'ORD_rb', 100.00)",
        user_id
    );
    ctx.execute(&cancel, &sql).await.expect("INSERT should succeed");
    assert!(ctx.last_insert_id() > 0);

    let sql = format!("SELECT amount FROM orders WHERE user_id = '{}'", user_id);
    let sets = ctx.execute(&cancel, &sql).await.expect("SELECT should succeed");
    assert_eq!(sets[0].text(0, 0).map(parse_amount), Some(100));

    // Uncommitted rows are invisible outside the pinned connection
    assert_eq!(backend_amount(&mut direct, &user_id), None);

    ctx.execute(&cancel, "ROLLBACK").await.expect("ROLLBACK should succeed");
    assert_eq!(ctx.pinned_connection(), None);
    assert_eq!(backend_amount(&mut direct, &user_id), None);
}

#[tokio::test]
async fn test_transaction_commit() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let mut direct = mysql.conn();
    let user_id = format!("{}commit", TEST_PREFIX);
    cleanup_user_id(&mut direct, &user_id);

    let (mut ctx, _manager) = authenticated_context(2, &mysql.proxy_config(PoolConfig::default()));
    let cancel = CancellationToken::new();

    ctx.execute(&cancel, "START TRANSACTION").await.expect("BEGIN should succeed");
    let pinned = ctx.pinned_connection();
    assert!(pinned.is_some());

    let sql = format!(
        "INSERT INTO orders (user_id, order_no, amount) VALUES ('{}', 'ORD_cm', 200.00)",
        user_id
    );
    ctx.execute(&cancel, &sql).await.expect("INSERT should succeed");
    assert_eq!(ctx.affected_rows(), 1);
    assert_eq!(ctx.pinned_connection(), pinned);

    ctx.execute(&cancel, "COMMIT").await.expect("COMMIT should succeed");
    assert_eq!(ctx.pinned_connection(), None);
    assert_eq!(backend_amount(&mut direct, &user_id), Some(200));

    cleanup_user_id(&mut direct, &user_id);
}

#[tokio::test]
async fn test_autocommit_off_holds_rows_until_commit() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let mut direct = mysql.conn();
    let user_id = format!("{}autocommit", TEST_PREFIX);
    cleanup_user_id(&mut direct, &user_id);

    let (mut ctx, _manager) = authenticated_context(3, &mysql.proxy_config(PoolConfig::default()));
    let cancel = CancellationToken::new();

    ctx.execute(&cancel, "SET autocommit = 0").await.expect("SET should succeed");
    let sql = format!(
        "INSERT INTO orders (user_id, order_no, amount) VALUES ('{}', 'ORD_ac', 50.00)",
        user_id
    );
    ctx.execute(&cancel, &sql).await.expect("INSERT should succeed");
    assert!(ctx.pinned_connection().is_some());
    assert_eq!(backend_amount(&mut direct, &user_id), None);

    ctx.execute(&cancel, "COMMIT").await.expect("COMMIT should succeed");
    assert_eq!(backend_amount(&mut direct, &user_id), Some(50));

    ctx.execute(&cancel, "SET autocommit = 1").await.expect("SET should succeed");
    cleanup_user_id(&mut direct, &user_id);
}

#[tokio::test]
async fn test_close_rolls_back_open_transaction() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let mut direct = mysql.conn();
    let user_id = format!("{}close", TEST_PREFIX);
    cleanup_user_id(&mut direct, &user_id);

    let (mut ctx, _manager) = authenticated_context(4, &mysql.proxy_config(PoolConfig::default()));
    let cancel = CancellationToken::new();

    ctx.execute(&cancel, "BEGIN").await.expect("BEGIN should succeed");
    let sql = format!(
        "INSERT INTO orders (user_id, order_no, amount) VALUES ('{}', 'ORD_cl', 10.00)",
        user_id
    );
    ctx.execute(&cancel, &sql).await.expect("INSERT should succeed");

    ctx.close().await.expect("close should succeed");
    assert_eq!(ctx.execute(&cancel, "SELECT 1").await.unwrap_err(), QueryError::Closed);
    assert_eq!(backend_amount(&mut direct, &user_id), None);
}

#[tokio::test]
async fn test_sessions_share_one_connection_sequentially() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let _direct = mysql.conn();
    let pool = PoolConfig {
        max_connections: 1,
        ..Default::default()
    };
    let (mut first, manager) = authenticated_context(5, &mysql.proxy_config(pool));
    let mut second = QueryContext::new(6, manager, Arc::new(SqlAnalyzer::new()));
    let salt = [7u8; 20];
    let response = compute_auth_response(PROXY_PASS, &salt);
    assert!(second.authenticate(PROXY_USER, &response, &salt));
    let cancel = CancellationToken::new();

    let a = first.execute(&cancel, "SELECT CONNECTION_ID()").await.expect("SELECT should succeed");
    let b = second.execute(&cancel, "SELECT CONNECTION_ID()").await.expect("SELECT should succeed");
    assert_eq!(a[0].text(0, 0), b[0].text(0, 0));
}

#[tokio::test]
async fn test_backend_error_is_passed_through() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let _direct = mysql.conn();
    let (mut ctx, _manager) = authenticated_context(7, &mysql.proxy_config(PoolConfig::default()));
    let cancel = CancellationToken::new();

    let err = ctx
        .execute(&cancel, "SELECT * FROM no_such_table")
        .await
        .unwrap_err();
    let packet = err.to_err_packet();
    assert_eq!(packet.error_code, 1146);
    assert_eq!(packet.sql_state, "42S02");
    assert!(ctx.last_message().contains("no_such_table"));

    let sets = ctx.execute(&cancel, "SELECT 1").await.expect("SELECT should succeed");
    assert_eq!(sets[0].text(0, 0), Some("1"));
}
