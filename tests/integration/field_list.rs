//! COM_FIELD_LIST and database selection

use nsproxy::config::PoolConfig;
use nsproxy::session::QueryError;
use tokio_util::sync::CancellationToken;

use crate::{authenticated_context, get_mysql_config, skip_if_not_enabled};

#[tokio::test]
async fn test_field_list_returns_table_columns() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let _direct = mysql.conn();
    let (mut ctx, _manager) = authenticated_context(101, &mysql.proxy_config(PoolConfig::default()));

    let columns = ctx.field_list("orders").await.expect("field list should succeed");

    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["id", "user_id", "order_no", "amount"]);
    assert!(columns.iter().all(|c| c.table == "orders"));
    assert_eq!(columns[0].schema, mysql.database);
}

#[tokio::test]
async fn test_field_list_unknown_table() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let _direct = mysql.conn();
    let (mut ctx, _manager) = authenticated_context(102, &mysql.proxy_config(PoolConfig::default()));

    let err = ctx.field_list("no_such_table").await.unwrap_err();
    assert!(matches!(err, QueryError::Backend { code: 1146, .. }));
}

#[tokio::test]
async fn test_use_database_switches_schema() {
    skip_if_not_enabled!();

    let mysql = get_mysql_config();
    let _direct = mysql.conn();
    let (mut ctx, _manager) = authenticated_context(103, &mysql.proxy_config(PoolConfig::default()));
    let cancel = CancellationToken::new();
    assert_eq!(ctx.current_database(), mysql.database);

    ctx.execute(&cancel, "USE information_schema").await.expect("USE should succeed");
    let sets = ctx.execute(&cancel, "SELECT DATABASE()").await.expect("SELECT should succeed");
    assert_eq!(sets[0].text(0, 0), Some("information_schema"));

    let err = ctx
        .use_database(&cancel, "nsproxy_missing_db")
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Backend { code: 1049, .. }));
    assert_eq!(ctx.current_database(), "information_schema");

    ctx.use_database(&cancel, &mysql.database).await.expect("init db should succeed");
    let sets = ctx.execute(&cancel, "SELECT DATABASE()").await.expect("SELECT should succeed");
    assert_eq!(sets[0].text(0, 0), Some(mysql.database.as_str()));
}
