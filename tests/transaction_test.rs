//! Transaction depth, auto-commit, and release semantics on live sessions.

mod common;

use pglease::{AcquireOptions, DriverError, ExecuteOptions, Pool, QueryParam};

fn options() -> ExecuteOptions {
    ExecuteOptions::new()
}

async fn create_table(pool: &Pool) -> String {
    let table = common::unique("t_txn");
    pool.execute(
        &format!("CREATE TABLE {} (id varchar(10) PRIMARY KEY)", table),
        &[],
        &options(),
    )
    .await
    .unwrap();
    table
}

async fn count_rows(pool: &Pool, table: &str) -> i64 {
    let result = pool
        .execute(&format!("SELECT count(*) AS n FROM {}", table), &[], &options())
        .await
        .unwrap();
    result.rows.unwrap()[0]
        .get("n")
        .and_then(|v| v.as_i64())
        .unwrap()
}

async fn drop_table(pool: &Pool, table: &str) {
    pool.execute(&format!("DROP TABLE {}", table), &[], &options())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_commit_makes_insert_visible() {
    let Some(pool) = common::pool() else { return };
    let table = create_table(&pool).await;

    let mut lease = pool.acquire().await.unwrap();
    lease.start_transaction().await.unwrap();
    assert_eq!(lease.transaction_depth(), 1);
    assert!(lease.in_transaction());
    lease
        .execute(
            &format!("INSERT INTO {} (id) VALUES ($1)", table),
            &[QueryParam::from("X001")],
            &options(),
        )
        .await
        .unwrap();
    lease.commit().await.unwrap();
    assert_eq!(lease.transaction_depth(), 0);
    assert!(!lease.in_transaction());
    lease.release().await;

    assert_eq!(count_rows(&pool, &table).await, 1);
    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_rollback_reverts_insert() {
    let Some(pool) = common::pool() else { return };
    let table = create_table(&pool).await;

    let mut lease = pool.acquire().await.unwrap();
    lease.start_transaction().await.unwrap();
    lease
        .execute(
            &format!("INSERT INTO {} (id) VALUES ($1)", table),
            &[QueryParam::from("X001")],
            &options(),
        )
        .await
        .unwrap();
    lease.rollback().await.unwrap();
    lease.release().await;

    assert_eq!(count_rows(&pool, &table).await, 0);
    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_nested_start_needs_matching_commits() {
    let Some(pool) = common::pool() else { return };
    let table = create_table(&pool).await;

    let mut lease = pool.acquire().await.unwrap();
    lease.start_transaction().await.unwrap();
    lease.start_transaction().await.unwrap();
    assert_eq!(lease.transaction_depth(), 2);

    lease
        .execute(
            &format!("INSERT INTO {} (id) VALUES ($1)", table),
            &[QueryParam::from("X001")],
            &options(),
        )
        .await
        .unwrap();

    // First commit only unwinds one level; the backend transaction stays open.
    lease.commit().await.unwrap();
    assert_eq!(lease.transaction_depth(), 1);
    assert!(lease.in_transaction());
    assert_eq!(count_rows(&pool, &table).await, 0);

    lease.commit().await.unwrap();
    assert!(!lease.in_transaction());
    lease.release().await;

    assert_eq!(count_rows(&pool, &table).await, 1);
    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_commit_and_rollback_saturate_at_zero() {
    let Some(pool) = common::pool() else { return };

    let mut lease = pool.acquire().await.unwrap();
    // Nothing open: both are silent no-ops, repeatable at will.
    lease.commit().await.unwrap();
    lease.commit().await.unwrap();
    lease.rollback().await.unwrap();
    assert_eq!(lease.transaction_depth(), 0);

    lease.start_transaction().await.unwrap();
    lease.rollback().await.unwrap();
    lease.rollback().await.unwrap();
    lease.commit().await.unwrap();
    assert_eq!(lease.transaction_depth(), 0);
    lease.release().await;

    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_implicit_transaction_without_auto_commit() {
    let Some(pool) = common::pool() else { return };
    let table = create_table(&pool).await;

    let mut lease = pool
        .acquire_with(AcquireOptions::new().auto_commit(false))
        .await
        .unwrap();
    lease
        .execute(
            &format!("INSERT INTO {} (id) VALUES ($1)", table),
            &[QueryParam::from("X001")],
            &options(),
        )
        .await
        .unwrap();
    // No explicit start, yet the statement opened a backend transaction.
    assert!(lease.in_transaction());
    assert_eq!(lease.transaction_depth(), 0);

    lease.rollback().await.unwrap();
    lease.release().await;

    assert_eq!(count_rows(&pool, &table).await, 0);
    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_auto_commit_insert_survives_rollback() {
    let Some(pool) = common::pool() else { return };
    let table = create_table(&pool).await;

    let mut lease = pool.acquire().await.unwrap();
    lease
        .execute(
            &format!("INSERT INTO {} (id) VALUES ($1)", table),
            &[QueryParam::from("X001")],
            &options(),
        )
        .await
        .unwrap();
    assert!(!lease.in_transaction());
    lease.rollback().await.unwrap();
    lease.release().await;

    assert_eq!(count_rows(&pool, &table).await, 1);
    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_release_rolls_back_open_transaction() {
    let Some(pool) = common::pool() else { return };
    let table = create_table(&pool).await;

    let mut lease = pool.acquire().await.unwrap();
    lease.start_transaction().await.unwrap();
    lease
        .execute(
            &format!("INSERT INTO {} (id) VALUES ($1)", table),
            &[QueryParam::from("X001")],
            &options(),
        )
        .await
        .unwrap();
    lease.release().await;
    assert_eq!(pool.acquired(), 0);

    assert_eq!(count_rows(&pool, &table).await, 0);
    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_execute_on_closed_connection_fails() {
    let Some(pool) = common::pool() else { return };

    let mut lease = pool.acquire().await.unwrap();
    lease.close().await.unwrap();
    assert!(lease.is_closed());

    let err = lease.execute("SELECT 1", &[], &options()).await.unwrap_err();
    assert!(matches!(err, DriverError::ConnectionClosed));
    let err = lease.start_transaction().await.unwrap_err();
    assert!(matches!(err, DriverError::ConnectionClosed));

    // Closing again stays a no-op.
    lease.close().await.unwrap();
    lease.release().await;
    assert_eq!(pool.acquired(), 0);

    pool.close(false).await.unwrap();
}
