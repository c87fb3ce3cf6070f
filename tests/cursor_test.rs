//! Streaming cursor behavior against a live database.

mod common;

use pglease::{ExecuteOptions, Pool, QueryParam};

fn options() -> ExecuteOptions {
    ExecuteOptions::new()
}

async fn seeded_table(pool: &Pool, rows: i32) -> String {
    let table = common::unique("t_cursor");
    pool.execute(
        &format!("CREATE TABLE {} (id int4 PRIMARY KEY, label varchar(32))", table),
        &[],
        &options(),
    )
    .await
    .unwrap();
    for i in 1..=rows {
        pool.execute(
            &format!("INSERT INTO {} (id, label) VALUES ($1, $2)", table),
            &[QueryParam::from(i), QueryParam::from(format!("row-{}", i))],
            &options(),
        )
        .await
        .unwrap();
    }
    table
}

async fn drop_table(pool: &Pool, table: &str) {
    pool.execute(&format!("DROP TABLE {}", table), &[], &options())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cursor_streams_all_rows_in_order() {
    let Some(pool) = common::pool() else { return };
    let table = seeded_table(&pool, 5).await;

    let result = pool
        .execute(
            &format!("SELECT id, label FROM {} ORDER BY id", table),
            &[],
            &ExecuteOptions::new().cursor(true).fetch_rows(2),
        )
        .await
        .unwrap();
    assert!(result.rows.is_none());
    let mut cursor = result.cursor.unwrap();
    // The lease lives inside the cursor until it is done.
    assert_eq!(pool.acquired(), 1);

    let mut seen = Vec::new();
    while let Some(row) = cursor.next().await.unwrap() {
        seen.push(row.get("id").and_then(|v| v.as_i64()).unwrap());
        assert_eq!(cursor.row(), Some(&row));
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert!(cursor.is_closed());
    common::wait_for_release(&pool).await;

    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_cursor_close_mid_stream_releases_lease() {
    let Some(pool) = common::pool() else { return };
    let table = seeded_table(&pool, 10).await;

    let result = pool
        .execute(
            &format!("SELECT id FROM {} ORDER BY id", table),
            &[],
            &ExecuteOptions::new().cursor(true).fetch_rows(3),
        )
        .await
        .unwrap();
    let mut cursor = result.cursor.unwrap();

    let row = cursor.next().await.unwrap().unwrap();
    assert_eq!(row.get("id"), Some(&serde_json::json!(1)));

    cursor.close().await.unwrap();
    cursor.close().await.unwrap();
    assert!(cursor.is_closed());
    assert!(cursor.next().await.unwrap().is_none());
    common::wait_for_release(&pool).await;

    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_cursor_drop_releases_lease() {
    let Some(pool) = common::pool() else { return };
    let table = seeded_table(&pool, 4).await;

    let result = pool
        .execute(
            &format!("SELECT id FROM {}", table),
            &[],
            &ExecuteOptions::new().cursor(true),
        )
        .await
        .unwrap();
    drop(result);
    common::wait_for_release(&pool).await;

    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_cursor_over_empty_result() {
    let Some(pool) = common::pool() else { return };
    let table = seeded_table(&pool, 0).await;

    let result = pool
        .execute(
            &format!("SELECT id FROM {}", table),
            &[],
            &ExecuteOptions::new().cursor(true),
        )
        .await
        .unwrap();
    let mut cursor = result.cursor.unwrap();
    assert!(cursor.next().await.unwrap().is_none());
    assert!(cursor.row().is_none());
    assert!(cursor.is_closed());
    common::wait_for_release(&pool).await;

    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_cursor_with_bound_parameters() {
    let Some(pool) = common::pool() else { return };
    let table = seeded_table(&pool, 6).await;

    let result = pool
        .execute(
            &format!("SELECT id FROM {} WHERE id > $1 ORDER BY id", table),
            &[QueryParam::from(4)],
            &ExecuteOptions::new().cursor(true).fetch_rows(1),
        )
        .await
        .unwrap();
    let mut cursor = result.cursor.unwrap();

    let mut seen = Vec::new();
    while let Some(row) = cursor.next().await.unwrap() {
        seen.push(row.get("id").and_then(|v| v.as_i64()).unwrap());
    }
    assert_eq!(seen, vec![5, 6]);
    common::wait_for_release(&pool).await;

    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}

#[tokio::test]
async fn test_cursor_on_held_lease_borrows_the_session() {
    let Some(pool) = common::pool() else { return };
    let table = seeded_table(&pool, 5).await;

    let mut lease = pool.acquire().await.unwrap();
    let sql = format!("SELECT id FROM {} ORDER BY id", table);
    {
        let mut result = lease
            .execute(&sql, &[], &ExecuteOptions::new().cursor(true).fetch_rows(2))
            .await
            .unwrap();
        assert!(result.rows.is_none());
        let mut cursor = result.cursor.take().unwrap();

        let mut seen = Vec::new();
        while let Some(row) = cursor.next().await.unwrap() {
            seen.push(row.get("id").and_then(|v| v.as_i64()).unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        cursor.close().await.unwrap();
        cursor.close().await.unwrap();
        drop(cursor);
    }

    // The lease never left the caller; it is still theirs to release.
    assert_eq!(pool.acquired(), 1);
    lease.release().await;
    assert_eq!(pool.acquired(), 0);

    drop_table(&pool, &table).await;
    pool.close(false).await.unwrap();
}
