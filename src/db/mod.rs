use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

/// Open (creating if absent) the SQLite database backing the stream store,
/// applying the bundled migration and enabling WAL mode for concurrent readers.
pub async fn init_store_db(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let url = format!("sqlite:{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&url).await?;

    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;

    let migration = include_str!("../../migrations/001_create_stream_store.sql");
    sqlx::raw_sql(migration).execute(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_store_db_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("dispatch.db");

        let pool = init_store_db(&db_path).await.unwrap();

        assert!(db_path.exists());
        let result = sqlx::query("SELECT 1").fetch_one(&pool).await;
        assert!(result.is_ok());

        pool.close().await;
    }

    #[tokio::test]
    async fn test_init_store_db_creates_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("dispatch.db");

        let pool = init_store_db(&db_path).await.unwrap();

        for table in ["stream_records", "stream_groups", "stream_deliveries", "kv_store"] {
            let result = sqlx::query(&format!("SELECT * FROM {table} LIMIT 0"))
                .fetch_optional(&pool)
                .await;
            assert!(result.is_ok(), "table {table} should exist");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn test_init_store_db_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("dispatch.db");

        let pool1 = init_store_db(&db_path).await.unwrap();
        pool1.close().await;

        let pool2 = init_store_db(&db_path).await.unwrap();
        let result = sqlx::query("SELECT COUNT(*) FROM stream_records")
            .fetch_one(&pool2)
            .await;
        assert!(result.is_ok());

        pool2.close().await;
    }

    #[tokio::test]
    async fn test_init_store_db_enables_wal_mode() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("dispatch.db");

        let pool = init_store_db(&db_path).await.unwrap();

        let (journal_mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(journal_mode.to_lowercase(), "wal");

        pool.close().await;
    }
}
