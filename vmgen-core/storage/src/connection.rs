use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StorageError};

const SCHEMA: &str = include_str!("../migrations/001_initial.sql");

/// 转换历史数据库
///
/// 所有连接打开 `foreign_keys`，删除批次时级联删除结果与跳过记录。
pub struct StorageManager {
    pool: SqlitePool,
}

impl StorageManager {
    /// 打开（必要时创建）文件数据库，路径支持 `~`
    ///
    /// ```no_run
    /// # use vmgen_storage::StorageManager;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let storage = StorageManager::new("~/.config/vmgen/history.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(db_path: &str) -> Result<Self> {
        let path = PathBuf::from(shellexpand::tilde(db_path).as_ref());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        info!("打开转换历史数据库: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        Self::open(SqlitePoolOptions::new().max_connections(2), options).await
    }

    /// 内存数据库，测试用
    ///
    /// 内存库按连接隔离，连接池固定为一个连接
    pub async fn new_in_memory() -> Result<Self> {
        let options = <SqliteConnectOptions as std::str::FromStr>::from_str("sqlite::memory:")
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?
            .foreign_keys(true);

        Self::open(SqlitePoolOptions::new().max_connections(1), options).await
    }

    async fn open(pool_options: SqlitePoolOptions, options: SqliteConnectOptions) -> Result<Self> {
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::MigrationError(e.to_string()))?;
        debug!("数据库表结构已就绪");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tables(manager: &StorageManager) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(manager.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_schema_created_in_memory() {
        let manager = StorageManager::new_in_memory().await.unwrap();
        assert_eq!(
            tables(&manager).await,
            vec!["conversion_results", "conversion_runs", "skipped_vms"]
        );
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let manager = StorageManager::new_in_memory().await.unwrap();
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(manager.pool())
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_file_database_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("history.db");
        let db_path = db_path.to_str().unwrap();

        let first = StorageManager::new(db_path).await.unwrap();
        first.pool().close().await;
        assert!(std::path::Path::new(db_path).exists());

        // 表结构语句可重复执行
        let second = StorageManager::new(db_path).await.unwrap();
        assert_eq!(tables(&second).await.len(), 3);
    }
}
