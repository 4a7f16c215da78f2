//! VmGen 存储层
//!
//! - `StorageManager` / `Storage`: SQLite 转换历史
//! - `DiskBackupManager`: 虚拟机磁盘备份
//! - `ReportWriter`: 批量报告与其他 JSON 文件

mod artifacts;
mod backup;
mod connection;
mod error;
mod models;
mod repositories;

pub use artifacts::{read_json, write_json, ReportWriter, REPORTS_DIR};
pub use backup::{BackedUpFile, DiskBackup, DiskBackupManager};
pub use connection::StorageManager;
pub use error::{Result, StorageError};
pub use models::*;
pub use repositories::*;

use sqlx::SqlitePool;

/// 统一的数据访问层入口
pub struct Storage {
    pool: SqlitePool,
    runs: RunRepository,
}

impl Storage {
    /// 从 StorageManager 创建 Storage
    pub fn from_manager(manager: &StorageManager) -> Self {
        let pool = manager.pool().clone();
        Self {
            pool: pool.clone(),
            runs: RunRepository::new(pool),
        }
    }

    /// 获取转换历史仓储
    pub fn runs(&self) -> &RunRepository {
        &self.runs
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
