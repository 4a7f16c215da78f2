use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{Result, StorageError};

/// 报告目录名
pub const REPORTS_DIR: &str = "reports";

/// JSON 结构化文件写入器
///
/// 批量报告: `<working_dir>/reports/batch_<timestamp>.json`
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    /// 在工作目录下创建报告写入器
    pub fn in_working_dir(working_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: working_dir.as_ref().join(REPORTS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 写入批量报告
    pub async fn write_batch<T: Serialize>(
        &self,
        report: &T,
        timestamp: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let name = format!("batch_{}.json", timestamp.format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(name);
        write_json(&path, report).await?;
        info!("报告已保存: {}", path.display());
        Ok(path)
    }
}

/// 以格式化 JSON 写入文件，父目录不存在时自动创建
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }

    let content = serde_json::to_vec_pretty(value)?;
    fs::write(path, content)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    Ok(())
}

/// 读取 JSON 文件
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path).await.map_err(|e| StorageError::io(path, e))?;
    Ok(serde_json::from_slice(&content)?)
}
