use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 转换批次数据库模型
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchRunRecord {
    pub id: i64,
    pub run_uuid: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub skipped: i32,
    pub dry_run: bool,
    pub report_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 单台虚拟机转换结果数据库模型
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversionRecord {
    pub id: i64,
    pub run_id: i64,
    pub vm_name: String,
    pub status: String, // 'SUCCESS', 'VALIDATION FAILED', 'BACKUP FAILED', 'FAILED'
    pub stage: String,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub diagnostics: Option<String>, // JSON array
}

/// 预检跳过记录
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SkippedRecord {
    pub id: i64,
    pub run_id: i64,
    pub vm_name: String,
    pub reason: String,
}

/// 批次查询过滤器
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// 只返回包含该虚拟机的批次
    pub vm_name: Option<String>,
    /// 只返回存在失败的批次
    pub has_failures: Option<bool>,
    pub started_from: Option<DateTime<Utc>>,
    pub started_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
