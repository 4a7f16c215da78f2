//! 转换结果与批量报告

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use vmgen_storage::{BatchRunRecord, ConversionRecord, SkippedRecord};

use crate::state::ConversionStage;

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    /// 尽力而为步骤失败或等待超时，不影响任务状态
    Warning,
    /// 越过不可逆点后的配置失败，继续执行但任务最终为失败
    Error,
}

/// 转换过程中累积的诊断信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 所属阶段（正在进入的状态）
    pub stage: ConversionStage,
    pub severity: Severity,
    pub message: String,
    /// 人工处理指引
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

/// 任务终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    /// 前置条件不满足，未做任何修改
    #[serde(rename = "VALIDATION FAILED")]
    ValidationFailed,
    /// 备份或格式转换失败，源虚拟机未受影响
    #[serde(rename = "BACKUP FAILED")]
    BackupFailed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Success => "SUCCESS",
            ConversionStatus::ValidationFailed => "VALIDATION FAILED",
            ConversionStatus::BackupFailed => "BACKUP FAILED",
            ConversionStatus::Failed => "FAILED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionStatus::Success)
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单台虚拟机转换结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub vm_name: String,
    pub status: ConversionStatus,
    /// 最后到达的状态
    pub stage: ConversionStage,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    /// 新虚拟机 ID
    #[serde(default)]
    pub new_vm_id: Option<String>,
    /// 磁盘备份目录
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    /// 采集配置文件
    #[serde(default)]
    pub recovery_file: Option<PathBuf>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl ConversionResult {
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            status: ConversionStatus::Success,
            stage: ConversionStage::Pending,
            duration_ms: 0,
            error: None,
            completed_at: Utc::now(),
            new_vm_id: None,
            backup_dir: None,
            recovery_file: None,
            diagnostics: Vec::new(),
        }
    }

    /// 推进到新状态
    pub fn reach(&mut self, stage: ConversionStage) {
        self.stage = stage;
    }

    pub fn info(&mut self, stage: ConversionStage, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", self.vm_name, message);
        self.push(stage, Severity::Info, message, None);
    }

    /// 记录警告（同时输出 warn 日志）
    pub fn warn(
        &mut self,
        stage: ConversionStage,
        message: impl Into<String>,
        guidance: Option<String>,
    ) {
        let message = message.into();
        match &guidance {
            Some(g) => warn!("[{}] {} | 处理建议: {}", self.vm_name, message, g),
            None => warn!("[{}] {}", self.vm_name, message),
        }
        self.push(stage, Severity::Warning, message, guidance);
    }

    /// 记录错误（同时输出 error 日志）
    pub fn error(
        &mut self,
        stage: ConversionStage,
        message: impl Into<String>,
        guidance: Option<String>,
    ) {
        let message = message.into();
        match &guidance {
            Some(g) => error!("[{}] {} | 处理建议: {}", self.vm_name, message, g),
            None => error!("[{}] {}", self.vm_name, message),
        }
        self.push(stage, Severity::Error, message, guidance);
    }

    fn push(
        &mut self,
        stage: ConversionStage,
        severity: Severity,
        message: String,
        guidance: Option<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            stage,
            severity,
            message,
            guidance,
        });
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// 以指定终态结束
    pub fn finish(&mut self, status: ConversionStatus, error: Option<String>, duration_ms: u64) {
        self.status = status;
        self.error = error;
        self.duration_ms = duration_ms;
        self.completed_at = Utc::now();
    }

    /// 转换为数据库记录
    pub fn to_record(&self, run_id: i64) -> ConversionRecord {
        ConversionRecord {
            id: 0,
            run_id,
            vm_name: self.vm_name.clone(),
            status: self.status.as_str().to_string(),
            stage: self.stage.as_str().to_string(),
            duration_ms: self.duration_ms as i64,
            error: self.error.clone(),
            completed_at: self.completed_at,
            diagnostics: serde_json::to_string(&self.diagnostics).ok(),
        }
    }
}

/// 预检跳过的虚拟机
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedVm {
    pub vm_name: String,
    pub reason: String,
}

/// 批量报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 通过预检、计划执行的虚拟机（按执行顺序）
    #[serde(default)]
    pub planned: Vec<String>,
    #[serde(default)]
    pub results: Vec<ConversionResult>,
    #[serde(default)]
    pub skipped_vms: Vec<SkippedVm>,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl BatchReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            planned: Vec::new(),
            results: Vec::new(),
            skipped_vms: Vec::new(),
            report_path: None,
        }
    }

    pub fn add_skipped(&mut self, vm_name: impl Into<String>, reason: impl Into<String>) {
        self.skipped_vms.push(SkippedVm {
            vm_name: vm_name.into(),
            reason: reason.into(),
        });
        self.recount();
    }

    pub fn add_result(&mut self, result: ConversionResult) {
        self.results.push(result);
        self.recount();
    }

    fn recount(&mut self) {
        self.succeeded = self
            .results
            .iter()
            .filter(|r| r.status.is_success())
            .count();
        self.failed = self.results.len() - self.succeeded;
        self.skipped = self.skipped_vms.len();
        self.total = self.results.len().max(self.planned.len()) + self.skipped;
    }

    /// 设置计划执行列表
    pub fn set_planned(&mut self, planned: Vec<String>) {
        self.planned = planned;
        self.recount();
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn result_for(&self, vm_name: &str) -> Option<&ConversionResult> {
        self.results.iter().find(|r| r.vm_name == vm_name)
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }

    /// 转换为数据库批次记录
    pub fn to_run_record(&self) -> BatchRunRecord {
        BatchRunRecord {
            id: 0,
            run_uuid: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            total: self.total as i32,
            succeeded: self.succeeded as i32,
            failed: self.failed as i32,
            skipped: self.skipped as i32,
            dry_run: self.dry_run,
            report_path: self
                .report_path
                .as_ref()
                .map(|p| p.display().to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn to_skipped_records(&self, run_id: i64) -> Vec<SkippedRecord> {
        self.skipped_vms
            .iter()
            .map(|s| SkippedRecord {
                id: 0,
                run_id,
                vm_name: s.vm_name.clone(),
                reason: s.reason.clone(),
            })
            .collect()
    }
}
