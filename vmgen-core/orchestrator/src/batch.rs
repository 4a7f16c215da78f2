//! 批量转换
//!
//! 流程: 加载最近一次快照 → 确定候选 → 逐台预检 → 顺序执行 → 汇总报告
//!
//! 预检是唯一的准入关口，不满足条件的虚拟机直接进入跳过列表，不会产生任何修改。
//! 单台失败不会中断批次。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vmgen_hypervisor::{Generation, ResourceProvider};
use vmgen_storage::{ReportWriter, Storage};

use crate::converter::GenerationConverter;
use crate::job::ConversionJob;
use crate::poll::Clock;
use crate::preflight::{check_live, SkipReason};
use crate::report::BatchReport;
use crate::selection::CandidateSelector;
use crate::snapshot::{Inventory, SnapshotStore};
use crate::Result;

/// 批量执行选项
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// 显式指定的虚拟机，`None` 时交给选择器
    pub vm_names: Option<Vec<String>>,
    pub backup: bool,
    pub accept_no_backup: bool,
    pub skip_registry: bool,
    /// 只预检并输出计划，不执行转换
    pub dry_run: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            vm_names: None,
            backup: true,
            accept_no_backup: false,
            skip_registry: false,
            dry_run: false,
        }
    }
}

/// 批量编排器
pub struct BatchOrchestrator {
    converter: GenerationConverter,
    snapshots: SnapshotStore,
    pause: Duration,
    storage: Option<Arc<Storage>>,
    reports: ReportWriter,
}

impl BatchOrchestrator {
    pub fn new(converter: GenerationConverter, snapshots: SnapshotStore, pause: Duration) -> Self {
        let reports = ReportWriter::in_working_dir(snapshots.working_dir());
        Self {
            converter,
            snapshots,
            pause,
            storage: None,
            reports,
        }
    }

    /// 设置转换历史数据库
    pub fn with_storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    fn provider(&self) -> &dyn ResourceProvider {
        self.converter.provider().as_ref()
    }

    fn clock(&self) -> &dyn Clock {
        self.converter.clock().as_ref()
    }

    /// 执行批量转换
    ///
    /// 只有快照缺失或选择失败时返回 `Err`，单台失败记录在报告中
    pub async fn run(
        &self,
        options: &BatchOptions,
        selector: &dyn CandidateSelector,
    ) -> Result<BatchReport> {
        let inventory = self.snapshots.load_latest().await?;
        info!(
            "使用配置快照 {} ({} 台虚拟机)",
            inventory.directory.display(),
            inventory.rows.len()
        );

        let mut report = BatchReport::new(options.dry_run);

        let candidates = self.select_candidates(&inventory, options, selector, &mut report)?;
        let ready = self.preflight(&inventory, candidates, &mut report).await;
        report.set_planned(ready.clone());

        info!(
            "计划转换 {} 台虚拟机，跳过 {} 台",
            ready.len(),
            report.skipped
        );

        if options.dry_run {
            info!("试运行模式，不执行转换");
        } else {
            self.execute(&ready, options, &mut report).await;
        }

        report.finish();
        self.persist(&mut report).await;

        Ok(report)
    }

    /// 确定候选列表
    fn select_candidates(
        &self,
        inventory: &Inventory,
        options: &BatchOptions,
        selector: &dyn CandidateSelector,
        report: &mut BatchReport,
    ) -> Result<Vec<String>> {
        if let Some(names) = &options.vm_names {
            let mut candidates = Vec::new();
            for name in names {
                match inventory.find(name) {
                    None => report.add_skipped(name, SkipReason::NotInSnapshot.to_string()),
                    Some(row) if row.generation != Generation::Gen1 => {
                        report.add_skipped(&row.name, SkipReason::AlreadyConverted.to_string())
                    }
                    Some(row) => {
                        if !candidates.contains(&row.name) {
                            candidates.push(row.name.clone());
                        }
                    }
                }
            }
            return Ok(candidates);
        }

        let mut gen1 = Vec::new();
        for row in &inventory.rows {
            if row.generation == Generation::Gen1 {
                gen1.push(row.clone());
            } else {
                report.add_skipped(&row.name, SkipReason::AlreadyConverted.to_string());
            }
        }

        if gen1.is_empty() {
            info!("快照中没有一代虚拟机");
            return Ok(Vec::new());
        }

        selector.select(&gen1)
    }

    /// 逐台预检，返回可执行列表
    async fn preflight(
        &self,
        inventory: &Inventory,
        candidates: Vec<String>,
        report: &mut BatchReport,
    ) -> Vec<String> {
        let mut ready = Vec::new();

        for name in candidates {
            let reason = match self.provider().get_vm(&name).await {
                Err(e) => Some(SkipReason::QueryFailed(e.to_string())),
                Ok(vm) => match check_live(vm.as_ref()) {
                    Err(reason) => Some(reason),
                    Ok(()) if !inventory.has_vm_file(&name).await => {
                        Some(SkipReason::ConfigFileMissing)
                    }
                    Ok(()) => None,
                },
            };

            match reason {
                Some(reason) => {
                    warn!("跳过虚拟机 {}: {}", name, reason);
                    report.add_skipped(&name, reason.to_string());
                }
                None => ready.push(name),
            }
        }

        ready
    }

    /// 顺序执行，每台之间固定间隔
    async fn execute(&self, ready: &[String], options: &BatchOptions, report: &mut BatchReport) {
        for (index, name) in ready.iter().enumerate() {
            if index > 0 && !self.pause.is_zero() {
                self.clock().sleep(self.pause).await;
            }

            info!("[{}/{}] 转换虚拟机 {}", index + 1, ready.len(), name);

            let mut job = ConversionJob::new(name, self.snapshots.working_dir())
                .skip_registry(options.skip_registry);
            if !options.backup {
                job = job.without_backup(options.accept_no_backup);
            }

            let result = self.converter.convert(&job).await;
            report.add_result(result);
        }
    }

    /// 写出报告文件并记录到数据库，失败只告警
    async fn persist(&self, report: &mut BatchReport) {
        match self.reports.write_batch(&*report, report.started_at).await {
            Ok(path) => report.report_path = Some(path),
            Err(e) => warn!("写入批量报告失败: {}", e),
        }

        let Some(storage) = &self.storage else {
            return;
        };

        let runs = storage.runs();
        let stored = async {
            let run_id = runs.create_run(&report.to_run_record()).await?;
            let records: Vec<_> = report.results.iter().map(|r| r.to_record(run_id)).collect();
            runs.create_results(&records).await?;
            for skipped in report.to_skipped_records(run_id) {
                runs.create_skipped(&skipped).await?;
            }
            Ok::<i64, vmgen_storage::StorageError>(run_id)
        }
        .await;

        match stored {
            Ok(run_id) => info!("批次已记录到数据库 (ID {})", run_id),
            Err(e) => warn!("记录批次到数据库失败: {}", e),
        }
    }
}
