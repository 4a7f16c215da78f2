//! 转换历史管理命令

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use serde::Serialize;
use vmgen_storage::{BatchRunRecord, ConversionRecord, RunFilter, SkippedRecord, Storage};

use super::common;

pub async fn handle(config_path: Option<&str>, action: crate::ReportAction) -> Result<()> {
    let config = common::load_config(config_path, None)?;
    let storage = common::open_storage(&config).await?;

    match action {
        crate::ReportAction::List { vm, failed, limit } => {
            list_runs(&storage, vm, failed, limit).await
        }
        crate::ReportAction::Show { id } => show_run(&storage, id).await,
        crate::ReportAction::Export { id, output, format } => {
            export_run(&storage, id, &output, &format).await
        }
        crate::ReportAction::Delete { id } => delete_run(&storage, id).await,
    }
}

fn local_time(run: &BatchRunRecord) -> String {
    run.started_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

async fn list_runs(storage: &Storage, vm: Option<String>, failed: bool, limit: i64) -> Result<()> {
    println!("{} 加载转换历史...", "⏳".cyan());

    let filter = RunFilter {
        vm_name: vm,
        has_failures: failed.then_some(true),
        limit: Some(limit),
        ..Default::default()
    };

    let runs = storage.runs().list(&filter).await?;

    if runs.is_empty() {
        println!("\n{} 没有找到转换批次", "ℹ".yellow());
        return Ok(());
    }

    let total = storage.runs().count(&filter).await?;
    println!("\n{} 找到 {} 个批次 (共 {} 个):\n", "✓".green(), runs.len(), total);

    println!(
        "{:<6} {:<20} {:<8} {:<8} {:<8} {:<8} {:<8}",
        "ID".bold(),
        "开始时间".bold(),
        "合计".bold(),
        "成功".bold(),
        "失败".bold(),
        "跳过".bold(),
        "模式".bold()
    );
    println!("{}", "-".repeat(72));

    for run in &runs {
        let failed_str = if run.failed > 0 {
            run.failed.to_string().red()
        } else {
            run.failed.to_string().normal()
        };
        let mode = if run.dry_run { "预览" } else { "执行" };

        println!(
            "{:<6} {:<20} {:<8} {:<8} {:<8} {:<8} {:<8}",
            run.id,
            local_time(run),
            run.total,
            run.succeeded.to_string().green(),
            failed_str,
            run.skipped,
            mode
        );
    }

    Ok(())
}

async fn show_run(storage: &Storage, id: i64) -> Result<()> {
    let run = storage
        .runs()
        .get_run(id)
        .await?
        .with_context(|| format!("批次 {} 不存在", id))?;
    let results = storage.runs().get_results(id).await?;
    let skipped = storage.runs().get_skipped(id).await?;

    println!("\n{} 批次 #{} ({})", "📋".cyan(), run.id, run.run_uuid);
    println!("开始时间: {}", local_time(&run));
    if let Some(finished) = run.finished_at {
        println!(
            "结束时间: {}",
            finished.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(ref path) = run.report_path {
        println!("报告文件: {}", path);
    }
    println!(
        "合计 {}  成功 {}  失败 {}  跳过 {}",
        run.total,
        run.succeeded.to_string().green(),
        run.failed.to_string().red(),
        run.skipped.to_string().yellow()
    );

    if !results.is_empty() {
        println!("\n{}", "转换结果:".bold());
        for record in &results {
            let status = if record.status == "SUCCESS" {
                record.status.green()
            } else {
                record.status.red()
            };
            println!(
                "  {:<24} {:<20} {:<20} {}",
                record.vm_name,
                status,
                record.stage,
                common::format_duration_ms(record.duration_ms.max(0) as u64)
            );
            if let Some(ref error) = record.error {
                println!("      {} {}", "错误:".red(), error);
            }
        }
    }

    if !skipped.is_empty() {
        println!("\n{}", "跳过:".bold());
        for record in &skipped {
            println!("  {:<24} {}", record.vm_name, record.reason);
        }
    }

    Ok(())
}

/// 导出用的完整批次
#[derive(Serialize)]
struct RunExport {
    run: BatchRunRecord,
    results: Vec<ConversionRecord>,
    skipped: Vec<SkippedRecord>,
}

async fn export_run(storage: &Storage, id: i64, output: &str, format: &str) -> Result<()> {
    let run = storage
        .runs()
        .get_run(id)
        .await?
        .with_context(|| format!("批次 {} 不存在", id))?;

    let export = RunExport {
        run,
        results: storage.runs().get_results(id).await?,
        skipped: storage.runs().get_skipped(id).await?,
    };

    let content = match format {
        "yaml" => serde_yaml::to_string(&export)?,
        _ => serde_json::to_string_pretty(&export)?,
    };

    tokio::fs::write(output, content)
        .await
        .with_context(|| format!("写入导出文件失败: {}", output))?;

    println!("{} 批次 #{} 已导出到 {}", "✓".green(), id, output);

    Ok(())
}

async fn delete_run(storage: &Storage, id: i64) -> Result<()> {
    storage.runs().delete(id).await?;
    println!("{} 批次 #{} 已删除", "✓".green(), id);
    Ok(())
}
