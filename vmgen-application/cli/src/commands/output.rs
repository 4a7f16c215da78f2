//! CLI 通用输出格式化模块
//!
//! 提供 table/json/yaml 三种输出格式，以及转换结果的彩色摘要

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use vmgen_orchestrator::{
    BatchReport, ConversionResult, ConversionStatus, InventoryRow, Severity, SkippedVm,
};

use super::common::format_duration_ms;

/// 可输出为表格行的数据 trait
pub trait TableRow {
    /// 返回表格列标题
    fn headers() -> Vec<&'static str>;

    /// 返回该项的表格行数据
    fn row(&self) -> Vec<String>;

    /// 每列宽度
    fn widths() -> Vec<usize> {
        Self::headers().iter().map(|_| 20).collect()
    }
}

/// 表格格式输出
pub fn print_table<T: TableRow>(items: &[T]) {
    let widths = T::widths();

    let header_line: String = T::headers()
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:<w$}", h, w = *w))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", header_line.bold());
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + widths.len()));

    for item in items {
        let row_line: String = item
            .row()
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}", row_line);
    }
}

/// JSON 格式输出
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// YAML 格式输出
pub fn print_yaml<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    print!("{}", serde_yaml::to_string(value)?);
    Ok(())
}

/// 根据格式参数选择输出方式
pub fn output_formatted<T: TableRow + Serialize>(items: &[T], format: &str) -> Result<()> {
    match format {
        "json" => print_json(items)?,
        "yaml" => print_yaml(items)?,
        _ => print_table(items),
    }
    Ok(())
}

// ============================================
// 行类型
// ============================================

impl TableRow for InventoryRow {
    fn headers() -> Vec<&'static str> {
        vec!["名称", "代际", "状态", "主机", "CPU", "检查点"]
    }

    fn widths() -> Vec<usize> {
        vec![24, 6, 10, 16, 5, 8]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.generation.to_string(),
            self.state.to_string(),
            self.host.clone(),
            self.processor_count.to_string(),
            if self.has_checkpoints { "有" } else { "-" }.to_string(),
        ]
    }
}

impl TableRow for ConversionResult {
    fn headers() -> Vec<&'static str> {
        vec!["虚拟机", "状态", "阶段", "耗时", "警告", "错误"]
    }

    fn widths() -> Vec<usize> {
        vec![24, 18, 20, 10, 6, 40]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.vm_name.clone(),
            self.status.to_string(),
            self.stage.to_string(),
            format_duration_ms(self.duration_ms),
            self.warnings().count().to_string(),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

impl TableRow for SkippedVm {
    fn headers() -> Vec<&'static str> {
        vec!["虚拟机", "跳过原因"]
    }

    fn widths() -> Vec<usize> {
        vec![24, 50]
    }

    fn row(&self) -> Vec<String> {
        vec![self.vm_name.clone(), self.reason.clone()]
    }
}

// ============================================
// 彩色摘要
// ============================================

/// 带颜色的状态文字
pub fn colored_status(status: ConversionStatus) -> colored::ColoredString {
    match status {
        ConversionStatus::Success => status.as_str().green(),
        ConversionStatus::ValidationFailed | ConversionStatus::BackupFailed => {
            status.as_str().yellow()
        }
        ConversionStatus::Failed => status.as_str().red(),
    }
}

/// 打印单台虚拟机的结果与诊断
pub fn print_result(result: &ConversionResult) {
    let marker = if result.status.is_success() {
        "✓".green()
    } else {
        "✗".red()
    };
    println!(
        "\n{} {} {} (阶段: {}, 耗时: {})",
        marker,
        result.vm_name.bold(),
        colored_status(result.status),
        result.stage,
        format_duration_ms(result.duration_ms)
    );

    if let Some(ref error) = result.error {
        println!("  {} {}", "错误:".red(), error);
    }
    if let Some(ref dir) = result.backup_dir {
        println!("  备份目录: {}", dir.display());
    }
    if let Some(ref file) = result.recovery_file {
        println!("  采集文件: {}", file.display());
    }

    for diagnostic in &result.diagnostics {
        let tag = match diagnostic.severity {
            Severity::Info => continue,
            Severity::Warning => "⚠".yellow(),
            Severity::Error => "✗".red(),
        };
        println!("  {} [{}] {}", tag, diagnostic.stage, diagnostic.message);
        if let Some(ref guidance) = diagnostic.guidance {
            println!("      {} {}", "→".cyan(), guidance);
        }
    }
}

/// 打印批量报告摘要
pub fn print_batch_summary(report: &BatchReport) {
    if !report.skipped_vms.is_empty() {
        println!("\n{} 跳过 {} 台:\n", "ℹ".yellow(), report.skipped_vms.len());
        print_table(&report.skipped_vms);
    }

    if report.dry_run {
        println!("\n{} 预览模式，计划转换 {} 台:", "ℹ".cyan(), report.planned.len());
        for (i, name) in report.planned.iter().enumerate() {
            println!("  {}. {}", i + 1, name);
        }
    } else if !report.results.is_empty() {
        println!();
        print_table(&report.results);
    }

    println!(
        "\n合计 {}  成功 {}  失败 {}  跳过 {}",
        report.total,
        report.succeeded.to_string().green(),
        report.failed.to_string().red(),
        report.skipped.to_string().yellow()
    );

    if let Some(ref path) = report.report_path {
        println!("报告文件: {}", path.display());
    }
}
