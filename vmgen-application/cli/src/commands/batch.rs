//! 批量转换命令

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use tracing::warn;
use vmgen_orchestrator::{
    parse_selection, AllCandidates, BatchOptions, BatchOrchestrator, CandidateSelector,
    InteractiveCandidateSelector, InventoryRow, SnapshotStore,
};

use super::common;
use super::output::{self, TableRow};

pub struct BatchArgs {
    pub vms: Option<String>,
    pub all: bool,
    pub working_dir: Option<String>,
    pub no_backup: bool,
    pub accept_no_backup: bool,
    pub skip_registry: bool,
    pub dry_run: bool,
    pub format: String,
}

pub async fn handle(config_path: Option<&str>, args: BatchArgs) -> Result<()> {
    let config = common::load_config(config_path, args.working_dir.as_deref())?;

    let mut orchestrator = BatchOrchestrator::new(
        common::build_converter(&config),
        SnapshotStore::new(&config.working_dir),
        config.timing.inter_vm_pause,
    );

    // 历史库打不开不影响转换本身
    match common::open_storage(&config).await {
        Ok(storage) => orchestrator = orchestrator.with_storage(Arc::new(storage)),
        Err(e) => warn!("转换历史不可用: {:#}", e),
    }

    let options = BatchOptions {
        vm_names: args.vms.as_deref().map(split_names),
        backup: !args.no_backup,
        accept_no_backup: args.accept_no_backup,
        skip_registry: args.skip_registry,
        dry_run: args.dry_run,
    };

    if args.dry_run {
        println!("{} 预览模式: 只做选择与预检", "ℹ".cyan());
    }
    println!("{} 加载配置快照: {}", "⏳".cyan(), config.working_dir.display());

    let interactive = InteractiveCandidateSelector::new(prompt_selection);
    let selector: &dyn CandidateSelector = if args.all || options.vm_names.is_some() {
        &AllCandidates
    } else {
        &interactive
    };

    let report = orchestrator.run(&options, selector).await?;

    match args.format.as_str() {
        "json" => println!("{}", report.to_json()?),
        "yaml" => print!("{}", report.to_yaml()?),
        _ => output::print_batch_summary(&report),
    }

    // 单台失败不影响批量退出码，结果以报告为准
    if report.failed > 0 {
        warn!("{} 台虚拟机转换失败，详见报告", report.failed);
    }

    Ok(())
}

/// 拆分逗号分隔的虚拟机列表
fn split_names(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 列出候选虚拟机并从标准输入读取选择
fn prompt_selection(rows: &[InventoryRow]) -> vmgen_orchestrator::Result<Vec<String>> {
    println!("\n{} 快照中的一代虚拟机:\n", "✓".green());
    let widths = InventoryRow::widths();
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row
            .row()
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect();
        println!("{:>3}. {}", i + 1, cells.join(" "));
    }

    print!("\n选择要转换的虚拟机 (如 1,3 或 2-4，all 表示全部): ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let picked = parse_selection(&line, rows.len())?;
    Ok(picked.into_iter().map(|i| rows[i].name.clone()).collect())
}
