//! 配置快照命令

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use vmgen_hypervisor::{Generation, PowerShellProvider};
use vmgen_orchestrator::{InventoryRow, SnapshotStore};
use vmgen_shell::ProcessRunner;

use super::common;
use super::output;

pub async fn handle(config_path: Option<&str>, action: crate::InventoryAction) -> Result<()> {
    match action {
        crate::InventoryAction::Export { working_dir } => {
            export_inventory(config_path, working_dir.as_deref()).await
        }
        crate::InventoryAction::Show {
            working_dir,
            gen1,
            format,
        } => show_inventory(config_path, working_dir.as_deref(), gen1, &format).await,
    }
}

async fn export_inventory(config_path: Option<&str>, working_dir: Option<&str>) -> Result<()> {
    let config = common::load_config(config_path, working_dir)?;

    println!("{} 导出虚拟机配置快照...", "⏳".cyan());

    let runner = Arc::new(ProcessRunner::new(config.shell.clone()));
    let provider = PowerShellProvider::new(runner, config.hypervisor.powershell.clone());

    let inventory = SnapshotStore::new(&config.working_dir)
        .export(&provider)
        .await
        .context("导出配置快照失败")?;

    let gen1 = inventory
        .rows
        .iter()
        .filter(|r| r.generation == Generation::Gen1)
        .count();

    println!(
        "\n{} 已导出 {} 台虚拟机 (一代 {} 台)",
        "✓".green(),
        inventory.rows.len(),
        gen1
    );
    println!("快照目录: {}", inventory.directory.display());

    Ok(())
}

async fn show_inventory(
    config_path: Option<&str>,
    working_dir: Option<&str>,
    gen1_only: bool,
    format: &str,
) -> Result<()> {
    let config = common::load_config(config_path, working_dir)?;

    let inventory = SnapshotStore::new(&config.working_dir)
        .load_latest()
        .await
        .context("加载配置快照失败，请先执行 inventory export")?;

    let rows: Vec<InventoryRow> = inventory
        .rows
        .into_iter()
        .filter(|r| !gen1_only || r.generation == Generation::Gen1)
        .collect();

    if rows.is_empty() {
        println!("\n{} 快照中没有符合条件的虚拟机", "ℹ".yellow());
        return Ok(());
    }

    if format == "table" {
        println!(
            "\n{} 快照 {} 共 {} 台:\n",
            "✓".green(),
            inventory.directory.display(),
            rows.len()
        );
    }

    output::output_formatted(&rows, format)
}
