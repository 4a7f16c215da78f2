//! 磁盘备份命令

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use vmgen_storage::DiskBackupManager;

use super::common;

pub async fn handle(config_path: Option<&str>, action: crate::BackupAction) -> Result<()> {
    let config = common::load_config(config_path, None)?;
    let manager = DiskBackupManager::new(config.backup_root());

    match action {
        crate::BackupAction::List { vm } => list_backups(&manager, vm.as_deref()).await,
        crate::BackupAction::Verify { vm } => verify_latest(&manager, &vm).await,
    }
}

async fn list_backups(manager: &DiskBackupManager, vm: Option<&str>) -> Result<()> {
    let backups = manager.list(vm).await?;

    if backups.is_empty() {
        println!(
            "\n{} {} 下没有磁盘备份",
            "ℹ".yellow(),
            manager.root().display()
        );
        return Ok(());
    }

    println!("\n{} 找到 {} 份备份:\n", "✓".green(), backups.len());
    println!(
        "{:<24} {:<20} {:<6} {:<12} {}",
        "虚拟机".bold(),
        "时间".bold(),
        "文件".bold(),
        "大小".bold(),
        "目录".bold()
    );
    println!("{}", "-".repeat(100));

    for backup in &backups {
        println!(
            "{:<24} {:<20} {:<6} {:<12} {}",
            backup.vm_name,
            backup
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S"),
            backup.files.len(),
            common::format_bytes(backup.total_bytes()),
            backup.directory.display()
        );
    }

    Ok(())
}

async fn verify_latest(manager: &DiskBackupManager, vm: &str) -> Result<()> {
    let backups = manager.list(Some(vm)).await?;
    let latest = backups
        .iter()
        .max_by_key(|b| b.created_at)
        .with_context(|| format!("虚拟机 {} 没有磁盘备份", vm))?;

    println!("{} 校验备份: {}", "⏳".cyan(), latest.directory.display());

    match manager.verify(latest).await {
        Ok(()) => {
            println!(
                "{} {} 个文件完整 ({})",
                "✓".green(),
                latest.files.len(),
                common::format_bytes(latest.total_bytes())
            );
            Ok(())
        }
        Err(e) => {
            println!("{} 备份不完整: {}", "✗".red(), e);
            std::process::exit(1);
        }
    }
}
