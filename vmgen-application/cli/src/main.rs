//! VmGen CLI 应用

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};

mod commands;

#[derive(Parser)]
#[command(name = "vmgen")]
#[command(about = "VmGen - Hyper-V 一代虚拟机转换为二代虚拟机", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// 配置文件路径 (默认按搜索路径查找)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 转换单台虚拟机
    Convert {
        /// 虚拟机名称
        #[arg(long)]
        vm: String,

        /// 工作目录 (覆盖配置文件)
        #[arg(short, long)]
        working_dir: Option<String>,

        /// 不备份磁盘 (需同时指定 --accept-no-backup)
        #[arg(long)]
        no_backup: bool,

        /// 确认在没有备份的情况下执行
        #[arg(long, requires = "no_backup")]
        accept_no_backup: bool,

        /// 跳过登记对账
        #[arg(long)]
        skip_registry: bool,

        /// 输出格式 (table/json/yaml)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 基于配置快照批量转换
    Batch {
        /// 目标虚拟机列表（逗号分隔）
        #[arg(long, conflicts_with = "all")]
        vms: Option<String>,

        /// 转换快照中所有一代虚拟机
        #[arg(long, conflicts_with = "vms")]
        all: bool,

        /// 工作目录 (覆盖配置文件)
        #[arg(short, long)]
        working_dir: Option<String>,

        /// 不备份磁盘 (需同时指定 --accept-no-backup)
        #[arg(long)]
        no_backup: bool,

        /// 确认在没有备份的情况下执行
        #[arg(long, requires = "no_backup")]
        accept_no_backup: bool,

        /// 跳过登记对账
        #[arg(long)]
        skip_registry: bool,

        /// 预览模式，只预检不执行
        #[arg(long)]
        dry_run: bool,

        /// 输出格式 (table/json/yaml)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 配置快照
    Inventory {
        #[command(subcommand)]
        action: InventoryAction,
    },

    /// 转换历史
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// 磁盘备份
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// 配置文件
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum InventoryAction {
    /// 导出所有虚拟机的配置快照
    Export {
        /// 工作目录 (覆盖配置文件)
        #[arg(short, long)]
        working_dir: Option<String>,
    },
    /// 显示最近一次快照
    Show {
        /// 工作目录 (覆盖配置文件)
        #[arg(short, long)]
        working_dir: Option<String>,

        /// 只显示一代虚拟机
        #[arg(long)]
        gen1: bool,

        /// 输出格式 (table/json/yaml)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ReportAction {
    /// 列出批次
    List {
        /// 按虚拟机过滤
        #[arg(long)]
        vm: Option<String>,
        /// 只显示存在失败的批次
        #[arg(long)]
        failed: bool,
        /// 显示数量
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// 显示批次详情
    Show {
        /// 批次 ID
        id: i64,
    },
    /// 导出批次
    Export {
        /// 批次 ID
        id: i64,
        /// 输出文件
        #[arg(short, long)]
        output: String,
        /// 导出格式 (json/yaml)
        #[arg(short, long, default_value = "json")]
        format: String,
    },
    /// 删除批次
    Delete {
        /// 批次 ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum BackupAction {
    /// 列出磁盘备份
    List {
        /// 按虚拟机过滤
        #[arg(long)]
        vm: Option<String>,
    },
    /// 校验磁盘备份是否完整
    Verify {
        /// 虚拟机名称
        #[arg(long)]
        vm: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// 显示生效的配置
    Show {
        /// 输出格式 (toml/json/yaml)
        #[arg(short = 'f', long, default_value = "toml")]
        format: String,
    },
    /// 生成默认配置文件
    Init {
        /// 输出文件
        #[arg(short, long, default_value = "vmgen.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    info!("VmGen CLI 启动");

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Convert {
            vm,
            working_dir,
            no_backup,
            accept_no_backup,
            skip_registry,
            format,
        } => {
            let args = commands::convert::ConvertArgs {
                vm,
                working_dir,
                no_backup,
                accept_no_backup,
                skip_registry,
                format,
            };
            commands::convert::handle(config_path, args).await?
        }
        Commands::Batch {
            vms,
            all,
            working_dir,
            no_backup,
            accept_no_backup,
            skip_registry,
            dry_run,
            format,
        } => {
            let args = commands::batch::BatchArgs {
                vms,
                all,
                working_dir,
                no_backup,
                accept_no_backup,
                skip_registry,
                dry_run,
                format,
            };
            commands::batch::handle(config_path, args).await?
        }
        Commands::Inventory { action } => commands::inventory::handle(config_path, action).await?,
        Commands::Report { action } => commands::report::handle(config_path, action).await?,
        Commands::Backup { action } => commands::backup::handle(config_path, action).await?,
        Commands::Config { action } => commands::settings::handle(config_path, action)?,
    }

    Ok(())
}
