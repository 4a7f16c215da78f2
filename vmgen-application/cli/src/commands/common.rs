//! 公共工具函数模块
//!
//! 提供各命令模块共享的功能，包括：
//! - 配置加载与命令行覆盖
//! - 转换器组装（PowerShell / 集群 / az 登记客户端）
//! - 转换历史数据库连接

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use vmgen_hypervisor::PowerShellProvider;
use vmgen_orchestrator::{ConvertConfig, GenerationConverter, TokioClock};
use vmgen_registry::AzCliRegistry;
use vmgen_shell::ProcessRunner;
use vmgen_storage::{Storage, StorageManager};

/// 未配置数据库时使用的历史库路径
pub const DEFAULT_DB_PATH: &str = "~/.config/vmgen/history.db";

/// 加载配置，`--working-dir` 优先于配置文件
pub fn load_config(config_path: Option<&str>, working_dir: Option<&str>) -> Result<ConvertConfig> {
    let mut config = match config_path {
        Some(path) => ConvertConfig::load_from_path(path)
            .with_context(|| format!("加载配置文件失败: {}", path))?,
        None => ConvertConfig::load().context("加载配置失败")?,
    };

    if let Some(dir) = working_dir {
        config.working_dir = PathBuf::from(dir);
    }

    config.validate().context("配置校验失败")?;
    debug!("工作目录: {}", config.working_dir.display());

    Ok(config)
}

/// 按配置组装转换器
///
/// PowerShell 同时承担 Hyper-V 与故障转移集群两类 cmdlet
pub fn build_converter(config: &ConvertConfig) -> GenerationConverter {
    let runner = Arc::new(ProcessRunner::new(config.shell.clone()));
    let provider = Arc::new(PowerShellProvider::new(
        runner.clone(),
        config.hypervisor.powershell.clone(),
    ));

    let converter = GenerationConverter::new(
        provider.clone(),
        provider,
        Arc::new(TokioClock),
        config.converter_settings(),
    );

    match &config.registry {
        Some(registry) => {
            info!(
                "登记对账已启用: {} (资源组: {})",
                registry.program,
                registry.resource_group.as_deref().unwrap_or("-")
            );
            converter.with_registry(Arc::new(AzCliRegistry::new(runner, registry.clone())))
        }
        None => {
            debug!("未配置登记参数，跳过登记对账");
            converter
        }
    }
}

/// 转换历史数据库路径
pub fn db_path(config: &ConvertConfig) -> String {
    config
        .database
        .as_ref()
        .map(|db| db.path.clone())
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
}

/// 打开转换历史数据库
pub async fn open_storage(config: &ConvertConfig) -> Result<Storage> {
    let path = db_path(config);
    let manager = StorageManager::new(&path)
        .await
        .with_context(|| format!("打开转换历史数据库失败: {}", path))?;
    Ok(Storage::from_manager(&manager))
}

/// 字节数转为便于阅读的字符串
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// 毫秒转为 `1m 05s` 形式
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, (ms % 1000) / 100)
    }
}
