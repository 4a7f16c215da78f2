//! 转换配置管理
//!
//! 支持从多个源加载配置:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `VMGEN_CONFIG` 环境变量指定的路径
//! 2. `./vmgen.toml` / `./vmgen.yaml` / `./vmgen.json` (当前目录)
//! 3. `~/.config/vmgen/config.toml` (用户配置目录)
//! 4. `/etc/vmgen/config.toml` (系统配置目录)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vmgen_hypervisor::DEFAULT_POWERSHELL;
use vmgen_registry::RegistryConfig;
use vmgen_shell::ShellConfig;

use crate::converter::ConverterSettings;
use crate::poll::PollPolicy;

// ============================================
// 核心配置结构
// ============================================

/// 转换配置 (顶层)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// 工作目录（快照、采集文件、报告、默认备份位置）
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// 外部命令执行
    #[serde(default)]
    pub shell: ShellConfig,

    /// Hyper-V 配置
    #[serde(default)]
    pub hypervisor: HypervisorConfig,

    /// 云管理平面登记 (未配置时跳过登记对账)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,

    /// 轮询与节奏
    #[serde(default)]
    pub timing: TimingConfig,

    /// 转换历史数据库
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
}

/// Hyper-V 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorConfig {
    /// PowerShell 可执行文件
    #[serde(default = "default_powershell")]
    pub powershell: String,

    /// 安全启动模板
    #[serde(default = "default_secure_boot_template")]
    pub secure_boot_template: String,

    /// 磁盘备份根目录 (默认 `<working_dir>/backups`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_root: Option<PathBuf>,
}

/// 轮询与节奏配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// 心跳轮询间隔
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// 心跳等待上限
    #[serde(with = "humantime_serde", default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,

    /// 登记轮询间隔
    #[serde(with = "humantime_serde", default = "default_registry_interval")]
    pub registry_interval: Duration,

    /// 登记等待上限
    #[serde(with = "humantime_serde", default = "default_registry_timeout")]
    pub registry_timeout: Duration,

    /// 批量执行时两台虚拟机之间的间隔
    #[serde(with = "humantime_serde", default = "default_inter_vm_pause")]
    pub inter_vm_pause: Duration,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    pub path: String,
}

// ============================================
// 默认值函数
// ============================================

fn default_working_dir() -> PathBuf {
    PathBuf::from("./vmgen")
}

fn default_powershell() -> String {
    DEFAULT_POWERSHELL.to_string()
}

fn default_secure_boot_template() -> String {
    "MicrosoftWindows".to_string()
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_registry_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_registry_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_inter_vm_pause() -> Duration {
    Duration::from_secs(10)
}

// ============================================
// Default 实现
// ============================================

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            shell: ShellConfig::default(),
            hypervisor: HypervisorConfig::default(),
            registry: None,
            timing: TimingConfig::default(),
            database: None,
        }
    }
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            powershell: default_powershell(),
            secure_boot_template: default_secure_boot_template(),
            backup_root: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            registry_interval: default_registry_interval(),
            registry_timeout: default_registry_timeout(),
            inter_vm_pause: default_inter_vm_pause(),
        }
    }
}

impl TimingConfig {
    pub fn heartbeat_policy(&self) -> PollPolicy {
        PollPolicy::new(self.heartbeat_interval, self.heartbeat_timeout)
    }

    pub fn registry_policy(&self) -> PollPolicy {
        PollPolicy::new(self.registry_interval, self.registry_timeout)
    }
}

// ============================================
// 配置加载实现
// ============================================

impl ConvertConfig {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file() {
            tracing::debug!("加载配置文件: {:?}", path);
            config = Self::load_from_file(&path)?;
        } else {
            tracing::debug!("未找到配置文件，使用默认配置");
        }

        config.apply_env_vars()?;

        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {:?}", path))?,
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        Ok(config)
    }

    /// 从指定路径字符串加载配置，并应用环境变量覆盖
    pub fn load_from_path(path: &str) -> Result<Self> {
        let mut config = Self::load_from_file(Path::new(path))?;
        config.apply_env_vars()?;
        Ok(config)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("VMGEN_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut candidates = vec![
            PathBuf::from("./vmgen.toml"),
            PathBuf::from("./vmgen.yaml"),
            PathBuf::from("./vmgen.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("vmgen/config.toml"));
            candidates.push(config_dir.join("vmgen/config.yaml"));
        }

        #[cfg(target_os = "linux")]
        candidates.push(PathBuf::from("/etc/vmgen/config.toml"));

        candidates.into_iter().find(|p| p.exists())
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(dir) = env::var("VMGEN_WORKING_DIR") {
            self.working_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("VMGEN_BACKUP_DIR") {
            self.hypervisor.backup_root = Some(PathBuf::from(dir));
        }
        if let Ok(program) = env::var("VMGEN_SHELL") {
            self.hypervisor.powershell = program;
        }

        // 登记配置 (任一变量存在时创建该节)
        let subscription = env::var("VMGEN_SUBSCRIPTION").ok();
        let resource_group = env::var("VMGEN_RESOURCE_GROUP").ok();
        let location = env::var("VMGEN_LOCATION").ok();
        if subscription.is_some() || resource_group.is_some() || location.is_some() {
            let registry = self.registry.get_or_insert_with(RegistryConfig::default);
            if subscription.is_some() {
                registry.subscription_id = subscription;
            }
            if resource_group.is_some() {
                registry.resource_group = resource_group;
            }
            if location.is_some() {
                registry.location = location;
            }
        }

        if let Ok(path) = env::var("VMGEN_DB_PATH") {
            self.database = Some(DatabaseConfig { path });
        }

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.working_dir.as_os_str().is_empty() {
            anyhow::bail!("working_dir cannot be empty");
        }
        if self.hypervisor.powershell.is_empty() {
            anyhow::bail!("hypervisor.powershell cannot be empty");
        }

        let timing = &self.timing;
        if timing.heartbeat_interval.is_zero() || timing.registry_interval.is_zero() {
            anyhow::bail!("poll intervals must be greater than zero");
        }
        if timing.heartbeat_interval > timing.heartbeat_timeout {
            anyhow::bail!("heartbeat_interval cannot exceed heartbeat_timeout");
        }
        if timing.registry_interval > timing.registry_timeout {
            anyhow::bail!("registry_interval cannot exceed registry_timeout");
        }

        if let Some(ref database) = self.database {
            if database.path.is_empty() {
                anyhow::bail!("database.path cannot be empty");
            }
        }

        Ok(())
    }

    /// 实际使用的备份根目录
    pub fn backup_root(&self) -> PathBuf {
        self.hypervisor
            .backup_root
            .clone()
            .unwrap_or_else(|| self.working_dir.join("backups"))
    }

    /// 转换器参数
    pub fn converter_settings(&self) -> ConverterSettings {
        ConverterSettings {
            heartbeat: self.timing.heartbeat_policy(),
            registry: self.timing.registry_policy(),
            secure_boot_template: self.hypervisor.secure_boot_template.clone(),
            backup_root: self.backup_root(),
        }
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self).context("Failed to serialize to TOML")?,
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).context("Failed to serialize to YAML")?
            }
            Some("json") => {
                serde_json::to_string_pretty(self).context("Failed to serialize to JSON")?
            }
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }
}
