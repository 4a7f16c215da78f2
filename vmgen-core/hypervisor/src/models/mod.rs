//! 虚拟机数据模型
//!
//! **数据来源**: Hyper-V 管理接口实时查询，以及配置快照文件（两者共用同一模型）

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};

/// 新建二代虚拟机时自动创建的网卡名称
pub const PRIMARY_ADAPTER_NAME: &str = "Network Adapter";

// ============================================
// 代际 / 电源状态
// ============================================

/// 虚拟机代际（固件/引导模型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Generation {
    /// 一代：BIOS 引导，IDE 启动盘
    Gen1,
    /// 二代：UEFI 引导，仅 SCSI
    Gen2,
}

impl TryFrom<u8> for Generation {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Generation::Gen1),
            2 => Ok(Generation::Gen2),
            other => Err(format!("无效的虚拟机代际: {}", other)),
        }
    }
}

impl From<Generation> for u8 {
    fn from(value: Generation) -> Self {
        match value {
            Generation::Gen1 => 1,
            Generation::Gen2 => 2,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// 电源状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PowerState {
    Off,
    Running,
    Paused,
    Saved,
    Starting,
    Stopping,
    Other(String),
}

impl PowerState {
    /// 是否处于完全关机状态（Saved/Paused 不算关机）
    pub fn is_off(&self) -> bool {
        matches!(self, PowerState::Off)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PowerState::Off => "Off",
            PowerState::Running => "Running",
            PowerState::Paused => "Paused",
            PowerState::Saved => "Saved",
            PowerState::Starting => "Starting",
            PowerState::Stopping => "Stopping",
            PowerState::Other(s) => s,
        }
    }
}

impl From<String> for PowerState {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "off" => PowerState::Off,
            "running" => PowerState::Running,
            "paused" => PowerState::Paused,
            "saved" => PowerState::Saved,
            "starting" => PowerState::Starting,
            "stopping" => PowerState::Stopping,
            _ => PowerState::Other(value),
        }
    }
}

impl From<PowerState> for String {
    fn from(value: PowerState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// 磁盘
// ============================================

/// 磁盘控制器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ControllerType {
    /// 传统总线（仅一代虚拟机）
    #[serde(rename = "IDE", alias = "Ide", alias = "ide")]
    Ide,
    #[serde(rename = "SCSI", alias = "Scsi", alias = "scsi")]
    Scsi,
}

impl ControllerType {
    pub fn is_legacy(&self) -> bool {
        matches!(self, ControllerType::Ide)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerType::Ide => "IDE",
            ControllerType::Scsi => "SCSI",
        }
    }
}

/// 控制器地址（类型 + 控制器编号 + 位置）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerAddress {
    pub controller_type: ControllerType,
    pub controller_number: u32,
    pub controller_location: u32,
}

impl ControllerAddress {
    pub fn new(controller_type: ControllerType, number: u32, location: u32) -> Self {
        Self {
            controller_type,
            controller_number: number,
            controller_location: location,
        }
    }

    pub fn scsi(number: u32, location: u32) -> Self {
        Self::new(ControllerType::Scsi, number, location)
    }

    pub fn ide(number: u32, location: u32) -> Self {
        Self::new(ControllerType::Ide, number, location)
    }
}

impl fmt::Display for ControllerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}",
            self.controller_type.as_str(),
            self.controller_number,
            self.controller_location
        )
    }
}

/// 磁盘容器格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskFormat {
    /// 传统格式，二代虚拟机不可挂载
    #[serde(rename = "VHD", alias = "Vhd", alias = "vhd")]
    Vhd,
    #[serde(rename = "VHDX", alias = "Vhdx", alias = "vhdx")]
    Vhdx,
}

impl DiskFormat {
    /// 根据文件扩展名推断格式
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "vhd" => Some(DiskFormat::Vhd),
            "vhdx" => Some(DiskFormat::Vhdx),
            _ => None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, DiskFormat::Vhd)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DiskFormat::Vhd => "vhd",
            DiskFormat::Vhdx => "vhdx",
        }
    }
}

/// 磁盘描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDescriptor {
    pub controller: ControllerAddress,
    pub path: PathBuf,
    pub format: DiskFormat,
    /// 虚拟磁盘大小（字节）
    #[serde(default)]
    pub size_bytes: u64,
}

impl DiskDescriptor {
    /// 转换为新格式后的目标路径（同目录、同文件名、新扩展名）
    pub fn upgraded_path(&self) -> PathBuf {
        self.path.with_extension(DiskFormat::Vhdx.extension())
    }
}

// ============================================
// 网卡
// ============================================

/// 网卡描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicDescriptor {
    pub name: String,
    /// 虚拟交换机名称
    #[serde(default)]
    pub switch_name: Option<String>,
    /// 静态 MAC 地址（None 表示动态分配）
    #[serde(default)]
    pub mac_address: Option<String>,
    /// VLAN ID（0 表示不打标签）
    #[serde(default)]
    pub vlan_id: u16,
    /// 传统网卡标记
    #[serde(default)]
    pub legacy: bool,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

impl NicDescriptor {
    /// 传统网卡不能挂载到二代虚拟机（硬性排除）
    pub fn attachable_to(&self, generation: Generation) -> bool {
        !(self.legacy && generation == Generation::Gen2)
    }

    pub fn is_tagged(&self) -> bool {
        self.vlan_id != 0
    }
}

// ============================================
// 内存 / 自动操作
// ============================================

/// 内存策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    pub startup_bytes: u64,
    #[serde(default)]
    pub minimum_bytes: u64,
    #[serde(default)]
    pub maximum_bytes: u64,
    #[serde(default)]
    pub dynamic: bool,
}

impl MemoryPolicy {
    pub fn fixed(startup_bytes: u64) -> Self {
        Self {
            startup_bytes,
            minimum_bytes: startup_bytes,
            maximum_bytes: startup_bytes,
            dynamic: false,
        }
    }
}

/// 宿主机启动时的自动操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartAction {
    Nothing,
    #[default]
    StartIfRunning,
    Start,
}

/// 宿主机关机时的自动操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopAction {
    TurnOff,
    #[default]
    Save,
    ShutDown,
}

impl StartAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartAction::Nothing => "Nothing",
            StartAction::StartIfRunning => "StartIfRunning",
            StartAction::Start => "Start",
        }
    }
}

impl StopAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopAction::TurnOff => "TurnOff",
            StopAction::Save => "Save",
            StopAction::ShutDown => "ShutDown",
        }
    }
}

/// 自动启动/停止策略
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutomaticActions {
    #[serde(default)]
    pub start_action: StartAction,
    #[serde(default)]
    pub stop_action: StopAction,
    /// 自动启动延迟（秒）
    #[serde(default)]
    pub start_delay_secs: u32,
}

// ============================================
// 虚拟机记录
// ============================================

/// 虚拟机完整记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub name: String,
    pub id: String,
    pub generation: Generation,
    pub state: PowerState,
    /// 所在宿主机
    #[serde(default)]
    pub host: String,
    pub processor_count: u32,
    pub memory: MemoryPolicy,
    #[serde(default)]
    pub disks: Vec<DiskDescriptor>,
    #[serde(default)]
    pub nics: Vec<NicDescriptor>,
    #[serde(default)]
    pub automatic_actions: AutomaticActions,
    #[serde(default)]
    pub notes: String,
    /// 检查点（快照）数量
    #[serde(default)]
    pub checkpoint_count: u32,
}

/// 启动盘选择结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootDisk {
    /// 在 `VmRecord::disks` 中的下标
    pub index: usize,
    /// 没有 IDE 挂载、回退到第一块磁盘时为 true
    pub ambiguous: bool,
}

impl VmRecord {
    /// 校验记录不变量：控制器地址在虚拟机内唯一
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for disk in &self.disks {
            if !seen.insert(disk.controller) {
                return Err(HypervisorError::InvalidRecord(format!(
                    "虚拟机 {} 的控制器地址重复: {}",
                    self.name, disk.controller
                )));
            }
        }
        Ok(())
    }

    /// 选择启动盘
    ///
    /// 规则：编号最小的 IDE 地址上的磁盘为启动盘；
    /// 没有 IDE 挂载时回退到枚举顺序中的第一块磁盘，并标记为不确定
    pub fn boot_disk(&self) -> Option<BootDisk> {
        let ide = self
            .disks
            .iter()
            .enumerate()
            .filter(|(_, d)| d.controller.controller_type.is_legacy())
            .min_by_key(|(_, d)| (d.controller.controller_number, d.controller.controller_location))
            .map(|(index, _)| BootDisk {
                index,
                ambiguous: false,
            });

        ide.or_else(|| {
            (!self.disks.is_empty()).then_some(BootDisk {
                index: 0,
                ambiguous: true,
            })
        })
    }

    /// 除启动盘外的磁盘，按原控制器地址升序
    pub fn data_disks(&self) -> Vec<&DiskDescriptor> {
        let boot = self.boot_disk().map(|b| b.index);
        let mut disks: Vec<&DiskDescriptor> = self
            .disks
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != boot)
            .map(|(_, d)| d)
            .collect();
        disks.sort_by_key(|d| d.controller);
        disks
    }

    pub fn has_checkpoints(&self) -> bool {
        self.checkpoint_count > 0
    }
}

// ============================================
// 集群 / 重建参数 / 运行状态
// ============================================

/// 故障转移集群角色绑定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMembership {
    /// 集群组（角色）名称
    pub group_name: String,
    #[serde(default)]
    pub owner_node: String,
    #[serde(default)]
    pub state: String,
}

/// 新建虚拟机参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVmSpec {
    pub name: String,
    pub generation: Generation,
    /// 直接使用的启动盘路径（不复制）
    pub boot_disk_path: PathBuf,
    pub switch_name: Option<String>,
    pub memory_startup_bytes: u64,
}

/// 安全启动设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecureBootSetting {
    On { template: String },
    Off,
}

/// 心跳状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatStatus {
    Healthy,
    NoContact,
    LostCommunication,
    Other(String),
}

impl HeartbeatStatus {
    /// 从集成服务的 PrimaryStatusDescription 解析
    pub fn from_description(description: &str) -> Self {
        match description.trim().to_ascii_lowercase().as_str() {
            "ok" => HeartbeatStatus::Healthy,
            "" | "no contact" => HeartbeatStatus::NoContact,
            "lost communication" => HeartbeatStatus::LostCommunication,
            _ => HeartbeatStatus::Other(description.trim().to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HeartbeatStatus::Healthy)
    }
}
