//! PowerShell `ConvertTo-Json` 输出解析

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{HypervisorError, Result};
use crate::models::{
    AutomaticActions, ClusterMembership, ControllerAddress, ControllerType, DiskDescriptor,
    DiskFormat, Generation, MemoryPolicy, NicDescriptor, PowerState, StartAction, StopAction,
    VmRecord,
};

/// ConvertTo-Json 对单元素集合会输出对象而非数组
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
        }
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<OneOrMany<T>> = Option::deserialize(deserializer)?;
    Ok(value.map(OneOrMany::into_vec).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDisk {
    controller_type: String,
    controller_number: u32,
    controller_location: u32,
    path: String,
    #[serde(default)]
    vhd_format: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNic {
    name: String,
    #[serde(default)]
    switch_name: Option<String>,
    #[serde(default)]
    mac_address: Option<String>,
    #[serde(default)]
    dynamic_mac_address_enabled: bool,
    #[serde(default)]
    vlan_id: u16,
    #[serde(default)]
    is_legacy: bool,
    #[serde(rename = "IPAddresses", default, deserialize_with = "one_or_many")]
    ip_addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVm {
    name: String,
    id: String,
    generation: u8,
    state: String,
    #[serde(default)]
    computer_name: String,
    processor_count: u32,
    memory_startup: u64,
    #[serde(default)]
    memory_minimum: u64,
    #[serde(default)]
    memory_maximum: u64,
    #[serde(default)]
    dynamic_memory_enabled: bool,
    #[serde(default)]
    automatic_start_action: Option<String>,
    #[serde(default)]
    automatic_stop_action: Option<String>,
    #[serde(default)]
    automatic_start_delay: u32,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    checkpoint_count: u32,
    #[serde(default, deserialize_with = "one_or_many")]
    disks: Vec<RawDisk>,
    #[serde(default, deserialize_with = "one_or_many")]
    nics: Vec<RawNic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawClusterGroup {
    name: String,
    #[serde(default)]
    owner_node: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// 输出为空或 `null` 表示对象不存在
fn is_empty_output(output: &str) -> bool {
    let trimmed = output.trim();
    trimmed.is_empty() || trimmed == "null"
}

fn parse_json<T: DeserializeOwned>(output: &str, what: &str) -> Result<T> {
    serde_json::from_str(output.trim())
        .map_err(|e| HypervisorError::ParseError(format!("{} JSON 解析失败: {}", what, e)))
}

/// 解析虚拟机列表
pub fn parse_vm_list(output: &str) -> Result<Vec<VmRecord>> {
    if is_empty_output(output) {
        return Ok(Vec::new());
    }
    let raw: OneOrMany<RawVm> = parse_json(output, "虚拟机列表")?;
    let vms = raw
        .into_vec()
        .into_iter()
        .map(convert_vm)
        .collect::<Result<Vec<_>>>()?;
    debug!("解析到 {} 台虚拟机", vms.len());
    Ok(vms)
}

/// 解析单台虚拟机
pub fn parse_vm(output: &str) -> Result<Option<VmRecord>> {
    if is_empty_output(output) {
        return Ok(None);
    }
    let raw: RawVm = parse_json(output, "虚拟机")?;
    convert_vm(raw).map(Some)
}

/// 解析集群组
pub fn parse_cluster_group(output: &str) -> Result<Option<ClusterMembership>> {
    if is_empty_output(output) {
        return Ok(None);
    }
    let raw: OneOrMany<RawClusterGroup> = parse_json(output, "集群组")?;
    Ok(raw.into_vec().into_iter().next().map(|g| ClusterMembership {
        group_name: g.name,
        owner_node: g.owner_node.unwrap_or_default(),
        state: g.state.unwrap_or_default(),
    }))
}

/// MAC 地址规范化为 12 位大写十六进制（Hyper-V 的 StaticMacAddress 格式）
///
/// 全零地址表示尚未分配，返回 `None`
pub fn normalize_mac(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect::<String>()
        .to_ascii_uppercase();

    let re = Regex::new(r"^[0-9A-F]{12}$").ok()?;
    if !re.is_match(&cleaned) || cleaned.chars().all(|c| c == '0') {
        return None;
    }
    Some(cleaned)
}

fn parse_controller_type(value: &str) -> Result<ControllerType> {
    match value.to_ascii_uppercase().as_str() {
        "IDE" => Ok(ControllerType::Ide),
        "SCSI" => Ok(ControllerType::Scsi),
        other => Err(HypervisorError::ParseError(format!(
            "未知的控制器类型: {}",
            other
        ))),
    }
}

fn parse_disk_format(vhd_format: Option<&str>, path: &Path) -> Result<DiskFormat> {
    let reported = vhd_format.and_then(|f| match f.to_ascii_uppercase().as_str() {
        "VHD" => Some(DiskFormat::Vhd),
        "VHDX" => Some(DiskFormat::Vhdx),
        _ => None,
    });

    reported
        .or_else(|| DiskFormat::from_path(path))
        .ok_or_else(|| {
            HypervisorError::ParseError(format!("无法识别磁盘格式: {}", path.display()))
        })
}

fn parse_start_action(value: Option<&str>) -> StartAction {
    match value {
        Some("Nothing") => StartAction::Nothing,
        Some("Start") => StartAction::Start,
        _ => StartAction::StartIfRunning,
    }
}

fn parse_stop_action(value: Option<&str>) -> StopAction {
    match value {
        Some("TurnOff") => StopAction::TurnOff,
        Some("ShutDown") => StopAction::ShutDown,
        _ => StopAction::Save,
    }
}

fn convert_vm(raw: RawVm) -> Result<VmRecord> {
    let generation = Generation::try_from(raw.generation).map_err(HypervisorError::ParseError)?;

    let disks = raw
        .disks
        .into_iter()
        .map(|d| {
            let path = PathBuf::from(&d.path);
            Ok(DiskDescriptor {
                controller: ControllerAddress::new(
                    parse_controller_type(&d.controller_type)?,
                    d.controller_number,
                    d.controller_location,
                ),
                format: parse_disk_format(d.vhd_format.as_deref(), &path)?,
                path,
                size_bytes: d.size,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let nics = raw
        .nics
        .into_iter()
        .map(|n| NicDescriptor {
            name: n.name,
            switch_name: n.switch_name.filter(|s| !s.is_empty()),
            mac_address: if n.dynamic_mac_address_enabled {
                None
            } else {
                n.mac_address.as_deref().and_then(normalize_mac)
            },
            vlan_id: n.vlan_id,
            legacy: n.is_legacy,
            ip_addresses: n.ip_addresses,
        })
        .collect();

    let record = VmRecord {
        name: raw.name,
        id: raw.id,
        generation,
        state: PowerState::from(raw.state),
        host: raw.computer_name,
        processor_count: raw.processor_count,
        memory: MemoryPolicy {
            startup_bytes: raw.memory_startup,
            minimum_bytes: raw.memory_minimum,
            maximum_bytes: raw.memory_maximum,
            dynamic: raw.dynamic_memory_enabled,
        },
        disks,
        nics,
        automatic_actions: AutomaticActions {
            start_action: parse_start_action(raw.automatic_start_action.as_deref()),
            stop_action: parse_stop_action(raw.automatic_stop_action.as_deref()),
            start_delay_secs: raw.automatic_start_delay,
        },
        notes: raw.notes.unwrap_or_default(),
        checkpoint_count: raw.checkpoint_count,
    };

    record.validate()?;
    Ok(record)
}
