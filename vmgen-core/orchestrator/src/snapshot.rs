//! 配置快照（清单 + 单台虚拟机配置文件）
//!
//! 目录结构:
//!
//! ```text
//! <working_dir>/
//!   inventory_20260301_083000/
//!     inventory.json          每台虚拟机一行
//!     vms/Web01.json          虚拟机属性 / 磁盘列表 / 网卡列表
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use vmgen_hypervisor::{
    AutomaticActions, DiskDescriptor, Generation, MemoryPolicy, NicDescriptor, PowerState,
    ResourceProvider, VmRecord,
};
use vmgen_storage::{read_json, write_json};

use crate::{OrchestratorError, Result};

const SNAPSHOT_PREFIX: &str = "inventory_";
const INVENTORY_FILE: &str = "inventory.json";
const VMS_DIR: &str = "vms";

// ============================================
// 文件格式
// ============================================

/// 清单行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub name: String,
    pub id: String,
    pub generation: Generation,
    pub state: PowerState,
    pub host: String,
    pub memory_startup_bytes: u64,
    pub processor_count: u32,
    pub dynamic_memory: bool,
    /// 磁盘路径，以 `; ` 连接
    pub disk_paths: String,
    /// 网卡交换机名称，以 `; ` 连接
    pub nic_switches: String,
    pub has_checkpoints: bool,
}

impl InventoryRow {
    pub fn from_record(vm: &VmRecord) -> Self {
        Self {
            name: vm.name.clone(),
            id: vm.id.clone(),
            generation: vm.generation,
            state: vm.state.clone(),
            host: vm.host.clone(),
            memory_startup_bytes: vm.memory.startup_bytes,
            processor_count: vm.processor_count,
            dynamic_memory: vm.memory.dynamic,
            disk_paths: vm
                .disks
                .iter()
                .map(|d| d.path.display().to_string())
                .collect::<Vec<_>>()
                .join("; "),
            nic_switches: vm
                .nics
                .iter()
                .filter_map(|n| n.switch_name.clone())
                .collect::<Vec<_>>()
                .join("; "),
            has_checkpoints: vm.has_checkpoints(),
        }
    }
}

/// 单台虚拟机配置文件中的虚拟机属性组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmAttributes {
    pub name: String,
    pub id: String,
    pub generation: Generation,
    pub host: String,
    pub state: PowerState,
    pub processor_count: u32,
    pub memory: MemoryPolicy,
    #[serde(default)]
    pub automatic_actions: AutomaticActions,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub checkpoint_count: u32,
}

/// 单台虚拟机配置文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub vm: VmAttributes,
    #[serde(default)]
    pub disks: Vec<DiskDescriptor>,
    #[serde(default)]
    pub nics: Vec<NicDescriptor>,
}

impl VmSnapshot {
    pub fn from_record(vm: &VmRecord) -> Self {
        Self {
            vm: VmAttributes {
                name: vm.name.clone(),
                id: vm.id.clone(),
                generation: vm.generation,
                host: vm.host.clone(),
                state: vm.state.clone(),
                processor_count: vm.processor_count,
                memory: vm.memory.clone(),
                automatic_actions: vm.automatic_actions.clone(),
                notes: vm.notes.clone(),
                checkpoint_count: vm.checkpoint_count,
            },
            disks: vm.disks.clone(),
            nics: vm.nics.clone(),
        }
    }

    pub fn into_record(self) -> VmRecord {
        VmRecord {
            name: self.vm.name,
            id: self.vm.id,
            generation: self.vm.generation,
            state: self.vm.state,
            host: self.vm.host,
            processor_count: self.vm.processor_count,
            memory: self.vm.memory,
            disks: self.disks,
            nics: self.nics,
            automatic_actions: self.vm.automatic_actions,
            notes: self.vm.notes,
            checkpoint_count: self.vm.checkpoint_count,
        }
    }

    /// 与实时配置的差异描述
    pub fn drift(&self, live: &VmRecord) -> Vec<String> {
        let mut changes = Vec::new();

        if self.vm.processor_count != live.processor_count {
            changes.push(format!(
                "处理器数量 {} -> {}",
                self.vm.processor_count, live.processor_count
            ));
        }
        if self.vm.memory.startup_bytes != live.memory.startup_bytes {
            changes.push(format!(
                "启动内存 {} -> {} 字节",
                self.vm.memory.startup_bytes, live.memory.startup_bytes
            ));
        }
        if self.vm.memory.dynamic != live.memory.dynamic {
            changes.push(format!(
                "动态内存 {} -> {}",
                self.vm.memory.dynamic, live.memory.dynamic
            ));
        }

        let snap_disks: BTreeSet<_> = self.disks.iter().map(|d| &d.path).collect();
        let live_disks: BTreeSet<_> = live.disks.iter().map(|d| &d.path).collect();
        if snap_disks != live_disks {
            changes.push(format!(
                "磁盘 {} 块 -> {} 块（路径不一致）",
                self.disks.len(),
                live.disks.len()
            ));
        }

        if self.nics.len() != live.nics.len() {
            changes.push(format!("网卡 {} 块 -> {} 块", self.nics.len(), live.nics.len()));
        } else {
            for (snap, now) in self.nics.iter().zip(&live.nics) {
                if snap.vlan_id != now.vlan_id {
                    changes.push(format!(
                        "网卡 {} VLAN {} -> {}",
                        now.name, snap.vlan_id, now.vlan_id
                    ));
                }
                if snap.mac_address != now.mac_address {
                    changes.push(format!("网卡 {} MAC 地址已变化", now.name));
                }
            }
        }

        changes
    }
}

// ============================================
// 快照目录
// ============================================

/// 一份已加载的清单
#[derive(Debug, Clone)]
pub struct Inventory {
    pub directory: PathBuf,
    pub rows: Vec<InventoryRow>,
}

impl Inventory {
    pub fn vm_file(&self, name: &str) -> PathBuf {
        vm_file_path(&self.directory, name)
    }

    pub fn find(&self, name: &str) -> Option<&InventoryRow> {
        self.rows.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// 读取单台虚拟机配置文件
    pub async fn load_vm(&self, name: &str) -> Result<VmSnapshot> {
        Ok(read_json(&self.vm_file(name)).await?)
    }

    /// 配置文件是否存在
    pub async fn has_vm_file(&self, name: &str) -> bool {
        fs::try_exists(self.vm_file(name)).await.unwrap_or(false)
    }
}

fn vm_file_path(directory: &Path, name: &str) -> PathBuf {
    directory.join(VMS_DIR).join(format!("{}.json", name))
}

/// 工作目录下的配置快照
pub struct SnapshotStore {
    working_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// 最近一次快照目录
    pub async fn latest_dir(&self) -> Result<Option<PathBuf>> {
        if !fs::try_exists(&self.working_dir).await.unwrap_or(false) {
            return Ok(None);
        }

        let mut entries = fs::read_dir(&self.working_dir).await?;
        let mut latest: Option<(String, PathBuf)> = None;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(SNAPSHOT_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            // 时间戳格式固定，按名称排序即按时间排序
            if latest.as_ref().map_or(true, |(n, _)| name > *n) {
                latest = Some((name, entry.path()));
            }
        }

        Ok(latest.map(|(_, path)| path))
    }

    /// 加载最近一次快照
    pub async fn load_latest(&self) -> Result<Inventory> {
        let directory = self
            .latest_dir()
            .await?
            .ok_or_else(|| OrchestratorError::SnapshotNotFound(self.working_dir.clone()))?;

        self.load(&directory).await
    }

    /// 加载指定快照目录
    pub async fn load(&self, directory: &Path) -> Result<Inventory> {
        let rows: Vec<InventoryRow> = read_json(&directory.join(INVENTORY_FILE)).await?;
        debug!("快照 {} 包含 {} 台虚拟机", directory.display(), rows.len());

        Ok(Inventory {
            directory: directory.to_path_buf(),
            rows,
        })
    }

    /// 从资源提供者导出新快照
    pub async fn export(&self, provider: &dyn ResourceProvider) -> Result<Inventory> {
        let vms = provider.list_vms().await?;
        self.write(&vms).await
    }

    /// 将虚拟机记录写成新快照
    pub async fn write(&self, vms: &[VmRecord]) -> Result<Inventory> {
        let directory = self.working_dir.join(format!(
            "{}{}",
            SNAPSHOT_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S")
        ));

        let rows: Vec<InventoryRow> = vms.iter().map(InventoryRow::from_record).collect();
        write_json(&directory.join(INVENTORY_FILE), &rows).await?;

        for vm in vms {
            write_json(&vm_file_path(&directory, &vm.name), &VmSnapshot::from_record(vm)).await?;
        }

        info!(
            "已导出 {} 台虚拟机的配置快照: {}",
            vms.len(),
            directory.display()
        );

        Ok(Inventory { directory, rows })
    }
}
