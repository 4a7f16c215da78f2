//! 资源提供者接口
//!
//! 编排器只依赖这里的两个 trait，生产环境由 `PowerShellProvider` 实现，
//! 测试中使用记录调用的内存实现。

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AutomaticActions, ClusterMembership, ControllerAddress, HeartbeatStatus, MemoryPolicy,
    NewVmSpec, SecureBootSetting, VmRecord,
};

/// 虚拟化管理接口
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// 枚举宿主机上的全部虚拟机
    async fn list_vms(&self) -> Result<Vec<VmRecord>>;

    /// 按名称查询虚拟机，不存在时返回 `None`
    async fn get_vm(&self, name: &str) -> Result<Option<VmRecord>>;

    /// 磁盘格式转换（VHD -> VHDX），源文件保留
    async fn convert_disk(&self, source: &Path, destination: &Path) -> Result<()>;

    /// 删除虚拟机定义，磁盘文件保留
    async fn remove_vm(&self, name: &str) -> Result<()>;

    /// 创建虚拟机，返回新的内部 ID
    async fn create_vm(&self, spec: &NewVmSpec) -> Result<String>;

    async fn set_processor_count(&self, name: &str, count: u32) -> Result<()>;

    async fn set_dynamic_memory(&self, name: &str, memory: &MemoryPolicy) -> Result<()>;

    async fn set_secure_boot(&self, name: &str, setting: &SecureBootSetting) -> Result<()>;

    /// 在指定控制器地址挂载磁盘
    async fn attach_disk(&self, name: &str, address: &ControllerAddress, path: &Path)
        -> Result<()>;

    /// 设置网卡 VLAN（access 模式）
    async fn set_nic_vlan(&self, name: &str, adapter: &str, vlan_id: u16) -> Result<()>;

    /// 设置网卡静态 MAC 地址
    async fn set_nic_mac(&self, name: &str, adapter: &str, mac: &str) -> Result<()>;

    /// 添加网卡
    async fn add_nic(&self, name: &str, adapter: &str, switch_name: Option<&str>) -> Result<()>;

    async fn set_automatic_actions(&self, name: &str, actions: &AutomaticActions) -> Result<()>;

    async fn set_notes(&self, name: &str, notes: &str) -> Result<()>;

    /// 启用虚拟 TPM
    async fn enable_tpm(&self, name: &str) -> Result<()>;

    async fn start_vm(&self, name: &str) -> Result<()>;

    /// 查询心跳集成服务状态
    async fn heartbeat(&self, name: &str) -> Result<HeartbeatStatus>;
}

/// 故障转移集群接口
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// 查询虚拟机所属集群角色，未加入集群时返回 `None`
    async fn cluster_role(&self, vm_name: &str) -> Result<Option<ClusterMembership>>;

    async fn remove_cluster_role(&self, group_name: &str) -> Result<()>;

    async fn add_cluster_role(&self, vm_name: &str) -> Result<()>;
}

