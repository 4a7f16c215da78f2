//! VmGen 虚拟化管理层
//!
//! 提供虚拟机数据模型和 Hyper-V 资源提供者实现。
//!
//! # 功能
//!
//! - **数据模型** (`models`): 虚拟机、磁盘、网卡、集群角色等记录
//! - **资源提供者接口** (`ResourceProvider`): 创建/删除虚拟机、挂载磁盘/网卡、固件设置、状态查询
//! - **集群接口** (`ClusterProvider`): 加入/移除故障转移集群角色
//! - **PowerShell 实现** (`PowerShellProvider`): 通过 Hyper-V / FailoverClusters cmdlet 实现上述接口
//!
//! # 示例
//!
//! ```ignore
//! use vmgen_hypervisor::{PowerShellProvider, ResourceProvider};
//!
//! let provider = PowerShellProvider::local("powershell.exe");
//!
//! // 查询虚拟机
//! if let Some(vm) = provider.get_vm("Web01").await? {
//!     let boot = vm.boot_disk();
//!     println!("{} 代际 {}, 启动盘 {:?}", vm.name, vm.generation, boot);
//! }
//! ```

pub mod error;
pub mod models;
pub mod powershell;
pub mod provider;

pub use error::{HypervisorError, Result};
pub use powershell::{PowerShellProvider, DEFAULT_POWERSHELL};
pub use provider::{ClusterProvider, ResourceProvider};

// 导出数据模型
pub use models::{
    // 代际与状态
    Generation, PowerState, HeartbeatStatus,

    // 磁盘
    ControllerType, ControllerAddress, DiskFormat, DiskDescriptor, BootDisk,

    // 网卡
    NicDescriptor, PRIMARY_ADAPTER_NAME,

    // 虚拟机
    VmRecord, MemoryPolicy, AutomaticActions, StartAction, StopAction,

    // 重建与集群
    NewVmSpec, SecureBootSetting, ClusterMembership,
};
