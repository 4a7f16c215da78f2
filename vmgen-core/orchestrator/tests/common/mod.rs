//! 测试用的资源提供者 / 集群 / 登记替身

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vmgen_hypervisor::{
    AutomaticActions, ClusterMembership, ClusterProvider, ControllerAddress, DiskDescriptor,
    DiskFormat, Generation, HeartbeatStatus, HypervisorError, MemoryPolicy, NewVmSpec,
    NicDescriptor, PowerState, ResourceProvider, SecureBootSetting, VmRecord,
};
use vmgen_orchestrator::{ConverterSettings, GenerationConverter, ManualClock, PollPolicy};
use vmgen_registry::{RegistryBinding, RegistryClient, RegistryError};

// ============================================
// 虚拟机记录构造
// ============================================

pub fn disk(dir: &Path, file: &str, controller: ControllerAddress) -> DiskDescriptor {
    let path = dir.join(file);
    std::fs::write(&path, format!("disk image {}", file)).unwrap();
    DiskDescriptor {
        controller,
        format: DiskFormat::from_path(&path).unwrap(),
        size_bytes: 40 * 1024 * 1024 * 1024,
        path,
    }
}

pub fn nic(name: &str, switch: &str, vlan_id: u16, mac: Option<&str>) -> NicDescriptor {
    NicDescriptor {
        name: name.to_string(),
        switch_name: Some(switch.to_string()),
        mac_address: mac.map(str::to_string),
        vlan_id,
        legacy: false,
        ip_addresses: vec![],
    }
}

pub fn legacy_nic(name: &str, switch: &str) -> NicDescriptor {
    NicDescriptor {
        legacy: true,
        ..nic(name, switch, 0, None)
    }
}

/// 一块 IDE 0:0 的 VHD 启动盘 + 一块 SCSI 数据盘，单网卡
pub fn gen1_vm(name: &str, dir: &Path) -> VmRecord {
    VmRecord {
        name: name.to_string(),
        id: format!("{}-old-id", name),
        generation: Generation::Gen1,
        state: PowerState::Off,
        host: "HV01".to_string(),
        processor_count: 4,
        memory: MemoryPolicy::fixed(4 * 1024 * 1024 * 1024),
        disks: vec![
            disk(dir, &format!("{}.vhd", name), ControllerAddress::ide(0, 0)),
            disk(dir, &format!("{}-data.vhdx", name), ControllerAddress::scsi(0, 0)),
        ],
        nics: vec![nic("Network Adapter", "vSwitch-Prod", 0, None)],
        automatic_actions: AutomaticActions::default(),
        notes: "web tier".to_string(),
        checkpoint_count: 0,
    }
}

// ============================================
// 资源提供者替身
// ============================================

/// 修改类调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub vm: String,
    pub detail: String,
}

#[derive(Default)]
struct ProviderState {
    vms: BTreeMap<String, VmRecord>,
    calls: Vec<Call>,
    reads: usize,
    failing: HashSet<(&'static str, String)>,
    heartbeat_after: HashMap<String, u32>,
    heartbeat_polls: HashMap<String, u32>,
}

/// 记录所有修改类调用的资源提供者
#[derive(Default)]
pub struct RecordingProvider {
    state: Mutex<ProviderState>,
}

impl RecordingProvider {
    pub fn new(vms: Vec<VmRecord>) -> Arc<Self> {
        let provider = Self::default();
        {
            let mut state = provider.state.lock().unwrap();
            for vm in vms {
                // 默认第一次心跳探测即正常
                state.heartbeat_after.insert(vm.name.clone(), 1);
                state.vms.insert(vm.name.clone(), vm);
            }
        }
        Arc::new(provider)
    }

    /// 指定操作对某台虚拟机失败
    pub fn fail(&self, op: &'static str, vm: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert((op, vm.to_string()));
    }

    /// 第 n 次探测时心跳正常；0 表示始终没有心跳
    pub fn heartbeat_after(&self, vm: &str, polls: u32) {
        self.state
            .lock()
            .unwrap()
            .heartbeat_after
            .insert(vm.to_string(), polls);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, vm: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.vm == vm).collect()
    }

    pub fn ops_for(&self, vm: &str) -> Vec<&'static str> {
        self.calls_for(vm).into_iter().map(|c| c.op).collect()
    }

    pub fn find_call(&self, vm: &str, op: &str) -> Option<Call> {
        self.calls_for(vm).into_iter().find(|c| c.op == op)
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn vm(&self, name: &str) -> Option<VmRecord> {
        self.state.lock().unwrap().vms.get(name).cloned()
    }

    /// 记录调用，配置为失败时返回错误
    fn record(&self, op: &'static str, vm: &str, detail: String) -> vmgen_hypervisor::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            op,
            vm: vm.to_string(),
            detail,
        });
        if state.failing.contains(&(op, vm.to_string())) {
            return Err(HypervisorError::command_failed(op, "injected failure"));
        }
        Ok(())
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut VmRecord)) {
        if let Some(vm) = self.state.lock().unwrap().vms.get_mut(name) {
            f(vm);
        }
    }
}

#[async_trait]
impl ResourceProvider for RecordingProvider {
    async fn list_vms(&self) -> vmgen_hypervisor::Result<Vec<VmRecord>> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        Ok(state.vms.values().cloned().collect())
    }

    async fn get_vm(&self, name: &str) -> vmgen_hypervisor::Result<Option<VmRecord>> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if state.failing.contains(&("get_vm", name.to_string())) {
            return Err(HypervisorError::command_failed("get_vm", "access denied"));
        }
        Ok(state.vms.get(name).cloned())
    }

    async fn convert_disk(&self, source: &Path, destination: &Path) -> vmgen_hypervisor::Result<()> {
        let vm = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(
            "convert_disk",
            &vm,
            format!("{} -> {}", source.display(), destination.display()),
        )?;
        std::fs::copy(source, destination)
            .map_err(|e| HypervisorError::command_failed("convert_disk", e.to_string()))?;
        Ok(())
    }

    async fn remove_vm(&self, name: &str) -> vmgen_hypervisor::Result<()> {
        self.record("remove_vm", name, String::new())?;
        self.state.lock().unwrap().vms.remove(name);
        Ok(())
    }

    async fn create_vm(&self, spec: &NewVmSpec) -> vmgen_hypervisor::Result<String> {
        self.record(
            "create_vm",
            &spec.name,
            format!(
                "gen{} boot={} switch={}",
                spec.generation,
                spec.boot_disk_path.display(),
                spec.switch_name.as_deref().unwrap_or("-")
            ),
        )?;

        let id = format!("{}-new-id", spec.name);
        let vm = VmRecord {
            name: spec.name.clone(),
            id: id.clone(),
            generation: spec.generation,
            state: PowerState::Off,
            host: "HV01".to_string(),
            processor_count: 1,
            memory: MemoryPolicy::fixed(spec.memory_startup_bytes),
            disks: vec![DiskDescriptor {
                controller: ControllerAddress::scsi(0, 0),
                path: spec.boot_disk_path.clone(),
                format: DiskFormat::Vhdx,
                size_bytes: 0,
            }],
            nics: vec![],
            automatic_actions: AutomaticActions::default(),
            notes: String::new(),
            checkpoint_count: 0,
        };
        self.state.lock().unwrap().vms.insert(spec.name.clone(), vm);
        Ok(id)
    }

    async fn set_processor_count(&self, name: &str, count: u32) -> vmgen_hypervisor::Result<()> {
        self.record("set_processor_count", name, count.to_string())?;
        self.update(name, |vm| vm.processor_count = count);
        Ok(())
    }

    async fn set_dynamic_memory(&self, name: &str, memory: &MemoryPolicy) -> vmgen_hypervisor::Result<()> {
        self.record(
            "set_dynamic_memory",
            name,
            format!("{}-{}", memory.minimum_bytes, memory.maximum_bytes),
        )?;
        let memory = memory.clone();
        self.update(name, move |vm| vm.memory = memory);
        Ok(())
    }

    async fn set_secure_boot(&self, name: &str, setting: &SecureBootSetting) -> vmgen_hypervisor::Result<()> {
        let op = match setting {
            SecureBootSetting::On { .. } => "secure_boot_on",
            SecureBootSetting::Off => "secure_boot_off",
        };
        self.record(op, name, format!("{:?}", setting))
    }

    async fn attach_disk(
        &self,
        name: &str,
        address: &ControllerAddress,
        path: &Path,
    ) -> vmgen_hypervisor::Result<()> {
        self.record("attach_disk", name, format!("{} {}", address, path.display()))?;
        let disk = DiskDescriptor {
            controller: *address,
            path: path.to_path_buf(),
            format: DiskFormat::Vhdx,
            size_bytes: 0,
        };
        self.update(name, move |vm| vm.disks.push(disk));
        Ok(())
    }

    async fn set_nic_vlan(&self, name: &str, adapter: &str, vlan_id: u16) -> vmgen_hypervisor::Result<()> {
        self.record("set_nic_vlan", name, format!("{} {}", adapter, vlan_id))
    }

    async fn set_nic_mac(&self, name: &str, adapter: &str, mac: &str) -> vmgen_hypervisor::Result<()> {
        self.record("set_nic_mac", name, format!("{} {}", adapter, mac))
    }

    async fn add_nic(&self, name: &str, adapter: &str, switch_name: Option<&str>) -> vmgen_hypervisor::Result<()> {
        self.record(
            "add_nic",
            name,
            format!("{} {}", adapter, switch_name.unwrap_or("-")),
        )
    }

    async fn set_automatic_actions(
        &self,
        name: &str,
        actions: &AutomaticActions,
    ) -> vmgen_hypervisor::Result<()> {
        self.record(
            "set_automatic_actions",
            name,
            format!("{} {}", actions.start_action.as_str(), actions.stop_action.as_str()),
        )
    }

    async fn set_notes(&self, name: &str, notes: &str) -> vmgen_hypervisor::Result<()> {
        self.record("set_notes", name, notes.to_string())?;
        let notes = notes.to_string();
        self.update(name, move |vm| vm.notes = notes);
        Ok(())
    }

    async fn enable_tpm(&self, name: &str) -> vmgen_hypervisor::Result<()> {
        self.record("enable_tpm", name, String::new())
    }

    async fn start_vm(&self, name: &str) -> vmgen_hypervisor::Result<()> {
        self.record("start_vm", name, String::new())?;
        self.update(name, |vm| vm.state = PowerState::Running);
        Ok(())
    }

    async fn heartbeat(&self, name: &str) -> vmgen_hypervisor::Result<HeartbeatStatus> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        let polls = {
            let counter = state.heartbeat_polls.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let healthy_at = state.heartbeat_after.get(name).copied().unwrap_or(1);
        if healthy_at != 0 && polls >= healthy_at {
            Ok(HeartbeatStatus::Healthy)
        } else {
            Ok(HeartbeatStatus::NoContact)
        }
    }
}

// ============================================
// 集群替身
// ============================================

#[derive(Default)]
pub struct FakeCluster {
    members: Mutex<HashMap<String, ClusterMembership>>,
    calls: Mutex<Vec<String>>,
    fail_add: Mutex<bool>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_member(self: Arc<Self>, vm: &str) -> Arc<Self> {
        self.members.lock().unwrap().insert(
            vm.to_string(),
            ClusterMembership {
                group_name: vm.to_string(),
                owner_node: "HV01".to_string(),
                state: "Offline".to_string(),
            },
        );
        self
    }

    pub fn fail_add(&self) {
        *self.fail_add.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterProvider for FakeCluster {
    async fn cluster_role(&self, vm_name: &str) -> vmgen_hypervisor::Result<Option<ClusterMembership>> {
        Ok(self.members.lock().unwrap().get(vm_name).cloned())
    }

    async fn remove_cluster_role(&self, group_name: &str) -> vmgen_hypervisor::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("remove {}", group_name));
        self.members.lock().unwrap().remove(group_name);
        Ok(())
    }

    async fn add_cluster_role(&self, vm_name: &str) -> vmgen_hypervisor::Result<()> {
        self.calls.lock().unwrap().push(format!("add {}", vm_name));
        if *self.fail_add.lock().unwrap() {
            return Err(HypervisorError::command_failed(
                "Add-ClusterVirtualMachineRole",
                "cluster service unavailable",
            ));
        }
        Ok(())
    }
}

// ============================================
// 登记替身
// ============================================

#[derive(Default)]
struct RegistryState {
    bindings: HashMap<String, RegistryBinding>,
    deleted: HashSet<String>,
    polls_since_delete: HashMap<String, u32>,
    deletes: Vec<String>,
    tagged: Vec<(String, BTreeMap<String, String>)>,
}

/// 删除旧登记后，第 n 次查询时出现新登记；`None` 表示始终不出现
pub struct FakeRegistry {
    state: Mutex<RegistryState>,
    reregister_after: Option<u32>,
}

impl FakeRegistry {
    pub fn new(reregister_after: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            reregister_after,
        })
    }

    pub fn with_binding(self: Arc<Self>, vm: &str, tags: &[(&str, &str)]) -> Arc<Self> {
        let tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let binding = RegistryBinding::new(format!("/machines/{}-old", vm), vm).with_tags(tags);
        self.state
            .lock()
            .unwrap()
            .bindings
            .insert(vm.to_string(), binding);
        self
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn tagged(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.state.lock().unwrap().tagged.clone()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn find_binding(&self, name: &str) -> vmgen_registry::Result<Option<RegistryBinding>> {
        let mut state = self.state.lock().unwrap();
        if !state.deleted.contains(name) {
            return Ok(state.bindings.get(name).cloned());
        }

        let polls = {
            let counter = state.polls_since_delete.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        match self.reregister_after {
            Some(n) if polls >= n => Ok(Some(RegistryBinding::new(
                format!("/machines/{}-new", name),
                name,
            ))),
            _ => Ok(None),
        }
    }

    async fn delete_binding(&self, resource_id: &str) -> vmgen_registry::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(resource_id.to_string());
        let name = state
            .bindings
            .iter()
            .find(|(_, b)| b.resource_id == resource_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| RegistryError::NotFound(resource_id.to_string()))?;
        state.bindings.remove(&name);
        state.deleted.insert(name);
        Ok(())
    }

    async fn apply_tags(
        &self,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> vmgen_registry::Result<()> {
        self.state
            .lock()
            .unwrap()
            .tagged
            .push((resource_id.to_string(), tags.clone()));
        Ok(())
    }

    fn manual_registration_hint(&self, name: &str) -> String {
        format!("azcmagent connect --resource-name {}", name)
    }
}

// ============================================
// 组装
// ============================================

pub struct Harness {
    pub provider: Arc<RecordingProvider>,
    pub cluster: Arc<FakeCluster>,
    pub registry: Arc<FakeRegistry>,
    pub clock: Arc<ManualClock>,
    pub work: tempfile::TempDir,
}

impl Harness {
    pub fn new(provider: Arc<RecordingProvider>, work: tempfile::TempDir) -> Self {
        Self {
            provider,
            cluster: FakeCluster::new(),
            registry: FakeRegistry::new(Some(1)),
            clock: Arc::new(ManualClock::new()),
            work,
        }
    }

    pub fn working_dir(&self) -> PathBuf {
        self.work.path().join("work")
    }

    pub fn backup_root(&self) -> PathBuf {
        self.work.path().join("backups")
    }

    pub fn settings(&self) -> ConverterSettings {
        ConverterSettings {
            heartbeat: PollPolicy::heartbeat(),
            registry: PollPolicy::registry(),
            secure_boot_template: "MicrosoftWindows".to_string(),
            backup_root: self.backup_root(),
        }
    }

    pub fn converter(&self) -> GenerationConverter {
        GenerationConverter::new(
            self.provider.clone(),
            self.cluster.clone(),
            self.clock.clone(),
            self.settings(),
        )
        .with_registry(self.registry.clone())
    }

    /// 每台虚拟机之间的间隔，取一个与轮询间隔不同的值便于区分
    pub fn pause() -> Duration {
        Duration::from_secs(15)
    }
}
