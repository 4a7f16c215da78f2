//! 单台虚拟机代际转换
//!
//! 状态机: 校验 → 采集 → 备份 → 拆除 → 重建 → 配置 → 重新加入集群 → 启动 → 登记对账 → 完成
//!
//! - 校验失败: `VALIDATION FAILED`，没有任何修改
//! - 备份/格式转换失败: `BACKUP FAILED`，源虚拟机未受影响
//! - 删除源虚拟机之后不再回滚，后续步骤失败只记录诊断并继续；
//!   创建新虚拟机失败是唯一的致命错误，需要依靠备份和采集文件手动恢复

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use vmgen_hypervisor::{
    ClusterMembership, ClusterProvider, ControllerAddress, DiskDescriptor, DiskFormat, Generation,
    NewVmSpec, NicDescriptor, ResourceProvider, SecureBootSetting, VmRecord,
    PRIMARY_ADAPTER_NAME,
};
use vmgen_registry::{RegistryBinding, RegistryClient, RegistryError};
use vmgen_storage::{write_json, DiskBackupManager};

use crate::job::ConversionJob;
use crate::poll::{poll_until, Clock, PollPolicy};
use crate::preflight::check_live;
use crate::report::{ConversionResult, ConversionStatus};
use crate::snapshot::SnapshotStore;
use crate::state::ConversionStage;

/// 二代虚拟机单个 SCSI 控制器可用的最大位置编号
const MAX_SCSI_LOCATION: u32 = 63;

/// 转换器参数
#[derive(Debug, Clone)]
pub struct ConverterSettings {
    pub heartbeat: PollPolicy,
    pub registry: PollPolicy,
    /// 安全启动模板
    pub secure_boot_template: String,
    /// 磁盘备份根目录
    pub backup_root: PathBuf,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            heartbeat: PollPolicy::heartbeat(),
            registry: PollPolicy::registry(),
            secure_boot_template: "MicrosoftWindows".to_string(),
            backup_root: PathBuf::from("backups"),
        }
    }
}

/// 删除源虚拟机前写出的采集文件，用于手动恢复
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedConfiguration {
    pub captured_at: DateTime<Utc>,
    /// 原一代虚拟机的实时配置
    pub original: VmRecord,
    /// 格式升级后的磁盘（与 `original.disks` 顺序一致）
    pub disks: Vec<DiskDescriptor>,
    pub boot_disk_index: usize,
    pub cluster: Option<ClusterMembership>,
    pub registry: Option<RegistryBinding>,
    pub backup_dir: Option<PathBuf>,
}

/// 任务级失败
struct JobFailure {
    status: ConversionStatus,
    message: String,
    guidance: Option<String>,
}

impl JobFailure {
    fn validation(message: impl Into<String>) -> Self {
        Self {
            status: ConversionStatus::ValidationFailed,
            message: message.into(),
            guidance: None,
        }
    }

    fn backup(message: impl Into<String>) -> Self {
        Self {
            status: ConversionStatus::BackupFailed,
            message: message.into(),
            guidance: Some("源虚拟机未做任何修改，处理后可重新执行".to_string()),
        }
    }

    fn fatal(message: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self {
            status: ConversionStatus::Failed,
            message: message.into(),
            guidance: Some(guidance.into()),
        }
    }
}

/// 采集阶段的产物
struct Capture {
    boot_disk_index: usize,
    binding: Option<RegistryBinding>,
}

/// 格式升级后的目标路径
fn target_path(disk: &DiskDescriptor) -> PathBuf {
    if disk.format.is_legacy() {
        disk.upgraded_path()
    } else {
        disk.path.clone()
    }
}

/// 在原备注后追加转换时间
fn append_conversion_note(notes: &str, at: DateTime<Utc>) -> String {
    let line = format!(
        "[vmgen] Converted from generation 1 to generation 2 at {}",
        at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if notes.trim().is_empty() {
        line
    } else {
        format!("{}\n{}", notes.trim_end(), line)
    }
}

/// 代际转换器
pub struct GenerationConverter {
    provider: Arc<dyn ResourceProvider>,
    cluster: Arc<dyn ClusterProvider>,
    registry: Option<Arc<dyn RegistryClient>>,
    backups: DiskBackupManager,
    clock: Arc<dyn Clock>,
    settings: ConverterSettings,
}

impl GenerationConverter {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        cluster: Arc<dyn ClusterProvider>,
        clock: Arc<dyn Clock>,
        settings: ConverterSettings,
    ) -> Self {
        Self {
            provider,
            cluster,
            registry: None,
            backups: DiskBackupManager::new(settings.backup_root.clone()),
            clock,
            settings,
        }
    }

    /// 设置登记客户端
    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn provider(&self) -> &Arc<dyn ResourceProvider> {
        &self.provider
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &ConverterSettings {
        &self.settings
    }

    /// 执行单台虚拟机转换
    ///
    /// 任务级失败不会以 `Err` 返回，统一体现在结果状态和诊断中
    pub async fn convert(&self, job: &ConversionJob) -> ConversionResult {
        info!("开始转换虚拟机: {}", job.vm_name);

        let start = self.clock.now();
        let mut result = ConversionResult::new(&job.vm_name);
        let outcome = self.run(job, &mut result).await;
        let duration_ms = self.clock.now().saturating_duration_since(start).as_millis() as u64;

        match outcome {
            Ok(()) => {
                let errors: Vec<String> = result.errors().map(|d| d.message.clone()).collect();
                if errors.is_empty() {
                    result.finish(ConversionStatus::Success, None, duration_ms);
                } else {
                    result.finish(ConversionStatus::Failed, Some(errors.join("; ")), duration_ms);
                }
            }
            Err(failure) => {
                let stage = result.stage;
                result.error(stage, failure.message.clone(), failure.guidance);
                result.finish(failure.status, Some(failure.message), duration_ms);
            }
        }

        info!(
            "虚拟机 {} 转换结束: {} (阶段 {}, {} 条警告, 耗时 {} ms)",
            result.vm_name,
            result.status,
            result.stage,
            result.warnings().count(),
            result.duration_ms
        );

        result
    }

    async fn run(
        &self,
        job: &ConversionJob,
        result: &mut ConversionResult,
    ) -> Result<(), JobFailure> {
        let (vm, cluster) = self.validate(job).await?;
        result.reach(ConversionStage::Validated);

        let capture = self.capture(job, &vm, result).await;
        result.reach(ConversionStage::Captured);

        let backup_dir = self.backup(job, &vm, result).await?;
        let disks = self.upgrade_disks(&vm, result).await?;

        let captured = CapturedConfiguration {
            captured_at: Utc::now(),
            original: vm.clone(),
            disks,
            boot_disk_index: capture.boot_disk_index,
            cluster: cluster.clone(),
            registry: capture.binding.clone(),
            backup_dir,
        };
        let recovery_file = self.write_capture(job, &captured).await?;
        result.recovery_file = Some(recovery_file.clone());
        result.reach(ConversionStage::BackedUp);

        let registry_deleted = self
            .teardown(job, &vm, cluster.as_ref(), capture.binding.as_ref(), result)
            .await?;
        result.reach(ConversionStage::SourceRemoved);

        let new_id = self.rebuild(&captured, &recovery_file).await?;
        result.info(
            ConversionStage::TargetCreated,
            format!("已创建二代虚拟机 {} (ID {})", vm.name, new_id),
        );
        result.new_vm_id = Some(new_id);
        result.reach(ConversionStage::TargetCreated);

        self.configure(&vm, result).await;
        result.reach(ConversionStage::TargetConfigured);

        if let Some(membership) = &cluster {
            self.rejoin_cluster(&vm.name, membership, result).await;
        }
        result.reach(ConversionStage::ClusterRejoined);

        self.start(&vm.name, result).await?;
        result.reach(ConversionStage::Started);

        if self
            .reconcile_registry(job, capture.binding.as_ref(), registry_deleted, result)
            .await
        {
            result.reach(ConversionStage::RegistryReconciled);
        }

        result.reach(ConversionStage::Completed);
        Ok(())
    }

    // ============================================
    // 校验 / 采集
    // ============================================

    /// 前置条件校验，只做查询
    async fn validate(
        &self,
        job: &ConversionJob,
    ) -> Result<(VmRecord, Option<ClusterMembership>), JobFailure> {
        if !job.backup && !job.accept_no_backup {
            return Err(JobFailure::validation(
                "已关闭磁盘备份但未确认无备份执行，转换失败时将没有任何恢复副本",
            ));
        }

        let vm = self
            .provider
            .get_vm(&job.vm_name)
            .await
            .map_err(|e| JobFailure::validation(format!("无法查询虚拟机: {}", e)))?;

        check_live(vm.as_ref())
            .map_err(|reason| JobFailure::validation(format!("前置条件不满足: {}", reason)))?;

        let vm = vm.ok_or_else(|| JobFailure::validation("VM not found"))?;

        vm.validate()
            .map_err(|e| JobFailure::validation(e.to_string()))?;

        if vm.disks.is_empty() {
            return Err(JobFailure::validation("虚拟机没有任何磁盘"));
        }

        let cluster = self
            .cluster
            .cluster_role(&vm.name)
            .await
            .map_err(|e| JobFailure::validation(format!("无法查询集群角色: {}", e)))?;

        debug!(
            "校验通过: {} ({} 块磁盘, {} 块网卡, 集群: {})",
            vm.name,
            vm.disks.len(),
            vm.nics.len(),
            cluster.is_some()
        );

        Ok((vm, cluster))
    }

    /// 采集实时配置中需要额外确认的部分
    async fn capture(
        &self,
        job: &ConversionJob,
        vm: &VmRecord,
        result: &mut ConversionResult,
    ) -> Capture {
        let stage = ConversionStage::Captured;

        // validate 已保证至少有一块磁盘
        let boot = vm.boot_disk().unwrap_or(vmgen_hypervisor::BootDisk {
            index: 0,
            ambiguous: true,
        });
        let boot_disk = &vm.disks[boot.index];

        if boot.ambiguous {
            result.warn(
                stage,
                format!(
                    "没有 IDE 控制器上的磁盘，使用第一块磁盘 {} 作为启动盘",
                    boot_disk.path.display()
                ),
                Some("确认该磁盘包含来宾系统引导程序".to_string()),
            );
        } else {
            result.info(
                stage,
                format!("启动盘: {} ({})", boot_disk.path.display(), boot_disk.controller),
            );
        }

        self.check_drift(job, vm, result).await;

        let binding = self.capture_binding(job, &vm.name, result).await;

        Capture {
            boot_disk_index: boot.index,
            binding,
        }
    }

    /// 与配置快照比较，差异只提示不阻断
    async fn check_drift(&self, job: &ConversionJob, vm: &VmRecord, result: &mut ConversionResult) {
        let store = SnapshotStore::new(&job.working_dir);
        let snapshot = match store.load_latest().await {
            Ok(inventory) => inventory.load_vm(&vm.name).await,
            Err(e) => Err(e),
        };

        match snapshot {
            Ok(snapshot) => {
                let drift = snapshot.drift(vm);
                if !drift.is_empty() {
                    result.warn(
                        ConversionStage::Captured,
                        format!("实时配置与快照不一致: {}", drift.join("; ")),
                        Some("以实时配置为准，如需快照中的配置请在转换后手动调整".to_string()),
                    );
                }
            }
            Err(e) => debug!("没有可比较的配置快照: {}", e),
        }
    }

    async fn capture_binding(
        &self,
        job: &ConversionJob,
        name: &str,
        result: &mut ConversionResult,
    ) -> Option<RegistryBinding> {
        let stage = ConversionStage::Captured;

        if job.skip_registry {
            return None;
        }
        let registry = self.registry.as_ref()?;

        match registry.find_binding(name).await {
            Ok(Some(binding)) => {
                result.info(
                    stage,
                    format!(
                        "已采集登记绑定 {} ({} 个标签)",
                        binding.resource_id,
                        binding.tags.len()
                    ),
                );
                Some(binding)
            }
            Ok(None) => {
                result.warn(stage, format!("虚拟机 {} 没有登记绑定", name), None);
                None
            }
            Err(e) => {
                result.warn(
                    stage,
                    format!("查询登记绑定失败: {}", e),
                    Some("转换后请手动核对登记状态".to_string()),
                );
                None
            }
        }
    }

    // ============================================
    // 备份 / 格式升级
    // ============================================

    async fn backup(
        &self,
        job: &ConversionJob,
        vm: &VmRecord,
        result: &mut ConversionResult,
    ) -> Result<Option<PathBuf>, JobFailure> {
        let stage = ConversionStage::BackedUp;

        if !job.backup {
            result.warn(
                stage,
                "磁盘备份已关闭，转换失败时没有恢复副本",
                None,
            );
            return Ok(None);
        }

        let sources: Vec<PathBuf> = vm.disks.iter().map(|d| d.path.clone()).collect();
        let backup = self
            .backups
            .backup_disks(&vm.name, &sources)
            .await
            .map_err(|e| JobFailure::backup(format!("磁盘备份失败: {}", e)))?;

        // 备份存在是进入不可逆步骤的前提
        self.backups
            .verify(&backup)
            .await
            .map_err(|e| JobFailure::backup(format!("备份校验失败: {}", e)))?;

        result.info(
            stage,
            format!(
                "已备份 {} 个磁盘文件 ({} 字节) 到 {}",
                backup.files.len(),
                backup.total_bytes(),
                backup.directory.display()
            ),
        );
        result.backup_dir = Some(backup.directory.clone());

        Ok(Some(backup.directory))
    }

    /// VHD 转换为 VHDX（与备份开关无关，二代虚拟机必需）
    async fn upgrade_disks(
        &self,
        vm: &VmRecord,
        result: &mut ConversionResult,
    ) -> Result<Vec<DiskDescriptor>, JobFailure> {
        let mut disks = Vec::with_capacity(vm.disks.len());

        for disk in &vm.disks {
            if !disk.format.is_legacy() {
                disks.push(disk.clone());
                continue;
            }

            let destination = target_path(disk);
            self.provider
                .convert_disk(&disk.path, &destination)
                .await
                .map_err(|e| {
                    JobFailure::backup(format!(
                        "磁盘格式转换失败 {}: {}",
                        disk.path.display(),
                        e
                    ))
                })?;

            result.info(
                ConversionStage::BackedUp,
                format!(
                    "已转换磁盘格式 {} -> {}",
                    disk.path.display(),
                    destination.display()
                ),
            );

            disks.push(DiskDescriptor {
                controller: disk.controller,
                path: destination,
                format: DiskFormat::Vhdx,
                size_bytes: disk.size_bytes,
            });
        }

        Ok(disks)
    }

    async fn write_capture(
        &self,
        job: &ConversionJob,
        captured: &CapturedConfiguration,
    ) -> Result<PathBuf, JobFailure> {
        let path = job.capture_dir().join(format!(
            "captured_{}.json",
            captured.captured_at.format("%Y%m%d_%H%M%S")
        ));

        write_json(&path, captured)
            .await
            .map_err(|e| JobFailure::backup(format!("写入采集文件失败: {}", e)))?;

        debug!("采集文件已保存: {}", path.display());
        Ok(path)
    }

    // ============================================
    // 拆除 / 重建
    // ============================================

    /// 返回登记绑定是否已删除
    async fn teardown(
        &self,
        job: &ConversionJob,
        vm: &VmRecord,
        cluster: Option<&ClusterMembership>,
        binding: Option<&RegistryBinding>,
        result: &mut ConversionResult,
    ) -> Result<bool, JobFailure> {
        let stage = ConversionStage::SourceRemoved;

        if let Some(membership) = cluster {
            if let Err(e) = self.cluster.remove_cluster_role(&membership.group_name).await {
                result.warn(
                    stage,
                    format!("移除集群角色 {} 失败: {}", membership.group_name, e),
                    Some(format!(
                        "转换后手动执行 Remove-ClusterGroup -Name '{}' -RemoveResources",
                        membership.group_name
                    )),
                );
            }
        }

        let mut registry_deleted = false;
        if let (Some(binding), Some(registry)) = (binding, self.registry.as_ref()) {
            if !job.skip_registry {
                match registry.delete_binding(&binding.resource_id).await {
                    Ok(()) | Err(RegistryError::NotFound(_)) => registry_deleted = true,
                    Err(e) => result.warn(
                        stage,
                        format!("删除登记绑定 {} 失败: {}", binding.resource_id, e),
                        Some("重建后的自动登记可能与旧记录冲突，需要手动删除旧记录".to_string()),
                    ),
                }
            }
        }

        // 不可逆点：删除虚拟机定义，磁盘文件保留
        self.provider.remove_vm(&vm.name).await.map_err(|e| {
            let guidance = match cluster {
                Some(m) => format!(
                    "原虚拟机仍然存在；集群角色可能已移除，请执行 Add-ClusterVirtualMachineRole -VMName '{}'",
                    m.group_name
                ),
                None => "原虚拟机仍然存在，处理后可重新执行".to_string(),
            };
            JobFailure::fatal(format!("删除原虚拟机失败: {}", e), guidance)
        })?;

        info!("已删除原虚拟机定义 {}（磁盘文件保留）", vm.name);
        Ok(registry_deleted)
    }

    async fn rebuild(
        &self,
        captured: &CapturedConfiguration,
        recovery_file: &std::path::Path,
    ) -> Result<String, JobFailure> {
        let vm = &captured.original;
        let primary = vm.nics.iter().find(|n| !n.legacy);

        let spec = NewVmSpec {
            name: vm.name.clone(),
            generation: Generation::Gen2,
            boot_disk_path: captured.disks[captured.boot_disk_index].path.clone(),
            switch_name: primary.and_then(|n| n.switch_name.clone()),
            memory_startup_bytes: vm.memory.startup_bytes,
        };

        self.provider.create_vm(&spec).await.map_err(|e| {
            let backup = captured
                .backup_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "无（备份已关闭）".to_string());
            error!(
                "虚拟机 {} 已删除但新虚拟机创建失败，需要手动恢复！备份: {}, 采集文件: {}",
                vm.name,
                backup,
                recovery_file.display()
            );
            JobFailure::fatal(
                format!("创建二代虚拟机失败（原虚拟机已删除）: {}", e),
                format!(
                    "使用磁盘备份 {} 和采集文件 {} 手动重建虚拟机",
                    backup,
                    recovery_file.display()
                ),
            )
        })
    }

    // ============================================
    // 配置
    // ============================================

    async fn configure(&self, vm: &VmRecord, result: &mut ConversionResult) {
        let stage = ConversionStage::TargetConfigured;
        let name = vm.name.as_str();

        if let Err(e) = self
            .provider
            .set_processor_count(name, vm.processor_count)
            .await
        {
            result.error(stage, format!("设置处理器数量失败: {}", e), None);
        }

        if vm.memory.dynamic {
            if let Err(e) = self.provider.set_dynamic_memory(name, &vm.memory).await {
                result.error(stage, format!("设置动态内存失败: {}", e), None);
            }
        }

        self.configure_secure_boot(name, result).await;
        self.attach_data_disks(vm, result).await;
        self.configure_nics(vm, result).await;

        if let Err(e) = self
            .provider
            .set_automatic_actions(name, &vm.automatic_actions)
            .await
        {
            result.warn(
                stage,
                format!("恢复自动启动/停止策略失败: {}", e),
                Some("使用 Set-VM 手动设置 AutomaticStartAction/AutomaticStopAction".to_string()),
            );
        }

        let notes = append_conversion_note(&vm.notes, Utc::now());
        if let Err(e) = self.provider.set_notes(name, &notes).await {
            result.warn(stage, format!("更新备注失败: {}", e), None);
        }

        if let Err(e) = self.provider.enable_tpm(name).await {
            result.warn(stage, format!("启用虚拟 TPM 失败: {}", e), None);
        }
    }

    /// 优先使用配置的模板，失败时关闭安全启动
    async fn configure_secure_boot(&self, name: &str, result: &mut ConversionResult) {
        let stage = ConversionStage::TargetConfigured;
        let template = &self.settings.secure_boot_template;

        let on = SecureBootSetting::On {
            template: template.clone(),
        };
        let Err(e) = self.provider.set_secure_boot(name, &on).await else {
            return;
        };

        result.warn(
            stage,
            format!("安全启动模板 {} 不可用: {}，改为关闭安全启动", template, e),
            Some("Linux 或旧版 Windows 来宾可改用 MicrosoftUEFICertificateAuthority 模板".to_string()),
        );

        if let Err(e) = self.provider.set_secure_boot(name, &SecureBootSetting::Off).await {
            result.warn(
                stage,
                format!("关闭安全启动失败: {}", e),
                Some(format!("手动执行 Set-VMFirmware -VMName '{}' -EnableSecureBoot Off", name)),
            );
        }
    }

    /// 非启动盘按原控制器地址升序挂到 SCSI 0:1 开始的位置
    async fn attach_data_disks(&self, vm: &VmRecord, result: &mut ConversionResult) {
        let stage = ConversionStage::TargetConfigured;

        for (slot, disk) in vm.data_disks().into_iter().enumerate() {
            let location = slot as u32 + 1;
            let path = target_path(disk);

            if location > MAX_SCSI_LOCATION {
                result.error(
                    stage,
                    format!("SCSI 控制器位置不足，未挂载 {}", path.display()),
                    Some("添加 SCSI 控制器后手动挂载".to_string()),
                );
                continue;
            }

            let address = ControllerAddress::scsi(0, location);
            match self.provider.attach_disk(&vm.name, &address, &path).await {
                Ok(()) => debug!("已挂载 {} 到 {}", path.display(), address),
                Err(e) => result.error(
                    stage,
                    format!("挂载磁盘 {} 失败: {}", path.display(), e),
                    Some(format!(
                        "手动执行 Add-VMHardDiskDrive -VMName '{}' -Path '{}'",
                        vm.name,
                        path.display()
                    )),
                ),
            }
        }
    }

    async fn configure_nics(&self, vm: &VmRecord, result: &mut ConversionResult) {
        let stage = ConversionStage::TargetConfigured;
        let primary_index = vm.nics.iter().position(|n| !n.legacy);
        let mut used_names: HashSet<String> = HashSet::new();
        used_names.insert(PRIMARY_ADAPTER_NAME.to_string());

        for (index, nic) in vm.nics.iter().enumerate() {
            if !nic.attachable_to(Generation::Gen2) {
                result.warn(
                    stage,
                    format!(
                        "跳过传统网卡 {}（交换机 {}, VLAN {}, MAC {}）：二代虚拟机不支持",
                        nic.name,
                        nic.switch_name.as_deref().unwrap_or("-"),
                        nic.vlan_id,
                        nic.mac_address.as_deref().unwrap_or("动态")
                    ),
                    Some("如需保留该网络连接，请手动添加标准网卡并设置相同参数".to_string()),
                );
                continue;
            }

            let adapter = if Some(index) == primary_index {
                PRIMARY_ADAPTER_NAME.to_string()
            } else {
                let adapter = unique_adapter_name(&nic.name, &used_names);
                used_names.insert(adapter.clone());

                if let Err(e) = self
                    .provider
                    .add_nic(&vm.name, &adapter, nic.switch_name.as_deref())
                    .await
                {
                    result.error(stage, format!("添加网卡 {} 失败: {}", adapter, e), None);
                    continue;
                }
                adapter
            };

            self.configure_nic(&vm.name, &adapter, nic, result).await;
        }
    }

    async fn configure_nic(
        &self,
        vm_name: &str,
        adapter: &str,
        nic: &NicDescriptor,
        result: &mut ConversionResult,
    ) {
        let stage = ConversionStage::TargetConfigured;

        if nic.is_tagged() {
            if let Err(e) = self.provider.set_nic_vlan(vm_name, adapter, nic.vlan_id).await {
                result.error(
                    stage,
                    format!("设置网卡 {} VLAN {} 失败: {}", adapter, nic.vlan_id, e),
                    None,
                );
            }
        }

        if let Some(mac) = &nic.mac_address {
            if let Err(e) = self.provider.set_nic_mac(vm_name, adapter, mac).await {
                result.warn(
                    stage,
                    format!("恢复网卡 {} 静态 MAC {} 失败: {}", adapter, mac, e),
                    Some("该地址可能已被其他虚拟机占用，核对后手动设置".to_string()),
                );
            }
        }
    }

    // ============================================
    // 集群 / 启动 / 登记
    // ============================================

    async fn rejoin_cluster(
        &self,
        name: &str,
        membership: &ClusterMembership,
        result: &mut ConversionResult,
    ) {
        match self.cluster.add_cluster_role(name).await {
            Ok(()) => result.info(
                ConversionStage::ClusterRejoined,
                format!("已重新加入集群角色 {}", membership.group_name),
            ),
            Err(e) => result.warn(
                ConversionStage::ClusterRejoined,
                format!("重新加入集群失败: {}", e),
                Some(format!(
                    "虚拟机可独立运行；手动执行 Add-ClusterVirtualMachineRole -VMName '{}'",
                    name
                )),
            ),
        }
    }

    async fn start(&self, name: &str, result: &mut ConversionResult) -> Result<(), JobFailure> {
        let stage = ConversionStage::Started;

        self.provider.start_vm(name).await.map_err(|e| {
            JobFailure::fatal(
                format!("启动虚拟机失败: {}", e),
                "检查固件启动顺序和安全启动设置，并确认来宾引导卷已转换为 GPT",
            )
        })?;

        let provider = &self.provider;
        let outcome = poll_until(&self.settings.heartbeat, self.clock.as_ref(), move || async move {
            match provider.heartbeat(name).await {
                Ok(status) => status.is_healthy(),
                Err(e) => {
                    debug!("查询心跳失败: {}", e);
                    false
                }
            }
        })
        .await;

        if outcome.satisfied {
            result.info(
                stage,
                format!("心跳正常（等待 {} 秒）", outcome.elapsed.as_secs()),
            );
        } else {
            result.warn(
                stage,
                format!(
                    "等待 {} 秒仍未收到心跳",
                    self.settings.heartbeat.timeout.as_secs()
                ),
                Some(
                    "虚拟机可能仍在启动；检查控制台输出、固件启动顺序和安全启动模板，\
                     并确认来宾引导卷已通过 MBR2GPT 转换"
                        .to_string(),
                ),
            );
        }

        Ok(())
    }

    /// 返回是否在上限内观察到新的登记
    async fn reconcile_registry(
        &self,
        job: &ConversionJob,
        previous: Option<&RegistryBinding>,
        previous_deleted: bool,
        result: &mut ConversionResult,
    ) -> bool {
        let stage = ConversionStage::RegistryReconciled;

        if job.skip_registry {
            result.info(stage, "已跳过登记对账");
            return false;
        }
        let Some(registry) = self.registry.as_ref() else {
            result.info(stage, "未配置登记客户端，跳过登记对账");
            return false;
        };

        let name = job.vm_name.as_str();
        let found: Mutex<Option<RegistryBinding>> = Mutex::new(None);
        let found_ref = &found;

        let outcome = poll_until(&self.settings.registry, self.clock.as_ref(), move || async move {
            let binding = match registry.find_binding(name).await {
                Ok(Some(binding)) => binding,
                Ok(None) => return false,
                Err(e) => {
                    debug!("查询登记失败: {}", e);
                    return false;
                }
            };

            // 旧记录未能删除时，只有 ID 变化才算新登记
            let is_new = previous_deleted
                || previous.map_or(true, |old| old.resource_id != binding.resource_id);
            if is_new {
                if let Ok(mut slot) = found_ref.lock() {
                    *slot = Some(binding);
                }
            }
            is_new
        })
        .await;

        let binding = found.into_inner().ok().flatten();

        match (outcome.satisfied, binding) {
            (true, Some(binding)) => {
                result.info(
                    stage,
                    format!(
                        "已观察到新登记 {}（等待 {} 秒）",
                        binding.resource_id,
                        outcome.elapsed.as_secs()
                    ),
                );

                if let Some(old) = previous.filter(|b| b.has_tags()) {
                    if let Err(e) = registry.apply_tags(&binding.resource_id, &old.tags).await {
                        result.warn(
                            stage,
                            format!("重新应用 {} 个标签失败: {}", old.tags.len(), e),
                            Some(format!(
                                "手动执行 az resource tag --ids {} --is-incremental",
                                binding.resource_id
                            )),
                        );
                    }
                }
                true
            }
            _ => {
                result.warn(
                    stage,
                    format!(
                        "等待 {} 秒未观察到 {} 的自动登记",
                        self.settings.registry.timeout.as_secs(),
                        name
                    ),
                    Some(registry.manual_registration_hint(name)),
                );
                false
            }
        }
    }
}

/// 网卡名称去重
fn unique_adapter_name(name: &str, used: &HashSet<String>) -> String {
    if !used.contains(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{} {}", name, n))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}
