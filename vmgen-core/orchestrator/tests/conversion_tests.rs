//! 单台虚拟机转换测试

mod common;

use std::time::Duration;

use common::*;
use vmgen_hypervisor::{ControllerAddress, DiskFormat, Generation, MemoryPolicy, PowerState};
use vmgen_orchestrator::*;

fn harness_with(vm: impl FnOnce(&std::path::Path) -> vmgen_hypervisor::VmRecord) -> Harness {
    let work = tempfile::tempdir().unwrap();
    let record = vm(work.path());
    Harness::new(RecordingProvider::new(vec![record]), work)
}

/// 默认跳过登记，登记相关测试显式打开
fn job(h: &Harness, name: &str) -> ConversionJob {
    ConversionJob::new(name, h.working_dir()).skip_registry(true)
}

fn warning_text(result: &ConversionResult) -> Vec<String> {
    result.warnings().map(|d| d.message.clone()).collect()
}

// ============================================
// 端到端场景
// ============================================

#[tokio::test]
async fn test_full_conversion_with_cluster_and_registry() {
    let mut h = harness_with(|dir| {
        let mut vm = gen1_vm("Web01", dir);
        vm.nics = vec![
            nic("Network Adapter", "vSwitch-Prod", 100, Some("00155D010203")),
            nic("Backup", "vSwitch-Backup", 0, None),
        ];
        vm
    });
    h.cluster = FakeCluster::new().with_member("Web01");
    h.registry = FakeRegistry::new(Some(2)).with_binding("Web01", &[("env", "prod")]);
    h.provider.heartbeat_after("Web01", 3);

    let result = h
        .converter()
        .convert(&job(&h, "Web01").skip_registry(false))
        .await;

    assert_eq!(result.status, ConversionStatus::Success, "{:?}", result.diagnostics);
    assert_eq!(result.stage, ConversionStage::Completed);
    assert_eq!(result.warnings().count(), 0);
    assert_eq!(result.new_vm_id.as_deref(), Some("Web01-new-id"));
    assert!(result.error.is_none());

    assert_eq!(
        h.provider.ops_for("Web01"),
        vec![
            "convert_disk",
            "remove_vm",
            "create_vm",
            "set_processor_count",
            "secure_boot_on",
            "attach_disk",
            "set_nic_vlan",
            "set_nic_mac",
            "add_nic",
            "set_automatic_actions",
            "set_notes",
            "enable_tpm",
            "start_vm",
        ]
    );

    let create = h.provider.find_call("Web01", "create_vm").unwrap();
    assert!(create.detail.starts_with("gen2 "));
    assert!(create.detail.contains("Web01.vhdx"));
    assert!(create.detail.ends_with("switch=vSwitch-Prod"));

    assert_eq!(
        h.provider.find_call("Web01", "set_nic_vlan").unwrap().detail,
        "Network Adapter 100"
    );
    assert_eq!(
        h.provider.find_call("Web01", "add_nic").unwrap().detail,
        "Backup vSwitch-Backup"
    );

    let live = h.provider.vm("Web01").unwrap();
    assert_eq!(live.generation, Generation::Gen2);
    assert_eq!(live.state, PowerState::Running);
    assert_eq!(live.processor_count, 4);
    assert!(live.notes.starts_with("web tier\n[vmgen] Converted"));

    assert_eq!(h.cluster.calls(), vec!["remove Web01", "add Web01"]);
    assert_eq!(h.registry.deletes(), vec!["/machines/Web01-old"]);
    let tagged = h.registry.tagged();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].0, "/machines/Web01-new");
    assert_eq!(tagged[0].1.get("env").map(String::as_str), Some("prod"));

    // 心跳: 2 次 10 秒间隔；登记: 1 次 30 秒间隔
    assert_eq!(
        h.clock.sleeps(),
        vec![
            Duration::from_secs(10),
            Duration::from_secs(10),
            Duration::from_secs(30)
        ]
    );
    assert_eq!(result.duration_ms, 50_000);
}

#[tokio::test]
async fn test_checkpoints_fail_validation_without_side_effects() {
    let h = harness_with(|dir| {
        let mut vm = gen1_vm("Web01", dir);
        vm.checkpoint_count = 2;
        vm
    });

    let result = h.converter().convert(&job(&h, "Web01")).await;

    assert_eq!(result.status, ConversionStatus::ValidationFailed);
    assert_eq!(result.status.as_str(), "VALIDATION FAILED");
    assert_eq!(result.stage, ConversionStage::Pending);
    assert!(result.error.as_deref().unwrap().contains("has 2 checkpoint(s)"));

    assert!(h.provider.calls().is_empty());
    assert!(h.cluster.calls().is_empty());
    assert!(h.registry.deletes().is_empty());
    assert!(!h.backup_root().exists());
    assert!(!h.working_dir().exists());
}

#[tokio::test]
async fn test_heartbeat_timeout_is_a_warning() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));
    h.provider.heartbeat_after("Web01", 0);

    let result = h
        .converter()
        .convert(&job(&h, "Web01"))
        .await;

    assert_eq!(result.status, ConversionStatus::Success);
    assert_eq!(result.stage, ConversionStage::Completed);

    let warnings: Vec<_> = result.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].stage, ConversionStage::Started);
    assert!(warnings[0].message.contains("300"));
    assert!(warnings[0].guidance.as_deref().unwrap().contains("MBR2GPT"));

    // 立即探测 + 每 10 秒一次，到 300 秒为止
    let sleeps = h.clock.sleeps();
    assert_eq!(sleeps.len(), 30);
    assert!(sleeps.iter().all(|d| *d == Duration::from_secs(10)));
    assert_eq!(h.clock.elapsed(), Duration::from_secs(300));

    assert!(h.registry.deletes().is_empty());
}

// ============================================
// 磁盘
// ============================================

#[tokio::test]
async fn test_legacy_disk_backed_up_before_format_conversion() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));

    let result = h.converter().convert(&job(&h, "Web01")).await;
    assert_eq!(result.status, ConversionStatus::Success);

    let backup_dir = result.backup_dir.clone().unwrap();
    assert!(backup_dir.starts_with(h.backup_root().join("Web01")));
    assert!(backup_dir.join("Web01.vhd").exists());
    assert!(backup_dir.join("Web01-data.vhdx").exists());

    let convert = h.provider.find_call("Web01", "convert_disk").unwrap();
    assert!(convert.detail.ends_with("Web01.vhdx"));

    let ops = h.provider.ops_for("Web01");
    let converted = ops.iter().position(|op| *op == "convert_disk").unwrap();
    let removed = ops.iter().position(|op| *op == "remove_vm").unwrap();
    assert!(converted < removed);

    let recovery = result.recovery_file.clone().unwrap();
    assert!(recovery.starts_with(h.working_dir().join("Web01")));
    let captured: CapturedConfiguration =
        serde_json::from_str(&std::fs::read_to_string(&recovery).unwrap()).unwrap();
    assert_eq!(captured.original.generation, Generation::Gen1);
    assert_eq!(captured.original.disks[0].format, DiskFormat::Vhd);
    assert_eq!(captured.disks[0].format, DiskFormat::Vhdx);
    assert_eq!(captured.boot_disk_index, 0);
    assert_eq!(captured.backup_dir, Some(backup_dir));
}

#[tokio::test]
async fn test_boot_disk_selected_by_ide_address() {
    let h = harness_with(|dir| {
        let mut vm = gen1_vm("Db01", dir);
        vm.disks = vec![
            disk(dir, "Db01-data.vhdx", ControllerAddress::scsi(0, 0)),
            disk(dir, "Db01-logs.vhdx", ControllerAddress::ide(0, 1)),
            disk(dir, "Db01.vhd", ControllerAddress::ide(0, 0)),
        ];
        vm
    });

    let result = h.converter().convert(&job(&h, "Db01")).await;
    assert_eq!(result.status, ConversionStatus::Success);

    let create = h.provider.find_call("Db01", "create_vm").unwrap();
    assert!(create.detail.contains("Db01.vhdx"));

    let attached: Vec<String> = h
        .provider
        .calls_for("Db01")
        .into_iter()
        .filter(|c| c.op == "attach_disk")
        .map(|c| c.detail)
        .collect();
    assert_eq!(attached.len(), 2);
    assert!(attached[0].starts_with("SCSI 0:1 "));
    assert!(attached[0].ends_with("Db01-logs.vhdx"));
    assert!(attached[1].starts_with("SCSI 0:2 "));
    assert!(attached[1].ends_with("Db01-data.vhdx"));
}

#[tokio::test]
async fn test_missing_disk_file_fails_backup() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));
    let vm = h.provider.vm("Web01").unwrap();
    std::fs::remove_file(&vm.disks[1].path).unwrap();

    let result = h.converter().convert(&job(&h, "Web01")).await;

    assert_eq!(result.status, ConversionStatus::BackupFailed);
    assert_eq!(result.stage, ConversionStage::Captured);
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.provider.vm("Web01").unwrap().generation, Generation::Gen1);
}

#[tokio::test]
async fn test_disk_conversion_failure_leaves_source_intact() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));
    h.provider.fail("convert_disk", "Web01");

    let result = h.converter().convert(&job(&h, "Web01")).await;

    assert_eq!(result.status, ConversionStatus::BackupFailed);
    assert!(result.error.as_deref().unwrap().contains("磁盘格式转换失败"));
    assert_eq!(h.provider.ops_for("Web01"), vec!["convert_disk"]);
    assert!(h.provider.vm("Web01").is_some());
}

// ============================================
// 备份开关
// ============================================

#[tokio::test]
async fn test_disabled_backup_requires_acknowledgment() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));

    let result = h
        .converter()
        .convert(&job(&h, "Web01").without_backup(false))
        .await;

    assert_eq!(result.status, ConversionStatus::ValidationFailed);
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.provider.reads(), 0);
}

#[tokio::test]
async fn test_acknowledged_no_backup_warns() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));

    let result = h
        .converter()
        .convert(&job(&h, "Web01").without_backup(true))
        .await;

    assert_eq!(result.status, ConversionStatus::Success);
    assert!(result.backup_dir.is_none());
    assert!(result.recovery_file.is_some());
    assert!(!h.backup_root().exists());
    assert!(warning_text(&result).iter().any(|w| w.contains("磁盘备份已关闭")));
}

// ============================================
// 网卡与配置
// ============================================

#[tokio::test]
async fn test_legacy_nic_is_skipped_with_warning() {
    let h = harness_with(|dir| {
        let mut vm = gen1_vm("App01", dir);
        vm.nics = vec![
            legacy_nic("Legacy Network Adapter", "vSwitch-Old"),
            nic("Network Adapter", "vSwitch-Prod", 0, None),
        ];
        vm
    });

    let result = h.converter().convert(&job(&h, "App01")).await;

    assert_eq!(result.status, ConversionStatus::Success);
    let warnings = warning_text(&result);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("Legacy Network Adapter"));
    assert!(warnings[0].contains("vSwitch-Old"));

    assert!(h.provider.find_call("App01", "add_nic").is_none());
    let create = h.provider.find_call("App01", "create_vm").unwrap();
    assert!(create.detail.ends_with("switch=vSwitch-Prod"));
}

#[tokio::test]
async fn test_additional_nic_named_like_primary_is_renamed() {
    let h = harness_with(|dir| {
        let mut vm = gen1_vm("App01", dir);
        vm.nics = vec![
            nic("Network Adapter", "vSwitch-Prod", 0, None),
            nic("Network Adapter", "vSwitch-Storage", 30, None),
        ];
        vm
    });

    let result = h.converter().convert(&job(&h, "App01")).await;

    assert_eq!(result.status, ConversionStatus::Success);
    assert_eq!(
        h.provider.find_call("App01", "add_nic").unwrap().detail,
        "Network Adapter 2 vSwitch-Storage"
    );
    assert_eq!(
        h.provider.find_call("App01", "set_nic_vlan").unwrap().detail,
        "Network Adapter 2 30"
    );
}

#[tokio::test]
async fn test_mac_failure_is_a_warning() {
    let h = harness_with(|dir| {
        let mut vm = gen1_vm("Web01", dir);
        vm.nics = vec![nic("Network Adapter", "vSwitch-Prod", 0, Some("00155D010203"))];
        vm
    });
    h.provider.fail("set_nic_mac", "Web01");

    let result = h.converter().convert(&job(&h, "Web01")).await;

    assert_eq!(result.status, ConversionStatus::Success);
    assert!(warning_text(&result)[0].contains("00155D010203"));
}

#[tokio::test]
async fn test_secure_boot_falls_back_to_off() {
    let h = harness_with(|dir| gen1_vm("Linux01", dir));
    h.provider.fail("secure_boot_on", "Linux01");

    let result = h.converter().convert(&job(&h, "Linux01")).await;

    assert_eq!(result.status, ConversionStatus::Success);
    let ops = h.provider.ops_for("Linux01");
    assert!(ops.contains(&"secure_boot_on"));
    assert!(ops.contains(&"secure_boot_off"));
    assert!(warning_text(&result)[0].contains("MicrosoftWindows"));
}

#[tokio::test]
async fn test_dynamic_memory_restored_only_when_enabled() {
    let h = harness_with(|dir| {
        let mut vm = gen1_vm("Web01", dir);
        vm.memory = MemoryPolicy {
            startup_bytes: 2048 * 1024 * 1024,
            minimum_bytes: 512 * 1024 * 1024,
            maximum_bytes: 8192 * 1024 * 1024,
            dynamic: true,
        };
        vm
    });

    let result = h.converter().convert(&job(&h, "Web01")).await;

    assert_eq!(result.status, ConversionStatus::Success);
    assert!(h.provider.find_call("Web01", "set_dynamic_memory").is_some());
    assert!(h.provider.vm("Web01").unwrap().memory.dynamic);
}

#[tokio::test]
async fn test_processor_failure_marks_job_failed() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));
    h.provider.fail("set_processor_count", "Web01");

    let result = h.converter().convert(&job(&h, "Web01")).await;

    assert_eq!(result.status, ConversionStatus::Failed);
    assert_eq!(result.stage, ConversionStage::Completed);
    assert!(result.error.as_deref().unwrap().contains("设置处理器数量失败"));
    // 其余步骤照常执行
    assert!(h.provider.find_call("Web01", "start_vm").is_some());
}

#[tokio::test]
async fn test_cluster_rejoin_failure_is_a_warning() {
    let mut h = harness_with(|dir| gen1_vm("Web01", dir));
    h.cluster = FakeCluster::new().with_member("Web01");
    h.cluster.fail_add();

    let result = h
        .converter()
        .convert(&job(&h, "Web01"))
        .await;

    assert_eq!(result.status, ConversionStatus::Success);
    let warning = result.warnings().next().unwrap();
    assert_eq!(warning.stage, ConversionStage::ClusterRejoined);
    assert!(warning
        .guidance
        .as_deref()
        .unwrap()
        .contains("Add-ClusterVirtualMachineRole"));
}

// ============================================
// 不可逆步骤失败
// ============================================

#[tokio::test]
async fn test_remove_failure_stops_before_point_of_no_return() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));
    h.provider.fail("remove_vm", "Web01");

    let result = h.converter().convert(&job(&h, "Web01")).await;

    assert_eq!(result.status, ConversionStatus::Failed);
    assert_eq!(result.stage, ConversionStage::BackedUp);
    assert!(!result.stage.past_point_of_no_return());
    assert!(result.error.as_deref().unwrap().contains("删除原虚拟机失败"));
    assert!(h.provider.find_call("Web01", "create_vm").is_none());
}

#[tokio::test]
async fn test_create_failure_points_to_recovery_artifacts() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));
    h.provider.fail("create_vm", "Web01");

    let result = h.converter().convert(&job(&h, "Web01")).await;

    assert_eq!(result.status, ConversionStatus::Failed);
    assert_eq!(result.stage, ConversionStage::SourceRemoved);
    assert!(result.error.as_deref().unwrap().contains("创建二代虚拟机失败"));

    let error = result.errors().next().unwrap();
    let guidance = error.guidance.as_deref().unwrap();
    let backup_dir = result.backup_dir.as_ref().unwrap();
    assert!(guidance.contains(&backup_dir.display().to_string()));
    assert!(result.recovery_file.as_ref().unwrap().exists());

    assert!(h.provider.vm("Web01").is_none());
    assert!(h.provider.find_call("Web01", "start_vm").is_none());
}

// ============================================
// 登记
// ============================================

#[tokio::test]
async fn test_registry_timeout_emits_manual_guidance() {
    let mut h = harness_with(|dir| gen1_vm("Web01", dir));
    h.registry = FakeRegistry::new(None).with_binding("Web01", &[("owner", "ops")]);

    let result = h
        .converter()
        .convert(&job(&h, "Web01").skip_registry(false))
        .await;

    assert_eq!(result.status, ConversionStatus::Success);
    let warning = result.warnings().next().unwrap();
    assert_eq!(warning.stage, ConversionStage::RegistryReconciled);
    assert_eq!(
        warning.guidance.as_deref(),
        Some("azcmagent connect --resource-name Web01")
    );
    assert!(h.registry.tagged().is_empty());

    assert_eq!(h.clock.elapsed(), Duration::from_secs(600));
    assert_eq!(h.clock.sleeps().len(), 20);
}

#[tokio::test]
async fn test_missing_binding_is_a_warning() {
    let mut h = harness_with(|dir| gen1_vm("Web01", dir));
    h.registry = FakeRegistry::new(Some(1));

    let result = h
        .converter()
        .convert(&job(&h, "Web01").skip_registry(false))
        .await;

    assert_eq!(result.status, ConversionStatus::Success);
    let warnings = warning_text(&result);
    assert!(warnings[0].contains("没有登记绑定"));
    assert!(h.registry.deletes().is_empty());
}

// ============================================
// 快照比较
// ============================================

#[tokio::test]
async fn test_snapshot_drift_is_reported() {
    let h = harness_with(|dir| gen1_vm("Web01", dir));

    let mut stale = h.provider.vm("Web01").unwrap();
    stale.processor_count = 2;
    SnapshotStore::new(h.working_dir())
        .write(&[stale])
        .await
        .unwrap();

    let result = h
        .converter()
        .convert(&job(&h, "Web01"))
        .await;

    assert_eq!(result.status, ConversionStatus::Success);
    let warnings = warning_text(&result);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("处理器数量 2 -> 4"));
}
