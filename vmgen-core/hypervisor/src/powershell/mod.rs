//! 基于 PowerShell Hyper-V / FailoverClusters 模块的资源提供者

pub mod parser;
pub mod script;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use vmgen_shell::{CommandOutput, CommandRunner, ProcessRunner};

use crate::error::{HypervisorError, Result};
use crate::models::{
    AutomaticActions, ClusterMembership, ControllerAddress, HeartbeatStatus, MemoryPolicy,
    NewVmSpec, SecureBootSetting, VmRecord,
};
use crate::provider::{ClusterProvider, ResourceProvider};

use script::{bool_literal, quote, quote_path};

/// 默认 PowerShell 可执行文件
pub const DEFAULT_POWERSHELL: &str = "powershell.exe";

/// PowerShell 资源提供者
pub struct PowerShellProvider {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl PowerShellProvider {
    /// 使用指定的命令执行器创建
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// 使用本地子进程执行器创建
    pub fn local(program: impl Into<String>) -> Self {
        Self::new(Arc::new(ProcessRunner::default()), program)
    }

    /// 获取 PowerShell 程序名
    pub fn program(&self) -> &str {
        &self.program
    }

    fn args(script_body: &str) -> Vec<String> {
        vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            script::build(script_body),
        ]
    }

    /// 执行脚本，非零退出码转换为 `CommandFailed`
    async fn invoke(&self, operation: &str, script_body: &str) -> Result<CommandOutput> {
        debug!("PowerShell [{}]: {}", operation, script_body);

        let output = self
            .runner
            .run(&self.program, &Self::args(script_body))
            .await?;

        if !output.is_success() {
            let message = if output.stderr.is_empty() {
                output.stdout.clone()
            } else {
                output.stderr.clone()
            };
            return Err(HypervisorError::command_failed(operation, message));
        }

        Ok(output)
    }
}

#[async_trait]
impl ResourceProvider for PowerShellProvider {
    async fn list_vms(&self) -> Result<Vec<VmRecord>> {
        let body = format!(
            "{} {}",
            script::VM_RECORD_FUNCTION,
            script::to_json("@(Get-VM | ForEach-Object { ConvertTo-VmGenRecord $_ })")
        );
        let output = self.invoke("Get-VM", &body).await?;
        parser::parse_vm_list(&output.stdout)
    }

    async fn get_vm(&self, name: &str) -> Result<Option<VmRecord>> {
        let body = format!(
            "{} $vm = Get-VM -Name {} -ErrorAction SilentlyContinue; if ($null -ne $vm) {{ {} }}",
            script::VM_RECORD_FUNCTION,
            quote(name),
            script::to_json("ConvertTo-VmGenRecord $vm")
        );
        let output = self.invoke("Get-VM", &body).await?;
        parser::parse_vm(&output.stdout)
    }

    async fn convert_disk(&self, source: &Path, destination: &Path) -> Result<()> {
        info!(
            "转换磁盘格式: {} -> {}",
            source.display(),
            destination.display()
        );
        let body = format!(
            "Convert-VHD -Path {} -DestinationPath {} -VHDType Dynamic",
            quote_path(source),
            quote_path(destination)
        );
        self.invoke("Convert-VHD", &body).await?;
        Ok(())
    }

    async fn remove_vm(&self, name: &str) -> Result<()> {
        // Remove-VM 只删除配置，不删除磁盘文件
        let body = format!("Remove-VM -Name {} -Force", quote(name));
        self.invoke("Remove-VM", &body).await?;
        Ok(())
    }

    async fn create_vm(&self, spec: &NewVmSpec) -> Result<String> {
        let mut body = format!(
            "$vm = New-VM -Name {} -Generation {} -VHDPath {} -MemoryStartupBytes {}",
            quote(&spec.name),
            spec.generation,
            quote_path(&spec.boot_disk_path),
            spec.memory_startup_bytes
        );
        if let Some(switch) = &spec.switch_name {
            body.push_str(&format!(" -SwitchName {}", quote(switch)));
        }
        body.push_str("; $vm.Id.ToString()");

        let output = self.invoke("New-VM", &body).await?;
        let id = output.stdout.trim().to_string();
        if id.is_empty() {
            return Err(HypervisorError::ParseError(
                "New-VM 未返回虚拟机 ID".to_string(),
            ));
        }
        Ok(id)
    }

    async fn set_processor_count(&self, name: &str, count: u32) -> Result<()> {
        let body = format!("Set-VMProcessor -VMName {} -Count {}", quote(name), count);
        self.invoke("Set-VMProcessor", &body).await?;
        Ok(())
    }

    async fn set_dynamic_memory(&self, name: &str, memory: &MemoryPolicy) -> Result<()> {
        let body = format!(
            "Set-VMMemory -VMName {} -DynamicMemoryEnabled {} -StartupBytes {} -MinimumBytes {} -MaximumBytes {}",
            quote(name),
            bool_literal(memory.dynamic),
            memory.startup_bytes,
            memory.minimum_bytes,
            memory.maximum_bytes
        );
        self.invoke("Set-VMMemory", &body).await?;
        Ok(())
    }

    async fn set_secure_boot(&self, name: &str, setting: &SecureBootSetting) -> Result<()> {
        let body = match setting {
            SecureBootSetting::On { template } => format!(
                "Set-VMFirmware -VMName {} -EnableSecureBoot On -SecureBootTemplate {}",
                quote(name),
                quote(template)
            ),
            SecureBootSetting::Off => {
                format!("Set-VMFirmware -VMName {} -EnableSecureBoot Off", quote(name))
            }
        };
        self.invoke("Set-VMFirmware", &body).await?;
        Ok(())
    }

    async fn attach_disk(
        &self,
        name: &str,
        address: &ControllerAddress,
        path: &Path,
    ) -> Result<()> {
        let body = format!(
            "Add-VMHardDiskDrive -VMName {} -ControllerType {} -ControllerNumber {} -ControllerLocation {} -Path {}",
            quote(name),
            address.controller_type.as_str(),
            address.controller_number,
            address.controller_location,
            quote_path(path)
        );
        self.invoke("Add-VMHardDiskDrive", &body).await?;
        Ok(())
    }

    async fn set_nic_vlan(&self, name: &str, adapter: &str, vlan_id: u16) -> Result<()> {
        let body = format!(
            "Set-VMNetworkAdapterVlan -VMName {} -VMNetworkAdapterName {} -Access -VlanId {}",
            quote(name),
            quote(adapter),
            vlan_id
        );
        self.invoke("Set-VMNetworkAdapterVlan", &body).await?;
        Ok(())
    }

    async fn set_nic_mac(&self, name: &str, adapter: &str, mac: &str) -> Result<()> {
        let mac = parser::normalize_mac(mac)
            .ok_or_else(|| HypervisorError::InvalidRecord(format!("无效的 MAC 地址: {}", mac)))?;
        let body = format!(
            "Get-VMNetworkAdapter -VMName {} -Name {} | Set-VMNetworkAdapter -StaticMacAddress {}",
            quote(name),
            quote(adapter),
            quote(&mac)
        );
        self.invoke("Set-VMNetworkAdapter", &body).await?;
        Ok(())
    }

    async fn add_nic(&self, name: &str, adapter: &str, switch_name: Option<&str>) -> Result<()> {
        let mut body = format!(
            "Add-VMNetworkAdapter -VMName {} -Name {}",
            quote(name),
            quote(adapter)
        );
        if let Some(switch) = switch_name {
            body.push_str(&format!(" -SwitchName {}", quote(switch)));
        }
        self.invoke("Add-VMNetworkAdapter", &body).await?;
        Ok(())
    }

    async fn set_automatic_actions(&self, name: &str, actions: &AutomaticActions) -> Result<()> {
        let body = format!(
            "Set-VM -Name {} -AutomaticStartAction {} -AutomaticStopAction {} -AutomaticStartDelay {}",
            quote(name),
            actions.start_action.as_str(),
            actions.stop_action.as_str(),
            actions.start_delay_secs
        );
        self.invoke("Set-VM", &body).await?;
        Ok(())
    }

    async fn set_notes(&self, name: &str, notes: &str) -> Result<()> {
        let body = format!("Set-VM -Name {} -Notes {}", quote(name), quote(notes));
        self.invoke("Set-VM", &body).await?;
        Ok(())
    }

    async fn enable_tpm(&self, name: &str) -> Result<()> {
        let body = format!(
            "Set-VMKeyProtector -VMName {0} -NewLocalKeyProtector; Enable-VMTPM -VMName {0}",
            quote(name)
        );
        self.invoke("Enable-VMTPM", &body).await?;
        Ok(())
    }

    async fn start_vm(&self, name: &str) -> Result<()> {
        let body = format!("Start-VM -Name {}", quote(name));
        self.invoke("Start-VM", &body).await?;
        Ok(())
    }

    async fn heartbeat(&self, name: &str) -> Result<HeartbeatStatus> {
        let body = format!(
            "(Get-VMIntegrationService -VMName {} | Where-Object {{ $_.Name -eq 'Heartbeat' }}).PrimaryStatusDescription",
            quote(name)
        );
        let output = self.invoke("Get-VMIntegrationService", &body).await?;
        Ok(HeartbeatStatus::from_description(&output.stdout))
    }
}

#[async_trait]
impl ClusterProvider for PowerShellProvider {
    async fn cluster_role(&self, vm_name: &str) -> Result<Option<ClusterMembership>> {
        // 未安装故障转移集群模块的独立宿主机视为未加入集群
        let body = format!(
            "if (-not (Get-Command Get-ClusterGroup -ErrorAction SilentlyContinue)) {{ return }}; \
             $group = Get-ClusterGroup -ErrorAction Stop | Where-Object {{ $_.GroupType -eq 'VirtualMachine' -and $_.Name -eq {} }}; \
             if ($null -ne $group) {{ {} }}",
            quote(vm_name),
            script::to_json(
                "$group | Select-Object Name, @{n='OwnerNode';e={$_.OwnerNode.Name}}, @{n='State';e={$_.State.ToString()}}"
            )
        );
        let output = self.invoke("Get-ClusterGroup", &body).await?;
        parser::parse_cluster_group(&output.stdout)
    }

    async fn remove_cluster_role(&self, group_name: &str) -> Result<()> {
        let body = format!(
            "Remove-ClusterGroup -Name {} -RemoveResources -Force",
            quote(group_name)
        );
        self.invoke("Remove-ClusterGroup", &body).await?;
        Ok(())
    }

    async fn add_cluster_role(&self, vm_name: &str) -> Result<()> {
        let body = format!("Add-ClusterVirtualMachineRole -VMName {}", quote(vm_name));
        self.invoke("Add-ClusterVirtualMachineRole", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use vmgen_shell::ShellError;

    use crate::models::Generation;

    /// 脚本化执行器：按顺序返回预设输出并记录脚本
    struct ScriptedRunner {
        outputs: Mutex<Vec<CommandOutput>>,
        scripts: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs),
                scripts: Mutex::new(Vec::new()),
            })
        }

        fn scripts(&self) -> Vec<String> {
            self.scripts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> vmgen_shell::Result<CommandOutput> {
            assert_eq!(program, "pwsh");
            assert_eq!(args[0], "-NoProfile");
            self.scripts.lock().unwrap().push(args[3].clone());
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.is_empty() {
                return Err(ShellError::ExecutionError("no scripted output".to_string()));
            }
            Ok(outputs.remove(0))
        }
    }

    fn provider(runner: Arc<ScriptedRunner>) -> PowerShellProvider {
        PowerShellProvider::new(runner, "pwsh")
    }

    #[tokio::test]
    async fn test_get_vm_missing_returns_none() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("")]);
        let vm = provider(runner.clone()).get_vm("Ghost").await.unwrap();
        assert!(vm.is_none());
        assert!(runner.scripts()[0].contains("Get-VM -Name 'Ghost'"));
    }

    #[tokio::test]
    async fn test_create_vm_returns_new_id() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("9b2c-new-id\n")]);
        let spec = NewVmSpec {
            name: "Web01".to_string(),
            generation: Generation::Gen2,
            boot_disk_path: PathBuf::from("D:\\VMs\\Web01.vhdx"),
            switch_name: Some("External".to_string()),
            memory_startup_bytes: 2048,
        };

        let id = provider(runner.clone()).create_vm(&spec).await.unwrap();
        assert_eq!(id, "9b2c-new-id");

        let script = &runner.scripts()[0];
        assert!(script.contains("-Generation 2"));
        assert!(script.contains("-VHDPath 'D:\\VMs\\Web01.vhdx'"));
        assert!(script.contains("-SwitchName 'External'"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_failed() {
        let runner = ScriptedRunner::new(vec![CommandOutput::failed(1, "VM is locked")]);
        let result = provider(runner).start_vm("Web01").await;
        match result {
            Err(HypervisorError::CommandFailed { operation, message }) => {
                assert_eq!(operation, "Start-VM");
                assert_eq!(message, "VM is locked");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_names_are_quoted() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("")]);
        provider(runner.clone()).remove_vm("it's").await.unwrap();
        assert!(runner.scripts()[0].contains("Remove-VM -Name 'it''s' -Force"));
    }

    #[tokio::test]
    async fn test_set_nic_mac_rejects_invalid_address() {
        let runner = ScriptedRunner::new(vec![]);
        let result = provider(runner.clone())
            .set_nic_mac("Web01", "Network Adapter", "zz")
            .await;
        assert!(matches!(result, Err(HypervisorError::InvalidRecord(_))));
        assert!(runner.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_parses_status() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("OK")]);
        let status = provider(runner).heartbeat("Web01").await.unwrap();
        assert!(status.is_healthy());
    }

    #[tokio::test]
    async fn test_cluster_role_absent() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("")]);
        let role = provider(runner).cluster_role("Web01").await.unwrap();
        assert!(role.is_none());
    }

    #[tokio::test]
    async fn test_attach_disk_uses_controller_address() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("")]);
        provider(runner.clone())
            .attach_disk(
                "Web01",
                &ControllerAddress::scsi(0, 1),
                Path::new("D:\\VMs\\data.vhdx"),
            )
            .await
            .unwrap();
        assert!(runner.scripts()[0]
            .contains("-ControllerType SCSI -ControllerNumber 0 -ControllerLocation 1"));
    }
}
