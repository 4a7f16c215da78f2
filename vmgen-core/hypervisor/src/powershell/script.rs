//! PowerShell 脚本片段构造
//!
//! 所有外部传入的字符串都以单引号字面量嵌入脚本，内部单引号加倍转义。

use std::path::Path;

/// 单引号字面量
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 路径字面量
pub fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// 布尔字面量
pub fn bool_literal(value: bool) -> &'static str {
    if value {
        "$true"
    } else {
        "$false"
    }
}

/// 脚本前缀：任何非终止错误都视为失败
pub const PREAMBLE: &str = "$ErrorActionPreference = 'Stop'; $ProgressPreference = 'SilentlyContinue';";

/// 将 Hyper-V 虚拟机对象展开为统一结构的辅助函数
///
/// `Get-VM` 本身不包含磁盘、网卡和检查点信息，这里一次性汇总，
/// 输出字段与 `parser::RawVm` 一一对应。
pub const VM_RECORD_FUNCTION: &str = r#"
function ConvertTo-VmGenRecord($vm) {
    $disks = @(Get-VMHardDiskDrive -VM $vm | ForEach-Object {
        $vhd = Get-VHD -Path $_.Path -ErrorAction SilentlyContinue
        [pscustomobject]@{
            ControllerType     = $_.ControllerType.ToString()
            ControllerNumber   = $_.ControllerNumber
            ControllerLocation = $_.ControllerLocation
            Path               = $_.Path
            VhdFormat          = if ($vhd) { $vhd.VhdFormat.ToString() } else { $null }
            Size               = if ($vhd) { $vhd.Size } else { 0 }
        }
    })
    $nics = @(Get-VMNetworkAdapter -VM $vm | ForEach-Object {
        $vlan = Get-VMNetworkAdapterVlan -VMNetworkAdapter $_
        [pscustomobject]@{
            Name                     = $_.Name
            SwitchName               = $_.SwitchName
            MacAddress               = $_.MacAddress
            DynamicMacAddressEnabled = $_.DynamicMacAddressEnabled
            VlanId                   = if ($vlan.OperationMode.ToString() -eq 'Access') { $vlan.AccessVlanId } else { 0 }
            IsLegacy                 = $_.IsLegacy
            IPAddresses              = @($_.IPAddresses)
        }
    })
    [pscustomobject]@{
        Name                 = $vm.Name
        Id                   = $vm.Id.ToString()
        Generation           = $vm.Generation
        State                = $vm.State.ToString()
        ComputerName         = $vm.ComputerName
        ProcessorCount       = $vm.ProcessorCount
        MemoryStartup        = $vm.MemoryStartup
        MemoryMinimum        = $vm.MemoryMinimum
        MemoryMaximum        = $vm.MemoryMaximum
        DynamicMemoryEnabled = $vm.DynamicMemoryEnabled
        AutomaticStartAction = $vm.AutomaticStartAction.ToString()
        AutomaticStopAction  = $vm.AutomaticStopAction.ToString()
        AutomaticStartDelay  = $vm.AutomaticStartDelay
        Notes                = $vm.Notes
        CheckpointCount      = @(Get-VMSnapshot -VM $vm).Count
        Disks                = $disks
        Nics                 = $nics
    }
}
"#;

/// 以 JSON 输出表达式结果（数组保持为数组）
pub fn to_json(expression: &str) -> String {
    format!(
        "ConvertTo-Json -InputObject ({}) -Depth 5 -Compress",
        expression
    )
}

/// 拼接完整脚本
pub fn build(body: &str) -> String {
    format!("{} {}", PREAMBLE, body)
}
