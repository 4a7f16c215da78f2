//! 预检
//!
//! 批量执行前逐台检查，任一条件不满足即移入跳过列表；
//! 单台转换的校验步骤复用同一组规则。

use std::fmt;

use vmgen_hypervisor::{Generation, PowerState, VmRecord};

/// 跳过原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    QueryFailed(String),
    NotPoweredOff(PowerState),
    AlreadyConverted,
    HasCheckpoints(u32),
    ConfigFileMissing,
    NotInSnapshot,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotFound => write!(f, "VM not found"),
            SkipReason::QueryFailed(e) => write!(f, "VM query failed: {}", e),
            SkipReason::NotPoweredOff(state) => write!(f, "not powered off (state: {})", state),
            SkipReason::AlreadyConverted => write!(f, "already converted"),
            SkipReason::HasCheckpoints(n) => write!(f, "has {} checkpoint(s)", n),
            SkipReason::ConfigFileMissing => write!(f, "configuration file missing"),
            SkipReason::NotInSnapshot => write!(f, "not found in snapshot"),
        }
    }
}

/// 检查实时记录是否满足转换前置条件
///
/// 顺序: 存在 → 一代 → 关机 → 无检查点
///
/// 代际先于电源状态检查，已转换并运行中的虚拟机报告为已转换
pub fn check_live(vm: Option<&VmRecord>) -> Result<(), SkipReason> {
    let vm = vm.ok_or(SkipReason::NotFound)?;

    if vm.generation != Generation::Gen1 {
        return Err(SkipReason::AlreadyConverted);
    }
    if !vm.state.is_off() {
        return Err(SkipReason::NotPoweredOff(vm.state.clone()));
    }
    if vm.has_checkpoints() {
        return Err(SkipReason::HasCheckpoints(vm.checkpoint_count));
    }

    Ok(())
}
