//! 单台虚拟机转换状态

use std::fmt;

use serde::{Deserialize, Serialize};

/// 转换状态机的状态
///
/// 线性推进，没有回退分支。`SourceRemoved` 是不可逆点：
/// 之后的任何失败都不会重建原一代虚拟机，只能依靠备份和采集文件手动恢复。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConversionStage {
    Pending,
    Validated,
    Captured,
    BackedUp,
    SourceRemoved,
    TargetCreated,
    TargetConfigured,
    ClusterRejoined,
    Started,
    RegistryReconciled,
    Completed,
}

impl ConversionStage {
    /// 是否已越过不可逆点
    pub fn past_point_of_no_return(&self) -> bool {
        *self >= ConversionStage::SourceRemoved
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStage::Pending => "Pending",
            ConversionStage::Validated => "Validated",
            ConversionStage::Captured => "Captured",
            ConversionStage::BackedUp => "BackedUp",
            ConversionStage::SourceRemoved => "SourceRemoved",
            ConversionStage::TargetCreated => "TargetCreated",
            ConversionStage::TargetConfigured => "TargetConfigured",
            ConversionStage::ClusterRejoined => "ClusterRejoined",
            ConversionStage::Started => "Started",
            ConversionStage::RegistryReconciled => "RegistryReconciled",
            ConversionStage::Completed => "Completed",
        }
    }
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
