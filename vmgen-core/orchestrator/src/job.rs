//! 转换任务

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 单台虚拟机的转换任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionJob {
    /// 目标虚拟机名称
    pub vm_name: String,
    /// 工作目录（快照、采集文件、报告）
    pub working_dir: PathBuf,
    /// 是否备份磁盘
    pub backup: bool,
    /// 跳过登记等待
    pub skip_registry: bool,
    /// 明确接受无备份执行
    pub accept_no_backup: bool,
}

impl ConversionJob {
    /// 创建任务（默认开启备份）
    pub fn new(vm_name: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            vm_name: vm_name.into(),
            working_dir: working_dir.into(),
            backup: true,
            skip_registry: false,
            accept_no_backup: false,
        }
    }

    /// 关闭备份，需要同时给出确认
    pub fn without_backup(mut self, accept_no_backup: bool) -> Self {
        self.backup = false;
        self.accept_no_backup = accept_no_backup;
        self
    }

    pub fn skip_registry(mut self, skip: bool) -> Self {
        self.skip_registry = skip;
        self
    }

    /// 采集配置文件所在目录
    pub fn capture_dir(&self) -> PathBuf {
        self.working_dir.join(&self.vm_name)
    }
}
