//! 命令执行器配置

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 命令执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// 单条命令执行超时
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,

    /// 工作目录（可选，默认继承当前进程）
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_command_timeout() -> Duration {
    // Convert-VHD 等磁盘操作可能持续很久
    Duration::from_secs(3600)
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            working_dir: None,
        }
    }
}

impl ShellConfig {
    /// 设置命令执行超时
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// 设置工作目录
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShellConfig::default();
        assert_eq!(config.command_timeout, Duration::from_secs(3600));
        assert!(config.working_dir.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = ShellConfig::default()
            .command_timeout(Duration::from_secs(10))
            .working_dir("/tmp");
        assert_eq!(config.command_timeout.as_secs(), 10);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_humantime_deserialize() {
        let config: ShellConfig =
            serde_json::from_str(r#"{"command_timeout": "5m"}"#).unwrap();
        assert_eq!(config.command_timeout, Duration::from_secs(300));
    }
}
