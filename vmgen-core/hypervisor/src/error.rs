//! 虚拟化管理层错误定义

use thiserror::Error;
use vmgen_shell::ShellError;

/// 虚拟化管理层错误类型
#[derive(Error, Debug)]
pub enum HypervisorError {
    #[error("命令执行错误: {0}")]
    Shell(#[from] ShellError),

    #[error("操作失败 [{operation}]: {message}")]
    CommandFailed { operation: String, message: String },

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("记录无效: {0}")]
    InvalidRecord(String),
}

impl HypervisorError {
    pub fn command_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        HypervisorError::CommandFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// 虚拟化管理层结果类型
pub type Result<T> = std::result::Result<T, HypervisorError>;
