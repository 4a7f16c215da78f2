//! 命令执行错误定义

use thiserror::Error;

/// 命令执行结果类型
pub type Result<T> = std::result::Result<T, ShellError>;

/// 命令执行错误类型
#[derive(Error, Debug)]
pub enum ShellError {
    /// 进程启动失败
    #[error("启动进程失败 ({program}): {message}")]
    SpawnError { program: String, message: String },

    /// 命令执行错误（非零退出码等）
    #[error("命令执行失败: {0}")]
    ExecutionError(String),

    /// 超时错误
    #[error("命令执行超时: {0}")]
    TimeoutError(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}
