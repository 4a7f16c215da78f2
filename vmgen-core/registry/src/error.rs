//! 登记客户端错误定义

use thiserror::Error;

/// 登记操作结果类型
pub type Result<T> = std::result::Result<T, RegistryError>;

/// 登记客户端错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    /// 命令执行错误
    #[error("命令执行错误: {0}")]
    Shell(#[from] vmgen_shell::ShellError),

    /// az CLI 返回失败
    #[error("az 命令失败: {0}")]
    CommandError(String),

    /// 未登录
    #[error("az CLI 未登录，请先执行 az login")]
    NotLoggedIn,

    /// 解析错误
    #[error("解析错误: {0}")]
    ParseError(String),

    /// 资源不存在
    #[error("登记资源不存在: {0}")]
    NotFound(String),
}
