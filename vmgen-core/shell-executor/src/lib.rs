//! VmGen 外部命令执行器
//!
//! 提供本地外部命令执行能力，支持：
//! - 启动子进程并捕获 stdout/stderr/退出码
//! - 命令级超时
//! - 可替换的 `CommandRunner` trait（测试中使用脚本化实现）
//!
//! # 示例
//!
//! ```ignore
//! use vmgen_shell::{CommandRunner, ProcessRunner, ShellConfig};
//!
//! let runner = ProcessRunner::new(ShellConfig::default());
//! let output = runner
//!     .run("pwsh", &["-NoProfile".into(), "-Command".into(), "Get-VM | ConvertTo-Json".into()])
//!     .await?;
//! println!("{}", output.stdout);
//! ```

mod config;
mod error;
mod runner;

pub use config::ShellConfig;
pub use error::{Result, ShellError};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
