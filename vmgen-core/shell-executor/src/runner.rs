//! 本地子进程执行实现

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ShellConfig;
use crate::error::{Result, ShellError};

/// 命令执行输出
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
    /// 退出码
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// 构造成功输出（测试与脚本化实现常用）
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// 构造失败输出
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    /// 检查命令是否成功执行
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// 获取合并的输出（stdout + stderr）
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// 外部命令执行接口
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 执行命令并返回原始输出（非零退出码不视为错误）
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// 执行命令并检查是否成功
    async fn run_checked(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = self.run(program, args).await?;

        if !output.is_success() {
            return Err(ShellError::ExecutionError(format!(
                "{} (退出码 {:?}): {}",
                program,
                output.exit_code,
                if output.stderr.is_empty() {
                    &output.stdout
                } else {
                    &output.stderr
                }
            )));
        }

        Ok(output)
    }
}

/// 基于 tokio 子进程的命令执行器
pub struct ProcessRunner {
    config: ShellConfig,
}

impl ProcessRunner {
    /// 创建执行器
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    /// 获取配置
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    async fn run_internal(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| ShellError::SpawnError {
            program: program.to_string(),
            message: e.to_string(),
        })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ShellError::ExecutionError(format!("等待进程 {} 失败: {}", program, e)))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code(),
        };

        debug!(
            "命令执行完成, 退出码: {:?}, stdout 长度: {}, stderr 长度: {}",
            result.exit_code,
            result.stdout.len(),
            result.stderr.len()
        );

        Ok(result)
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("执行命令: {} ({} 个参数)", program, args.len());

        timeout(self.config.command_timeout, self.run_internal(program, args))
            .await
            .map_err(|_| {
                ShellError::TimeoutError(format!(
                    "{} 超过 {} 秒未完成",
                    program,
                    self.config.command_timeout.as_secs()
                ))
            })?
    }
}
