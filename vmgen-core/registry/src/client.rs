//! 登记客户端

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vmgen_shell::{CommandOutput, CommandRunner, ProcessRunner};

use crate::error::{RegistryError, Result};
use crate::models::{RegistryBinding, RegistryConfig};
use crate::parser::{format_tags, is_not_logged_in, is_resource_not_found, parse_resource_list};

/// 云管理平面登记接口
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// 按名称查询登记绑定，不存在时返回 `None`
    async fn find_binding(&self, name: &str) -> Result<Option<RegistryBinding>>;

    /// 删除登记资源
    async fn delete_binding(&self, resource_id: &str) -> Result<()>;

    /// 增量应用标签
    async fn apply_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<()>;

    /// 手动登记指引
    fn manual_registration_hint(&self, name: &str) -> String;
}

/// 基于 az CLI 的登记客户端
///
/// 通过 `az resource list|delete|tag` 操作登记资源
pub struct AzCliRegistry {
    runner: Arc<dyn CommandRunner>,
    config: RegistryConfig,
}

impl AzCliRegistry {
    /// 创建新的登记客户端
    ///
    /// # Arguments
    /// * `runner` - 命令执行器
    /// * `config` - 订阅/资源组等透传参数
    pub fn new(runner: Arc<dyn CommandRunner>, config: RegistryConfig) -> Self {
        Self { runner, config }
    }

    /// 使用本地子进程执行器创建
    pub fn local(config: RegistryConfig) -> Self {
        Self::new(Arc::new(ProcessRunner::default()), config)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn subscription_args(&self) -> Vec<String> {
        match &self.config.subscription_id {
            Some(sub) => vec!["--subscription".to_string(), sub.clone()],
            None => Vec::new(),
        }
    }

    async fn az(&self, args: Vec<String>) -> Result<CommandOutput> {
        debug!("az {}", args.join(" "));
        let output = self.runner.run(&self.config.program, &args).await?;

        if !output.is_success() {
            if is_not_logged_in(&output.stderr) {
                return Err(RegistryError::NotLoggedIn);
            }
            return Err(RegistryError::CommandError(format!(
                "退出码 {:?}: {}",
                output.exit_code,
                output.combined_output()
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl RegistryClient for AzCliRegistry {
    async fn find_binding(&self, name: &str) -> Result<Option<RegistryBinding>> {
        let mut args = vec![
            "resource".to_string(),
            "list".to_string(),
            "--resource-type".to_string(),
            self.config.resource_type.clone(),
            "--name".to_string(),
            name.to_string(),
        ];
        if let Some(rg) = &self.config.resource_group {
            args.push("--resource-group".to_string());
            args.push(rg.clone());
        }
        args.extend(self.subscription_args());
        args.push("-o".to_string());
        args.push("json".to_string());

        let output = self.az(args).await?;
        let binding = parse_resource_list(&output.stdout, name)?;

        match &binding {
            Some(b) => debug!("找到登记资源: {} ({} 个标签)", b.resource_id, b.tags.len()),
            None => debug!("未找到 {} 的登记资源", name),
        }

        Ok(binding)
    }

    async fn delete_binding(&self, resource_id: &str) -> Result<()> {
        info!("删除登记资源: {}", resource_id);

        let mut args = vec![
            "resource".to_string(),
            "delete".to_string(),
            "--ids".to_string(),
            resource_id.to_string(),
        ];
        args.extend(self.subscription_args());

        match self.az(args).await {
            Ok(_) => Ok(()),
            Err(RegistryError::CommandError(msg)) if is_resource_not_found(&msg) => {
                warn!("登记资源已不存在: {}", resource_id);
                Err(RegistryError::NotFound(resource_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }

        info!("应用 {} 个标签到 {}", tags.len(), resource_id);

        let mut args = vec![
            "resource".to_string(),
            "tag".to_string(),
            "--ids".to_string(),
            resource_id.to_string(),
            "--is-incremental".to_string(),
            "--tags".to_string(),
        ];
        args.extend(format_tags(tags));
        args.extend(self.subscription_args());

        self.az(args).await?;
        Ok(())
    }

    fn manual_registration_hint(&self, name: &str) -> String {
        let mut cmd = format!("azcmagent connect --resource-name \"{}\"", name);
        if let Some(rg) = &self.config.resource_group {
            cmd.push_str(&format!(" --resource-group \"{}\"", rg));
        }
        if let Some(sub) = &self.config.subscription_id {
            cmd.push_str(&format!(" --subscription-id \"{}\"", sub));
        }
        if let Some(loc) = &self.config.location {
            cmd.push_str(&format!(" --location \"{}\"", loc));
        }

        format!(
            "在虚拟机 {} 内确认 Connected Machine Agent 正常运行，或手动执行: {}",
            name, cmd
        )
    }
}
